//! Manifest & fingerprint data model (SPEC_FULL.md §3, §4.A, §4.H).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The strictly ordered stage sequence from SPEC_FULL.md §4.H. `Merge` is the
/// timing-merge post-step implicit in `Mfa`; it is modeled as its own stage
/// here (rather than folded silently into `Mfa`) so its fingerprint, status,
/// and artifacts are independently inspectable, matching §10.5's stage-graph
/// supplement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    BookIndex,
    Asr,
    Anchors,
    Transcript,
    Hydrate,
    Mfa,
    Merge,
    Prosody,
    Treatment,
}

impl StageName {
    /// The full stage order, used for `from_stage`/`to_stage` windowing and
    /// as the topological order of the `petgraph` stage DAG (§10.5).
    pub const ORDER: [StageName; 9] = [
        StageName::BookIndex,
        StageName::Asr,
        StageName::Anchors,
        StageName::Transcript,
        StageName::Hydrate,
        StageName::Mfa,
        StageName::Merge,
        StageName::Prosody,
        StageName::Treatment,
    ];

    pub fn index(self) -> usize {
        Self::ORDER.iter().position(|s| *s == self).expect("StageName::ORDER is exhaustive")
    }
}

/// A stage's fingerprint: a SHA-256 digest folding together the hashes of
/// its upstream inputs, its canonically serialized parameters, and the tool
/// versions that produced it (§4.A).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fingerprint {
    pub input_hash: String,
    pub params_hash: String,
    pub tool_versions: BTreeMap<String, String>,
    pub digest: String,
}

/// Lifecycle state of one stage within a chapter's manifest (§4.H).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// One artifact a stage declares, relative to the chapter's work directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRecord {
    pub name: String,
    pub rel_path: String,
}

/// Manifest record for a single stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRecord {
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
    pub artifacts: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StageRecord {
    pub fn pending() -> StageRecord {
        StageRecord {
            status: StageStatus::Pending,
            fingerprint: None,
            artifacts: BTreeMap::new(),
            error_kind: None,
            message: None,
        }
    }
}

/// Input-file bookkeeping recorded once per chapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputRecord {
    pub path: String,
    pub sha256: String,
    pub duration_sec: f64,
}

/// The per-chapter manifest: the authoritative record of what has run, with
/// what fingerprint, and which artifacts it produced (§3, §4.A).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub chapter_id: String,
    pub work_dir: String,
    pub input: InputRecord,
    pub stages: BTreeMap<StageName, StageRecord>,
}

impl Manifest {
    pub fn new(chapter_id: impl Into<String>, work_dir: impl Into<String>, input: InputRecord) -> Manifest {
        let stages = StageName::ORDER
            .iter()
            .map(|s| (*s, StageRecord::pending()))
            .collect();
        Manifest {
            chapter_id: chapter_id.into(),
            work_dir: work_dir.into(),
            input,
            stages,
        }
    }

    /// A stage is `completed` iff its record says so *and* every declared
    /// artifact still exists on disk and its fingerprint matches the one
    /// supplied (§3 Manifest invariant). This method checks the fingerprint
    /// and status only; artifact existence is checked by the store, which
    /// has the chapter's work directory.
    pub fn fingerprint_matches(&self, stage: StageName, fingerprint: &Fingerprint) -> bool {
        self.stages
            .get(&stage)
            .map(|record| {
                record.status == StageStatus::Completed
                    && record.fingerprint.as_ref() == Some(fingerprint)
            })
            .unwrap_or(false)
    }

    pub fn stage(&self, stage: StageName) -> Option<&StageRecord> {
        self.stages.get(&stage)
    }

    pub fn set_stage(&mut self, stage: StageName, record: StageRecord) {
        self.stages.insert(stage, record);
    }
}
