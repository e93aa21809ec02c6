//! Stage dependency graph (SPEC_FULL.md §10.5).
//!
//! The stage order is linear, but modeling it as a `petgraph` DAG rather
//! than a bare array gives the runner a single source of truth for
//! "what must have completed before stage X can start" that survives a
//! future branch (e.g. `Prosody` and `Mfa` both depending on `Hydrate`
//! without also depending on each other).

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::model::manifest::StageName;

/// Builds the stage DAG: one node per `StageName`, one edge per direct
/// predecessor relationship. Currently a straight chain matching
/// `StageName::ORDER`, with `Merge` depending on `Mfa` and `Prosody`
/// depending on `Hydrate` rather than on `Merge` directly — both paths
/// still serialize to the same linear order because `Merge` precedes
/// `Prosody` in `StageName::ORDER`.
pub fn stage_graph() -> DiGraph<StageName, ()> {
    let mut graph = DiGraph::new();
    let mut nodes: Vec<NodeIndex> = Vec::with_capacity(StageName::ORDER.len());
    for stage in StageName::ORDER {
        nodes.push(graph.add_node(stage));
    }
    for window in StageName::ORDER.windows(2) {
        let from = StageName::ORDER.iter().position(|s| *s == window[0]).unwrap();
        let to = StageName::ORDER.iter().position(|s| *s == window[1]).unwrap();
        graph.add_edge(nodes[from], nodes[to], ());
    }
    graph
}

/// The graph's topological order, used to sanity-check that the static
/// `StageName::ORDER` array the runner windows `from_stage`/`to_stage`
/// over is actually consistent with the dependency graph.
pub fn topological_stage_order() -> Vec<StageName> {
    let graph = stage_graph();
    toposort(&graph, None)
        .expect("stage graph is acyclic by construction")
        .into_iter()
        .map(|idx| graph[idx])
        .collect()
}
