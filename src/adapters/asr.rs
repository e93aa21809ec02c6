//! ASR adapter contract (SPEC_FULL.md §6).
//!
//! The engine itself — HTTP service or in-process model loader — is out of
//! scope (§1); this module defines the boundary the pipeline core calls
//! through and ships one concrete implementation (an HTTP client) following
//! the config-struct-plus-async-constructor shape of the reference crate's
//! `WhisperEngine`.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::model::asr::AsrResponse;

use super::AdapterError;

/// `transcribe(audio_path, language, model?) -> AsrResponse` (§6). The
/// adapter owns retries and health checks; on permanent failure it raises
/// `AdapterError::AsrUnavailable`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AsrEngine: Send + Sync {
    async fn transcribe(
        &self,
        audio_path: &Path,
        language: Option<&str>,
        model: Option<&str>,
    ) -> Result<AsrResponse, AdapterError>;
}

/// Configuration for the HTTP-backed ASR client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpAsrConfig {
    pub service_url: String,
    pub retries: usize,
    pub request_timeout_secs: u64,
}

impl Default for HttpAsrConfig {
    fn default() -> Self {
        HttpAsrConfig {
            service_url: String::new(),
            retries: 0,
            request_timeout_secs: 120,
        }
    }
}

/// Posts the chapter audio as multipart form data to an ASR HTTP service and
/// deserializes its JSON response as an `AsrResponse`. Retries up to
/// `config.retries` times (§7's `ExternalFailure` recovery policy, default 0
/// for deterministic runs) before surfacing `AsrUnavailable`.
pub struct HttpAsrEngine {
    client: reqwest::Client,
    config: HttpAsrConfig,
}

impl HttpAsrEngine {
    pub fn new(config: HttpAsrConfig) -> Result<HttpAsrEngine, AdapterError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AdapterError::AsrUnavailable(e.to_string()))?;
        Ok(HttpAsrEngine { client, config })
    }

    /// A lightweight reachability probe, separate from `transcribe`, so the
    /// runner can fail fast before burning the chapter's ASR semaphore slot
    /// on a service that is known to be down.
    pub async fn health_check(&self) -> Result<(), AdapterError> {
        let url = format!("{}/health", self.config.service_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AdapterError::AsrUnavailable(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(AdapterError::AsrUnavailable(format!("health check returned {}", response.status())))
        }
    }

    async fn transcribe_once(
        &self,
        audio_path: &Path,
        language: Option<&str>,
        model: Option<&str>,
    ) -> Result<AsrResponse, AdapterError> {
        let bytes = tokio::fs::read(audio_path).await?;
        let file_name = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio.wav".to_string());

        let mut form = reqwest::multipart::Form::new()
            .part("audio", reqwest::multipart::Part::bytes(bytes).file_name(file_name));
        if let Some(language) = language {
            form = form.text("language", language.to_string());
        }
        if let Some(model) = model {
            form = form.text("model", model.to_string());
        }

        let url = format!("{}/transcribe", self.config.service_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| AdapterError::AsrUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AdapterError::AsrUnavailable(format!("service returned {}", response.status())));
        }

        response
            .json::<AsrResponse>()
            .await
            .map_err(|e| AdapterError::AsrUnavailable(format!("malformed ASR response: {e}")))
    }
}

#[async_trait]
impl AsrEngine for HttpAsrEngine {
    async fn transcribe(
        &self,
        audio_path: &Path,
        language: Option<&str>,
        model: Option<&str>,
    ) -> Result<AsrResponse, AdapterError> {
        let mut last_err = None;
        for attempt in 0..=self.config.retries {
            match self.transcribe_once(audio_path, language, model).await {
                Ok(response) => {
                    if attempt > 0 {
                        debug!(attempt, "ASR transcription succeeded after retry");
                    }
                    return Ok(response);
                }
                Err(err) => {
                    warn!(attempt, error = %err, "ASR transcription attempt failed");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| AdapterError::AsrUnavailable("no attempts made".into())))
    }
}
