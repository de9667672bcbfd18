//! HTTP client for the external embedding service.
//!
//! Submits unit code to any provider speaking the
//! `POST {base}/api/embeddings` shape: `{model, prompt, options:{num_ctx}}`
//! in, `{embedding: [f32]}` out. Requests fan out concurrently with a small
//! bound; transient failures retry with exponential backoff and exhausted
//! units simply stay unembedded — they never poison the run.

use std::path::Path;
use std::time::Duration;

use futures_util::{stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::config::DryConfig;
use crate::error::{DryError, DryResult};
use crate::extractor::registry::global_registry;
use crate::types::IndexUnit;

/// Maximum concurrent requests to the embedding service.
const MAX_IN_FLIGHT: usize = 8;
/// Attempts per unit before giving up.
const MAX_ATTEMPTS: u32 = 3;
/// Base backoff delay, doubled per retry.
const BACKOFF_BASE: Duration = Duration::from_millis(250);
/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    options: EmbeddingOptions,
}

#[derive(Serialize)]
struct EmbeddingOptions {
    num_ctx: u32,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

/// Outcome counters for one embedding pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmbedStats {
    /// Units that received a vector.
    pub embedded: usize,
    /// Units that failed after all retries.
    pub failed: usize,
    /// Units skipped because they already carry a vector.
    pub skipped: usize,
}

/// Client for the configured embedding service.
#[derive(Debug)]
pub struct EmbeddingClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    num_ctx: u32,
}

impl EmbeddingClient {
    /// Build a client from the repo config.
    pub fn new(config: &DryConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            endpoint: format!("{}/api/embeddings", config.embedding_source),
            model: config.embedding_model.clone(),
            num_ctx: config.context_length,
        }
    }

    /// Attach embeddings to every unit that is missing one.
    ///
    /// Units that already carry a vector are skipped; re-extraction removes
    /// and recreates changed units, so a present vector is always current.
    pub async fn embed_units(&self, units: &mut [IndexUnit]) -> EmbedStats {
        let mut stats = EmbedStats::default();

        let targets: Vec<(usize, String)> = units
            .iter()
            .enumerate()
            .filter(|(_, u)| u.embedding.is_none())
            .map(|(i, u)| (i, build_prompt(u)))
            .collect();
        stats.skipped = units.len() - targets.len();

        if targets.is_empty() {
            return stats;
        }

        tracing::info!(
            units = targets.len(),
            skipped = stats.skipped,
            endpoint = %self.endpoint,
            "embedding units"
        );

        let results: Vec<(usize, DryResult<Vec<f32>>)> = stream::iter(targets)
            .map(|(i, prompt)| async move { (i, self.embed_with_retry(&prompt).await) })
            .buffer_unordered(MAX_IN_FLIGHT)
            .collect()
            .await;

        for (i, result) in results {
            match result {
                Ok(vector) => {
                    units[i].embedding = Some(vector);
                    stats.embedded += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        unit = %units[i].id,
                        error = %e,
                        "embedding failed after retries"
                    );
                    stats.failed += 1;
                }
            }
        }

        tracing::info!(
            embedded = stats.embedded,
            failed = stats.failed,
            "embedding pass finished"
        );
        stats
    }

    async fn embed_with_retry(&self, prompt: &str) -> DryResult<Vec<f32>> {
        let mut last_error = String::new();
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(BACKOFF_BASE * 2u32.pow(attempt - 1)).await;
            }
            match self.embed_once(prompt).await {
                Ok(vector) => return Ok(vector),
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "embedding request failed");
                    last_error = e;
                }
            }
        }
        Err(DryError::Embed {
            unit_id: String::new(),
            message: last_error,
        })
    }

    async fn embed_once(&self, prompt: &str) -> Result<Vec<f32>, String> {
        let request = EmbeddingRequest {
            model: &self.model,
            prompt,
            options: EmbeddingOptions { num_ctx: self.num_ctx },
        };

        let response = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("service returned {status}"));
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| format!("invalid response body: {e}"))?;

        if body.embedding.is_empty() {
            return Err("service returned an empty vector".into());
        }

        // Providers differ on whether vectors come back normalized.
        let mut vector = body.embedding;
        crate::vector::l2_normalize(&mut vector);
        Ok(vector)
    }
}

/// Prompt sent to the embedder for one unit: the unit code plus a trailing
/// context line naming the functions it calls.
pub fn build_prompt(unit: &IndexUnit) -> String {
    let calls = global_registry()
        .for_path(Path::new(&unit.file_path))
        .map(|e| e.extract_calls_from_unit(&unit.file_path, &unit.id))
        .unwrap_or_default();

    if calls.is_empty() {
        unit.code.clone()
    } else {
        format!("{}\n// calls: {}", unit.code, calls.join(", "))
    }
}
