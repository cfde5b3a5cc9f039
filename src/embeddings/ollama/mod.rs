#[cfg(test)]
mod tests;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use super::EmbeddingProvider;
use crate::config::OllamaConfig;
use crate::{CancellationSignal, KnowledgeError};

pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 768;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Embedding provider backed by an Ollama server's `/api/embed` endpoint
///
/// HTTP calls are blocking; the [`EmbeddingProvider`] impl moves them onto the
/// blocking thread pool.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    model: String,
    batch_size: u32,
    dimension: usize,
    agent: ureq::Agent,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    version: String,
}

/// A model installed on the Ollama server
#[derive(Debug, Clone, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub details: Option<ModelDetails>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelDetails {
    pub family: Option<String>,
    pub parameter_size: Option<String>,
}

impl ModelInfo {
    /// Whether this entry is `model`, treating a missing tag as `:latest`
    #[inline]
    pub fn matches(&self, model: &str) -> bool {
        normalize_model_name(&self.name) == normalize_model_name(model)
    }
}

fn normalize_model_name(name: &str) -> String {
    if name.contains(':') {
        name.to_string()
    } else {
        format!("{}:latest", name)
    }
}

/// Transport failures and 5xx responses are worth another attempt
fn is_transient(error: &ureq::Error) -> bool {
    match error {
        ureq::Error::StatusCode(status) => *status >= 500,
        ureq::Error::ConnectionFailed
        | ureq::Error::HostNotFound
        | ureq::Error::Timeout(_)
        | ureq::Error::Io(_) => true,
        _ => false,
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let base_url = config
            .ollama_url()
            .context("Invalid Ollama address in configuration")?;

        Ok(Self {
            base_url,
            model: config.model.clone(),
            batch_size: config.batch_size.max(1),
            dimension: config.embedding_dimension as usize,
            agent: build_agent(REQUEST_TIMEOUT),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self
    }

    /// Total attempts per request, at least one
    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    #[inline]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Check that the server answers and has the configured model installed
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        let version = self.ping().context("Ollama server is not responding")?;
        self.validate_model()?;
        info!(
            "Ollama {} at {} is serving {}",
            version, self.base_url, self.model
        );
        Ok(())
    }

    /// Server version string, fetched to confirm the server is up
    #[inline]
    pub fn ping(&self) -> Result<String> {
        let response: VersionResponse = self.get_json("/api/version")?;
        debug!("Ollama at {} reports version {}", self.base_url, response.version);
        Ok(response.version)
    }

    #[inline]
    pub fn validate_model(&self) -> Result<()> {
        let models = self.list_models()?;
        if models.iter().any(|model| model.matches(&self.model)) {
            return Ok(());
        }

        let installed: Vec<&str> = models.iter().map(|model| model.name.as_str()).collect();
        warn!("Model {} is not installed on {}", self.model, self.base_url);
        bail!(
            "Model '{}' is not installed (available: {}); run `ollama pull {}`",
            self.model,
            installed.join(", "),
            self.model
        )
    }

    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let response: TagsResponse = self.get_json("/api/tags")?;
        debug!("{} models installed", response.models.len());
        Ok(response.models)
    }

    /// Embed `texts` in order, sending at most `batch_size` texts per request
    #[inline]
    pub fn generate_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());

        for (batch_number, batch) in texts.chunks(self.batch_size as usize).enumerate() {
            let request = EmbedRequest {
                model: &self.model,
                input: batch,
            };
            let response: EmbedResponse = self
                .post_json("/api/embed", &request)
                .with_context(|| format!("Embedding batch {} failed", batch_number + 1))?;

            if response.embeddings.len() != batch.len() {
                bail!(
                    "Ollama returned {} embeddings for {} texts",
                    response.embeddings.len(),
                    batch.len()
                );
            }
            embeddings.extend(response.embeddings);
        }

        debug!(
            "Embedded {} texts with {} in batches of {}",
            texts.len(),
            self.model,
            self.batch_size
        );
        Ok(embeddings)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("Failed to build Ollama URL for {}", path))
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.endpoint(path)?;
        let body = self.send_with_retry(&url, || {
            self.agent
                .get(url.as_str())
                .call()
                .and_then(|mut response| response.body_mut().read_to_string())
        })?;
        serde_json::from_str(&body).with_context(|| format!("Unexpected response from {}", url))
    }

    fn post_json<B: Serialize, T: DeserializeOwned>(&self, path: &str, payload: &B) -> Result<T> {
        let url = self.endpoint(path)?;
        let payload = serde_json::to_string(payload).context("Failed to encode request body")?;
        let body = self.send_with_retry(&url, || {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(payload.as_str())
                .and_then(|mut response| response.body_mut().read_to_string())
        })?;
        serde_json::from_str(&body).with_context(|| format!("Unexpected response from {}", url))
    }

    /// Run `request`, retrying transient failures with exponential backoff
    fn send_with_retry<F>(&self, url: &Url, mut request: F) -> Result<String>
    where
        F: FnMut() -> Result<String, ureq::Error>,
    {
        let mut backoff = Duration::from_millis(INITIAL_BACKOFF_MS);

        for attempt in 1..=self.retry_attempts {
            let error = match request() {
                Ok(body) => return Ok(body),
                Err(error) => error,
            };

            if !is_transient(&error) {
                return Err(anyhow!("Request to {} failed: {}", url, error));
            }
            if attempt == self.retry_attempts {
                error!(
                    "Giving up on {} after {} attempts: {}",
                    url, attempt, error
                );
                return Err(anyhow!(
                    "Request to {} failed after {} attempts: {}",
                    url,
                    attempt,
                    error
                ));
            }

            warn!(
                "Request to {} failed ({}), retrying in {:?} [{}/{}]",
                url, error, backoff, attempt, self.retry_attempts
            );
            std::thread::sleep(backoff);
            backoff *= 2;
        }

        Err(anyhow!("No request attempts were made to {}", url))
    }

    fn check_dimensions(&self, embeddings: &[Vec<f32>]) -> crate::Result<()> {
        match embeddings.iter().find(|e| e.len() != self.dimension) {
            Some(bad) => Err(KnowledgeError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            }),
            None => Ok(()),
        }
    }

    /// Run a blocking embedding request off the async runtime, abandoning it on cancellation
    async fn embed_off_thread(
        &self,
        texts: Vec<String>,
        signal: &CancellationSignal,
    ) -> crate::Result<Vec<Vec<f32>>> {
        if signal.is_cancelled() {
            return Err(KnowledgeError::Cancelled);
        }

        let client = self.clone();
        let task = tokio::task::spawn_blocking(move || client.generate_embeddings(&texts));

        let embeddings = tokio::select! {
            joined = task => joined
                .map_err(|e| KnowledgeError::Embedding(format!("Embedding task failed: {}", e)))?
                .map_err(|e| KnowledgeError::Embedding(format!("{:#}", e)))?,
            () = signal.cancelled() => {
                debug!("Embedding request cancelled");
                return Err(KnowledgeError::Cancelled);
            }
        };

        self.check_dimensions(&embeddings)?;
        Ok(embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaClient {
    #[inline]
    async fn embed(&self, text: &str, signal: &CancellationSignal) -> crate::Result<Vec<f32>> {
        self.embed_off_thread(vec![text.to_string()], signal)
            .await?
            .pop()
            .ok_or_else(|| KnowledgeError::Embedding("Ollama returned no embedding".to_string()))
    }

    #[inline]
    async fn embed_batch(
        &self,
        texts: &[String],
        signal: &CancellationSignal,
    ) -> crate::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.embed_off_thread(texts.to_vec(), signal).await
    }

    #[inline]
    fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    fn name(&self) -> &str {
        &self.model
    }
}
