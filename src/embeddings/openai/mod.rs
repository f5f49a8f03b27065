
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, warn};
use url::Url;

use super::{EmbedError, EmbeddingProvider};
use crate::config::EmbeddingConfig;

const DEFAULT_RETRY_BACKOFF_MS: u64 = 1000;
const EXPONENTIAL_BACKOFF_BASE: u32 = 2;

/// Client for an OpenAI-compatible `/v1/embeddings` endpoint
#[derive(Debug, Clone)]
pub struct EmbeddingClient {
    endpoint: Url,
    model: String,
    api_key: Option<String>,
    agent: ureq::Agent,
    retry_attempts: u32,
    retry_backoff: Duration,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl EmbeddingClient {
    #[inline]
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let base_url = config
            .base_url()
            .context("Failed to parse embedding base URL from config")?;
        let endpoint = endpoint_url(&base_url)?;

        Ok(Self {
            endpoint,
            model: config.model.clone(),
            api_key: config.resolved_api_key(),
            agent: build_agent(Duration::from_secs(config.timeout_seconds)),
            retry_attempts: config.retry_attempts.max(1),
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Base delay of the exponential backoff between retries
    #[inline]
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    #[inline]
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|key| !key.trim().is_empty());
        self
    }

    #[inline]
    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some()
    }

    #[inline]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Blocking embedding call. Returns an empty vector when no credential is set.
    #[inline]
    pub fn embed_blocking(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let Some(api_key) = self.api_key.as_deref() else {
            debug!("No embedding credential configured, skipping embedding");
            return Ok(Vec::new());
        };

        debug!("Generating embedding for text (length: {})", text.len());

        let request_json = serde_json::to_string(&EmbeddingRequest {
            model: &self.model,
            input: text,
        })
        .map_err(|e| EmbedError::InvalidResponse(format!("Failed to serialize request: {e}")))?;
        let authorization = format!("Bearer {}", api_key);

        let response_text = self.request_with_retry(|| {
            self.agent
                .post(self.endpoint.as_str())
                .header("Authorization", &authorization)
                .header("Content-Type", "application/json")
                .send(&request_json)
                .and_then(|mut resp| {
                    let status = resp.status().as_u16();
                    resp.body_mut()
                        .read_to_string()
                        .map(|body| (status, body))
                })
        })?;

        let response: EmbeddingResponse = serde_json::from_str(&response_text)
            .map_err(|e| EmbedError::InvalidResponse(format!("Failed to parse response: {e}")))?;

        let embedding = response
            .data
            .into_iter()
            .next()
            .map(|data| data.embedding)
            .filter(|embedding| !embedding.is_empty())
            .ok_or_else(|| {
                EmbedError::InvalidResponse("Response contained no embedding".to_string())
            })?;

        debug!("Generated embedding with {} dimensions", embedding.len());
        Ok(embedding)
    }

    fn request_with_retry<F>(&self, mut request_fn: F) -> Result<String, EmbedError>
    where
        F: FnMut() -> Result<(u16, String), ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("HTTP request attempt {}/{}", attempt, self.retry_attempts);

            match request_fn() {
                Ok((status, body)) if (200..300).contains(&status) => {
                    debug!("Request succeeded on attempt {}", attempt);
                    return Ok(body);
                }
                Ok((status, body)) => {
                    let error = EmbedError::Provider {
                        status,
                        message: provider_message(&body),
                    };
                    if status >= 500 || status == 429 {
                        warn!(
                            "Provider error (status {}), attempt {}/{}",
                            status, attempt, self.retry_attempts
                        );
                        last_error = Some(error);
                    } else {
                        warn!("Client error (status {}), not retrying", status);
                        return Err(error);
                    }
                }
                Err(
                    error @ (ureq::Error::ConnectionFailed
                    | ureq::Error::HostNotFound
                    | ureq::Error::Timeout(_)
                    | ureq::Error::Io(_)),
                ) => {
                    warn!(
                        "Transport error: {}, attempt {}/{}",
                        error, attempt, self.retry_attempts
                    );
                    last_error = Some(EmbedError::Transport(error.to_string()));
                }
                Err(error) => {
                    warn!("Non-retryable error: {}", error);
                    return Err(EmbedError::Transport(error.to_string()));
                }
            }

            // Wait before retry (exponential backoff)
            if attempt < self.retry_attempts {
                let delay = self.retry_backoff * EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1);
                debug!("Waiting {:?} before retry", delay);
                std::thread::sleep(delay);
            }
        }

        error!("All retry attempts failed for request to {}", self.endpoint);

        Err(last_error
            .unwrap_or_else(|| EmbedError::Transport("Request failed after retries".to_string())))
    }
}

#[async_trait]
impl EmbeddingProvider for EmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        if !self.has_credentials() {
            debug!("No embedding credential configured, skipping embedding");
            return Ok(Vec::new());
        }

        let client = self.clone();
        let text = text.to_string();
        tokio::task::spawn_blocking(move || client.embed_blocking(&text))
            .await
            .map_err(|e| EmbedError::Transport(format!("Embedding task failed: {e}")))?
    }

    fn model(&self) -> &str {
        &self.model
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .build()
        .into()
}

/// `{base}/v1/embeddings`, keeping any path prefix of the base URL
fn endpoint_url(base_url: &Url) -> Result<Url> {
    let mut base = base_url.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }

    base.join("v1/embeddings")
        .context("Failed to build embeddings URL")
}

fn provider_message(body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ErrorResponse>(body) {
        return parsed.error.message;
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        "empty response body".to_string()
    } else {
        trimmed.to_string()
    }
}
