use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use reqwest::blocking::{Client, Response};

use crate::types::{GenerateRequest, GenerateResponse, PullStatus, TagsResponse};
use crate::{OllamaError, Result};

// ─── ClientConfig ─────────────────────────────────────────────────────────

/// Connection settings for [`OllamaClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    /// Default per-request timeout. A [`GenerateRequest::timeout`] overrides it.
    pub timeout: Duration,
    /// Total attempts for a generate call, including the first.
    pub max_retries: u32,
    /// First backoff delay; doubles per attempt up to `backoff_cap`.
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            timeout: Duration::from_secs(120),
            max_retries: 3,
            backoff_base: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(10),
        }
    }
}

// ─── OllamaClient ─────────────────────────────────────────────────────────

pub struct OllamaClient {
    http: Client,
    config: ClientConfig,
    healthy: AtomicBool,
}

impl OllamaClient {
    pub fn new(mut config: ClientConfig) -> Result<Self> {
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            config,
            healthy: AtomicBool::new(false),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Probe `GET /api/tags`. A successful probe is remembered so later
    /// generate calls skip it.
    pub fn health_check(&self) -> Result<()> {
        let url = format!("{}/api/tags", self.config.base_url);
        match self.http.get(&url).send() {
            Ok(resp) if resp.status().is_success() => {
                self.healthy.store(true, Ordering::SeqCst);
                tracing::debug!(base_url = %self.config.base_url, "ollama health check passed");
                Ok(())
            }
            Ok(resp) => {
                tracing::warn!(status = resp.status().as_u16(), "ollama health check failed");
                Err(OllamaError::Unavailable(self.config.base_url.clone()))
            }
            Err(e) => {
                tracing::warn!(error = %e, "ollama health check failed");
                Err(OllamaError::Unavailable(self.config.base_url.clone()))
            }
        }
    }

    pub fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.config.base_url);
        let resp = check_status(self.http.get(&url).send()?)?;
        let tags: TagsResponse = serde_json::from_str(&resp.text()?)?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Make sure `model` is present locally, pulling it when it is not.
    pub fn ensure_model(&self, model: &str) -> Result<()> {
        if self.list_models()?.iter().any(|m| m == model) {
            return Ok(());
        }
        tracing::info!(model, "pulling model");
        let url = format!("{}/api/pull", self.config.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "name": model, "stream": false }))
            .timeout(Duration::from_secs(3600))
            .send()?;
        let resp = check_status(resp)?;
        let status: PullStatus = serde_json::from_str(&resp.text()?)?;
        if status.status == "success" {
            Ok(())
        } else {
            Err(OllamaError::ModelNotAvailable(model.to_string()))
        }
    }

    /// Run a single non-streaming completion.
    ///
    /// Requires a passing health probe (performed on first use), pulls the
    /// model if missing, and retries transient failures up to
    /// `max_retries` attempts with exponential backoff.
    pub fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse> {
        if !self.healthy.load(Ordering::SeqCst) {
            self.health_check()?;
        }
        self.ensure_model(&request.model)?;

        let attempts = self.config.max_retries.max(1);
        let mut attempt = 1;
        loop {
            let started = Instant::now();
            match self.generate_once(request) {
                Ok(resp) => {
                    tracing::info!(
                        model = %request.model,
                        duration_ms = started.elapsed().as_millis() as u64,
                        prompt_tokens = resp.prompt_eval_count,
                        completion_tokens = resp.eval_count,
                        "ollama generate complete"
                    );
                    return Ok(resp);
                }
                Err(e) if e.is_transient() && attempt < attempts => {
                    let delay = self.backoff(attempt);
                    tracing::warn!(attempt, error = %e, delay_ms = delay.as_millis() as u64, "ollama generate failed, retrying");
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(attempt, error = %e, "ollama generate failed");
                    return Err(e);
                }
            }
        }
    }

    fn generate_once(&self, request: &GenerateRequest) -> Result<GenerateResponse> {
        let url = format!("{}/api/generate", self.config.base_url);
        let mut builder = self.http.post(&url).json(request);
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        let resp = check_status(builder.send()?)?;
        Ok(serde_json::from_str(&resp.text()?)?)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.config
            .backoff_base
            .saturating_mul(factor)
            .min(self.config.backoff_cap)
    }
}

fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().unwrap_or_default();
    Err(OllamaError::Status {
        code: status.as_u16(),
        body,
    })
}

// ─── Tests ────────────────────────────────────────────────────────────────
