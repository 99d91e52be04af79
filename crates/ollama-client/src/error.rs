use thiserror::Error;

#[derive(Debug, Error)]
pub enum OllamaError {
    #[error("Ollama is not reachable at {0}")]
    Unavailable(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Ollama returned {code}: {body}")]
    Status { code: u16, body: String },

    #[error("model '{0}' is not available and could not be pulled")]
    ModelNotAvailable(String),

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl OllamaError {
    /// Transient failures are worth retrying: connection problems, timeouts
    /// and server-side 5xx responses.
    pub fn is_transient(&self) -> bool {
        match self {
            OllamaError::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            OllamaError::Status { code, .. } => *code >= 500,
            _ => false,
        }
    }
}
