use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipemendError {
    #[error("config error: {0}")]
    Config(String),

    #[error("hosting API returned {status}: {message}")]
    Hosting { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("language model error: {0}")]
    Llm(#[from] ollama_client::OllamaError),

    #[error("invalid pipeline definition: {0}")]
    InvalidPipeline(String),

    #[error("invalid repository '{0}': expected owner/name")]
    InvalidRepo(String),

    #[error("routing violation: {0}")]
    Routing(String),

    #[error("missing run state: {0}")]
    MissingState(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Regex(#[from] regex::Error),
}

pub type Result<T> = std::result::Result<T, PipemendError>;
