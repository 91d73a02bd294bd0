use thiserror::Error;

#[derive(Error, Debug)]
pub enum TubescopeError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Invalid video link: {url}")]
    InvalidUrl { url: String },

    #[error("Rate limited: {detail}")]
    RateLimited { detail: String },

    #[error("Request rejected ({status}): {detail}")]
    Rejected { status: u16, detail: String },

    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Configuration error: {reason}")]
    Config { reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),
}

impl TubescopeError {
    pub fn config(reason: impl Into<String>) -> Self {
        TubescopeError::Config {
            reason: reason.into(),
        }
    }

    /// Whether a read that failed with this error may be attempted again.
    pub fn is_transient(&self) -> bool {
        match self {
            TubescopeError::ApiError(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.is_request()
                    || e
                        .status()
                        .is_some_and(|s| s.is_server_error() || s.as_u16() == 408)
            }
            TubescopeError::Rejected { status, .. } => *status >= 500 || *status == 408,
            TubescopeError::IoError(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, TubescopeError>;
