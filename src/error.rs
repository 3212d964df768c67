use thiserror::Error;

#[derive(Error, Debug)]
pub enum TencordError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl TencordError {
    /// Classify a non-2xx HTTP status into the transport taxonomy.
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        let detail = format!("{status}: {body}");
        match status.as_u16() {
            401 | 403 => TencordError::Unauthorized(detail),
            429 => TencordError::RateLimited(detail),
            404 => TencordError::NotFound(detail),
            400..=499 => TencordError::InvalidRequest(detail),
            _ => TencordError::Server(detail),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, TencordError::RateLimited(_))
    }
}

pub type Result<T> = std::result::Result<T, TencordError>;
