use std::sync::Arc;

#[derive(Debug, thiserror::Error, Clone)]
pub enum ApiError {
    #[error("invalid broadcast url: {0}")]
    InvalidUrl(String),
    #[error("broadcast not found: {0}")]
    NotFound(String),
    #[error("upstream error (HTTP {status}): {body}")]
    Upstream { status: u16, body: String },
    #[error("http error: {source}")]
    Http {
        #[from]
        source: Arc<reqwest::Error>,
    },
}

// Arc wrapping keeps the enum Clone so it can cross event channels.
impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Http {
            source: Arc::new(err),
        }
    }
}
