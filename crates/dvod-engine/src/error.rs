use std::path::PathBuf;
use std::sync::Arc;

use dlive_api::ApiError;

/// Error taxonomy of the download pipeline.
///
/// Clone-able (sources Arc-wrapped) so terminal errors can be delivered over
/// the event channel as well as returned to the caller.
#[derive(Debug, thiserror::Error, Clone)]
pub enum DownloadError {
    #[error("invalid input: {0}")]
    Input(String),
    #[error("broadcast not found: {0}")]
    NotFound(String),
    #[error("upstream error (HTTP {status}): {body}")]
    Upstream { status: u16, body: String },
    #[error("network error: {source}")]
    Network {
        #[from]
        source: Arc<reqwest::Error>,
    },
    #[error("malformed playlist: {0}")]
    PlaylistParse(String),
    #[error("segment {sequence} fetch failed: {message}")]
    SegmentFetch {
        sequence: u64,
        status: Option<u16>,
        message: String,
    },
    #[error("variant index {index} is out of range (1..={available})")]
    InvalidSelection { index: u32, available: usize },
    #[error("destination already being downloaded: {}", .0.display())]
    Conflict(PathBuf),
    #[error("i/o error: {source}")]
    Io {
        #[from]
        source: Arc<std::io::Error>,
    },
    #[error("download cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for DownloadError {
    fn from(err: reqwest::Error) -> Self {
        DownloadError::Network {
            source: Arc::new(err),
        }
    }
}

impl From<std::io::Error> for DownloadError {
    fn from(err: std::io::Error) -> Self {
        DownloadError::Io {
            source: Arc::new(err),
        }
    }
}

impl From<ApiError> for DownloadError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::InvalidUrl(input) => DownloadError::Input(input),
            ApiError::NotFound(what) => DownloadError::NotFound(what),
            ApiError::Upstream { status, body } => DownloadError::Upstream { status, body },
            ApiError::Http { source } => DownloadError::Network { source },
        }
    }
}

impl DownloadError {
    /// Stable kind label for presentation layers.
    pub fn kind(&self) -> &'static str {
        match self {
            DownloadError::Input(_) => "input",
            DownloadError::NotFound(_) => "not-found",
            DownloadError::Upstream { .. } => "upstream",
            DownloadError::Network { .. } => "network",
            DownloadError::PlaylistParse(_) => "playlist-parse",
            DownloadError::SegmentFetch { .. } => "segment-fetch",
            DownloadError::InvalidSelection { .. } => "invalid-selection",
            DownloadError::Conflict(_) => "conflict",
            DownloadError::Io { .. } => "io",
            DownloadError::Cancelled => "cancelled",
        }
    }
}
