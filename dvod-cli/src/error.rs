use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Download(#[from] dvod_engine::DownloadError),

    #[error("{0}")]
    Api(#[from] dlive_api::ApiError),

    #[error("initialization failed: {0}")]
    Initialization(String),
}
