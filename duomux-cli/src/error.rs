use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Mux(#[from] duomux_engine::MuxError),

    #[error("Invalid output: {0}")]
    InvalidOutput(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[cfg(not(unix))]
    #[error("Muxing is not supported on this platform")]
    Unsupported,
}

pub type Result<T> = std::result::Result<T, AppError>;
