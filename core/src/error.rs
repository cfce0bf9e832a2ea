use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("backend returned no results")]
    EmptyResults,
}

pub type Result<T> = std::result::Result<T, BackendError>;
