use thiserror::Error;

/// 单个分片请求失败的原因，全部可重试
#[derive(Error, Debug)]
pub enum TransmissionError {
    #[error("HTTP error {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server error: status code {status}, body: {body}")]
    Status {
        status: u16,
        body: String,
    },

    #[error("Invalid response body: {0}")]
    Decode(String),

    #[error("Chunk rejected by server: {}", .0.as_deref().unwrap_or("no message"))]
    Rejected(Option<String>),
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Cannot derive file identity: {0}")]
    Identity(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("IO error {0}")]
    Io(#[from] std::io::Error),

    #[error("Transmission failed: {0}")]
    Transmission(#[from] TransmissionError),

    #[error("Chunk {chunk_index} failed after {attempts} attempts: {source}")]
    RetryLimitExceeded {
        chunk_index: u64,
        attempts: u32,
        #[source]
        source: TransmissionError,
    },

    #[error("Upload was cancelled")]
    Cancelled,
}

impl UploadError {
    pub fn identity(message: impl Into<String>) -> Self {
        Self::Identity(message.into())
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::Transmission(TransmissionError::Status {
            status,
            body: body.into(),
        })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<reqwest::Error> for UploadError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transmission(TransmissionError::Http(err))
    }
}

/// Error alias
pub type Result<T, E = UploadError> = std::result::Result<T, E>;
