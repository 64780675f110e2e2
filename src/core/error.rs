use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("No documents matched the filter")]
    NoDocuments,

    #[error("Operation canceled")]
    Canceled,

    #[error("Operation deadline exceeded")]
    DeadlineExceeded,

    #[error("Operation panicked: {0}")]
    Panic(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Background database stopped")]
    Stopped,

    #[error("Cast error: {0}")]
    Cast(String),

    #[error("Channel error: {0}")]
    Channel(String),
}

impl PersistError {
    /// Network/connectivity failures. These are the only errors a load retries on.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::DeadlineExceeded)
    }

    pub fn is_no_documents(&self) -> bool {
        matches!(self, Self::NoDocuments)
    }
}

pub type Result<T> = std::result::Result<T, PersistError>;

impl From<serde_json::Error> for PersistError {
    fn from(err: serde_json::Error) -> Self {
        use serde_json::error::Category;
        match err.classify() {
            Category::Data | Category::Syntax | Category::Eof => Self::Decode(err.to_string()),
            Category::Io => Self::Encode(err.to_string()),
        }
    }
}
