use thiserror::Error;

/// Failures surfaced to the caller of a document ingestion.
#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),
    #[error("document {name} is unreadable: {reason}")]
    Unreadable { name: String, reason: String },
    #[error("document {0} contains no extractable text")]
    Empty(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
