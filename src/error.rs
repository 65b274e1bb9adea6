use std::path::PathBuf;
use thiserror::Error;

/// Main error type for pdf-diff operations
#[derive(Error, Debug)]
pub enum PdfDiffError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to decode image {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Rasterizer error: {0}")]
    Rasterizer(String),

    #[error("Invalid highlight color '{0}': expected six hex digits such as ff2010")]
    InvalidColor(String),

    #[error("Invalid comparison id '{0}': expected <sha256>-<sha256>")]
    InvalidComparisonId(String),

    #[error("Job was cancelled")]
    Cancelled,

    #[error("Timed out waiting for {path} to be released by another job")]
    Timeout { path: PathBuf },

    #[error("Worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PdfDiffError>;
