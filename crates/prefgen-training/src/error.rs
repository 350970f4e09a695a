use std::path::PathBuf;
use thiserror::Error;

pub type PrefgenResult<T> = std::result::Result<T, PrefgenError>;

#[derive(Debug, Error)]
pub enum PrefgenError {
    /// Unsupported prompt format, invalid hyperparameters, missing split data.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A raw ignore sentinel reached the decoder, or batch shapes disagree.
    #[error("decode invariant violated: {0}")]
    DecodeInvariant(String),

    /// Failure inside the training framework (OOM, divergence, backend I/O).
    #[error("training framework error: {0}")]
    Framework(String),

    #[error("failed to persist {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PrefgenError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub(crate) fn decode(msg: impl Into<String>) -> Self {
        Self::DecodeInvariant(msg.into())
    }
}
