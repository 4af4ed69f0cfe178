use thiserror::Error;

#[derive(Error, Debug)]
pub enum RestoreError {
    #[error("Invalid split and scatter spec: {0}")]
    InvalidSpec(String),

    #[error("Invalid rekey: {0}")]
    InvalidRekey(String),

    #[error("No rewrite rule matches key {key}")]
    NoRewriteRule { key: String },

    #[error("Splitting key {key}: {source}")]
    Split {
        key: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Arrow error: {0}")]
    ArrowError(#[from] arrow::error::ArrowError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Processor {0} has not been started")]
    NotStarted(String),

    #[error("Unknown processor kind: {0}")]
    UnknownProcessor(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RestoreError {
    /// True for errors raised by the split step, as opposed to rewrite or
    /// spec validation failures.
    pub fn is_split_failure(&self) -> bool {
        matches!(self, RestoreError::Split { .. })
    }
}

pub type Result<T> = std::result::Result<T, RestoreError>;
