//! Error types for the port allocator

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AllocError {
    #[error("No available ports in range {start}-{end}")]
    PoolExhausted { start: u16, end: u16 },

    #[error("Batch allocation failed after obtaining {obtained} of {requested} ports (all released): {source}")]
    PartialBatchFailure {
        requested: usize,
        obtained: usize,
        #[source]
        source: Box<AllocError>,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl AllocError {
    /// True for the fatal "nothing left to hand out" condition
    pub fn is_exhausted(&self) -> bool {
        matches!(self, AllocError::PoolExhausted { .. })
    }
}

pub type Result<T> = std::result::Result<T, AllocError>;
