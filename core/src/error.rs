//! Error type for the memory core.
//!
//! Configuration problems surface at construction; shape problems surface at
//! the call that received the bad input. Nothing here is retryable.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("shift size must be odd and > 0, got {0}")]
    InvalidShiftSize(usize),

    #[error("interface requires at least one read head")]
    NoReadHeads,

    #[error("interface requires at least one write head")]
    NoWriteHeads,

    #[error("{name} must be > 0")]
    InvalidDimension { name: &'static str },

    #[error("{head} parameter bundle width mismatch: layout needs {expected}, projection produces {actual}")]
    ParamWidthMismatch { head: String, expected: usize, actual: usize },

    #[error("{head} projection input width mismatch: hidden size is {expected}, projection takes {actual}")]
    ProjectionInputMismatch { head: String, expected: usize, actual: usize },

    #[error("shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch { what: &'static str, expected: Vec<usize>, actual: Vec<usize> },

    #[error("{what} index {index} out of range for size {bound}")]
    IndexOutOfRange { what: &'static str, index: usize, bound: usize },

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MemoryError>;

impl From<serde_yaml::Error> for MemoryError {
    fn from(e: serde_yaml::Error) -> Self {
        MemoryError::Config(e.to_string())
    }
}

impl From<serde_json::Error> for MemoryError {
    fn from(e: serde_json::Error) -> Self {
        MemoryError::Config(e.to_string())
    }
}
