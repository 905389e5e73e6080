//! Index Error Types
//!
//! Every failure is a contract violation reported synchronously at the
//! offending call. Nothing is retried internally.

use thiserror::Error;

use crate::tensor::Device;

/// Errors raised by the hash-table index and its kernels
#[derive(Error, Debug)]
pub enum IndexError {
    /// Backend selector other than "cpu" or "gpu"
    #[error("Invalid backend '{0}': expected 'cpu' or 'gpu'")]
    InvalidBackend(String),

    /// A bucket row would grow past its fixed capacity
    #[error("Bucket {bucket} of table {table} is full (capacity {capacity})")]
    CapacityExceeded {
        table: usize,
        bucket: u64,
        capacity: usize,
    },

    /// Lengths or shapes of two operands disagree
    #[error("Shape mismatch in {context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Requested top-k larger than the table
    #[error("Requested top-{k} exceeds table size {table_size}")]
    OutOfRangeK { k: usize, table_size: usize },

    /// Operands live on different execution contexts
    #[error("Device mismatch: expected {expected}, got {actual}")]
    DeviceMismatch { expected: Device, actual: Device },

    /// Degenerate argument (zero-sized table, zero stride, ...)
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),
}

impl From<figment::Error> for IndexError {
    fn from(err: figment::Error) -> Self {
        IndexError::Config(Box::new(err))
    }
}

/// Result type for index operations
pub type IndexResult<T> = Result<T, IndexError>;
