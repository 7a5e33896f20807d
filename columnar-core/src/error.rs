use thiserror::Error;

/// Errors raised by columnar partitions.
///
/// Every variant except `Io` and `Memory` maps to a condition the store
/// classifies itself; none of them is recoverable for the store involved.
#[derive(Error, Debug)]
pub enum PartitionError {
    /// A column would need more bytes than one buffer can address.
    #[error("column {column} needs {bytes} bytes, exceeding the {max} byte column limit")]
    CapacityExceeded { column: usize, bytes: u64, max: usize },

    /// `free` called on a store that was already released.
    #[error("columnar store freed twice")]
    DoubleFree,

    /// Any access to a store after `free`.
    #[error("columnar store used after free")]
    UseAfterFree,

    /// The stream ended before a column buffer was filled.
    #[error("stream ended while reading column {column}: expected {expected} bytes, got {actual}")]
    TruncatedTransfer {
        column: usize,
        expected: usize,
        actual: usize,
    },

    /// A row type cannot be bound to a schema, or two schemas disagree.
    #[error("schema mismatch: {detail}")]
    SchemaMismatch { detail: String },

    /// Column type tag outside the closed set.
    #[error("unknown column type tag {0}")]
    UnknownColumnType(u8),

    /// A serialized schema that does not parse.
    #[error("invalid schema encoding: {detail}")]
    InvalidSchema { detail: String },

    #[error("column index {index} out of range for {columns} columns")]
    ColumnOutOfRange { index: usize, columns: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Allocator or buffer-cursor failure.
    #[error(transparent)]
    Memory(#[from] anyhow::Error),
}

impl PartitionError {
    pub(crate) fn mismatch(detail: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            detail: detail.into(),
        }
    }

    pub(crate) fn invalid_schema(detail: impl Into<String>) -> Self {
        Self::InvalidSchema {
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PartitionError>;
