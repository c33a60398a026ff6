use crate::hash::HashFunction;
use crate::stream::StreamError;
use rowshard_columnar::{AllocError, ColumnType};

pub type PartitionResult<T> = Result<T, PartitionError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PartitionError {
    #[error("at least one column must be hashed")]
    EmptyColumnSelection,

    #[error("column index {index} out of range for table with {columns} columns")]
    ColumnOutOfRange { index: usize, columns: usize },

    #[error("num_partitions must be at least 1, got {0}")]
    InvalidPartitionCount(usize),

    #[error("expected {expected} initial hash values (one per hashed column), got {actual}")]
    SeedCountMismatch { expected: usize, actual: usize },

    #[error("{function:?} hashing is not supported for column {column} of type {column_type}")]
    UnsupportedHashType {
        column: usize,
        column_type: ColumnType,
        function: HashFunction,
    },

    #[error("partition map has {actual} entries, table has {expected} rows")]
    MapLengthMismatch { expected: usize, actual: usize },

    #[error("partition map assigns row {row} to bucket {bucket}, outside [0, {num_partitions})")]
    BucketOutOfRange {
        row: usize,
        bucket: u32,
        num_partitions: usize,
    },

    #[error(transparent)]
    Allocation(#[from] AllocError),

    #[error(transparent)]
    Stream(#[from] StreamError),
}

impl PartitionError {
    /// Whether the caller passed arguments that break the operation's contract.
    pub fn is_invalid_argument(&self) -> bool {
        !matches!(
            self,
            PartitionError::Allocation(_) | PartitionError::Stream(_)
        )
    }
}
