use crate::types::ColumnType;

pub type ColumnarResult<T> = Result<T, ColumnarError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ColumnarError {
    #[error("type mismatch at row {row}: expected {expected}, got {actual}")]
    TypeMismatch {
        row: usize,
        expected: ColumnType,
        actual: ColumnType,
    },

    #[error("row has {actual} values, schema has {expected} columns")]
    RowLengthMismatch { expected: usize, actual: usize },

    #[error("column {column} has {actual} rows, expected {expected}")]
    ColumnLengthMismatch {
        column: usize,
        expected: usize,
        actual: usize,
    },

    #[error("validity mask has {actual} bits, column has {expected} rows")]
    ValidityLengthMismatch { expected: usize, actual: usize },

    #[error("schema declares {expected} for column {column}, data is {actual}")]
    SchemaTypeMismatch {
        column: usize,
        expected: ColumnType,
        actual: ColumnType,
    },

    #[error("schema has {schema} columns but {columns} columns were supplied")]
    SchemaMismatch { schema: usize, columns: usize },

    #[error("column index {index} out of range for table with {columns} columns")]
    ColumnOutOfRange { index: usize, columns: usize },
}
