#![forbid(unsafe_code)]

use crate::bitmap::BitVec;
use crate::column::{Column, ColumnData};
use crate::error::{ColumnarError, ColumnarResult};
use crate::types::{ColumnType, Value};
use serde::{Deserialize, Serialize};
use std::ops::Range;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// An owned table: equal-length columns plus their schema.
#[derive(Clone, Debug, PartialEq)]
pub struct Table {
    schema: Vec<ColumnSchema>,
    columns: Vec<Column>,
    rows: usize,
}

impl Table {
    pub fn try_new(schema: Vec<ColumnSchema>, columns: Vec<Column>) -> ColumnarResult<Self> {
        if schema.len() != columns.len() {
            return Err(ColumnarError::SchemaMismatch {
                schema: schema.len(),
                columns: columns.len(),
            });
        }
        let rows = columns.first().map(Column::len).unwrap_or(0);
        for (idx, (field, column)) in schema.iter().zip(&columns).enumerate() {
            if column.column_type() != field.column_type {
                return Err(ColumnarError::SchemaTypeMismatch {
                    column: idx,
                    expected: field.column_type,
                    actual: column.column_type(),
                });
            }
            if column.len() != rows {
                return Err(ColumnarError::ColumnLengthMismatch {
                    column: idx,
                    expected: rows,
                    actual: column.len(),
                });
            }
        }
        Ok(Self {
            schema,
            columns,
            rows,
        })
    }

    /// A table with no columns and no rows.
    pub fn empty() -> Self {
        Self {
            schema: Vec::new(),
            columns: Vec::new(),
            rows: 0,
        }
    }

    pub fn schema(&self) -> &[ColumnSchema] {
        &self.schema
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, idx: usize) -> Option<&Column> {
        self.columns.get(idx)
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn into_columns(self) -> Vec<Column> {
        self.columns
    }

    pub fn get_cell(&self, row: usize, col: usize) -> Value {
        match self.columns.get(col) {
            Some(column) if row < self.rows => column.value(row),
            _ => Value::Null,
        }
    }

    pub fn row(&self, row: usize) -> Vec<Value> {
        (0..self.columns.len())
            .map(|col| self.get_cell(row, col))
            .collect()
    }

    /// Row-major copy of the whole table.
    pub fn to_rows(&self) -> Vec<Vec<Value>> {
        (0..self.rows).map(|row| self.row(row)).collect()
    }

    /// Total bytes of all column buffers.
    pub fn byte_len(&self) -> usize {
        self.columns.iter().map(Column::byte_len).sum()
    }

    pub fn view(&self) -> TableView<'_> {
        TableView {
            schema: self.schema.iter().collect(),
            columns: self.columns.iter().collect(),
            rows: self.rows,
        }
    }

    /// Pass every column through `f`, keeping the schema and row count.
    ///
    /// `f` must hand back a column of the type and length it was given.
    pub fn try_map_columns<E>(
        self,
        mut f: impl FnMut(Column) -> Result<Column, E>,
    ) -> Result<Table, E> {
        let mut columns = Vec::with_capacity(self.columns.len());
        for column in self.columns {
            let (ty, len) = (column.column_type(), column.len());
            let mapped = f(column)?;
            debug_assert_eq!((mapped.column_type(), mapped.len()), (ty, len));
            columns.push(mapped);
        }
        Ok(Table {
            schema: self.schema,
            columns,
            rows: self.rows,
        })
    }

    /// Copy a contiguous run of rows into a new table.
    pub fn slice(&self, range: Range<usize>) -> Table {
        let end = range.end.min(self.rows);
        let start = range.start.min(end);
        Table {
            schema: self.schema.clone(),
            columns: self.columns.iter().map(|c| c.slice(start..end)).collect(),
            rows: end - start,
        }
    }
}

/// A borrowed, read-only view over some or all columns of a [`Table`].
#[derive(Clone, Debug)]
pub struct TableView<'a> {
    schema: Vec<&'a ColumnSchema>,
    columns: Vec<&'a Column>,
    rows: usize,
}

impl<'a> TableView<'a> {
    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, idx: usize) -> Option<&'a Column> {
        self.columns.get(idx).copied()
    }

    pub fn columns(&self) -> &[&'a Column] {
        &self.columns
    }

    pub fn field(&self, idx: usize) -> Option<&'a ColumnSchema> {
        self.schema.get(idx).copied()
    }

    pub fn schema(&self) -> impl Iterator<Item = &'a ColumnSchema> + '_ {
        self.schema.iter().copied()
    }

    /// A view over `indices`, in that order. Indices may repeat.
    pub fn select(&self, indices: &[usize]) -> ColumnarResult<TableView<'a>> {
        let mut schema = Vec::with_capacity(indices.len());
        let mut columns = Vec::with_capacity(indices.len());
        for &index in indices {
            let (Some(field), Some(column)) = (self.schema.get(index), self.columns.get(index))
            else {
                return Err(ColumnarError::ColumnOutOfRange {
                    index,
                    columns: self.columns.len(),
                });
            };
            schema.push(*field);
            columns.push(*column);
        }
        Ok(TableView {
            schema,
            columns,
            rows: self.rows,
        })
    }

    /// An owned table with this view's schema over replacement `columns` of `rows` rows each.
    pub fn with_columns(&self, columns: Vec<Column>, rows: usize) -> ColumnarResult<Table> {
        if columns.len() != self.schema.len() {
            return Err(ColumnarError::SchemaMismatch {
                schema: self.schema.len(),
                columns: columns.len(),
            });
        }
        for (idx, (field, column)) in self.schema.iter().zip(&columns).enumerate() {
            if column.column_type() != field.column_type {
                return Err(ColumnarError::SchemaTypeMismatch {
                    column: idx,
                    expected: field.column_type,
                    actual: column.column_type(),
                });
            }
            if column.len() != rows {
                return Err(ColumnarError::ColumnLengthMismatch {
                    column: idx,
                    expected: rows,
                    actual: column.len(),
                });
            }
        }
        Ok(Table {
            schema: self.schema.iter().map(|f| (*f).clone()).collect(),
            columns,
            rows,
        })
    }

    /// Deep copy into an owned table.
    pub fn to_table(&self) -> Table {
        Table {
            schema: self.schema.iter().map(|f| (*f).clone()).collect(),
            columns: self.columns.iter().map(|c| (*c).clone()).collect(),
            rows: self.rows,
        }
    }
}

/// Row-at-a-time table construction.
pub struct TableBuilder {
    schema: Vec<ColumnSchema>,
    data: Vec<ColumnData>,
    validity: Vec<BitVec>,
    rows: usize,
}

impl TableBuilder {
    pub fn new(schema: Vec<ColumnSchema>) -> Self {
        Self::with_capacity(schema, 0)
    }

    pub fn with_capacity(schema: Vec<ColumnSchema>, rows: usize) -> Self {
        let data = schema
            .iter()
            .map(|c| ColumnData::with_capacity(c.column_type, rows))
            .collect();
        let validity = schema
            .iter()
            .map(|_| BitVec::with_capacity_bits(rows))
            .collect();
        Self {
            schema,
            data,
            validity,
            rows: 0,
        }
    }

    /// Append one row. On error the builder is left unchanged.
    pub fn append_row(&mut self, row: &[Value]) -> ColumnarResult<()> {
        if row.len() != self.schema.len() {
            return Err(ColumnarError::RowLengthMismatch {
                expected: self.schema.len(),
                actual: row.len(),
            });
        }

        // Type-check up front so a bad value can't leave columns with uneven lengths.
        for (field, value) in self.schema.iter().zip(row) {
            if let Some(actual) = value.column_type() {
                if actual != field.column_type {
                    return Err(ColumnarError::TypeMismatch {
                        row: self.rows,
                        expected: field.column_type,
                        actual,
                    });
                }
            }
        }

        for ((data, validity), value) in self.data.iter_mut().zip(&mut self.validity).zip(row) {
            data.push(value, self.rows)?;
            validity.push(!value.is_null());
        }
        self.rows += 1;
        Ok(())
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn finalize(self) -> Table {
        let columns = self
            .data
            .into_iter()
            .zip(self.validity)
            .map(|(data, validity)| Column::assemble(data, validity))
            .collect();
        Table {
            schema: self.schema,
            columns,
            rows: self.rows,
        }
    }
}
