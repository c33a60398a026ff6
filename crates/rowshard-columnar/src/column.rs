#![forbid(unsafe_code)]

use crate::bitmap::BitVec;
use crate::error::{ColumnarError, ColumnarResult};
use crate::memory::Allocation;
use crate::types::{ColumnType, Value};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

/// Typed storage for one column. Null slots hold the type's default value.
#[derive(Clone, Debug, PartialEq)]
pub enum ColumnData {
    Boolean(BitVec),
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    UInt8(Vec<u8>),
    UInt16(Vec<u16>),
    UInt32(Vec<u32>),
    UInt64(Vec<u64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Utf8(Vec<Arc<str>>),
}

/// Positional operations shared by every buffer kind.
trait Buffer: Sized {
    fn buffer_len(&self) -> usize;
    fn gather_rows(&self, indices: &[usize]) -> Self;
    fn slice_rows(&self, range: Range<usize>) -> Self;
}

impl Buffer for BitVec {
    fn buffer_len(&self) -> usize {
        self.len()
    }

    fn gather_rows(&self, indices: &[usize]) -> Self {
        self.gather(indices)
    }

    fn slice_rows(&self, range: Range<usize>) -> Self {
        self.slice(range)
    }
}

impl<T: Clone> Buffer for Vec<T> {
    fn buffer_len(&self) -> usize {
        self.len()
    }

    fn gather_rows(&self, indices: &[usize]) -> Self {
        indices.iter().map(|&idx| self[idx].clone()).collect()
    }

    fn slice_rows(&self, range: Range<usize>) -> Self {
        self[range].to_vec()
    }
}

macro_rules! map_buffer {
    ($data:expr, $buf:ident => $body:expr) => {
        match $data {
            ColumnData::Boolean($buf) => ColumnData::Boolean($body),
            ColumnData::Int8($buf) => ColumnData::Int8($body),
            ColumnData::Int16($buf) => ColumnData::Int16($body),
            ColumnData::Int32($buf) => ColumnData::Int32($body),
            ColumnData::Int64($buf) => ColumnData::Int64($body),
            ColumnData::UInt8($buf) => ColumnData::UInt8($body),
            ColumnData::UInt16($buf) => ColumnData::UInt16($body),
            ColumnData::UInt32($buf) => ColumnData::UInt32($body),
            ColumnData::UInt64($buf) => ColumnData::UInt64($body),
            ColumnData::Float32($buf) => ColumnData::Float32($body),
            ColumnData::Float64($buf) => ColumnData::Float64($body),
            ColumnData::Utf8($buf) => ColumnData::Utf8($body),
        }
    };
}

impl ColumnData {
    /// An empty buffer of `column_type` with room for `capacity` rows.
    pub fn with_capacity(column_type: ColumnType, capacity: usize) -> Self {
        match column_type {
            ColumnType::Boolean => ColumnData::Boolean(BitVec::with_capacity_bits(capacity)),
            ColumnType::Int8 => ColumnData::Int8(Vec::with_capacity(capacity)),
            ColumnType::Int16 => ColumnData::Int16(Vec::with_capacity(capacity)),
            ColumnType::Int32 => ColumnData::Int32(Vec::with_capacity(capacity)),
            ColumnType::Int64 => ColumnData::Int64(Vec::with_capacity(capacity)),
            ColumnType::UInt8 => ColumnData::UInt8(Vec::with_capacity(capacity)),
            ColumnType::UInt16 => ColumnData::UInt16(Vec::with_capacity(capacity)),
            ColumnType::UInt32 => ColumnData::UInt32(Vec::with_capacity(capacity)),
            ColumnType::UInt64 => ColumnData::UInt64(Vec::with_capacity(capacity)),
            ColumnType::Float32 => ColumnData::Float32(Vec::with_capacity(capacity)),
            ColumnType::Float64 => ColumnData::Float64(Vec::with_capacity(capacity)),
            ColumnType::Utf8 => ColumnData::Utf8(Vec::with_capacity(capacity)),
        }
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            ColumnData::Boolean(_) => ColumnType::Boolean,
            ColumnData::Int8(_) => ColumnType::Int8,
            ColumnData::Int16(_) => ColumnType::Int16,
            ColumnData::Int32(_) => ColumnType::Int32,
            ColumnData::Int64(_) => ColumnType::Int64,
            ColumnData::UInt8(_) => ColumnType::UInt8,
            ColumnData::UInt16(_) => ColumnType::UInt16,
            ColumnData::UInt32(_) => ColumnType::UInt32,
            ColumnData::UInt64(_) => ColumnType::UInt64,
            ColumnData::Float32(_) => ColumnType::Float32,
            ColumnData::Float64(_) => ColumnType::Float64,
            ColumnData::Utf8(_) => ColumnType::Utf8,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Boolean(b) => b.buffer_len(),
            ColumnData::Int8(b) => b.buffer_len(),
            ColumnData::Int16(b) => b.buffer_len(),
            ColumnData::Int32(b) => b.buffer_len(),
            ColumnData::Int64(b) => b.buffer_len(),
            ColumnData::UInt8(b) => b.buffer_len(),
            ColumnData::UInt16(b) => b.buffer_len(),
            ColumnData::UInt32(b) => b.buffer_len(),
            ColumnData::UInt64(b) => b.buffer_len(),
            ColumnData::Float32(b) => b.buffer_len(),
            ColumnData::Float64(b) => b.buffer_len(),
            ColumnData::Utf8(b) => b.buffer_len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value at `row`, ignoring validity.
    pub fn value(&self, row: usize) -> Value {
        match self {
            ColumnData::Boolean(b) => Value::Boolean(b.get(row)),
            ColumnData::Int8(v) => Value::Int8(v[row]),
            ColumnData::Int16(v) => Value::Int16(v[row]),
            ColumnData::Int32(v) => Value::Int32(v[row]),
            ColumnData::Int64(v) => Value::Int64(v[row]),
            ColumnData::UInt8(v) => Value::UInt8(v[row]),
            ColumnData::UInt16(v) => Value::UInt16(v[row]),
            ColumnData::UInt32(v) => Value::UInt32(v[row]),
            ColumnData::UInt64(v) => Value::UInt64(v[row]),
            ColumnData::Float32(v) => Value::Float32(v[row]),
            ColumnData::Float64(v) => Value::Float64(v[row]),
            ColumnData::Utf8(v) => Value::String(v[row].clone()),
        }
    }

    /// Rows `indices[0], indices[1], ...` copied into a new buffer.
    pub fn gather(&self, indices: &[usize]) -> ColumnData {
        map_buffer!(self, b => b.gather_rows(indices))
    }

    pub fn slice(&self, range: Range<usize>) -> ColumnData {
        map_buffer!(self, b => b.slice_rows(range))
    }

    /// Append `value`; `Value::Null` appends the type's default.
    pub(crate) fn push(&mut self, value: &Value, row: usize) -> ColumnarResult<()> {
        match (self, value) {
            (ColumnData::Boolean(b), Value::Null) => b.push(false),
            (ColumnData::Int8(v), Value::Null) => v.push(0),
            (ColumnData::Int16(v), Value::Null) => v.push(0),
            (ColumnData::Int32(v), Value::Null) => v.push(0),
            (ColumnData::Int64(v), Value::Null) => v.push(0),
            (ColumnData::UInt8(v), Value::Null) => v.push(0),
            (ColumnData::UInt16(v), Value::Null) => v.push(0),
            (ColumnData::UInt32(v), Value::Null) => v.push(0),
            (ColumnData::UInt64(v), Value::Null) => v.push(0),
            (ColumnData::Float32(v), Value::Null) => v.push(0.0),
            (ColumnData::Float64(v), Value::Null) => v.push(0.0),
            (ColumnData::Utf8(v), Value::Null) => v.push(Arc::from("")),
            (ColumnData::Boolean(b), Value::Boolean(x)) => b.push(*x),
            (ColumnData::Int8(v), Value::Int8(x)) => v.push(*x),
            (ColumnData::Int16(v), Value::Int16(x)) => v.push(*x),
            (ColumnData::Int32(v), Value::Int32(x)) => v.push(*x),
            (ColumnData::Int64(v), Value::Int64(x)) => v.push(*x),
            (ColumnData::UInt8(v), Value::UInt8(x)) => v.push(*x),
            (ColumnData::UInt16(v), Value::UInt16(x)) => v.push(*x),
            (ColumnData::UInt32(v), Value::UInt32(x)) => v.push(*x),
            (ColumnData::UInt64(v), Value::UInt64(x)) => v.push(*x),
            (ColumnData::Float32(v), Value::Float32(x)) => v.push(*x),
            (ColumnData::Float64(v), Value::Float64(x)) => v.push(*x),
            (ColumnData::Utf8(v), Value::String(x)) => v.push(x.clone()),
            (data, other) => {
                return Err(ColumnarError::TypeMismatch {
                    row,
                    expected: data.column_type(),
                    // `Null` is handled above, so every remaining value has a type.
                    actual: other.column_type().unwrap_or(ColumnType::Utf8),
                });
            }
        }
        Ok(())
    }
}

/// A typed column with an optional validity mask.
///
/// A set validity bit means the row holds a value. Columns without nulls carry no mask.
/// Columns produced by the engine also carry the [`Allocation`] their buffers were charged to.
pub struct Column {
    data: ColumnData,
    validity: Option<BitVec>,
    allocation: Option<Allocation>,
}

impl Column {
    pub fn new(data: ColumnData) -> Self {
        Self {
            data,
            validity: None,
            allocation: None,
        }
    }

    /// A column whose nulls are the cleared bits of `validity`.
    pub fn with_validity(data: ColumnData, validity: BitVec) -> ColumnarResult<Self> {
        if validity.len() != data.len() {
            return Err(ColumnarError::ValidityLengthMismatch {
                expected: data.len(),
                actual: validity.len(),
            });
        }
        Ok(Self {
            data,
            validity: normalize_validity(Some(validity)),
            allocation: None,
        })
    }

    /// Build a column of `column_type` from scalars. `Value::Null` entries become nulls.
    pub fn from_values(column_type: ColumnType, values: &[Value]) -> ColumnarResult<Self> {
        let mut data = ColumnData::with_capacity(column_type, values.len());
        let mut validity = BitVec::with_capacity_bits(values.len());
        for (row, value) in values.iter().enumerate() {
            data.push(value, row)?;
            validity.push(!value.is_null());
        }
        Self::with_validity(data, validity)
    }

    /// Attach the reservation this column's buffers were charged to.
    pub fn with_allocation(mut self, allocation: Allocation) -> Self {
        self.allocation = Some(allocation);
        self
    }

    /// Bytes charged to a memory resource for this column, if any.
    pub fn allocated_bytes(&self) -> usize {
        self.allocation.as_ref().map(Allocation::bytes).unwrap_or(0)
    }

    pub fn column_type(&self) -> ColumnType {
        self.data.column_type()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &ColumnData {
        &self.data
    }

    pub fn validity(&self) -> Option<&BitVec> {
        self.validity.as_ref()
    }

    pub fn is_null(&self, row: usize) -> bool {
        self.validity.as_ref().is_some_and(|v| !v.get(row))
    }

    pub fn null_count(&self) -> usize {
        self.validity.as_ref().map(BitVec::count_zeros).unwrap_or(0)
    }

    pub fn has_nulls(&self) -> bool {
        self.null_count() > 0
    }

    pub fn value(&self, row: usize) -> Value {
        if self.is_null(row) {
            Value::Null
        } else {
            self.data.value(row)
        }
    }

    pub fn to_values(&self) -> Vec<Value> {
        (0..self.len()).map(|row| self.value(row)).collect()
    }

    /// Bytes needed to hold this column's buffers, validity included.
    pub fn byte_len(&self) -> usize {
        let validity = self.validity.as_ref().map(BitVec::byte_len).unwrap_or(0);
        self.column_type().buffer_bytes(self.len()) + validity
    }

    pub fn gather(&self, indices: &[usize]) -> Column {
        Column {
            data: self.data.gather(indices),
            validity: normalize_validity(self.validity.as_ref().map(|v| v.gather(indices))),
            allocation: None,
        }
    }

    pub fn slice(&self, range: Range<usize>) -> Column {
        Column {
            data: self.data.slice(range.clone()),
            validity: normalize_validity(self.validity.as_ref().map(|v| v.slice(range))),
            allocation: None,
        }
    }

    /// A column from separately built buffers. An all-set validity mask is dropped.
    pub fn from_parts(data: ColumnData, validity: Option<BitVec>) -> ColumnarResult<Self> {
        match validity {
            Some(validity) => Self::with_validity(data, validity),
            None => Ok(Self::new(data)),
        }
    }

    /// Parts whose lengths are already known to agree.
    pub(crate) fn assemble(data: ColumnData, validity: BitVec) -> Column {
        debug_assert_eq!(data.len(), validity.len());
        Column {
            data,
            validity: normalize_validity(Some(validity)),
            allocation: None,
        }
    }
}

fn normalize_validity(validity: Option<BitVec>) -> Option<BitVec> {
    validity.filter(|v| !v.all_true())
}

/// Clones are never charged to a memory resource.
impl Clone for Column {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            validity: self.validity.clone(),
            allocation: None,
        }
    }
}

impl PartialEq for Column {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data && self.validity == other.validity
    }
}

impl fmt::Debug for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Column")
            .field("type", &self.column_type())
            .field("len", &self.len())
            .field("null_count", &self.null_count())
            .field("allocated_bytes", &self.allocated_bytes())
            .finish()
    }
}
