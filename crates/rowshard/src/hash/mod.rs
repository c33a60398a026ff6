//! Row hashing.
//!
//! Every hashed column contributes one 32-bit value per row. Contributions are folded in column
//! order with [`hash_combine`], so `[a, b]` and `[b, a]` generally hash differently.

mod murmur;
mod row;

pub use murmur::murmur3_32;
pub use row::RowHasher;

use crate::context::ExecutionContext;
use crate::error::PartitionResult;
use crate::stream::Pending;
use rowshard_columnar::{Column, ColumnType, Table, TableView};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Contribution of a null row, whatever the column's type or seed.
///
/// Identity hashing of a `UInt32` or `UInt64` column can produce the same value for a non-null
/// row (`u32::MAX`, or a `u64` that folds to it), so such rows share a bucket with the nulls.
pub const NULL_HASH: u32 = u32::MAX;

const GOLDEN_RATIO: u32 = 0x9e37_79b9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashFunction {
    /// MurmurHash3 (x86, 32-bit) over each value's little-endian bytes.
    #[default]
    Murmur3,
    /// The value itself. Unsigned integer columns only; `u64` is folded to 32 bits.
    Identity,
}

impl HashFunction {
    pub fn supports(self, column_type: ColumnType) -> bool {
        match self {
            HashFunction::Murmur3 => true,
            HashFunction::Identity => column_type.is_unsigned_integer(),
        }
    }
}

/// Mix `rhs` into the running hash `lhs`. Order sensitive.
#[inline]
pub fn hash_combine(lhs: u32, rhs: u32) -> u32 {
    lhs ^ rhs
        .wrapping_add(GOLDEN_RATIO)
        .wrapping_add(lhs << 6)
        .wrapping_add(lhs >> 2)
}

/// Hash every column of `input`.
///
/// `initial_hash_values` is empty or holds one seed per column.
pub fn hash(
    input: &TableView<'_>,
    function: HashFunction,
    initial_hash_values: &[u32],
    ctx: &ExecutionContext,
) -> PartitionResult<Column> {
    let columns: Vec<usize> = (0..input.column_count()).collect();
    hash_columns(input, &columns, function, initial_hash_values, ctx)
}

/// Hash `columns` of `input`, in that order. Indices may repeat.
pub fn hash_columns(
    input: &TableView<'_>,
    columns: &[usize],
    function: HashFunction,
    seeds: &[u32],
    ctx: &ExecutionContext,
) -> PartitionResult<Column> {
    let hasher = RowHasher::new(input, columns, function, seeds)?;
    log::debug!(
        "hashing {} rows over {} columns with {function:?}",
        hasher.row_count(),
        hasher.column_count()
    );
    ctx.stream().execute(|| hasher.hash(ctx))?
}

/// Queue hashing of every column of `input` on `ctx`'s stream.
///
/// Arguments are validated before anything is queued.
pub fn hash_async(
    input: Arc<Table>,
    function: HashFunction,
    initial_hash_values: Vec<u32>,
    ctx: &ExecutionContext,
) -> PartitionResult<Pending<PartitionResult<Column>>> {
    let columns: Vec<usize> = (0..input.column_count()).collect();
    RowHasher::new(&input.view(), &columns, function, &initial_hash_values)?;

    let job_ctx = ctx.clone();
    Ok(ctx.stream().enqueue(move || {
        let view = input.view();
        RowHasher::new(&view, &columns, function, &initial_hash_values)?.hash(&job_ctx)
    }))
}
