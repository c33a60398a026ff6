use super::{hash_combine, murmur3_32, HashFunction, NULL_HASH};
use crate::context::{ExecutionContext, PartitionOptions};
use crate::error::{PartitionError, PartitionResult};
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
use crate::parallel;
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
use rayon::prelude::*;
use rowshard_columnar::memory::try_vec;
use rowshard_columnar::{Allocation, BitVec, Column, ColumnData, ColumnType, TableView};

#[inline]
fn is_null(validity: Option<&BitVec>, row: usize) -> bool {
    validity.is_some_and(|v| !v.get(row))
}

#[inline]
fn fold(slot: &mut u32, contribution: u32, first: bool) {
    *slot = if first {
        contribution
    } else {
        hash_combine(*slot, contribution)
    };
}

/// Fold one column's contribution into `$out` for rows starting at `$first_row`.
macro_rules! fold_rows {
    ($out:expr, $first_row:expr, $validity:expr, $first:expr, |$row:ident| $hash:expr) => {
        for (offset, slot) in $out.iter_mut().enumerate() {
            let $row = $first_row + offset;
            let contribution = if is_null($validity, $row) {
                NULL_HASH
            } else {
                $hash
            };
            fold(slot, contribution, $first);
        }
    };
}

/// Computes one hash per row over a fixed list of columns.
///
/// Construction validates the column selection, the seed list and each column's type against the
/// hash function, and resolves the per-type dispatch. Nothing is hashed until
/// [`RowHasher::hash`] or [`RowHasher::hash_into`] runs.
///
/// Column contributions are folded left to right with [`hash_combine`]; the first column's
/// contribution is the starting value. Null rows contribute [`NULL_HASH`].
#[derive(Debug, Clone)]
pub struct RowHasher<'a> {
    kernels: Vec<ColumnKernel<'a>>,
    rows: usize,
}

#[derive(Debug, Clone, Copy)]
enum ColumnKernel<'a> {
    Murmur3 {
        data: &'a ColumnData,
        validity: Option<&'a BitVec>,
        seed: u32,
    },
    Identity {
        values: UnsignedValues<'a>,
        validity: Option<&'a BitVec>,
        seed: Option<u32>,
    },
}

#[derive(Debug, Clone, Copy)]
enum UnsignedValues<'a> {
    U8(&'a [u8]),
    U16(&'a [u16]),
    U32(&'a [u32]),
    U64(&'a [u64]),
}

impl<'a> RowHasher<'a> {
    /// Prepare to hash `columns` of `input` (in that order) with `function`.
    ///
    /// `seeds` is empty or holds one initial value per entry of `columns`.
    pub fn new(
        input: &TableView<'a>,
        columns: &[usize],
        function: HashFunction,
        seeds: &[u32],
    ) -> PartitionResult<Self> {
        if columns.is_empty() {
            return Err(PartitionError::EmptyColumnSelection);
        }
        if !seeds.is_empty() && seeds.len() != columns.len() {
            return Err(PartitionError::SeedCountMismatch {
                expected: columns.len(),
                actual: seeds.len(),
            });
        }

        let mut kernels = Vec::with_capacity(columns.len());
        for (position, &index) in columns.iter().enumerate() {
            let column = input
                .column(index)
                .ok_or(PartitionError::ColumnOutOfRange {
                    index,
                    columns: input.column_count(),
                })?;
            let seed = seeds.get(position).copied();
            kernels.push(ColumnKernel::resolve(column, index, function, seed)?);
        }

        Ok(Self {
            kernels,
            rows: input.row_count(),
        })
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn column_count(&self) -> usize {
        self.kernels.len()
    }

    /// Hash every row into a newly allocated `UInt32` column charged to `ctx`'s resource.
    pub fn hash(&self, ctx: &ExecutionContext) -> PartitionResult<Column> {
        let (hashes, allocation) = self.hash_values(ctx)?;
        Ok(Column::new(ColumnData::UInt32(hashes)).with_allocation(allocation))
    }

    /// Raw hashes together with the reservation they are charged to.
    pub(crate) fn hash_values(
        &self,
        ctx: &ExecutionContext,
    ) -> PartitionResult<(Vec<u32>, Allocation)> {
        let allocation =
            Allocation::reserve(ctx.resource(), ColumnType::UInt32.buffer_bytes(self.rows))?;
        let mut hashes = try_vec::<u32>(self.rows)?;
        hashes.resize(self.rows, 0);

        self.hash_rows(&mut hashes, ctx.options());
        Ok((hashes, allocation))
    }

    /// Hash rows `first_row..first_row + out.len()` into `out`.
    pub fn hash_into(&self, out: &mut [u32], first_row: usize) {
        debug_assert!(first_row + out.len() <= self.rows);
        for (position, kernel) in self.kernels.iter().enumerate() {
            kernel.fold_into(out, first_row, position == 0);
        }
    }

    fn hash_rows(&self, out: &mut [u32], options: &PartitionOptions) {
        #[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
        {
            if let Some(pool) = parallel::pool_for(options, out.len()) {
                let chunk_rows = options.chunk_rows();
                log::trace!("hashing {} rows in chunks of {chunk_rows}", out.len());
                pool.install(|| {
                    out.par_chunks_mut(chunk_rows)
                        .enumerate()
                        .for_each(|(chunk, slots)| self.hash_into(slots, chunk * chunk_rows));
                });
                return;
            }
        }
        #[cfg(not(all(feature = "parallel", not(target_arch = "wasm32"))))]
        let _ = options;

        self.hash_into(out, 0);
    }
}

impl<'a> ColumnKernel<'a> {
    fn resolve(
        column: &'a Column,
        index: usize,
        function: HashFunction,
        seed: Option<u32>,
    ) -> PartitionResult<Self> {
        let validity = column.validity();
        match function {
            HashFunction::Murmur3 => Ok(ColumnKernel::Murmur3 {
                data: column.data(),
                validity,
                seed: seed.unwrap_or(0),
            }),
            HashFunction::Identity => {
                let values = match column.data() {
                    ColumnData::UInt8(v) => UnsignedValues::U8(v),
                    ColumnData::UInt16(v) => UnsignedValues::U16(v),
                    ColumnData::UInt32(v) => UnsignedValues::U32(v),
                    ColumnData::UInt64(v) => UnsignedValues::U64(v),
                    other => {
                        return Err(PartitionError::UnsupportedHashType {
                            column: index,
                            column_type: other.column_type(),
                            function,
                        })
                    }
                };
                Ok(ColumnKernel::Identity {
                    values,
                    validity,
                    seed,
                })
            }
        }
    }

    fn fold_into(&self, out: &mut [u32], first_row: usize, first: bool) {
        match *self {
            ColumnKernel::Murmur3 {
                data,
                validity,
                seed,
            } => murmur_column(data, validity, seed, out, first_row, first),
            ColumnKernel::Identity {
                values,
                validity,
                seed,
            } => fold_rows!(out, first_row, validity, first, |row| {
                let value = values.get(row);
                match seed {
                    Some(seed) => hash_combine(seed, value),
                    None => value,
                }
            }),
        }
    }
}

impl UnsignedValues<'_> {
    #[inline]
    fn get(&self, row: usize) -> u32 {
        match *self {
            UnsignedValues::U8(v) => u32::from(v[row]),
            UnsignedValues::U16(v) => u32::from(v[row]),
            UnsignedValues::U32(v) => v[row],
            UnsignedValues::U64(v) => {
                let x = v[row];
                (x ^ (x >> 32)) as u32
            }
        }
    }
}

fn murmur_column(
    data: &ColumnData,
    validity: Option<&BitVec>,
    seed: u32,
    out: &mut [u32],
    first_row: usize,
    first: bool,
) {
    match data {
        ColumnData::Boolean(b) => fold_rows!(out, first_row, validity, first, |row| {
            murmur3_32(&[u8::from(b.get(row))], seed)
        }),
        ColumnData::Int8(v) => fold_rows!(out, first_row, validity, first, |row| {
            murmur3_32(&v[row].to_le_bytes(), seed)
        }),
        ColumnData::Int16(v) => fold_rows!(out, first_row, validity, first, |row| {
            murmur3_32(&v[row].to_le_bytes(), seed)
        }),
        ColumnData::Int32(v) => fold_rows!(out, first_row, validity, first, |row| {
            murmur3_32(&v[row].to_le_bytes(), seed)
        }),
        ColumnData::Int64(v) => fold_rows!(out, first_row, validity, first, |row| {
            murmur3_32(&v[row].to_le_bytes(), seed)
        }),
        ColumnData::UInt8(v) => fold_rows!(out, first_row, validity, first, |row| {
            murmur3_32(&v[row].to_le_bytes(), seed)
        }),
        ColumnData::UInt16(v) => fold_rows!(out, first_row, validity, first, |row| {
            murmur3_32(&v[row].to_le_bytes(), seed)
        }),
        ColumnData::UInt32(v) => fold_rows!(out, first_row, validity, first, |row| {
            murmur3_32(&v[row].to_le_bytes(), seed)
        }),
        ColumnData::UInt64(v) => fold_rows!(out, first_row, validity, first, |row| {
            murmur3_32(&v[row].to_le_bytes(), seed)
        }),
        ColumnData::Float32(v) => fold_rows!(out, first_row, validity, first, |row| {
            murmur3_32(&normalized_f32_bits(v[row]).to_le_bytes(), seed)
        }),
        ColumnData::Float64(v) => fold_rows!(out, first_row, validity, first, |row| {
            murmur3_32(&normalized_f64_bits(v[row]).to_le_bytes(), seed)
        }),
        ColumnData::Utf8(v) => fold_rows!(out, first_row, validity, first, |row| {
            murmur3_32(v[row].as_bytes(), seed)
        }),
    }
}

/// Bits of `v` with all NaNs collapsed to one pattern and `-0.0` mapped to `0.0`, so values that
/// compare equal hash equal.
fn normalized_f32_bits(v: f32) -> u32 {
    if v.is_nan() {
        f32::NAN.to_bits()
    } else if v == 0.0 {
        0
    } else {
        v.to_bits()
    }
}

fn normalized_f64_bits(v: f64) -> u64 {
    if v.is_nan() {
        f64::NAN.to_bits()
    } else if v == 0.0 {
        0
    } else {
        v.to_bits()
    }
}
