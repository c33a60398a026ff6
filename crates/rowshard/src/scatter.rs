use crate::context::{ExecutionContext, PartitionOptions};
use crate::error::PartitionResult;
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
use crate::parallel;
use crate::planner::PartitionPlan;
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
use crate::planner::zeroed;
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
use rayon::prelude::*;
use rowshard_columnar::memory::try_vec;
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
use rowshard_columnar::{BitVec, ColumnData};
use rowshard_columnar::{Allocation, Column, Table, TableView};
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
use std::sync::atomic::{AtomicUsize, Ordering};

/// Moves rows into the order a [`PartitionPlan`] describes.
///
/// Rows of the same bucket keep their input order. The rearrangement goes through a gather map:
/// `map[i]` is the input row that lands at output position `i`.
#[derive(Debug, Clone, Copy)]
pub struct ScatterRearranger<'p> {
    plan: &'p PartitionPlan,
}

impl<'p> ScatterRearranger<'p> {
    pub fn new(plan: &'p PartitionPlan) -> Self {
        Self { plan }
    }

    /// Source row for every output position. The map is not charged to `ctx`'s resource.
    ///
    /// # Panics
    ///
    /// If the plan's bucket ids disagree with its offsets.
    pub fn gather_map(&self, ctx: &ExecutionContext) -> PartitionResult<Vec<usize>> {
        self.build_map(ctx.options())
    }

    /// Copy every column of `input` into partition order.
    ///
    /// Output columns are charged to `ctx`'s memory resource before any of them is built.
    ///
    /// # Panics
    ///
    /// If `input` and the plan disagree on the row count, or the plan is internally inconsistent.
    pub fn rearrange(&self, input: &TableView<'_>, ctx: &ExecutionContext) -> PartitionResult<Table> {
        let rows = self.plan.row_count();
        assert_eq!(
            input.row_count(),
            rows,
            "partition plan covers {rows} rows but the table has {}",
            input.row_count()
        );

        let resource = ctx.resource();
        let mut allocations = Vec::with_capacity(input.column_count());
        for column in input.columns() {
            allocations.push(Allocation::reserve(resource, output_bytes(column, rows))?);
        }

        let map_scratch =
            Allocation::reserve(resource, rows.saturating_mul(std::mem::size_of::<usize>()))?;
        let map = self.build_map(ctx.options())?;

        let columns = gather_columns(input.columns(), &map, ctx.options());
        drop(map_scratch);

        let columns = columns
            .into_iter()
            .zip(allocations)
            .map(|(column, allocation)| column.with_allocation(allocation))
            .collect();
        let table = input
            .with_columns(columns, rows)
            .unwrap_or_else(|err| panic!("rearranged columns do not form a table: {err}"));
        Ok(table)
    }

    fn build_map(&self, options: &PartitionOptions) -> PartitionResult<Vec<usize>> {
        #[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
        {
            if let Some(pool) = parallel::pool_for(options, self.plan.row_count()) {
                return pool.install(|| self.build_map_parallel(options));
            }
        }
        #[cfg(not(all(feature = "parallel", not(target_arch = "wasm32"))))]
        let _ = options;

        self.build_map_sequential()
    }

    fn build_map_sequential(&self) -> PartitionResult<Vec<usize>> {
        let plan = self.plan;
        let offsets = plan.offsets();
        let mut cursors = try_vec::<usize>(plan.num_partitions())?;
        cursors.extend_from_slice(&offsets[..plan.num_partitions()]);

        let mut map = try_vec::<usize>(plan.row_count())?;
        map.resize(plan.row_count(), 0);
        for (row, &bucket) in plan.buckets().iter().enumerate() {
            let bucket = checked_bucket(bucket, plan.num_partitions());
            let slot = cursors[bucket];
            assert!(
                slot < offsets[bucket + 1],
                "bucket {bucket} overflowed its range at row {row}"
            );
            map[slot] = row;
            cursors[bucket] += 1;
        }
        Ok(map)
    }

    #[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
    fn build_map_parallel(&self, options: &PartitionOptions) -> PartitionResult<Vec<usize>> {
        let plan = self.plan;
        let p = plan.num_partitions();
        let offsets = plan.offsets();
        let chunk_rows = options.chunk_rows().max(p);

        let histograms: Vec<Vec<usize>> = plan
            .buckets()
            .par_chunks(chunk_rows)
            .map(|chunk| -> PartitionResult<Vec<usize>> {
                let mut counts = zeroed(p)?;
                for &bucket in chunk {
                    counts[checked_bucket(bucket, p)] += 1;
                }
                Ok(counts)
            })
            .collect::<PartitionResult<_>>()?;

        // Chunk `c` writes bucket `k` starting at `offsets[k]` plus the rows of `k` in the
        // chunks before `c`.
        let mut bases = histograms;
        for bucket in 0..p {
            let mut running = offsets[bucket];
            for counts in bases.iter_mut() {
                let count = counts[bucket];
                counts[bucket] = running;
                running += count;
            }
            assert_eq!(
                running,
                offsets[bucket + 1],
                "bucket {bucket} row count disagrees with its offsets"
            );
        }

        let mut map = try_vec::<AtomicUsize>(plan.row_count())?;
        map.extend((0..plan.row_count()).map(|_| AtomicUsize::new(0)));

        plan.buckets()
            .par_chunks(chunk_rows)
            .zip(bases.into_par_iter())
            .enumerate()
            .for_each(|(chunk, (buckets, mut cursors))| {
                let first_row = chunk * chunk_rows;
                for (i, &bucket) in buckets.iter().enumerate() {
                    let bucket = bucket as usize;
                    let slot = cursors[bucket];
                    assert!(
                        slot < offsets[bucket + 1],
                        "bucket {bucket} overflowed its range at row {}",
                        first_row + i
                    );
                    map[slot].store(first_row + i, Ordering::Relaxed);
                    cursors[bucket] += 1;
                }
            });

        let mut out = try_vec::<usize>(map.len())?;
        out.extend(map.into_iter().map(AtomicUsize::into_inner));
        Ok(out)
    }
}

#[inline]
fn checked_bucket(bucket: u32, num_partitions: usize) -> usize {
    let bucket = bucket as usize;
    assert!(
        bucket < num_partitions,
        "bucket id {bucket} outside [0, {num_partitions})"
    );
    bucket
}

/// Bytes the gathered copy of `column` will hold.
fn output_bytes(column: &Column, rows: usize) -> usize {
    let validity = if column.validity().is_some() {
        rows.div_ceil(64) * std::mem::size_of::<u64>()
    } else {
        0
    };
    column.column_type().buffer_bytes(rows) + validity
}

fn gather_columns(columns: &[&Column], map: &[usize], options: &PartitionOptions) -> Vec<Column> {
    #[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
    {
        if let Some(pool) = parallel::pool_for(options, map.len()) {
            let chunk_rows = options.chunk_rows();
            return pool.install(|| {
                let mut out = Vec::with_capacity(columns.len());
                columns
                    .par_iter()
                    .map(|column| gather_column_parallel(column, map, chunk_rows))
                    .collect_into_vec(&mut out);
                out
            });
        }
    }
    #[cfg(not(all(feature = "parallel", not(target_arch = "wasm32"))))]
    let _ = options;

    columns.iter().map(|column| column.gather(map)).collect()
}

/// [`Column::gather`] split into row chunks of the map.
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
fn gather_column_parallel(column: &Column, map: &[usize], chunk_rows: usize) -> Column {
    macro_rules! gather_values {
        ($values:expr) => {{
            let mut out = Vec::with_capacity(map.len());
            map.par_iter()
                .with_min_len(chunk_rows)
                .map(|&row| $values[row].clone())
                .collect_into_vec(&mut out);
            out
        }};
    }

    let data = match column.data() {
        ColumnData::Boolean(bits) => {
            ColumnData::Boolean(gather_bits_parallel(bits, map, chunk_rows))
        }
        ColumnData::Int8(v) => ColumnData::Int8(gather_values!(v)),
        ColumnData::Int16(v) => ColumnData::Int16(gather_values!(v)),
        ColumnData::Int32(v) => ColumnData::Int32(gather_values!(v)),
        ColumnData::Int64(v) => ColumnData::Int64(gather_values!(v)),
        ColumnData::UInt8(v) => ColumnData::UInt8(gather_values!(v)),
        ColumnData::UInt16(v) => ColumnData::UInt16(gather_values!(v)),
        ColumnData::UInt32(v) => ColumnData::UInt32(gather_values!(v)),
        ColumnData::UInt64(v) => ColumnData::UInt64(gather_values!(v)),
        ColumnData::Float32(v) => ColumnData::Float32(gather_values!(v)),
        ColumnData::Float64(v) => ColumnData::Float64(gather_values!(v)),
        ColumnData::Utf8(v) => ColumnData::Utf8(gather_values!(v)),
    };
    let validity = column
        .validity()
        .map(|bits| gather_bits_parallel(bits, map, chunk_rows));

    Column::from_parts(data, validity)
        .unwrap_or_else(|err| panic!("gathered column parts disagree: {err}"))
}

/// Every output word is built from 64 consecutive map entries, so chunks never share a word.
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
fn gather_bits_parallel(bits: &BitVec, map: &[usize], chunk_rows: usize) -> BitVec {
    let mut words = Vec::with_capacity(map.len().div_ceil(64));
    map.par_chunks(64)
        .with_min_len(chunk_rows.div_ceil(64))
        .map(|rows| {
            rows.iter()
                .enumerate()
                .filter(|&(_, &row)| bits.get(row))
                .fold(0u64, |word, (bit, _)| word | (1u64 << bit))
        })
        .collect_into_vec(&mut words);
    BitVec::from_words(words, map.len())
}
