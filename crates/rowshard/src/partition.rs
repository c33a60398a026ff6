//! Hash partitioning: hash the key columns, bucket every row, and move each bucket into one
//! contiguous run of rows.

use crate::context::ExecutionContext;
use crate::error::{PartitionError, PartitionResult};
use crate::hash::{HashFunction, RowHasher};
use crate::planner::{validate_assignment, PartitionPlan, PartitionPlanner};
use crate::scatter::ScatterRearranger;
use crate::stream::Pending;
use rowshard_columnar::{Allocation, Table, TableView};
use std::ops::Range;
use std::sync::Arc;

/// A rearranged table whose rows are grouped by partition.
///
/// Partition `k` occupies rows `offsets[k]..offsets[k + 1]`. Within a partition rows keep their
/// input order.
#[derive(Debug)]
pub struct PartitionedTable {
    table: Table,
    offsets: Vec<usize>,
}

impl PartitionedTable {
    fn new(table: Table, offsets: Vec<usize>) -> Self {
        debug_assert_eq!(offsets.first().copied(), Some(0));
        debug_assert_eq!(offsets.last().copied(), Some(table.row_count()));
        Self { table, offsets }
    }

    pub fn num_partitions(&self) -> usize {
        self.offsets.len() - 1
    }

    /// `num_partitions + 1` non-decreasing row offsets, starting at 0 and ending at the row count.
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn into_parts(self) -> (Table, Vec<usize>) {
        (self.table, self.offsets)
    }

    /// Rows of partition `k` in [`PartitionedTable::table`].
    ///
    /// # Panics
    ///
    /// If `k >= num_partitions()`.
    pub fn partition_range(&self, k: usize) -> Range<usize> {
        self.offsets[k]..self.offsets[k + 1]
    }

    pub fn partition_len(&self, k: usize) -> usize {
        let range = self.partition_range(k);
        range.end - range.start
    }

    /// Copy of partition `k`, or `None` if there is no such partition.
    pub fn partition(&self, k: usize) -> Option<Table> {
        (k < self.num_partitions()).then(|| self.table.slice(self.partition_range(k)))
    }

    /// One owned table per partition, in partition order, charged to `ctx`'s resource.
    pub fn split(self, ctx: &ExecutionContext) -> PartitionResult<Vec<Table>> {
        let mut parts = Vec::with_capacity(self.num_partitions());
        for k in 0..self.num_partitions() {
            let part = self.table.slice(self.partition_range(k));
            let part = part.try_map_columns(|column| {
                let allocation = Allocation::reserve(ctx.resource(), column.byte_len())?;
                Ok::<_, PartitionError>(column.with_allocation(allocation))
            })?;
            parts.push(part);
        }
        Ok(parts)
    }
}

/// Partition the rows of `input` into `num_partitions` buckets by the hash of `columns_to_hash`.
///
/// Equal key values (nulls included) always land in the same partition. Rows within a partition
/// keep their input order.
pub fn hash_partition(
    input: &TableView<'_>,
    columns_to_hash: &[usize],
    num_partitions: usize,
    function: HashFunction,
    ctx: &ExecutionContext,
) -> PartitionResult<PartitionedTable> {
    let planner = PartitionPlanner::new(num_partitions)?;
    let hasher = RowHasher::new(input, columns_to_hash, function, &[])?;

    log::debug!(
        "hash partitioning {} rows into {num_partitions} partitions on columns {columns_to_hash:?}",
        input.row_count()
    );
    ctx.stream()
        .execute(|| run_hash_partition(input, &hasher, planner, ctx))?
}

/// Queue [`hash_partition`] on `ctx`'s stream.
///
/// Arguments are validated before anything is queued. Hashing, planning and the scatter run as
/// consecutive jobs on the stream.
pub fn hash_partition_async(
    input: Arc<Table>,
    columns_to_hash: Vec<usize>,
    num_partitions: usize,
    function: HashFunction,
    ctx: &ExecutionContext,
) -> PartitionResult<Pending<PartitionResult<PartitionedTable>>> {
    let planner = PartitionPlanner::new(num_partitions)?;
    RowHasher::new(&input.view(), &columns_to_hash, function, &[])?;

    let stream = ctx.stream();

    let hash_ctx = ctx.clone();
    let hash_input = Arc::clone(&input);
    let hashed = stream.enqueue(move || {
        RowHasher::new(&hash_input.view(), &columns_to_hash, function, &[])?
            .hash_values(&hash_ctx)
    });

    let plan_ctx = ctx.clone();
    let planned = stream.enqueue(move || {
        let (hashes, _allocation) = hashed.wait()??;
        planner.plan(&hashes, &plan_ctx)
    });

    let scatter_ctx = ctx.clone();
    Ok(stream.enqueue(move || {
        let plan = planned.wait()??;
        scatter(&input.view(), plan, &scatter_ctx)
    }))
}

/// Stable partition of `input` by a caller-chosen bucket per row.
pub fn partition_by_map(
    input: &TableView<'_>,
    partition_map: &[u32],
    num_partitions: usize,
    ctx: &ExecutionContext,
) -> PartitionResult<PartitionedTable> {
    if num_partitions == 0 {
        return Err(PartitionError::InvalidPartitionCount(num_partitions));
    }
    if partition_map.len() != input.row_count() {
        return Err(PartitionError::MapLengthMismatch {
            expected: input.row_count(),
            actual: partition_map.len(),
        });
    }
    validate_assignment(partition_map, num_partitions)?;

    log::debug!(
        "partitioning {} rows into {num_partitions} partitions by map",
        input.row_count()
    );
    ctx.stream().execute(|| {
        let plan = PartitionPlan::from_assignment(partition_map, num_partitions, ctx)?;
        scatter(input, plan, ctx)
    })?
}

fn run_hash_partition(
    input: &TableView<'_>,
    hasher: &RowHasher<'_>,
    planner: PartitionPlanner,
    ctx: &ExecutionContext,
) -> PartitionResult<PartitionedTable> {
    let plan = {
        let (hashes, _allocation) = hasher.hash_values(ctx)?;
        planner.plan(&hashes, ctx)?
    };
    scatter(input, plan, ctx)
}

fn scatter(
    input: &TableView<'_>,
    plan: PartitionPlan,
    ctx: &ExecutionContext,
) -> PartitionResult<PartitionedTable> {
    let table = ScatterRearranger::new(&plan).rearrange(input, ctx)?;
    log::debug!(
        "scattered {} rows into {} partitions",
        table.row_count(),
        plan.num_partitions()
    );
    Ok(PartitionedTable::new(table, plan.into_offsets()))
}
