//! Row hashing and hash partitioning for columnar tables.
//!
//! The engine computes a deterministic 32-bit hash per row over a chosen set of columns
//! ([`hash`], [`hash_columns`]) and uses it to regroup a table's rows into a fixed number of
//! partitions, each one a contiguous run of rows ([`hash_partition`]). Rows of one partition keep
//! their input order.
//!
//! Every entry point takes an [`ExecutionContext`]: the [`MemoryResource`] output and scratch
//! buffers are charged to, the [`Stream`] that orders the work, and [`PartitionOptions`] for the
//! data-parallel kernels. Blocking entry points run in stream order on the calling thread; the
//! `*_async` forms queue the work and return a [`Pending`] handle.
//!
//! ```
//! use rowshard::{hash_partition, ExecutionContext, HashFunction};
//! use rowshard::columnar::{ColumnSchema, ColumnType, TableBuilder, Value};
//!
//! let mut builder = TableBuilder::new(vec![ColumnSchema::new("key", ColumnType::Int64)]);
//! for key in [10i64, 20, 10, 30, 20] {
//!     builder.append_row(&[Value::Int64(key)]).unwrap();
//! }
//! let table = builder.finalize();
//!
//! let ctx = ExecutionContext::new();
//! let parts = hash_partition(&table.view(), &[0], 2, HashFunction::Murmur3, &ctx).unwrap();
//! assert_eq!(parts.offsets().len(), 3);
//! assert_eq!(parts.table().row_count(), 5);
//! ```

#![forbid(unsafe_code)]

mod context;
mod error;
pub mod hash;
mod parallel;
mod partition;
mod planner;
mod scatter;
pub mod stream;

pub use rowshard_columnar as columnar;

pub use crate::context::{ExecutionContext, PartitionOptions};
pub use crate::error::{PartitionError, PartitionResult};
pub use crate::hash::{
    hash, hash_async, hash_columns, hash_combine, murmur3_32, HashFunction, RowHasher, NULL_HASH,
};
pub use crate::partition::{hash_partition, hash_partition_async, partition_by_map, PartitionedTable};
pub use crate::planner::{PartitionPlan, PartitionPlanner};
pub use crate::scatter::ScatterRearranger;
pub use crate::stream::{Event, Pending, Stream, StreamError};
pub use rowshard_columnar::MemoryResource;
