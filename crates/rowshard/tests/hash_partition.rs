use pretty_assertions::assert_eq;
use rowshard::columnar::{
    AllocError, Column, ColumnSchema, ColumnType, LimitResource, MemoryResource, Table,
    TableBuilder, TrackingResource, Value,
};
use rowshard::{
    hash_columns, hash_partition, hash_partition_async, partition_by_map, ExecutionContext,
    HashFunction, PartitionError, PartitionOptions, PartitionPlan, PartitionPlanner,
    ScatterRearranger, StreamError,
};
use std::panic::AssertUnwindSafe;
use std::collections::HashMap;
use std::sync::Arc;

fn keyed_table(keys: &[Option<i64>]) -> Table {
    let mut builder = TableBuilder::new(vec![
        ColumnSchema::new("key", ColumnType::Int64),
        ColumnSchema::new("row", ColumnType::UInt32),
        ColumnSchema::new("label", ColumnType::Utf8),
    ]);
    for (row, key) in keys.iter().enumerate() {
        builder
            .append_row(&[
                key.map(Value::Int64).unwrap_or(Value::Null),
                Value::UInt32(row as u32),
                Value::from(format!("r{row}").as_str()),
            ])
            .unwrap();
    }
    builder.finalize()
}

/// Resource that panics on any request, standing in for a fault inside a stage.
#[derive(Debug)]
struct PanickingResource;

impl MemoryResource for PanickingResource {
    fn allocate(&self, _bytes: usize) -> Result<(), AllocError> {
        panic!("resource failure")
    }

    fn deallocate(&self, _bytes: usize) {}
}

fn row_ids(table: &Table) -> Vec<u32> {
    table
        .column(1)
        .unwrap()
        .to_values()
        .into_iter()
        .map(|v| match v {
            Value::UInt32(id) => id,
            other => panic!("unexpected row id {other:?}"),
        })
        .collect()
}

#[test]
fn equal_keys_share_a_partition() {
    let t = keyed_table(&[Some(10), Some(20), Some(10), Some(30), Some(20)]);
    let ctx = ExecutionContext::new();
    let parts = hash_partition(&t.view(), &[0], 2, HashFunction::Murmur3, &ctx).unwrap();

    assert_eq!(parts.num_partitions(), 2);
    assert_eq!(parts.table().row_count(), 5);
    assert_eq!(parts.offsets()[0], 0);
    assert_eq!(parts.offsets()[2], 5);

    let mut home: HashMap<i64, usize> = HashMap::new();
    for k in 0..parts.num_partitions() {
        for row in parts.partition_range(k) {
            let key = parts.table().get_cell(row, 0);
            let key = match key {
                Value::Int64(v) => v,
                other => panic!("unexpected key {other:?}"),
            };
            let previous = home.insert(key, k);
            assert!(previous.is_none() || previous == Some(k));
        }
    }
}

#[test]
fn partitions_follow_the_bucket_of_each_hash() {
    let keys: Vec<Option<i64>> = (0..50).map(|i| Some(i * 3)).collect();
    let t = keyed_table(&keys);
    let ctx = ExecutionContext::new();
    let view = t.view();

    let hashes = hash_columns(&view, &[0], HashFunction::Murmur3, &[], &ctx).unwrap();
    let planner = PartitionPlanner::new(7).unwrap();
    let parts = hash_partition(&view, &[0], 7, HashFunction::Murmur3, &ctx).unwrap();

    for k in 0..7 {
        for id in row_ids(&parts.partition(k).unwrap()) {
            let hash = match hashes.value(id as usize) {
                Value::UInt32(h) => h,
                other => panic!("unexpected hash {other:?}"),
            };
            assert_eq!(planner.bucket_of(hash) as usize, k);
        }
    }
}

#[test]
fn rows_keep_input_order_within_a_partition() {
    let keys: Vec<Option<i64>> = (0..200).map(|i| Some(i % 9)).collect();
    let t = keyed_table(&keys);
    let parts =
        hash_partition(&t.view(), &[0], 4, HashFunction::Murmur3, &ExecutionContext::new())
            .unwrap();

    let mut total = 0;
    for k in 0..parts.num_partitions() {
        let ids = row_ids(&parts.partition(k).unwrap());
        assert!(ids.windows(2).all(|w| w[0] < w[1]), "partition {k}: {ids:?}");
        total += ids.len();
    }
    assert_eq!(total, 200);
}

#[test]
fn values_and_nulls_are_copied_verbatim() {
    let t = keyed_table(&[Some(1), None, Some(2), None, Some(1)]);
    let parts =
        hash_partition(&t.view(), &[0], 3, HashFunction::Murmur3, &ExecutionContext::new())
            .unwrap();

    let original = t.to_rows();
    for (row, id) in row_ids(parts.table()).into_iter().enumerate() {
        assert_eq!(parts.table().row(row), original[id as usize]);
    }
    assert_eq!(parts.table().schema(), t.schema());
    assert_eq!(parts.table().column(0).unwrap().null_count(), 2);
}

#[test]
fn all_null_keys_land_together() {
    let t = keyed_table(&[None, Some(5), None, None]);
    let parts =
        hash_partition(&t.view(), &[0], 8, HashFunction::Murmur3, &ExecutionContext::new())
            .unwrap();
    let null_partitions: Vec<usize> = (0..8)
        .filter(|&k| {
            parts
                .partition_range(k)
                .any(|row| parts.table().column(0).unwrap().is_null(row))
        })
        .collect();
    assert_eq!(null_partitions.len(), 1);
    assert!(parts.partition_len(null_partitions[0]) >= 3);
}

#[test]
fn single_partition_returns_the_input_unchanged() {
    let t = keyed_table(&[Some(3), Some(1), None, Some(2)]);
    let parts =
        hash_partition(&t.view(), &[0, 2], 1, HashFunction::Murmur3, &ExecutionContext::new())
            .unwrap();
    assert_eq!(parts.offsets(), &[0, 4]);
    assert_eq!(parts.table().to_rows(), t.to_rows());
}

#[test]
fn empty_input_gives_empty_partitions() {
    let t = keyed_table(&[]);
    let parts =
        hash_partition(&t.view(), &[0], 5, HashFunction::Murmur3, &ExecutionContext::new())
            .unwrap();
    assert_eq!(parts.offsets(), &[0, 0, 0, 0, 0, 0]);
    assert_eq!(parts.table().column_count(), 3);
    assert_eq!(parts.partition(4).unwrap().row_count(), 0);
    assert!(parts.partition(5).is_none());
}

#[test]
fn zero_partitions_fail_before_allocating() {
    let t = keyed_table(&[Some(1)]);
    let tracking = Arc::new(TrackingResource::new());
    let ctx = ExecutionContext::new().with_resource(tracking.clone());

    let err = hash_partition(&t.view(), &[0], 0, HashFunction::Murmur3, &ctx).unwrap_err();
    assert_eq!(err, PartitionError::InvalidPartitionCount(0));
    assert!(err.is_invalid_argument());
    assert_eq!(tracking.allocation_count(), 0);

    let err = partition_by_map(&t.view(), &[0], 0, &ctx).unwrap_err();
    assert_eq!(err, PartitionError::InvalidPartitionCount(0));
    assert_eq!(tracking.allocation_count(), 0);
}

#[test]
fn invalid_key_columns_are_rejected() {
    let t = keyed_table(&[Some(1)]);
    let ctx = ExecutionContext::new();
    assert_eq!(
        hash_partition(&t.view(), &[], 2, HashFunction::Murmur3, &ctx).unwrap_err(),
        PartitionError::EmptyColumnSelection
    );
    assert_eq!(
        hash_partition(&t.view(), &[5], 2, HashFunction::Murmur3, &ctx).unwrap_err(),
        PartitionError::ColumnOutOfRange {
            index: 5,
            columns: 3
        }
    );
    assert!(matches!(
        hash_partition(&t.view(), &[0], 2, HashFunction::Identity, &ctx).unwrap_err(),
        PartitionError::UnsupportedHashType { column: 0, .. }
    ));
}

#[test]
fn identity_partitioning_on_unsigned_keys_is_modulo() {
    let t = keyed_table(&[Some(0), Some(1), Some(2), Some(3), Some(4), Some(5)]);
    let parts =
        hash_partition(&t.view(), &[1], 3, HashFunction::Identity, &ExecutionContext::new())
            .unwrap();
    assert_eq!(parts.offsets(), &[0, 2, 4, 6]);
    assert_eq!(row_ids(parts.table()), vec![0, 3, 1, 4, 2, 5]);
}

#[test]
fn partition_by_map_is_a_stable_scatter() {
    let t = keyed_table(&[Some(1), Some(2), Some(3), Some(4), Some(5)]);
    let parts =
        partition_by_map(&t.view(), &[2, 0, 2, 1, 0], 4, &ExecutionContext::new()).unwrap();
    assert_eq!(parts.offsets(), &[0, 2, 3, 5, 5]);
    assert_eq!(row_ids(parts.table()), vec![1, 4, 3, 0, 2]);
}

#[test]
fn partition_by_map_validates_the_map() {
    let t = keyed_table(&[Some(1), Some(2)]);
    let ctx = ExecutionContext::new();
    assert_eq!(
        partition_by_map(&t.view(), &[0], 2, &ctx).unwrap_err(),
        PartitionError::MapLengthMismatch {
            expected: 2,
            actual: 1
        }
    );
    assert_eq!(
        partition_by_map(&t.view(), &[0, 2], 2, &ctx).unwrap_err(),
        PartitionError::BucketOutOfRange {
            row: 1,
            bucket: 2,
            num_partitions: 2
        }
    );
}

#[test]
fn split_yields_one_table_per_partition() {
    let t = keyed_table(&[Some(1), Some(2), Some(3), Some(4)]);
    let tracking = Arc::new(TrackingResource::new());
    let ctx = ExecutionContext::new().with_resource(tracking.clone());
    let parts = partition_by_map(&t.view(), &[1, 0, 1, 2], 3, &ctx).unwrap();

    let tables = parts.split(&ctx).unwrap();
    assert_eq!(tables.len(), 3);
    assert_eq!(row_ids(&tables[0]), vec![1]);
    assert_eq!(row_ids(&tables[1]), vec![0, 2]);
    assert_eq!(row_ids(&tables[2]), vec![3]);
    assert!(tracking.in_use() > 0);

    drop(tables);
    assert_eq!(tracking.in_use(), 0);
}

#[test]
fn scratch_is_released_and_output_is_charged() {
    let keys: Vec<Option<i64>> = (0..1_000).map(|i| Some(i % 31)).collect();
    let t = keyed_table(&keys);
    let tracking = Arc::new(TrackingResource::new());
    let ctx = ExecutionContext::new().with_resource(tracking.clone());

    let parts = hash_partition(&t.view(), &[0], 16, HashFunction::Murmur3, &ctx).unwrap();
    let charged: usize = parts
        .table()
        .columns()
        .iter()
        .map(Column::allocated_bytes)
        .sum();
    assert!(charged > 0);
    assert_eq!(tracking.in_use(), charged);
    assert!(tracking.peak() > charged);

    drop(parts);
    assert_eq!(tracking.in_use(), 0);
}

#[test]
fn allocation_failure_returns_no_output() {
    let t = keyed_table(&[Some(1), Some(2)]);
    let limit = Arc::new(LimitResource::new(16));
    let ctx = ExecutionContext::new().with_resource(limit.clone());
    let err = hash_partition(&t.view(), &[0], 2, HashFunction::Murmur3, &ctx).unwrap_err();
    assert!(matches!(err, PartitionError::Allocation(_)));
    assert_eq!(limit.in_use(), 0);
}

#[test]
fn parallel_and_sequential_runs_agree() {
    let keys: Vec<Option<i64>> = (0..20_000)
        .map(|i| if i % 17 == 0 { None } else { Some(i * 31 % 1_009) })
        .collect();
    let t = keyed_table(&keys);
    let view = t.view();

    let sequential = ExecutionContext::new().with_options(PartitionOptions::sequential());
    let parallel = ExecutionContext::new().with_options(PartitionOptions {
        parallel: true,
        parallel_min_rows: 0,
        chunk_rows: 1_000,
    });

    let a = hash_partition(&view, &[0, 2], 13, HashFunction::Murmur3, &sequential).unwrap();
    let b = hash_partition(&view, &[0, 2], 13, HashFunction::Murmur3, &parallel).unwrap();
    assert_eq!(a.offsets(), b.offsets());
    assert_eq!(a.table(), b.table());
}

#[test]
fn queued_partitioning_matches_blocking() {
    let keys: Vec<Option<i64>> = (0..300).map(|i| Some(i % 11)).collect();
    let t = Arc::new(keyed_table(&keys));
    let ctx = ExecutionContext::new();

    let pending =
        hash_partition_async(Arc::clone(&t), vec![0], 5, HashFunction::Murmur3, &ctx).unwrap();
    let queued = pending.wait().unwrap().unwrap();
    let blocking = hash_partition(&t.view(), &[0], 5, HashFunction::Murmur3, &ctx).unwrap();

    assert_eq!(queued.offsets(), blocking.offsets());
    assert_eq!(queued.table(), blocking.table());
}

#[test]
fn queued_partitioning_validates_eagerly() {
    let t = Arc::new(keyed_table(&[Some(1)]));
    let err = hash_partition_async(t, vec![0], 0, HashFunction::Murmur3, &ExecutionContext::new())
        .unwrap_err();
    assert_eq!(err, PartitionError::InvalidPartitionCount(0));
}

#[test]
fn selected_views_partition_their_own_columns() {
    let t = keyed_table(&[Some(1), Some(2), Some(3)]);
    let view = t.view().select(&[2, 0]).unwrap();
    let parts =
        hash_partition(&view, &[1], 2, HashFunction::Murmur3, &ExecutionContext::new()).unwrap();
    assert_eq!(parts.table().column_count(), 2);
    assert_eq!(parts.table().schema()[0].name, "label");
    assert_eq!(parts.table().row_count(), 3);
}

#[test]
fn gather_map_lists_source_rows_in_output_order() {
    let sequential = ExecutionContext::new().with_options(PartitionOptions::sequential());
    let parallel = ExecutionContext::new().with_options(PartitionOptions {
        parallel: true,
        parallel_min_rows: 0,
        chunk_rows: 2,
    });
    let plan = PartitionPlan::from_assignment(&[2, 0, 2, 1, 0], 4, &sequential).unwrap();
    let rearranger = ScatterRearranger::new(&plan);

    assert_eq!(rearranger.gather_map(&sequential).unwrap(), vec![1, 4, 3, 0, 2]);
    assert_eq!(rearranger.gather_map(&parallel).unwrap(), vec![1, 4, 3, 0, 2]);
}

#[test]
fn into_parts_hands_back_table_and_offsets() {
    let t = keyed_table(&[Some(1), Some(2), Some(3)]);
    let parts = partition_by_map(&t.view(), &[1, 0, 1], 2, &ExecutionContext::new()).unwrap();
    let expected_table = parts.table().clone();

    let (table, offsets) = parts.into_parts();
    assert_eq!(offsets, vec![0, 1, 3]);
    assert_eq!(table, expected_table);
    assert_eq!(row_ids(&table), vec![1, 0, 2]);
}

#[test]
fn a_panicking_queued_stage_poisons_the_stream() {
    let t = Arc::new(keyed_table(&[Some(1), Some(2), Some(3)]));
    let ctx = ExecutionContext::new().with_resource(Arc::new(PanickingResource));
    let stream = ctx.stream().clone();

    let pending =
        hash_partition_async(Arc::clone(&t), vec![0], 2, HashFunction::Murmur3, &ctx).unwrap();
    assert!(matches!(
        pending.wait(),
        Err(StreamError::Aborted { stream: id }) if id == stream.id()
    ));
    assert!(stream.is_poisoned());

    let healthy = ctx.clone().with_resource(Arc::new(TrackingResource::new()));
    assert_eq!(
        hash_partition(&t.view(), &[0], 2, HashFunction::Murmur3, &healthy).unwrap_err(),
        PartitionError::Stream(StreamError::Aborted {
            stream: stream.id()
        })
    );
}

#[test]
fn a_panicking_blocking_call_poisons_the_stream() {
    let t = keyed_table(&[Some(1), Some(2), Some(3)]);
    let ctx = ExecutionContext::new().with_resource(Arc::new(PanickingResource));

    let unwound = std::panic::catch_unwind(AssertUnwindSafe(|| {
        hash_partition(&t.view(), &[0], 2, HashFunction::Murmur3, &ctx)
    }));
    assert!(unwound.is_err());
    assert!(ctx.stream().is_poisoned());
}
