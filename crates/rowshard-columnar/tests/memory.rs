use pretty_assertions::assert_eq;
use rowshard_columnar::memory::try_vec;
use rowshard_columnar::{
    AllocError, Allocation, Column, ColumnData, LimitResource, MemoryResource, SystemResource,
    TrackingResource,
};
use std::sync::Arc;

#[test]
fn tracking_resource_counts_live_and_peak_bytes() {
    let tracker = Arc::new(TrackingResource::new());
    let resource: Arc<dyn MemoryResource> = tracker.clone();

    let a = Allocation::reserve(&resource, 100).unwrap();
    let b = Allocation::reserve(&resource, 50).unwrap();
    assert_eq!(tracker.in_use(), 150);
    drop(a);
    assert_eq!(tracker.in_use(), 50);
    assert_eq!(tracker.peak(), 150);
    drop(b);
    assert_eq!(tracker.in_use(), 0);
    assert_eq!(tracker.allocation_count(), 2);
}

#[test]
fn zero_byte_reservations_skip_the_resource() {
    let tracker = Arc::new(TrackingResource::new());
    let resource: Arc<dyn MemoryResource> = tracker.clone();
    let alloc = Allocation::reserve(&resource, 0).unwrap();
    assert_eq!(alloc.bytes(), 0);
    assert_eq!(tracker.allocation_count(), 0);
}

#[test]
fn limit_resource_refuses_past_limit_and_recovers_after_release() {
    let limit = Arc::new(LimitResource::new(128));
    let resource: Arc<dyn MemoryResource> = limit.clone();

    let first = Allocation::reserve(&resource, 100).unwrap();
    let err = Allocation::reserve(&resource, 64).unwrap_err();
    assert_eq!(
        err,
        AllocError::LimitExceeded {
            requested: 64,
            in_use: 100,
            limit: 128
        }
    );
    assert_eq!(limit.in_use(), 100);

    drop(first);
    let second = Allocation::reserve(&resource, 128).unwrap();
    assert_eq!(limit.in_use(), 128);
    drop(second);
    assert_eq!(limit.in_use(), 0);
}

#[test]
fn column_releases_its_allocation_on_drop() {
    let tracker = Arc::new(TrackingResource::new());
    let resource: Arc<dyn MemoryResource> = tracker.clone();

    let column = Column::new(ColumnData::UInt32(vec![1, 2, 3, 4]));
    let alloc = Allocation::reserve(&resource, column.byte_len()).unwrap();
    let column = column.with_allocation(alloc);
    assert_eq!(column.allocated_bytes(), 16);
    assert_eq!(tracker.in_use(), 16);

    let copy = column.clone();
    assert_eq!(copy.allocated_bytes(), 0);
    assert_eq!(copy, column);

    drop(column);
    assert_eq!(tracker.in_use(), 0);
}

#[test]
fn system_resource_never_refuses() {
    let resource: Arc<dyn MemoryResource> = Arc::new(SystemResource);
    assert!(Allocation::reserve(&resource, usize::MAX / 2).is_ok());
}

#[test]
fn try_vec_reports_impossible_capacity() {
    let err = try_vec::<u64>(usize::MAX).unwrap_err();
    assert!(matches!(err, AllocError::Exhausted { .. }));
    let ok = try_vec::<u64>(16).unwrap();
    assert!(ok.capacity() >= 16);
}
