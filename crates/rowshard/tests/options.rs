use pretty_assertions::assert_eq;
use rowshard::columnar::{ColumnType, LimitResource, MemoryResource};
use rowshard::{ExecutionContext, HashFunction, PartitionOptions, Stream};
use std::sync::Arc;

#[test]
fn defaults() {
    let options = PartitionOptions::default();
    assert!(options.parallel);
    assert_eq!(options.parallel_min_rows, 16_384);
    assert_eq!(options.chunk_rows, 8_192);
    assert!(!PartitionOptions::sequential().parallel);
}

#[test]
fn options_deserialize_with_missing_fields_defaulted() {
    let options: PartitionOptions = serde_json::from_str(r#"{"chunk_rows": 128}"#).unwrap();
    assert_eq!(
        options,
        PartitionOptions {
            chunk_rows: 128,
            ..PartitionOptions::default()
        }
    );

    let round_trip: PartitionOptions =
        serde_json::from_value(serde_json::to_value(options).unwrap()).unwrap();
    assert_eq!(round_trip, options);
}

#[test]
fn zero_chunk_rows_is_clamped() {
    let options = PartitionOptions {
        chunk_rows: 0,
        ..PartitionOptions::default()
    };
    assert_eq!(options.chunk_rows(), 1);
}

#[test]
fn hash_function_names() {
    assert_eq!(HashFunction::default(), HashFunction::Murmur3);
    assert_eq!(
        serde_json::to_string(&HashFunction::Identity).unwrap(),
        r#""identity""#
    );
    let parsed: HashFunction = serde_json::from_str(r#""murmur3""#).unwrap();
    assert_eq!(parsed, HashFunction::Murmur3);
    assert_eq!(
        serde_json::to_string(&ColumnType::UInt64).unwrap(),
        r#""uint64""#
    );
}

#[test]
fn env_overrides() {
    std::env::set_var("ROWSHARD_PARALLEL", "off");
    std::env::set_var("ROWSHARD_PARALLEL_MIN_ROWS", "1_000");
    std::env::set_var("ROWSHARD_CHUNK_ROWS", "0");
    let options = PartitionOptions::from_env();
    std::env::remove_var("ROWSHARD_PARALLEL");
    std::env::remove_var("ROWSHARD_PARALLEL_MIN_ROWS");
    std::env::remove_var("ROWSHARD_CHUNK_ROWS");

    assert!(!options.parallel);
    assert_eq!(options.parallel_min_rows, 1_000);
    // Zero is ignored rather than clamped.
    assert_eq!(options.chunk_rows, 8_192);
}

#[test]
fn context_builders_replace_parts() {
    let stream = Stream::inline();
    let limit: Arc<dyn MemoryResource> = Arc::new(LimitResource::new(64));
    let ctx = ExecutionContext::new()
        .with_stream(stream.clone())
        .with_resource(Arc::clone(&limit))
        .with_options(PartitionOptions::sequential());

    assert_eq!(ctx.stream().id(), stream.id());
    assert!(Arc::ptr_eq(ctx.resource(), &limit));
    assert_eq!(*ctx.options(), PartitionOptions::sequential());

    let other = ExecutionContext::new();
    assert_ne!(other.stream().id(), ctx.stream().id());
}
