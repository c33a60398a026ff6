//! Columnar tables for the rowshard partitioning engine.
//!
//! This crate provides:
//! - Typed column buffers with optional validity masks ([`Column`], [`ColumnData`], [`BitVec`]).
//! - Owned tables and borrowed column-subset views ([`Table`], [`TableView`]).
//! - Row-at-a-time construction for tests and small inputs ([`TableBuilder`]).
//! - Pluggable memory accounting for buffers created on a caller's behalf ([`memory`]).

#![forbid(unsafe_code)]

mod bitmap;
mod column;
mod error;
pub mod memory;
mod table;
mod types;

pub use crate::bitmap::BitVec;
pub use crate::column::{Column, ColumnData};
pub use crate::error::{ColumnarError, ColumnarResult};
pub use crate::memory::{
    AllocError, Allocation, LimitResource, MemoryResource, SystemResource, TrackingResource,
};
pub use crate::table::{ColumnSchema, Table, TableBuilder, TableView};
pub use crate::types::{ColumnType, Value};
