use crate::stream::Stream;
use rowshard_columnar::{MemoryResource, SystemResource};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Tuning knobs for the hashing and scatter kernels. None of them affect results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionOptions {
    /// Allow data-parallel kernels (requires the `parallel` feature).
    pub parallel: bool,
    /// Inputs with fewer rows run sequentially.
    pub parallel_min_rows: usize,
    /// Rows per parallel work unit.
    pub chunk_rows: usize,
}

impl Default for PartitionOptions {
    fn default() -> Self {
        Self {
            parallel: true,
            parallel_min_rows: 16_384,
            chunk_rows: 8_192,
        }
    }
}

impl PartitionOptions {
    /// Defaults overridden by `ROWSHARD_PARALLEL`, `ROWSHARD_PARALLEL_MIN_ROWS` and
    /// `ROWSHARD_CHUNK_ROWS` when they are set and parse.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Some(parallel) = env_var("ROWSHARD_PARALLEL").and_then(|v| parse_bool(&v)) {
            options.parallel = parallel;
        }
        if let Some(rows) = env_usize("ROWSHARD_PARALLEL_MIN_ROWS") {
            options.parallel_min_rows = rows;
        }
        if let Some(rows) = env_usize("ROWSHARD_CHUNK_ROWS").filter(|&v| v > 0) {
            options.chunk_rows = rows;
        }
        options
    }

    /// Options that always take the sequential path.
    pub fn sequential() -> Self {
        Self {
            parallel: false,
            ..Self::default()
        }
    }

    /// Effective rows per work unit (never zero).
    pub fn chunk_rows(&self) -> usize {
        self.chunk_rows.max(1)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn env_usize(name: &str) -> Option<usize> {
    env_var(name).and_then(|v| v.replace('_', "").parse::<usize>().ok())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Everything an engine call needs besides its inputs: where memory comes from, which stream
/// orders the work, and kernel tuning.
///
/// Contexts are cheap to clone and share their resource and stream. There is no global default;
/// [`ExecutionContext::new`] creates a fresh [`SystemResource`] and a new [`Stream`].
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    resource: Arc<dyn MemoryResource>,
    stream: Stream,
    options: PartitionOptions,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self {
            resource: Arc::new(SystemResource),
            stream: Stream::new(),
            options: PartitionOptions::default(),
        }
    }

    pub fn with_resource(mut self, resource: Arc<dyn MemoryResource>) -> Self {
        self.resource = resource;
        self
    }

    pub fn with_stream(mut self, stream: Stream) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_options(mut self, options: PartitionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn resource(&self) -> &Arc<dyn MemoryResource> {
        &self.resource
    }

    pub fn stream(&self) -> &Stream {
        &self.stream
    }

    pub fn options(&self) -> &PartitionOptions {
        &self.options
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}
