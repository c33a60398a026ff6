#![forbid(unsafe_code)]

//! Pluggable memory accounting for column buffers.
//!
//! Buffers themselves live in ordinary `Vec`s; a [`MemoryResource`] decides whether a buffer of a
//! given size may be created and is told when it is released. Every buffer the engine creates
//! first takes an [`Allocation`] from the resource in its execution context, and the allocation
//! travels with the buffer so the bytes are returned when it is dropped.
//!
//! There is no process-wide default. Callers pick a resource when they build their context; the
//! context's constructor installs a fresh [`SystemResource`].

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    #[error("memory limit exceeded: requested {requested} bytes with {in_use} of {limit} bytes in use")]
    LimitExceeded {
        requested: usize,
        in_use: usize,
        limit: usize,
    },

    #[error("allocation of {requested} bytes failed")]
    Exhausted { requested: usize },
}

/// Source of memory for engine outputs and scratch buffers.
pub trait MemoryResource: fmt::Debug + Send + Sync {
    /// Reserve `bytes`. Implementations must not count a failed request.
    fn allocate(&self, bytes: usize) -> Result<(), AllocError>;

    /// Return `bytes` previously granted by [`MemoryResource::allocate`].
    fn deallocate(&self, bytes: usize);
}

/// A live reservation against a [`MemoryResource`].
///
/// Dropping the allocation hands its bytes back to the resource.
pub struct Allocation {
    resource: Arc<dyn MemoryResource>,
    bytes: usize,
}

impl Allocation {
    /// Reserve `bytes` from `resource`. Zero-byte reservations never reach the resource.
    pub fn reserve(resource: &Arc<dyn MemoryResource>, bytes: usize) -> Result<Self, AllocError> {
        if bytes > 0 {
            resource.allocate(bytes)?;
        }
        Ok(Self {
            resource: Arc::clone(resource),
            bytes,
        })
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl fmt::Debug for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocation")
            .field("bytes", &self.bytes)
            .finish_non_exhaustive()
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        if self.bytes > 0 {
            self.resource.deallocate(self.bytes);
        }
    }
}

/// Create an empty `Vec` with room for exactly `len` elements, reporting failure instead of
/// aborting.
pub fn try_vec<T>(len: usize) -> Result<Vec<T>, AllocError> {
    let mut out = Vec::new();
    out.try_reserve_exact(len)
        .map_err(|_| AllocError::Exhausted {
            requested: len.saturating_mul(std::mem::size_of::<T>()),
        })?;
    Ok(out)
}

/// Unlimited resource backed by the global Rust allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResource;

impl MemoryResource for SystemResource {
    fn allocate(&self, _bytes: usize) -> Result<(), AllocError> {
        Ok(())
    }

    fn deallocate(&self, _bytes: usize) {}
}

/// Resource that records how much memory is outstanding.
#[derive(Debug, Default)]
pub struct TrackingResource {
    in_use: AtomicUsize,
    peak: AtomicUsize,
    allocations: AtomicUsize,
}

impl TrackingResource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently reserved.
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    /// Highest value [`TrackingResource::in_use`] has reached.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }

    /// Number of successful `allocate` calls.
    pub fn allocation_count(&self) -> usize {
        self.allocations.load(Ordering::Acquire)
    }
}

impl MemoryResource for TrackingResource {
    fn allocate(&self, bytes: usize) -> Result<(), AllocError> {
        let now = self.in_use.fetch_add(bytes, Ordering::AcqRel) + bytes;
        self.peak.fetch_max(now, Ordering::AcqRel);
        self.allocations.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn deallocate(&self, bytes: usize) {
        self.in_use.fetch_sub(bytes, Ordering::AcqRel);
    }
}

/// Resource that refuses requests once `limit` bytes are outstanding.
///
/// `LimitResource::new(0)` fails every non-empty request.
#[derive(Debug)]
pub struct LimitResource {
    limit: usize,
    in_use: AtomicUsize,
}

impl LimitResource {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            in_use: AtomicUsize::new(0),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }
}

impl MemoryResource for LimitResource {
    fn allocate(&self, bytes: usize) -> Result<(), AllocError> {
        let mut current = self.in_use.load(Ordering::Acquire);
        loop {
            let next = current.saturating_add(bytes);
            if next > self.limit {
                log::debug!(
                    "refusing {bytes} byte allocation ({current} of {} bytes in use)",
                    self.limit
                );
                return Err(AllocError::LimitExceeded {
                    requested: bytes,
                    in_use: current,
                    limit: self.limit,
                });
            }
            match self.in_use.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    fn deallocate(&self, bytes: usize) {
        self.in_use.fetch_sub(bytes, Ordering::AcqRel);
    }
}
