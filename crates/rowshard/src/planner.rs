use crate::context::{ExecutionContext, PartitionOptions};
use crate::error::{PartitionError, PartitionResult};
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
use crate::parallel;
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
use rayon::prelude::*;
use rowshard_columnar::memory::try_vec;
use rowshard_columnar::{AllocError, Allocation};

/// Assigns rows to buckets by `hash % num_partitions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionPlanner {
    num_partitions: usize,
}

impl PartitionPlanner {
    pub fn new(num_partitions: usize) -> PartitionResult<Self> {
        if num_partitions == 0 {
            return Err(PartitionError::InvalidPartitionCount(num_partitions));
        }
        Ok(Self { num_partitions })
    }

    pub fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    #[inline]
    pub fn bucket_of(&self, hash: u32) -> u32 {
        // `num_partitions` may exceed `u32::MAX`; buckets past that are simply never hit.
        match u32::try_from(self.num_partitions) {
            Ok(p) => hash % p,
            Err(_) => hash,
        }
    }

    /// Bucket every row of `hashes` and count the rows per bucket.
    pub fn plan(&self, hashes: &[u32], ctx: &ExecutionContext) -> PartitionResult<PartitionPlan> {
        let rows = hashes.len();
        let allocation = Allocation::reserve(ctx.resource(), plan_bytes(rows, self.num_partitions))?;
        let mut buckets = try_vec::<u32>(rows)?;
        buckets.resize(rows, 0);

        let counts = self.assign(hashes, &mut buckets, ctx.options())?;
        let offsets = exclusive_prefix_sum(&counts)?;
        debug_assert_eq!(offsets.last().copied(), Some(rows));

        log::debug!(
            "planned {rows} rows into {} partitions (largest {})",
            self.num_partitions,
            counts.iter().max().copied().unwrap_or(0)
        );

        Ok(PartitionPlan {
            buckets,
            offsets,
            num_partitions: self.num_partitions,
            _scratch: allocation,
        })
    }

    fn assign(
        &self,
        hashes: &[u32],
        buckets: &mut [u32],
        options: &PartitionOptions,
    ) -> PartitionResult<Vec<usize>> {
        #[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
        {
            // Per-chunk histograms only pay off while they are small next to the chunk.
            let pool = parallel::pool_for(options, hashes.len())
                .filter(|_| self.num_partitions <= options.chunk_rows());
            if let Some(pool) = pool {
                let chunk_rows = options.chunk_rows();
                let p = self.num_partitions;
                return Ok(pool.install(|| {
                    hashes
                        .par_chunks(chunk_rows)
                        .zip(buckets.par_chunks_mut(chunk_rows))
                        .map(|(hashes, buckets)| {
                            let mut counts = vec![0usize; p];
                            self.assign_chunk(hashes, buckets, &mut counts);
                            counts
                        })
                        .reduce(
                            || vec![0usize; p],
                            |mut acc, counts| {
                                for (a, c) in acc.iter_mut().zip(counts) {
                                    *a += c;
                                }
                                acc
                            },
                        )
                }));
            }
        }
        #[cfg(not(all(feature = "parallel", not(target_arch = "wasm32"))))]
        let _ = options;

        let mut counts = zeroed(self.num_partitions)?;
        self.assign_chunk(hashes, buckets, &mut counts);
        Ok(counts)
    }

    fn assign_chunk(&self, hashes: &[u32], buckets: &mut [u32], counts: &mut [usize]) {
        for (hash, bucket) in hashes.iter().zip(buckets.iter_mut()) {
            *bucket = self.bucket_of(*hash);
            counts[*bucket as usize] += 1;
        }
    }
}

/// Per-row bucket ids plus the start of every bucket in the rearranged output.
///
/// `offsets` has `num_partitions + 1` entries: bucket `k` covers `offsets[k]..offsets[k + 1]`.
#[derive(Debug)]
pub struct PartitionPlan {
    buckets: Vec<u32>,
    offsets: Vec<usize>,
    num_partitions: usize,
    _scratch: Allocation,
}

impl PartitionPlan {
    /// A plan from a caller-chosen bucket per row.
    pub fn from_assignment(
        buckets: &[u32],
        num_partitions: usize,
        ctx: &ExecutionContext,
    ) -> PartitionResult<Self> {
        validate_assignment(buckets, num_partitions)?;

        let rows = buckets.len();
        let allocation = Allocation::reserve(ctx.resource(), plan_bytes(rows, num_partitions))?;
        let mut owned = try_vec::<u32>(rows)?;
        owned.extend_from_slice(buckets);

        let mut counts = zeroed(num_partitions)?;
        for &bucket in buckets {
            counts[bucket as usize] += 1;
        }

        Ok(Self {
            buckets: owned,
            offsets: exclusive_prefix_sum(&counts)?,
            num_partitions,
            _scratch: allocation,
        })
    }

    pub fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    pub fn row_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn buckets(&self) -> &[u32] {
        &self.buckets
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn partition_sizes(&self) -> Vec<usize> {
        self.offsets.windows(2).map(|w| w[1] - w[0]).collect()
    }

    pub fn into_offsets(self) -> Vec<usize> {
        self.offsets
    }
}

#[cfg(test)]
impl PartitionPlan {
    /// Buckets and offsets taken as given, consistent or not.
    pub(crate) fn unchecked(buckets: Vec<u32>, offsets: Vec<usize>) -> Self {
        let num_partitions = offsets.len().saturating_sub(1);
        let resource: std::sync::Arc<dyn rowshard_columnar::MemoryResource> =
            std::sync::Arc::new(rowshard_columnar::SystemResource);
        Self {
            buckets,
            offsets,
            num_partitions,
            _scratch: Allocation::reserve(&resource, 0).expect("zero-byte reservation"),
        }
    }
}

/// Reject a caller-supplied assignment before anything is allocated for it.
pub(crate) fn validate_assignment(buckets: &[u32], num_partitions: usize) -> PartitionResult<()> {
    if num_partitions == 0 {
        return Err(PartitionError::InvalidPartitionCount(num_partitions));
    }
    match buckets
        .iter()
        .position(|&bucket| bucket as usize >= num_partitions)
    {
        Some(row) => Err(PartitionError::BucketOutOfRange {
            row,
            bucket: buckets[row],
            num_partitions,
        }),
        None => Ok(()),
    }
}

fn plan_bytes(rows: usize, num_partitions: usize) -> usize {
    rows.saturating_mul(std::mem::size_of::<u32>())
        .saturating_add(
            num_partitions
                .saturating_add(1)
                .saturating_mul(std::mem::size_of::<usize>()),
        )
}

pub(crate) fn zeroed(len: usize) -> Result<Vec<usize>, AllocError> {
    let mut out = try_vec::<usize>(len)?;
    out.resize(len, 0);
    Ok(out)
}

fn exclusive_prefix_sum(counts: &[usize]) -> Result<Vec<usize>, AllocError> {
    let mut offsets = try_vec::<usize>(counts.len().saturating_add(1))?;
    let mut running = 0usize;
    offsets.push(running);
    for &count in counts {
        running += count;
        offsets.push(running);
    }
    Ok(offsets)
}
