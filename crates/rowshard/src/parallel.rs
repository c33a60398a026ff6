#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
use rayon::ThreadPool;
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
use std::sync::OnceLock;

#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
use crate::context::PartitionOptions;

/// Best-effort Rayon thread pool for the hashing and scatter kernels.
///
/// Rayon's global pool panics on first use if it can't be initialized (e.g. the OS refuses to
/// spawn threads while many test binaries run at once). A crate-local pool lets us fall back to
/// sequential kernels instead.
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
static RAYON_POOL: OnceLock<Option<ThreadPool>> = OnceLock::new();

#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
fn desired_rayon_threads() -> usize {
    let from_env = std::env::var("RAYON_NUM_THREADS")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|&n| n > 0);
    from_env.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    })
}

#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
fn build_rayon_pool() -> Option<ThreadPool> {
    let mut threads = desired_rayon_threads().max(1);
    loop {
        match rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("rowshard-worker-{i}"))
            .build()
        {
            Ok(pool) => {
                log::debug!("rowshard thread pool started with {threads} threads");
                return Some(pool);
            }
            Err(_) if threads > 1 => threads /= 2,
            Err(err) => {
                log::warn!("failed to build rowshard thread pool ({err}); running sequentially");
                return None;
            }
        }
    }
}

/// Returns the crate-local Rayon thread pool, if one could be created.
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
pub(crate) fn rayon_pool() -> Option<&'static ThreadPool> {
    RAYON_POOL.get_or_init(build_rayon_pool).as_ref()
}

/// The pool to use for an input of `rows` rows, or `None` when the kernels should run
/// sequentially on the current thread.
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
pub(crate) fn pool_for(options: &PartitionOptions, rows: usize) -> Option<&'static ThreadPool> {
    if options.parallel && rows >= options.parallel_min_rows {
        rayon_pool()
    } else {
        None
    }
}
