use thiserror::Error;

/// Minimum number of elements before a same-shape elementwise op is split across workers.
pub const ELEMENTWISE_PARALLEL_THRESHOLD: usize = 1024;

/// Broadcast ops parallelize over batches once there are more batches than this.
pub const BATCH_PARALLEL_THRESHOLD: usize = 16;

/// Broadcast ops with few batches parallelize the inner run once it reaches this length.
pub const INNER_PARALLEL_THRESHOLD: usize = 1024;

/// Matrix products with fewer output cells than this always run serially.
pub const MATMUL_SMALL_OUTPUT: usize = 32;

/// Batched matmul parallelizes over batches once there are at least this many.
pub const MATMUL_BATCH_PARALLEL_THRESHOLD: usize = 32;

/// Convolutions split output positions across workers once
/// `outputs * channels * taps` reaches this many multiply-adds.
pub const CONV_PARALLEL_WORK: usize = 1 << 15;

/// Errors that can occur during parallel execution.
#[derive(Error, Debug, PartialEq)]
pub enum ParallelError {
    /// The thread pool failed to build.
    #[error("failed to build thread pool: {0}")]
    BuildError(String),

    /// The requested thread count is invalid.
    #[error("thread count must be > 0, got {0}")]
    InvalidThreadCount(usize),
}

/// Controls how tensor kernels are executed.
///
/// Kernels pick between serial and parallel paths with size heuristics; the
/// strategy decides whether the parallel paths are available and which pool runs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionStrategy {
    /// Use the global Rayon thread pool where the size heuristics allow it.
    ///
    /// The global pool honors `RAYON_NUM_THREADS`.
    #[default]
    Auto,

    /// Run sequentially on the current thread.
    ///
    /// Useful for small tensors, debugging, or reproducing a serial reference.
    Serial,

    /// Run on a local thread pool with `n` threads.
    ///
    /// # Warning
    /// Creates a new thread pool on every call, which has significant overhead.
    /// Use this primarily for benchmarking or specific isolation needs.
    Fixed(usize),
}

impl ExecutionStrategy {
    /// Returns true if kernels may take their parallel paths.
    #[inline]
    pub fn allows_parallel(&self) -> bool {
        !matches!(self, ExecutionStrategy::Serial)
    }

    /// Runs `op` under this strategy.
    ///
    /// [`ExecutionStrategy::Fixed`] builds a local pool and installs `op` in it so every
    /// rayon call inside runs on that pool; the other strategies call `op` directly.
    ///
    /// # Errors
    ///
    /// Returns [`ParallelError::InvalidThreadCount`] for `Fixed(0)` and
    /// [`ParallelError::BuildError`] if the pool cannot be created.
    pub fn install<R, F>(&self, op: F) -> Result<R, ParallelError>
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        match *self {
            ExecutionStrategy::Auto | ExecutionStrategy::Serial => Ok(op()),
            ExecutionStrategy::Fixed(n) => {
                if n == 0 {
                    return Err(ParallelError::InvalidThreadCount(n));
                }
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| ParallelError::BuildError(e.to_string()))?;
                Ok(pool.install(op))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_auto() {
        assert_eq!(ExecutionStrategy::default(), ExecutionStrategy::Auto);
        assert!(ExecutionStrategy::Auto.allows_parallel());
        assert!(!ExecutionStrategy::Serial.allows_parallel());
    }

    #[test]
    fn test_install_fixed() -> Result<(), ParallelError> {
        let threads = ExecutionStrategy::Fixed(3).install(rayon::current_num_threads)?;
        assert_eq!(threads, 3);
        Ok(())
    }

    #[test]
    fn test_install_fixed_error() {
        let res = ExecutionStrategy::Fixed(0).install(|| ());
        assert_eq!(res, Err(ParallelError::InvalidThreadCount(0)));
    }
}
