//! Kernel Registry
//!
//! Compiled data-parallel kernels, memoized per (operation, shape
//! parameters). Batch length is not part of the key: a compiled kernel works
//! out its launch plan for each batch. A registry is owned by the index that
//! launches the kernels and is dropped with it; there is no process-global
//! cache.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

/// Data-parallel operations the index launches
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KernelOp {
    /// Append ids into bucket rows, one unit per table
    Insert,
    /// Histogram of bucket ids
    CountVotes,
    /// Window id expansion
    Expand,
    /// Channel scatter into a dense tensor
    Scatter,
}

impl fmt::Display for KernelOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => write!(f, "insert"),
            Self::CountVotes => write!(f, "count_votes"),
            Self::Expand => write!(f, "expand"),
            Self::Scatter => write!(f, "scatter"),
        }
    }
}

/// Registry key: operation name plus the shape parameters it was planned for
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct KernelKey {
    pub op: KernelOp,
    pub params: Vec<usize>,
}

impl KernelKey {
    pub fn new(op: KernelOp, params: &[usize]) -> Self {
        Self {
            op,
            params: params.to_vec(),
        }
    }
}

/// How a kernel over `n` units is split across workers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchPlan {
    pub op: KernelOp,
    pub n: usize,
    pub workers: usize,
    /// Units handed to one worker at a time
    pub chunk_size: usize,
}

impl LaunchPlan {
    /// Plan `n` units over at most `max_workers` workers, never giving a
    /// worker fewer than `min_chunk` units unless `n` itself is smaller.
    pub fn compile(op: KernelOp, n: usize, max_workers: usize, min_chunk: usize) -> Self {
        let min_chunk = min_chunk.max(1);
        let max_workers = max_workers.max(1);
        let workers = n.div_ceil(min_chunk).clamp(1, max_workers);
        let chunk_size = n.div_ceil(workers).max(1);
        Self {
            op,
            n,
            workers,
            chunk_size,
        }
    }

    pub fn is_parallel(&self) -> bool {
        self.workers > 1
    }
}

/// A kernel specialized for one key, launchable over any batch length
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompiledKernel {
    pub op: KernelOp,
    pub max_workers: usize,
    pub min_chunk: usize,
}

impl CompiledKernel {
    pub fn new(op: KernelOp, max_workers: usize, min_chunk: usize) -> Self {
        Self {
            op,
            max_workers,
            min_chunk,
        }
    }

    /// Launch plan for a batch of `n` units.
    pub fn launch(&self, n: usize) -> LaunchPlan {
        LaunchPlan::compile(self.op, n, self.max_workers, self.min_chunk)
    }
}

/// Registry statistics
#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    pub hits: usize,
    pub misses: usize,
    pub size: usize,
}

impl RegistryStats {
    /// Hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Memoized kernels keyed by [`KernelKey`]
#[derive(Default)]
pub struct KernelRegistry {
    plans: RwLock<HashMap<KernelKey, Arc<CompiledKernel>>>,
    stats: RwLock<RegistryStats>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached kernel for `key`, compiling it with `compile` on first use.
    pub fn get_or_compile<F>(&self, key: KernelKey, compile: F) -> Arc<CompiledKernel>
    where
        F: FnOnce() -> CompiledKernel,
    {
        if let Some(plan) = self.plans.read().get(&key) {
            self.stats.write().hits += 1;
            return Arc::clone(plan);
        }

        let mut plans = self.plans.write();
        // Another thread may have compiled it between the two locks
        if let Some(plan) = plans.get(&key) {
            self.stats.write().hits += 1;
            return Arc::clone(plan);
        }

        tracing::debug!(op = %key.op, params = ?key.params, "kernel_compiled");
        let plan = Arc::new(compile());
        plans.insert(key, Arc::clone(&plan));

        let mut stats = self.stats.write();
        stats.misses += 1;
        stats.size = plans.len();
        plan
    }

    pub fn len(&self) -> usize {
        self.plans.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.read().is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        self.stats.read().clone()
    }

    /// Drop every cached kernel
    pub fn clear(&self) {
        self.plans.write().clear();
        self.stats.write().size = 0;
    }
}
