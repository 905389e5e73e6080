//! Backend Selection
//!
//! Both backends expose the same [`HashTableIndex`] operation set over the
//! same bucket storage and differ only in how they launch the batch
//! kernels:
//!
//! - `CpuIndex` runs every kernel on the calling thread.
//! - `GpuIndex` runs the data-parallel kernels on its own worker pool, with
//!   launch plans memoized in a [`KernelRegistry`] it owns.
//!
//! The backend is chosen once, when the index is opened.

use std::fmt;
use std::str::FromStr;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::active_set::{union_buckets, DedupPolicy};
use crate::config::ExecutionConfig;
use crate::error::{IndexError, IndexResult};
use crate::expand::{expand, expand_parallel};
use crate::geometry::ConvGeometry;
use crate::hash_bank::{BucketId, HashFunctionBank, ItemId, TableBuckets};
use crate::kernels::{CompiledKernel, KernelKey, KernelOp, KernelRegistry, LaunchPlan};
use crate::scatter::{zero_fill_missing, zero_fill_missing_parallel};
use crate::table::{BucketTable, IndexStats, RowSelection, TableBatch, TableStore};
use crate::tensor::{ensure_device, Device, Tensor4};
use crate::topk::most_freq;
use crate::votes::{count_votes, count_votes_parallel, VoteTally};

/// Execution backend selector
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Cpu,
    Gpu,
}

impl Backend {
    /// Device every operand of this backend must live on
    pub fn device(self) -> Device {
        match self {
            Self::Cpu => Device::Cpu,
            Self::Gpu => Device::Gpu,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Gpu => write!(f, "gpu"),
        }
    }
}

impl FromStr for Backend {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(Self::Cpu),
            "gpu" => Ok(Self::Gpu),
            _ => Err(IndexError::InvalidBackend(s.to_string())),
        }
    }
}

/// Multi-table hash index over item ids
pub trait HashTableIndex: Send + Sync {
    fn backend(&self) -> Backend;

    fn num_tables(&self) -> usize;

    fn table_size(&self) -> usize;

    /// Maximum length of any bucket row
    fn capacity(&self) -> usize;

    /// Hash every vector and append `ids[i]` to its bucket in every table.
    ///
    /// All-or-nothing: on error no row has changed.
    fn insert_data(&self, vectors: &[&[f32]], ids: &[ItemId]) -> IndexResult<()>;

    /// Empty the selected buckets.
    fn clear_row(&self, rows: &RowSelection) -> IndexResult<()>;

    /// Clear `rows` then insert, as one transaction no reader can observe
    /// halfway.
    ///
    /// An id is appended only where its bucket is one of the cleared rows;
    /// rows left alone keep what they hold, so a filter stays in each table
    /// at most once across repeated refills.
    fn refill(&self, vectors: &[&[f32]], ids: &[ItemId], rows: &RowSelection) -> IndexResult<()>;

    /// Bucket of every convolution patch of `query`, per table.
    fn get(&self, query: &Tensor4, geometry: &ConvGeometry) -> IndexResult<TableBuckets>;

    /// Histogram of `bucket_ids` over this index's buckets.
    fn count_votes(&self, bucket_ids: &[BucketId]) -> IndexResult<VoteTally>;

    /// `k` most voted buckets, count descending then id ascending.
    fn most_freq(&self, tally: &[u64], k: usize) -> IndexResult<Vec<BucketId>> {
        if tally.len() != self.table_size() {
            return Err(IndexError::ShapeMismatch {
                context: "tally length",
                expected: self.table_size(),
                actual: tally.len(),
            });
        }
        most_freq(tally, k)
    }

    /// Items stored under `selected[t]` in table `t`, across every table.
    fn union_buckets(&self, selected: &[Vec<BucketId>], policy: DedupPolicy) -> IndexResult<Vec<ItemId>>;

    /// Raw contents of one bucket, in insertion order.
    fn bucket(&self, table: usize, bucket: BucketId) -> IndexResult<Vec<ItemId>>;

    /// Current length of one bucket row.
    fn row_len(&self, table: usize, bucket: BucketId) -> IndexResult<usize>;

    fn stats(&self) -> IndexStats;

    /// Expand window ids into the scalar positions they cover.
    fn expand(&self, selected: &[u64], kernel_size: usize) -> IndexResult<Vec<u64>>;

    /// Reinflate a sparsely computed tensor to `shape`.
    fn zero_fill_missing(
        &self,
        computed: Tensor4,
        indices: Option<&[usize]>,
        shape: [usize; 4],
    ) -> IndexResult<Tensor4>;
}

/// Open an index on `backend`. `capacity` bounds every bucket row and is
/// normally the number of items (filters) that may ever be inserted.
pub fn open_index(
    backend: Backend,
    bank: Box<dyn HashFunctionBank>,
    capacity: usize,
    execution: &ExecutionConfig,
) -> IndexResult<Box<dyn HashTableIndex>> {
    tracing::info!(
        %backend,
        num_tables = bank.num_tables(),
        table_size = bank.table_size(),
        capacity,
        "index_opened"
    );
    match backend {
        Backend::Cpu => Ok(Box::new(CpuIndex::new(bank, capacity)?)),
        Backend::Gpu => Ok(Box::new(GpuIndex::new(bank, capacity, execution)?)),
    }
}

/// Hash bank plus bucket storage, shared by both backends
struct IndexCore {
    bank: Box<dyn HashFunctionBank>,
    store: TableStore,
}

impl IndexCore {
    fn new(bank: Box<dyn HashFunctionBank>, capacity: usize) -> IndexResult<Self> {
        let store = TableStore::new(bank.num_tables(), bank.table_size(), capacity)?;
        Ok(Self { bank, store })
    }

    fn hash(&self, vectors: &[&[f32]], ids: &[ItemId]) -> IndexResult<TableBuckets> {
        if vectors.len() != ids.len() {
            return Err(IndexError::ShapeMismatch {
                context: "vectors vs ids",
                expected: vectors.len(),
                actual: ids.len(),
            });
        }
        let buckets = self.bank.hash(vectors)?;
        if buckets.num_tables() != self.store.num_tables() || buckets.width() != ids.len() {
            return Err(IndexError::ShapeMismatch {
                context: "hash bank output",
                expected: self.store.num_tables() * ids.len(),
                actual: buckets.num_tables() * buckets.width(),
            });
        }
        Ok(buckets)
    }

    /// Validate, optionally clear, then append through `apply`, all under
    /// the write locks of every table. When clearing, only entries landing in
    /// a cleared row are appended.
    fn write_batch<F>(
        &self,
        vectors: &[&[f32]],
        ids: &[ItemId],
        clearing: Option<&RowSelection>,
        apply: F,
    ) -> IndexResult<()>
    where
        F: FnOnce(&[&BucketTable], &TableBatch) -> IndexResult<()>,
    {
        let buckets = self.hash(vectors, ids)?;
        let batch = match clearing {
            None => TableBatch::new(&buckets, ids)?,
            Some(selection) => {
                TableBatch::restricted_to(&buckets, ids, selection, self.store.table_size())?
            }
        };

        let txn = self.store.write();
        if let Err(err) = txn.validate_insert(&batch, clearing) {
            tracing::warn!(error = %err, batch = ids.len(), "insert_rejected");
            return Err(err);
        }
        if let Some(selection) = clearing {
            txn.clear(selection)?;
        }
        apply(&txn.tables(), &batch)?;

        tracing::debug!(
            batch = ids.len(),
            appended = batch.len(),
            tables = batch.num_tables(),
            refill = clearing.is_some(),
            "batch_inserted"
        );
        Ok(())
    }

    fn clear_row(&self, rows: &RowSelection) -> IndexResult<()> {
        self.store.write().clear(rows)?;
        tracing::debug!("rows_cleared");
        Ok(())
    }

    fn get(&self, device: Device, query: &Tensor4, geometry: &ConvGeometry) -> IndexResult<TableBuckets> {
        ensure_device(device, query.device())?;
        let buckets = self.bank.hash_patches(query, geometry)?;
        tracing::debug!(
            patches = buckets.width(),
            tables = buckets.num_tables(),
            "patches_hashed"
        );
        Ok(buckets)
    }

    fn union_buckets(&self, selected: &[Vec<BucketId>], policy: DedupPolicy) -> IndexResult<Vec<ItemId>> {
        let view = self.store.read();
        union_buckets(&view.tables(), selected, policy)
    }
}

fn append_sequential(tables: &[&BucketTable], batch: &TableBatch) -> IndexResult<()> {
    for (t, table) in tables.iter().enumerate() {
        table.append_batch(batch.buckets(t), batch.items(t))?;
    }
    Ok(())
}

/// Sequential backend
pub struct CpuIndex {
    core: IndexCore,
}

impl CpuIndex {
    pub fn new(bank: Box<dyn HashFunctionBank>, capacity: usize) -> IndexResult<Self> {
        Ok(Self {
            core: IndexCore::new(bank, capacity)?,
        })
    }
}

impl HashTableIndex for CpuIndex {
    fn backend(&self) -> Backend {
        Backend::Cpu
    }

    fn num_tables(&self) -> usize {
        self.core.store.num_tables()
    }

    fn table_size(&self) -> usize {
        self.core.store.table_size()
    }

    fn capacity(&self) -> usize {
        self.core.store.capacity()
    }

    fn insert_data(&self, vectors: &[&[f32]], ids: &[ItemId]) -> IndexResult<()> {
        self.core.write_batch(vectors, ids, None, append_sequential)
    }

    fn clear_row(&self, rows: &RowSelection) -> IndexResult<()> {
        self.core.clear_row(rows)
    }

    fn refill(&self, vectors: &[&[f32]], ids: &[ItemId], rows: &RowSelection) -> IndexResult<()> {
        self.core.write_batch(vectors, ids, Some(rows), append_sequential)
    }

    fn get(&self, query: &Tensor4, geometry: &ConvGeometry) -> IndexResult<TableBuckets> {
        self.core.get(Device::Cpu, query, geometry)
    }

    fn count_votes(&self, bucket_ids: &[BucketId]) -> IndexResult<VoteTally> {
        count_votes(bucket_ids, self.table_size())
    }

    fn union_buckets(&self, selected: &[Vec<BucketId>], policy: DedupPolicy) -> IndexResult<Vec<ItemId>> {
        self.core.union_buckets(selected, policy)
    }

    fn bucket(&self, table: usize, bucket: BucketId) -> IndexResult<Vec<ItemId>> {
        self.core.store.bucket(table, bucket)
    }

    fn row_len(&self, table: usize, bucket: BucketId) -> IndexResult<usize> {
        self.core.store.row_len(table, bucket)
    }

    fn stats(&self) -> IndexStats {
        self.core.store.stats()
    }

    fn expand(&self, selected: &[u64], kernel_size: usize) -> IndexResult<Vec<u64>> {
        expand(selected, kernel_size)
    }

    fn zero_fill_missing(
        &self,
        computed: Tensor4,
        indices: Option<&[usize]>,
        shape: [usize; 4],
    ) -> IndexResult<Tensor4> {
        zero_fill_missing(computed, indices, shape, Device::Cpu)
    }
}

/// Data-parallel backend on a dedicated worker pool
pub struct GpuIndex {
    core: IndexCore,
    pool: rayon::ThreadPool,
    kernels: KernelRegistry,
    min_parallel_batch: usize,
}

impl GpuIndex {
    pub fn new(
        bank: Box<dyn HashFunctionBank>,
        capacity: usize,
        execution: &ExecutionConfig,
    ) -> IndexResult<Self> {
        let threads = if execution.num_threads == 0 {
            num_cpus::get()
        } else {
            execution.num_threads
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("alsh-worker-{i}"))
            .build()
            .map_err(|e| IndexError::InvalidParameter(format!("worker pool: {e}")))?;

        Ok(Self {
            core: IndexCore::new(bank, capacity)?,
            pool,
            kernels: KernelRegistry::new(),
            min_parallel_batch: execution.min_parallel_batch,
        })
    }

    /// Launch plans compiled so far.
    pub fn kernels(&self) -> &KernelRegistry {
        &self.kernels
    }

    /// Plan for `n` units of `op`. The kernel is cached per `params`, the
    /// shape parameters it is specialized for; the split over `n` is worked
    /// out at launch.
    fn plan(&self, op: KernelOp, n: usize, min_chunk: usize, params: &[usize]) -> LaunchPlan {
        let workers = self.pool.current_num_threads();
        self.kernels
            .get_or_compile(KernelKey::new(op, params), || {
                CompiledKernel::new(op, workers, min_chunk)
            })
            .launch(n)
    }

    fn append_parallel(&self, tables: &[&BucketTable], batch: &TableBatch) -> IndexResult<()> {
        // One unit per table: rows of a table keep batch order, tables fill
        // concurrently.
        let plan = self.plan(KernelOp::Insert, tables.len(), 1, &[]);
        if !plan.is_parallel() || batch.len() < self.min_parallel_batch {
            return append_sequential(tables, batch);
        }
        self.pool.install(|| {
            tables
                .par_iter()
                .enumerate()
                .try_for_each(|(t, table)| table.append_batch(batch.buckets(t), batch.items(t)))
        })
    }
}

impl HashTableIndex for GpuIndex {
    fn backend(&self) -> Backend {
        Backend::Gpu
    }

    fn num_tables(&self) -> usize {
        self.core.store.num_tables()
    }

    fn table_size(&self) -> usize {
        self.core.store.table_size()
    }

    fn capacity(&self) -> usize {
        self.core.store.capacity()
    }

    fn insert_data(&self, vectors: &[&[f32]], ids: &[ItemId]) -> IndexResult<()> {
        self.core
            .write_batch(vectors, ids, None, |tables, batch| {
                self.append_parallel(tables, batch)
            })
    }

    fn clear_row(&self, rows: &RowSelection) -> IndexResult<()> {
        self.core.clear_row(rows)
    }

    fn refill(&self, vectors: &[&[f32]], ids: &[ItemId], rows: &RowSelection) -> IndexResult<()> {
        self.core
            .write_batch(vectors, ids, Some(rows), |tables, batch| {
                self.append_parallel(tables, batch)
            })
    }

    fn get(&self, query: &Tensor4, geometry: &ConvGeometry) -> IndexResult<TableBuckets> {
        self.core.get(Device::Gpu, query, geometry)
    }

    fn count_votes(&self, bucket_ids: &[BucketId]) -> IndexResult<VoteTally> {
        let table_size = self.table_size();
        let plan = self.plan(
            KernelOp::CountVotes,
            bucket_ids.len(),
            self.min_parallel_batch,
            &[table_size],
        );
        self.pool
            .install(|| count_votes_parallel(bucket_ids, table_size, &plan))
    }

    fn union_buckets(&self, selected: &[Vec<BucketId>], policy: DedupPolicy) -> IndexResult<Vec<ItemId>> {
        self.core.union_buckets(selected, policy)
    }

    fn bucket(&self, table: usize, bucket: BucketId) -> IndexResult<Vec<ItemId>> {
        self.core.store.bucket(table, bucket)
    }

    fn row_len(&self, table: usize, bucket: BucketId) -> IndexResult<usize> {
        self.core.store.row_len(table, bucket)
    }

    fn stats(&self) -> IndexStats {
        self.core.store.stats()
    }

    fn expand(&self, selected: &[u64], kernel_size: usize) -> IndexResult<Vec<u64>> {
        let plan = self.plan(
            KernelOp::Expand,
            selected.len(),
            self.min_parallel_batch,
            &[kernel_size],
        );
        self.pool
            .install(|| expand_parallel(selected, kernel_size, &plan))
    }

    fn zero_fill_missing(
        &self,
        computed: Tensor4,
        indices: Option<&[usize]>,
        shape: [usize; 4],
    ) -> IndexResult<Tensor4> {
        let plan = self.plan(KernelOp::Scatter, shape[0], 1, &shape[1..]);
        if plan.is_parallel() {
            self.pool
                .install(|| zero_fill_missing_parallel(computed, indices, shape, Device::Gpu))
        } else {
            zero_fill_missing(computed, indices, shape, Device::Gpu)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::srp::{HashInitParams, SignRandomProjection};

    fn bank(dim: usize) -> Box<dyn HashFunctionBank> {
        Box::new(SignRandomProjection::new(2, 8, HashInitParams { seed: 11 }, 3, dim).unwrap())
    }

    fn execution() -> ExecutionConfig {
        ExecutionConfig {
            num_threads: 2,
            min_parallel_batch: 1,
        }
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!("cpu".parse::<Backend>().unwrap(), Backend::Cpu);
        assert_eq!("gpu".parse::<Backend>().unwrap(), Backend::Gpu);
        assert!(matches!(
            "tpu".parse::<Backend>(),
            Err(IndexError::InvalidBackend(s)) if s == "tpu"
        ));
    }

    #[test]
    fn test_backends_store_identical_rows() {
        let vectors: Vec<Vec<f32>> = (0..12)
            .map(|i| vec![i as f32 - 6.0, (i % 3) as f32, 1.0 - (i % 5) as f32])
            .collect();
        let rows: Vec<&[f32]> = vectors.iter().map(Vec::as_slice).collect();
        let ids: Vec<ItemId> = (0..12).collect();

        let cpu = open_index(Backend::Cpu, bank(3), 12, &execution()).unwrap();
        let gpu = open_index(Backend::Gpu, bank(3), 12, &execution()).unwrap();
        cpu.insert_data(&rows, &ids).unwrap();
        gpu.insert_data(&rows, &ids).unwrap();

        for t in 0..2 {
            for b in 0..8 {
                assert_eq!(cpu.bucket(t, b).unwrap(), gpu.bucket(t, b).unwrap());
            }
        }
        assert_eq!(cpu.stats(), gpu.stats());
    }

    #[test]
    fn test_gpu_counts_match_cpu() {
        let cpu = open_index(Backend::Cpu, bank(3), 4, &execution()).unwrap();
        let gpu = open_index(Backend::Gpu, bank(3), 4, &execution()).unwrap();
        let ids: Vec<BucketId> = (0..500).map(|i| i * 31 % 13).collect();
        assert_eq!(
            cpu.count_votes(&ids).unwrap(),
            gpu.count_votes(&ids).unwrap()
        );
    }

    #[test]
    fn test_gpu_registry_reuses_plans() {
        let gpu = GpuIndex::new(bank(3), 4, &execution()).unwrap();
        gpu.count_votes(&[1, 2, 3]).unwrap();
        gpu.count_votes(&[4, 5, 6, 7, 0]).unwrap();
        gpu.count_votes(&[2]).unwrap();
        // batch length is not part of the key
        assert_eq!(gpu.kernels().len(), 1);
        let stats = gpu.kernels().stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
    }

    #[test]
    fn test_query_device_must_match_backend() {
        let gpu = open_index(Backend::Gpu, bank(4), 4, &execution()).unwrap();
        let query = Tensor4::zeros([1, 1, 3, 3], Device::Cpu);
        assert!(matches!(
            gpu.get(&query, &ConvGeometry::new(2, 1, 0, 1)),
            Err(IndexError::DeviceMismatch {
                expected: Device::Gpu,
                actual: Device::Cpu
            })
        ));
    }

    #[test]
    fn test_vectors_ids_length_mismatch() {
        let cpu = open_index(Backend::Cpu, bank(2), 4, &execution()).unwrap();
        let v: &[f32] = &[1.0, 0.0];
        assert!(matches!(
            cpu.insert_data(&[v], &[0, 1]),
            Err(IndexError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_most_freq_checks_tally_length() {
        let cpu = open_index(Backend::Cpu, bank(2), 4, &execution()).unwrap();
        assert!(cpu.most_freq(&[1, 2, 3], 1).is_err());
        let tally = cpu.count_votes(&[3, 3, 1]).unwrap();
        assert_eq!(cpu.most_freq(&tally, 2).unwrap(), vec![3, 1]);
    }
}
