//! Active-set index for a convolution layer.
//!
//! ```text
//! fill_table(filters)                       build: every filter under its buckets
//!        |
//! get_active_set(input, geometry)
//!        |-- get            -> bucket of every input patch, per table
//!        |-- count_votes    -> per-table histogram of patch buckets
//!        |-- most_freq      -> top-k buckets per table
//!        `-- union_buckets  -> filters stored in those buckets
//!        |
//! refill(active filters, ids, patch buckets) maintenance: evict + reinsert
//! ```
//!
//! # Example
//!
//! ```
//! use alsh_index::{AlshIndex, ConvGeometry, Device, HashFamily, HashInitParams, Tensor4};
//!
//! // 8 filters of shape 1x3x3, two tables of 4 buckets
//! let index = AlshIndex::init(
//!     2, 4, HashFamily::SignRandomProjection, HashInitParams { seed: 1 }, 2, 9, 8, "cpu",
//! ).unwrap();
//!
//! let filters = Tensor4::from_vec(
//!     [8, 1, 3, 3],
//!     (0..72).map(|v| (v % 7) as f32 - 3.0).collect(),
//!     Device::Cpu,
//! ).unwrap();
//! index.fill_table(&filters).unwrap();
//!
//! let input = Tensor4::from_vec([1, 1, 4, 4], vec![1.0; 16], Device::Cpu).unwrap();
//! let active = index.get_active_set(&input, &ConvGeometry::new(3, 1, 1, 1)).unwrap();
//! assert!(active.items.iter().all(|&id| id < 8));
//! ```

use crate::active_set::{ActiveSet, DedupPolicy};
use crate::backend::{open_index, Backend, HashTableIndex};
use crate::config::{Config, ExecutionConfig};
use crate::error::{IndexError, IndexResult};
use crate::geometry::ConvGeometry;
use crate::hash_bank::{BucketId, HashFunctionBank, ItemId, TableBuckets};
use crate::srp::{build_bank, HashFamily, HashInitParams};
use crate::table::{IndexStats, RowSelection};
use crate::tensor::{ensure_device, Tensor4};
use crate::topk::DEFAULT_TOP_K;

/// Hash-table index over the filters of one convolution layer
pub struct AlshIndex {
    tables: Box<dyn HashTableIndex>,
    top_k: usize,
    dedup: DedupPolicy,
}

impl AlshIndex {
    /// Build an index from its raw parameters.
    ///
    /// `device` must be "cpu" or "gpu". `num_filters` bounds every bucket
    /// row: a filter is stored at most once per table.
    pub fn init(
        num_tables: usize,
        table_size: usize,
        which_hash: HashFamily,
        hash_init_params: HashInitParams,
        num_hashes: usize,
        dim: usize,
        num_filters: usize,
        device: &str,
    ) -> IndexResult<Self> {
        let backend: Backend = device.parse()?;
        let bank = build_bank(
            which_hash,
            num_tables,
            table_size,
            hash_init_params,
            num_hashes,
            dim,
        )?;
        Self::with_bank(
            backend,
            bank,
            num_filters,
            &ExecutionConfig::default(),
            DEFAULT_TOP_K.min(table_size),
            DedupPolicy::default(),
        )
    }

    /// Build an index as described by `config` for `num_filters` filters of
    /// length `dim`.
    pub fn from_config(config: &Config, num_filters: usize, dim: usize) -> IndexResult<Self> {
        config.validate()?;
        let bank = build_bank(
            config.hash.family()?,
            config.index.num_tables,
            config.index.table_size,
            config.hash.init_params(),
            config.hash.num_hashes,
            dim,
        )?;
        Self::with_bank(
            config.index.backend()?,
            bank,
            num_filters,
            &config.execution,
            config.index.top_k,
            config.index.dedup_policy(),
        )
    }

    /// Build an index around an externally supplied hash bank.
    pub fn with_bank(
        backend: Backend,
        bank: Box<dyn HashFunctionBank>,
        num_filters: usize,
        execution: &ExecutionConfig,
        top_k: usize,
        dedup: DedupPolicy,
    ) -> IndexResult<Self> {
        if top_k > bank.table_size() {
            return Err(IndexError::OutOfRangeK {
                k: top_k,
                table_size: bank.table_size(),
            });
        }
        Ok(Self {
            tables: open_index(backend, bank, num_filters, execution)?,
            top_k,
            dedup,
        })
    }

    pub fn backend(&self) -> Backend {
        self.tables.backend()
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn dedup_policy(&self) -> DedupPolicy {
        self.dedup
    }

    /// Underlying table index, for raw bucket access and the batch kernels.
    pub fn tables(&self) -> &dyn HashTableIndex {
        self.tables.as_ref()
    }

    pub fn stats(&self) -> IndexStats {
        self.tables.stats()
    }

    /// Insert every filter of `filters` (outer dimension) under id = its
    /// position.
    pub fn fill_table(&self, filters: &Tensor4) -> IndexResult<()> {
        ensure_device(self.backend().device(), filters.device())?;
        let rows = filters.rows();
        let ids: Vec<ItemId> = (0..rows.len() as ItemId).collect();
        self.tables.insert_data(&rows, &ids)?;
        tracing::info!(filters = rows.len(), "table_filled");
        Ok(())
    }

    /// Evict the buckets named in `rows` (per table) and reinsert
    /// `active_vectors` under `active_ids`. An active id whose bucket was not
    /// evicted is already stored there and is not appended again.
    pub fn refill(
        &self,
        active_vectors: &[&[f32]],
        active_ids: &[ItemId],
        rows: &TableBuckets,
    ) -> IndexResult<()> {
        self.tables
            .refill(active_vectors, active_ids, &RowSelection::PerTable(rows.clone()))?;
        tracing::info!(
            active = active_ids.len(),
            rows = rows.width(),
            "table_refilled"
        );
        Ok(())
    }

    /// Refill from the result of [`get_active_set`](Self::get_active_set):
    /// the active filters are re-hashed from `filters` and the buckets the
    /// query's patches fell into are rebuilt from them. Can be repeated
    /// every forward pass: rows no patch touched keep their filters.
    pub fn refill_active(&self, filters: &Tensor4, active: &ActiveSet) -> IndexResult<()> {
        ensure_device(self.backend().device(), filters.device())?;
        let all = filters.rows();
        let vectors = active
            .items
            .iter()
            .map(|&id| {
                all.get(id as usize).copied().ok_or_else(|| {
                    IndexError::InvalidParameter(format!(
                        "active id {id} has no filter (filters = {})",
                        all.len()
                    ))
                })
            })
            .collect::<IndexResult<Vec<&[f32]>>>()?;
        self.refill(&vectors, &active.items, &active.buckets)
    }

    /// The `k` buckets of `bucket_ids` that occur most often.
    pub fn most_freq(&self, bucket_ids: &[BucketId], k: usize) -> IndexResult<Vec<BucketId>> {
        let tally = self.tables.count_votes(bucket_ids)?;
        self.tables.most_freq(&tally, k)
    }

    /// Filters worth computing for `input`, plus the bucket of every patch
    /// in every table.
    pub fn get_active_set(&self, input: &Tensor4, geometry: &ConvGeometry) -> IndexResult<ActiveSet> {
        let buckets = self.tables.get(input, geometry)?;

        let selected = buckets
            .rows()
            .map(|row| self.most_freq(row, self.top_k))
            .collect::<IndexResult<Vec<_>>>()?;

        let items = self.tables.union_buckets(&selected, self.dedup)?;
        tracing::debug!(
            patches = buckets.width(),
            selected = ?selected,
            active = items.len(),
            "active_set_built"
        );

        Ok(ActiveSet {
            items,
            buckets,
            selected,
        })
    }

    /// Expand selected window ids into the positions they cover.
    pub fn expand(&self, selected: &[u64], kernel_size: usize) -> IndexResult<Vec<u64>> {
        self.tables.expand(selected, kernel_size)
    }

    /// Place the channels computed for `indices` into a zero tensor of `shape`.
    pub fn zero_fill_missing(
        &self,
        computed: Tensor4,
        indices: Option<&[usize]>,
        shape: [usize; 4],
    ) -> IndexResult<Tensor4> {
        self.tables.zero_fill_missing(computed, indices, shape)
    }
}
