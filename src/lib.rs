//! # ALSH Index
//!
//! Multi-table hash index that picks, for one convolution input, the small
//! set of filters most likely to produce large outputs. Filters are stored
//! under their hash bucket in every table; a query hashes its patches,
//! votes for buckets and takes the union of the most voted ones.
//!
//! ## Pipeline
//!
//! ```text
//! filters --hash bank--> buckets --insert--> TableStore (num_tables x table_size rows)
//!
//! input --patches--> hash bank --> per-table bucket ids
//!                                      |
//!                                 count_votes --> most_freq (top-k)
//!                                      |
//!                                 union_buckets --> ActiveSet
//! ```
//!
//! ## Backends
//!
//! ```text
//! Backend::Cpu  -> CpuIndex   (calling thread)
//! Backend::Gpu  -> GpuIndex   (worker pool + kernel registry)
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use alsh_index::{AlshIndex, Config, ConvGeometry};
//!
//! let config = Config::load()?;
//! alsh_index::init_logging(&config.logging);
//!
//! let index = AlshIndex::from_config(&config, num_filters, filter_len)?;
//! index.fill_table(&filters)?;
//!
//! let active = index.get_active_set(&input, &ConvGeometry::new(3, 1, 1, 1))?;
//! // compute only active.items, then
//! index.refill_active(&filters, &active)?;
//! ```

// Core types
pub mod error;
pub mod tensor;
pub mod geometry;
pub mod hash_bank;
pub mod srp;

// Bucket storage and query kernels
pub mod table;
pub mod votes;
pub mod topk;
pub mod active_set;
pub mod expand;
pub mod scatter;
pub mod kernels;

// Backends and the consumer facade
pub mod backend;
pub mod index;

// Ambient
pub mod config;
pub mod logging;

pub use active_set::{union_buckets, ActiveSet, DedupPolicy};
pub use backend::{open_index, Backend, CpuIndex, GpuIndex, HashTableIndex};
pub use config::{Config, ExecutionConfig, HashConfig, IndexConfig, LoggingConfig};
pub use error::{IndexError, IndexResult};
pub use expand::expand;
pub use geometry::{extract_patches, ConvGeometry, Patches};
pub use hash_bank::{BucketId, HashFunctionBank, ItemId, TableBuckets};
pub use index::AlshIndex;
pub use kernels::{CompiledKernel, KernelKey, KernelOp, KernelRegistry, LaunchPlan, RegistryStats};
pub use logging::init_logging;
pub use scatter::zero_fill_missing;
pub use srp::{build_bank, HashFamily, HashInitParams, SignRandomProjection};
pub use table::{BucketTable, IndexStats, RowSelection, TableBatch, TableStore};
pub use tensor::{Device, Tensor4};
pub use topk::{most_freq, DEFAULT_TOP_K};
pub use votes::{count_votes, VoteTally};
