//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - alsh.toml (default configuration)
//! - alsh.local.toml (git-ignored local overrides)
//! - Environment variables (ALSH_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # alsh.toml
//! [index]
//! num_tables = 2
//! table_size = 16
//! top_k = 5
//! backend = "gpu"
//!
//! [hash]
//! family = "srp"
//! num_hashes = 4
//! seed = 42
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! ALSH_INDEX__TABLE_SIZE=64
//! ALSH_EXECUTION__NUM_THREADS=8
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::active_set::DedupPolicy;
use crate::backend::Backend;
use crate::error::{IndexError, IndexResult};
use crate::srp::{HashFamily, HashInitParams};
use crate::topk::DEFAULT_TOP_K;

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub hash: HashConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Table shape and query settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Number of independent hash tables
    #[serde(default = "default_num_tables")]
    pub num_tables: usize,

    /// Buckets per table
    #[serde(default = "default_table_size")]
    pub table_size: usize,

    /// Buckets selected per table for each query
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Backend selector ("cpu" or "gpu"), parsed when the index is built
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Drop repeated ids from the active set
    #[serde(default = "default_true")]
    pub dedup_active_set: bool,
}

/// Hash family settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashConfig {
    /// Hash family identifier (e.g. "srp")
    #[serde(default = "default_family")]
    pub family: String,

    /// Hash functions concatenated per table
    #[serde(default = "default_num_hashes")]
    pub num_hashes: usize,

    /// Seed for drawing the hash functions
    #[serde(default)]
    pub seed: u64,
}

/// Worker pool settings for the data-parallel backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Number of worker threads
    /// 0 = use all available CPU cores
    #[serde(default)]
    pub num_threads: usize,

    /// Smallest batch a worker is handed; smaller batches run on one worker
    #[serde(default = "default_min_parallel_batch")]
    pub min_parallel_batch: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_num_tables() -> usize {
    2
}
fn default_table_size() -> usize {
    16
}
fn default_top_k() -> usize {
    DEFAULT_TOP_K
}
fn default_backend() -> String {
    "cpu".to_string()
}
fn default_true() -> bool {
    true
}
fn default_family() -> String {
    "srp".to_string()
}
fn default_num_hashes() -> usize {
    4
}
fn default_min_parallel_batch() -> usize {
    1024
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            num_tables: default_num_tables(),
            table_size: default_table_size(),
            top_k: default_top_k(),
            backend: default_backend(),
            dedup_active_set: true,
        }
    }
}

impl Default for HashConfig {
    fn default() -> Self {
        HashConfig {
            family: default_family(),
            num_hashes: default_num_hashes(),
            seed: 0,
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            num_threads: 0, // 0 = use all available CPU cores
            min_parallel_batch: default_min_parallel_batch(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl IndexConfig {
    pub fn backend(&self) -> IndexResult<Backend> {
        self.backend.parse()
    }

    pub fn dedup_policy(&self) -> DedupPolicy {
        if self.dedup_active_set {
            DedupPolicy::FirstOccurrence
        } else {
            DedupPolicy::Keep
        }
    }
}

impl HashConfig {
    pub fn family(&self) -> IndexResult<HashFamily> {
        self.family.parse()
    }

    pub fn init_params(&self) -> HashInitParams {
        HashInitParams { seed: self.seed }
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. built-in defaults
    /// 2. alsh.toml (base configuration)
    /// 3. alsh.local.toml (local overrides, git-ignored)
    /// 4. Environment variables (ALSH_* prefix)
    pub fn load() -> IndexResult<Self> {
        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("alsh.toml"))
            .merge(Toml::file("alsh.local.toml"))
            .merge(Env::prefixed("ALSH_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from specific file path
    pub fn from_file(path: &str) -> IndexResult<Self> {
        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("ALSH_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no index can be built from
    pub fn validate(&self) -> IndexResult<()> {
        if self.index.num_tables == 0 {
            return Err(IndexError::InvalidParameter(
                "index.num_tables must be at least 1".to_string(),
            ));
        }
        if self.index.table_size == 0 {
            return Err(IndexError::InvalidParameter(
                "index.table_size must be at least 1".to_string(),
            ));
        }
        if self.index.top_k > self.index.table_size {
            return Err(IndexError::OutOfRangeK {
                k: self.index.top_k,
                table_size: self.index.table_size,
            });
        }
        self.index.backend()?;
        self.hash.family()?;
        Ok(())
    }
}
