use std::path::PathBuf;

use log::LevelFilter;
use structopt::StructOpt;

use crate::error::{IndexError, Result};

/// Process-wide configuration, assembled from CLI flags or environment
/// variables at startup, the same way `lnx-server`'s `Settings` struct is.
///
/// Every worker component receives the fields it needs explicitly through
/// its constructor rather than reaching back into this struct, so the
/// registries and arbiter stay free of a dependency on the CLI layer.
#[derive(Debug, Clone, StructOpt)]
#[structopt(name = "indexcore", about = "The indexing core of the retrieval service.")]
pub struct AppConfig {
    /// Vector length used by all vector shards.
    #[structopt(long, env = "EMBEDDING_DIMS")]
    pub embedding_dims: usize,

    /// Maximum characters per `ProcessedDocument` chunk.
    #[structopt(long, env = "EMBEDDING_TOKEN_LIMIT", default_value = "2000")]
    pub embedding_token_limit: usize,

    /// Per-shard cap, in MiB, used by the fullness test and `capacity`.
    #[structopt(long, env = "MAX_INDEX_SIZE")]
    pub max_index_size: f64,

    /// Multiplier applied to shard size in the fullness test, in `(0, 1]`.
    #[structopt(long, env = "INDEX_CLUSTERING_THRESHOLD")]
    pub index_clustering_threshold: f64,

    /// Total memory budget, in MiB.
    #[structopt(long, env = "MAX_MEMORY")]
    pub max_memory: f64,

    /// Memory budget reserved for indexing operations, in MiB.
    #[structopt(long, env = "MAX_INDEXING_MEMORY")]
    pub max_indexing_memory: f64,

    /// Memory budget reserved for clustering operations, in MiB.
    #[structopt(long, env = "MAX_CLUSTERING_MEMORY")]
    pub max_clustering_memory: f64,

    /// Minimum interval, in seconds, between two fetches of the same instance.
    #[structopt(long, env = "FETCHING_TIME", default_value = "300")]
    pub fetching_time_secs: u64,

    /// Concurrency of the fetch worker pool.
    #[structopt(long, env = "FETCHING_THREADS", default_value = "4")]
    pub fetching_threads: usize,

    /// Root directory under which every instance's shards are stored.
    #[structopt(long, env = "INDEX_PATH", parse(from_os_str))]
    pub index_path: PathBuf,

    /// Root directory for any local scratch/cache data.
    #[structopt(long, env = "CACHE_PATH", parse(from_os_str))]
    pub cache_path: PathBuf,

    /// The log level filter; logs above this level are suppressed.
    #[structopt(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LevelFilter,

    /// An optional file to mirror persistent logs to.
    #[structopt(long, env = "LOG_FILE")]
    pub log_file: Option<String>,

    /// Whether to use ANSI colours for log levels.
    #[structopt(long, env = "PRETTY_LOGS")]
    pub pretty_logs: Option<bool>,

    /// The number of worker threads used by the writer/clustering pools.
    #[structopt(long, env = "RUNTIME_THREADS")]
    pub runtime_threads: Option<usize>,
}

impl AppConfig {
    /// Validates the cross-field invariants the spec requires before any
    /// worker is constructed. A violation here is a fatal startup error.
    pub fn validate(&self) -> Result<()> {
        if self.index_clustering_threshold <= 0.0 || self.index_clustering_threshold > 1.0 {
            return Err(IndexError::Configuration(format!(
                "INDEX_CLUSTERING_THRESHOLD must be in (0, 1], got {}",
                self.index_clustering_threshold
            )));
        }

        let remainder = self.max_memory
            - self.max_index_size
            - self.max_indexing_memory
            - self.max_clustering_memory;
        if remainder <= 0.0 {
            return Err(IndexError::Configuration(format!(
                "MAX_MEMORY ({}) must exceed MAX_INDEX_SIZE + MAX_INDEXING_MEMORY + MAX_CLUSTERING_MEMORY ({})",
                self.max_memory,
                self.max_index_size + self.max_indexing_memory + self.max_clustering_memory
            )));
        }

        if self.embedding_dims == 0 {
            return Err(IndexError::Configuration(
                "EMBEDDING_DIMS must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
