use thiserror::Error;

/// The error taxonomy shared by every component of the indexing core.
///
/// Per-shard variants (`NotLoaded`, `Unsupported`, IO variants) are expected
/// to be trapped by the writer/clustering worker loops rather than bubbled
/// all the way up; registry and arbiter variants propagate to the caller.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index at {path} is not loaded")]
    NotLoaded { path: String },

    #[error("no provider instance registered with id {0}")]
    UnknownInstance(u64),

    #[error("no shard found for instance {instance}, kind {kind:?}, position {position}")]
    UnknownShard {
        instance: u64,
        kind: crate::kind::IndexKind,
        position: usize,
    },

    #[error("insufficient {budget} memory: requested {requested:.2}MiB, {available:.2}MiB available")]
    InsufficientMemory {
        budget: &'static str,
        requested: f64,
        available: f64,
    },

    #[error("operation `{operation}` is not supported by {kind:?} shards")]
    Unsupported {
        kind: crate::kind::IndexKind,
        operation: &'static str,
    },

    #[error("transient I/O failure on {path}: {source}")]
    TransientIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("index artifact at {path} is corrupted: {reason}")]
    PermanentIo { path: String, reason: String },

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, IndexError>;
