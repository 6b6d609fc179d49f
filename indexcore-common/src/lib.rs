pub mod config;
pub mod document;
pub mod embedder;
pub mod error;
pub mod events;
pub mod kind;
pub mod mutation;
pub mod pipeline;

pub use config::AppConfig;
pub use document::{DocId, ProcessedDocument};
pub use embedder::{normalize, Embedder, HashingEmbedder};
pub use error::{IndexError, Result};
pub use events::{InstanceEvent, InstanceObserver};
pub use kind::IndexKind;
pub use mutation::Mutation;
pub use pipeline::{RawChunk, TextPipeline, WhitespaceChunkingPipeline};
