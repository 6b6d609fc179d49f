pub mod arbiter;
pub mod context;
pub mod events;
pub mod index;
pub mod registry;

pub use arbiter::MemoryArbiter;
pub use context::{ContextRegistry, ContextToken};
pub use events::{IndexRegistryEvent, IndexRegistryObserver};
pub use index::{Index, LexicalShard, SearchHit, VectorShard};
pub use registry::IndexRegistry;
