pub mod layout;
pub mod metadata_store;
pub mod sidecar;

pub use metadata_store::{DocumentFields, InMemoryMetadataStore, MetadataStore, ProviderInstanceRow};
pub use sidecar::Sidecar;
