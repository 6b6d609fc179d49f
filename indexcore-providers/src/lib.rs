pub mod instance_registry;
pub mod provider;
pub mod scheduler;

pub use instance_registry::InstanceRegistry;
pub use provider::{MutationQueue, Provider, ProviderState};
pub use scheduler::FetchScheduler;
