/// Lifecycle events fired by the `InstanceRegistry` (provided by
/// `indexcore-providers`) as provider instances come and go.
///
/// This lives in the common crate, rather than alongside `InstanceRegistry`
/// itself, so that both the registry (the subject) and `IndexRegistry` /
/// `IndexWriter` (observers defined in other crates) can depend on a shared
/// contract without creating a dependency cycle between those crates.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum InstanceEvent {
    Add(u64),
    Remove(u64),
}

/// Receives `InstanceEvent`s in the order they occurred. The registry
/// notifies observers outside its own lock, but still on its calling
/// thread, so implementations must be non-blocking (or queue internally).
pub trait InstanceObserver: Send + Sync {
    fn on_instance_event(&self, event: InstanceEvent);
}
