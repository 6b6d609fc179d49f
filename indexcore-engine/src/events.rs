use indexcore_common::IndexKind;

/// Events fired by `IndexRegistry`. `Full` carries the position of the
/// newly-full shard within its (instance, kind) list so observers can
/// resolve it without re-scanning.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum IndexRegistryEvent {
    Add(u64),
    Remove(u64),
    Full(u64, IndexKind, usize),
}

/// Receives `IndexRegistryEvent`s in the order they occurred, outside of
/// `IndexRegistry`'s internal lock. Implementations must be non-blocking;
/// `IndexWriter` and `ClusteringWorker` both hand the event off to their own
/// condition variable rather than doing work inline.
pub trait IndexRegistryObserver: Send + Sync {
    fn on_index_event(&self, event: IndexRegistryEvent);
}
