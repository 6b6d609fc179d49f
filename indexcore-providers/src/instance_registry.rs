use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;

use indexcore_common::{InstanceEvent, InstanceObserver};
use indexcore_storage::{MetadataStore, ProviderInstanceRow};

use crate::provider::{MutationQueue, Provider};

struct InstanceEntry {
    provider: Arc<dyn Provider>,
    queue: Arc<MutationQueue>,
}

/// Thread-safe map from provider instance id to its running `Provider` and
/// mutation queue. Emits `InstanceEvent`s to its observers (`IndexRegistry`,
/// `IndexWriter`, `FetchScheduler`) in registration order, outside of its
/// own lock.
pub struct InstanceRegistry {
    metadata_store: Arc<dyn MetadataStore>,
    entries: Mutex<HashMap<u64, InstanceEntry>>,
    observers: Mutex<Vec<Arc<dyn InstanceObserver>>>,
}

impl InstanceRegistry {
    pub fn new(metadata_store: Arc<dyn MetadataStore>) -> Self {
        Self {
            metadata_store,
            entries: Mutex::new(HashMap::new()),
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn attach(&self, observer: Arc<dyn InstanceObserver>) {
        self.observers.lock().push(observer);
    }

    fn notify(&self, event: InstanceEvent) {
        for observer in self.observers.lock().iter() {
            observer.on_instance_event(event);
        }
    }

    pub fn add(&self, id: u64, provider: Arc<dyn Provider>) {
        self.entries.lock().insert(id, InstanceEntry { provider, queue: Arc::new(MutationQueue::new()) });
        self.notify(InstanceEvent::Add(id));
    }

    /// Kills the provider (logging it out of whatever external connection
    /// it holds) before dropping it from the registry, then notifies
    /// observers so dependent shards/mutation state are torn down too.
    pub fn remove(&self, id: u64) {
        let entry = self.entries.lock().remove(&id);
        if let Some(entry) = entry {
            entry.provider.kill();
        }
        self.notify(InstanceEvent::Remove(id));
    }

    pub fn get(&self, id: u64) -> Option<Arc<dyn Provider>> {
        self.entries.lock().get(&id).map(|e| e.provider.clone())
    }

    pub fn queue(&self, id: u64) -> Option<Arc<MutationQueue>> {
        self.entries.lock().get(&id).map(|e| e.queue.clone())
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entries.lock().contains_key(&id)
    }

    pub fn ids(&self) -> Vec<u64> {
        self.entries.lock().keys().copied().collect()
    }

    pub fn metadata_store(&self) -> Arc<dyn MetadataStore> {
        self.metadata_store.clone()
    }

    /// Convenience lookup used by `FetchScheduler` to read an instance's
    /// current `last_fetched` row without holding a reference to the store
    /// itself.
    pub fn metadata_store_lookup(&self, id: u64) -> Option<ProviderInstanceRow> {
        self.metadata_store.find_instance_by_id(id).ok().flatten()
    }

    /// Materializes one `Provider` per stored row whose `provider_kind`
    /// matches `kind`, via `factory`, and registers it.
    pub fn load_from_store(
        &self,
        kind: &str,
        factory: impl Fn(&ProviderInstanceRow) -> Arc<dyn Provider>,
    ) -> anyhow::Result<()> {
        for row in self.metadata_store.find_instances_by_provider_kind(kind)? {
            let provider = factory(&row);
            self.add(row.id, provider);
        }
        Ok(())
    }
}
