use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use indexcore_common::IndexKind;
use indexcore_engine::{ContextRegistry, IndexRegistry, IndexRegistryEvent, IndexRegistryObserver};

/// Cell count passed to every `cluster` call. The original queue never
/// scaled this with shard size, so neither does this one.
const CELL_COUNT: usize = 20;

/// (instance, kind, position) identifying one shard within its `registry`
/// list, exactly as carried by `IndexRegistryEvent::Full`.
type FullShard = (u64, IndexKind, usize);

/// Waits for `IndexRegistry` to report a shard full, then clusters it and
/// saves the result. Runs on its own background thread; `IndexRegistry`'s
/// `Full`/`Remove` events drive its queue directly through the observer
/// callback rather than polling.
pub struct ClusteringWorker {
    indexes: Arc<IndexRegistry>,
    context: Arc<ContextRegistry>,
    pending: Mutex<Vec<FullShard>>,
    condvar: Condvar,
    wake_lock: Mutex<()>,
    stopped: AtomicBool,
}

impl ClusteringWorker {
    pub fn new(indexes: Arc<IndexRegistry>, context: Arc<ContextRegistry>) -> Arc<Self> {
        Arc::new(Self {
            indexes,
            context,
            pending: Mutex::new(Vec::new()),
            condvar: Condvar::new(),
            wake_lock: Mutex::new(()),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.condvar.notify_all();
    }

    pub fn spawn(self: &Arc<Self>) -> std::thread::JoinHandle<()> {
        let worker = self.clone();
        std::thread::Builder::new()
            .name("index-clustering".to_string())
            .spawn(move || worker.run_forever())
            .expect("spawn clustering worker thread")
    }

    fn run_forever(self: Arc<Self>) {
        loop {
            {
                let mut guard = self.wake_lock.lock();
                while self.pending.lock().is_empty() && !self.stopped.load(Ordering::SeqCst) {
                    self.condvar.wait(&mut guard);
                }
            }
            if self.stopped.load(Ordering::SeqCst) {
                return;
            }

            while let Some(target) = self.pending.lock().pop() {
                self.process(target);
            }
        }
    }

    fn process(&self, (instance, kind, position): FullShard) {
        let shards = match self.indexes.get(instance, kind) {
            Ok(shards) => shards,
            Err(err) => {
                log::warn!("clustering worker: instance {instance} vanished before processing: {err}");
                return;
            }
        };
        let shard = match shards.get(position) {
            Some(shard) => shard,
            None => {
                log::warn!("clustering worker: shard {instance}/{kind:?}/{position} no longer exists, skipping");
                return;
            }
        };

        let token = self.context.generate();
        let result = (|| -> indexcore_common::Result<()> {
            shard.load(token)?;
            shard.cluster(CELL_COUNT)?;
            if self.indexes.contains(instance) {
                shard.save(None)?;
            }
            Ok(())
        })();
        shard.release(token);
        self.context.release(token);

        if let Err(err) = result {
            log::error!("clustering worker failed on shard {}: {err}", shard.path().display());
        }
    }
}

impl IndexRegistryObserver for ClusteringWorker {
    fn on_index_event(&self, event: IndexRegistryEvent) {
        match event {
            IndexRegistryEvent::Full(instance, kind, position) => {
                self.pending.lock().push((instance, kind, position));
                self.condvar.notify_all();
            }
            IndexRegistryEvent::Remove(instance) => {
                self.pending.lock().retain(|item| item.0 != instance);
            }
            IndexRegistryEvent::Add(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use indexcore_common::ProcessedDocument;
    use indexcore_engine::MemoryArbiter;
    use indexcore_storage::{InMemoryMetadataStore, ProviderInstanceRow};

    fn harness(tag: &str) -> (Arc<IndexRegistry>, Arc<ContextRegistry>, PathBuf) {
        let root = std::env::temp_dir().join(format!("indexcore-clustering-test-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&root).ok();

        let store = InMemoryMetadataStore::new();
        store.insert_instance(ProviderInstanceRow {
            id: 1,
            provider_kind: "stub".to_string(),
            name: "a".to_string(),
            connection_config: serde_json::json!({}),
            last_fetched: None,
        });
        let arbiter = Arc::new(MemoryArbiter::new(1000.0, 500.0, 500.0, 10.0, 0.95));
        let context = Arc::new(ContextRegistry::new());
        let indexes = Arc::new(IndexRegistry::new(root.clone(), 4, arbiter, store, context.clone()));
        indexes.load_existing(1).unwrap();

        (indexes, context, root)
    }

    #[test]
    fn full_event_clusters_and_saves_the_shard() {
        let (indexes, context, root) = harness("full");
        let shard = indexes.create(1, IndexKind::Vector).unwrap();

        let token = context.generate();
        shard.load(token).unwrap();
        let docs: Vec<(ProcessedDocument, Vec<f32>)> = (0..40)
            .map(|i| (ProcessedDocument::new(i, format!("doc {i}")), vec![i as f32, 1.0, 0.0, 0.0]))
            .collect();
        shard.insert(&docs).unwrap();
        shard.save(None).unwrap();
        shard.release(token);

        let worker = ClusteringWorker::new(indexes.clone(), context.clone());
        worker.on_index_event(IndexRegistryEvent::Full(1, IndexKind::Vector, 0));
        worker.process((1, IndexKind::Vector, 0));

        let reloaded = context.generate();
        shard.load(reloaded).unwrap();
        assert!(shard.has_id(0));
        shard.release(reloaded);

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn remove_event_drops_pending_entries_for_that_instance() {
        let (indexes, context, root) = harness("remove");
        let worker = ClusteringWorker::new(indexes, context);

        worker.on_index_event(IndexRegistryEvent::Full(1, IndexKind::Vector, 0));
        worker.on_index_event(IndexRegistryEvent::Full(2, IndexKind::Vector, 0));
        worker.on_index_event(IndexRegistryEvent::Remove(1));

        let pending = worker.pending.lock();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].0, 2);
        drop(pending);

        std::fs::remove_dir_all(&root).ok();
    }
}
