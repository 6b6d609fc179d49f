use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex};

use indexcore_common::{DocId, Embedder, IndexKind, InstanceEvent, InstanceObserver, ProcessedDocument};
use indexcore_engine::{ContextRegistry, Index, IndexRegistry, MemoryArbiter};
use indexcore_providers::InstanceRegistry;

use crate::coalesce::coalesce;

const WAKE_INTERVAL: Duration = Duration::from_secs(300);

/// Drains each active instance's pending mutations on a 300s cadence (or on
/// notification), coalesces them, and applies the result to the instance's
/// shards.
///
/// Two insertion passes run per instance, in this order:
/// 1. The delete-driven reinsertion described by the original source: for
///    every shard (of any kind) whose `id_intersection(deletes)` is
///    non-empty, remove the hit ids and then backfill with pending inserts
///    up to the shard's capacity, advancing a single cursor shared across
///    every touched shard regardless of kind.
/// 2. Whatever inserts the first pass didn't place are offered to each
///    kind's ordinary fillable shards, in order, up to capacity. Inserts
///    that still don't fit after every fillable shard is exhausted trigger
///    a `create` request per kind that's out of room; the actual fill is
///    left for the next cycle, which will find the freshly created shard
///    in `get_fillable` and take the first pass at it.
pub struct IndexWriter {
    instances: Arc<InstanceRegistry>,
    indexes: Arc<IndexRegistry>,
    context: Arc<ContextRegistry>,
    arbiter: Arc<MemoryArbiter>,
    embedder: Arc<dyn Embedder>,
    active: Mutex<hashbrown::HashSet<u64>>,
    condvar: Condvar,
    wake_lock: Mutex<()>,
    stopped: AtomicBool,
    max_index_size: f64,
}

impl IndexWriter {
    pub fn new(
        instances: Arc<InstanceRegistry>,
        indexes: Arc<IndexRegistry>,
        context: Arc<ContextRegistry>,
        arbiter: Arc<MemoryArbiter>,
        embedder: Arc<dyn Embedder>,
        max_index_size: f64,
    ) -> Arc<Self> {
        let writer = Arc::new(Self {
            active: Mutex::new(instances.ids().into_iter().collect()),
            instances,
            indexes,
            context,
            arbiter,
            embedder,
            condvar: Condvar::new(),
            wake_lock: Mutex::new(()),
            stopped: AtomicBool::new(false),
            max_index_size,
        });
        writer
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.condvar.notify_all();
    }

    fn notify(&self) {
        self.condvar.notify_all();
    }

    pub fn spawn(self: &Arc<Self>) -> std::thread::JoinHandle<()> {
        let writer = self.clone();
        std::thread::Builder::new()
            .name("index-writer".to_string())
            .spawn(move || writer.run_forever())
            .expect("spawn index writer thread")
    }

    fn run_forever(self: Arc<Self>) {
        loop {
            {
                let mut guard = self.wake_lock.lock();
                self.condvar.wait_for(&mut guard, WAKE_INTERVAL);
            }
            if self.stopped.load(Ordering::SeqCst) {
                return;
            }

            let active: Vec<u64> = self.active.lock().iter().copied().collect();
            for instance in active {
                if let Err(err) = self.process_instance(instance) {
                    log::error!("index writer failed on instance {instance}: {err}");
                }
            }
        }
    }

    fn process_instance(&self, instance: u64) -> indexcore_common::Result<()> {
        let queue = match self.instances.queue(instance) {
            Some(queue) => queue,
            None => return Ok(()),
        };
        let mutations = queue.drain();
        if mutations.is_empty() {
            return Ok(());
        }
        if !self.indexes.contains(instance) {
            return Ok(());
        }

        let coalesced = coalesce(mutations);
        let deletes = coalesced.delete_ids();
        let mut inserts = coalesced.inserts;

        let kinds = self.indexes.kinds(instance)?;

        let mut work_list: Vec<Arc<Index>> = Vec::new();
        let mut hit_ids_by_shard: HashMap<usize, Vec<DocId>> = HashMap::new();
        if !deletes.is_empty() {
            for kind in &kinds {
                for shard in self.indexes.get(instance, *kind)? {
                    let hits = shard.id_intersection(&deletes);
                    if !hits.is_empty() {
                        let position = work_list.len();
                        hit_ids_by_shard.insert(position, hits);
                        work_list.push(shard);
                    }
                }
            }
        }

        let mut cursor = 0usize;
        for (position, shard) in work_list.iter().enumerate() {
            let hits = hit_ids_by_shard.remove(&position).unwrap_or_default();
            cursor = self.apply_delete_driven(instance, shard, &hits, &inserts, cursor);
        }
        if cursor > 0 {
            inserts.drain(0..cursor.min(inserts.len()));
        }

        for kind in &kinds {
            if inserts.is_empty() {
                break;
            }
            inserts = self.fill_kind(instance, *kind, inserts)?;
        }

        if !inserts.is_empty() {
            log::info!(
                "deferring {} leftover inserts for instance {instance} to next writer cycle",
                inserts.len()
            );
            // A brand new instance has no shards of any kind yet; fall back
            // to the full closed set so the first ingestion still gets a
            // home to land in on the next cycle.
            let creation_kinds: &[IndexKind] = if kinds.is_empty() { &IndexKind::ALL } else { &kinds };
            for kind in creation_kinds {
                if self.indexes.get_fillable(instance, *kind)?.is_empty() {
                    if let Err(err) = self.indexes.create(instance, *kind) {
                        log::error!("failed to create overflow shard for instance {instance}: {err}");
                    }
                }
            }
            queue.push_all(inserts.into_iter().map(indexcore_common::Mutation::Insert));
        }

        Ok(())
    }

    /// Applies one shard's slice of the delete-driven reinsertion pass:
    /// `load`, `remove(hit_ids)`, backfill from `inserts[cursor..]` up to
    /// capacity, `save`, `release`. Returns the advanced cursor. Any error
    /// (including a mid-cycle instance removal observed before `save`) is
    /// trapped here so one shard's failure can't stop the others.
    fn apply_delete_driven(
        &self,
        instance: u64,
        shard: &Arc<Index>,
        hit_ids: &[DocId],
        inserts: &[ProcessedDocument],
        cursor: usize,
    ) -> usize {
        let token = self.context.generate();
        let result = (|| -> indexcore_common::Result<usize> {
            shard.load(token)?;
            shard.remove(hit_ids)?;
            let capacity = shard.capacity(self.max_index_size);
            let take = capacity.min(inserts.len().saturating_sub(cursor));
            let slice = &inserts[cursor..cursor + take];
            let embedded = self.embed(slice);
            shard.insert(&embedded)?;
            if !self.indexes.contains(instance) {
                return Ok(cursor + take);
            }
            shard.save(None)?;
            if self.arbiter.is_index_full(shard.size()) {
                if let Some(kind_position) = self.locate(instance, shard) {
                    let (kind, _) = kind_position;
                    let _ = self.indexes.mark_full(instance, kind, shard);
                }
            }
            Ok(cursor + take)
        })();

        shard.release(token);
        self.context.release(token);
        match result {
            Ok(advanced) => advanced,
            Err(err) => {
                log::error!("writer failed on shard {}: {err}", shard.path().display());
                cursor
            }
        }
    }

    /// Offers `inserts` to `kind`'s ordinary fillable shards, in order, up
    /// to capacity per shard. Returns whatever didn't fit.
    fn fill_kind(
        &self,
        instance: u64,
        kind: IndexKind,
        mut inserts: Vec<ProcessedDocument>,
    ) -> indexcore_common::Result<Vec<ProcessedDocument>> {
        for shard in self.indexes.get_fillable(instance, kind)? {
            if inserts.is_empty() {
                break;
            }
            let token = self.context.generate();
            let result = (|| -> indexcore_common::Result<usize> {
                shard.load(token)?;
                let capacity = shard.capacity(self.max_index_size);
                let take = capacity.min(inserts.len());
                let embedded = self.embed(&inserts[..take]);
                shard.insert(&embedded)?;
                if self.indexes.contains(instance) {
                    shard.save(None)?;
                    if self.arbiter.is_index_full(shard.size()) {
                        self.indexes.mark_full(instance, kind, &shard)?;
                    }
                }
                Ok(take)
            })();
            shard.release(token);
            self.context.release(token);
            match result {
                Ok(taken) => {
                    inserts.drain(0..taken);
                }
                Err(err) => {
                    log::error!("writer failed filling shard {}: {err}", shard.path().display());
                }
            }
        }
        Ok(inserts)
    }

    fn embed(&self, docs: &[ProcessedDocument]) -> Vec<(ProcessedDocument, Vec<f32>)> {
        let texts: Vec<&str> = docs.iter().map(|d| d.text.as_str()).collect();
        let vectors = self.embedder.encode(&texts);
        docs.iter().cloned().zip(vectors).collect()
    }

    fn locate(&self, instance: u64, shard: &Arc<Index>) -> Option<(IndexKind, usize)> {
        let kinds = self.indexes.kinds(instance).ok()?;
        for kind in kinds {
            let list = self.indexes.get(instance, kind).ok()?;
            if let Some(position) = list.iter().position(|s| Arc::ptr_eq(s, shard)) {
                return Some((kind, position));
            }
        }
        None
    }
}

impl InstanceObserver for IndexWriter {
    fn on_instance_event(&self, event: InstanceEvent) {
        match event {
            InstanceEvent::Add(instance) => {
                self.active.lock().insert(instance);
            }
            InstanceEvent::Remove(instance) => {
                self.active.lock().remove(&instance);
            }
        }
        self.notify();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicBool;

    use indexcore_common::{HashingEmbedder, Mutation};
    use indexcore_providers::Provider;
    use indexcore_storage::{InMemoryMetadataStore, ProviderInstanceRow};

    struct StubProvider;
    impl Provider for StubProvider {
        fn setup(&self) -> bool {
            true
        }
        fn run(&self) -> bool {
            true
        }
        fn kill(&self) {}
    }

    fn harness(tag: &str) -> (Arc<InstanceRegistry>, Arc<IndexRegistry>, Arc<IndexWriter>, PathBuf) {
        let root = std::env::temp_dir().join(format!("indexcore-writer-test-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&root).ok();

        let store = InMemoryMetadataStore::new();
        store.insert_instance(ProviderInstanceRow {
            id: 1,
            provider_kind: "stub".to_string(),
            name: "a".to_string(),
            connection_config: serde_json::json!({}),
            last_fetched: None,
        });

        let instances = Arc::new(InstanceRegistry::new(store.clone()));

        let arbiter = Arc::new(MemoryArbiter::new(1000.0, 500.0, 500.0, 10.0, 0.95));
        let context = Arc::new(ContextRegistry::new());
        let indexes = Arc::new(IndexRegistry::new(root.clone(), 4, arbiter.clone(), store, context.clone()));
        instances.attach(indexes.clone() as Arc<dyn indexcore_common::InstanceObserver>);

        // Fires `Add(1)`, which `IndexRegistry` observes by calling
        // `load_existing`, giving the instance an (empty) registry entry.
        instances.add(1, Arc::new(StubProvider));

        let embedder = Arc::new(HashingEmbedder::new(4));
        let writer = IndexWriter::new(instances.clone(), indexes.clone(), context, arbiter, embedder, 10.0);

        (instances, indexes, writer, root)
    }

    #[test]
    fn scenario_s3_delete_insert_collapse_replaces_content_for_the_same_id() {
        let (instances, indexes, writer, root) = harness("s3");
        let shard = indexes.create(1, IndexKind::Lexical).unwrap();

        // Pre-seed the shard with the original content so the delete half of
        // the coalesced `[Delete, Insert]` has something real to remove.
        let seed_token = indexes_test_token();
        shard.load(seed_token).unwrap();
        shard.insert(&[(ProcessedDocument::new(1, "original"), vec![])]).unwrap();
        shard.save(None).unwrap();
        shard.release(seed_token);

        let queue = instances.queue(1).unwrap();
        queue.push_all(vec![
            Mutation::Delete(1),
            Mutation::Insert(ProcessedDocument::new(1, "replacement")),
        ]);

        writer.process_instance(1).unwrap();

        let shards = indexes.get(1, IndexKind::Lexical).unwrap();
        assert_eq!(shards.len(), 1);
        let token = indexes_test_token();
        shards[0].load(token).unwrap();
        assert!(shards[0].has_id(1));
        assert_eq!(shards[0].search(&[], "replacement", 5).unwrap()[0].id, 1);
        assert!(shards[0].search(&[], "original", 5).unwrap().is_empty());
        shards[0].release(token);

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn leftover_inserts_are_requeued_when_no_shard_exists() {
        let (instances, indexes, writer, root) = harness("leftover");
        // No shard created yet for this instance/kind.

        let queue = instances.queue(1).unwrap();
        queue.push_all(vec![Mutation::Insert(ProcessedDocument::new(1, "alpha"))]);

        writer.process_instance(1).unwrap();

        // A shard should have been created to receive the leftover next cycle.
        assert!(!indexes.get(1, IndexKind::Vector).unwrap().is_empty());
        // The insert itself should have been requeued rather than lost.
        assert!(!instances.queue(1).unwrap().is_empty());

        std::fs::remove_dir_all(&root).ok();
    }

    fn indexes_test_token() -> indexcore_engine::ContextToken {
        ContextRegistry::new().generate()
    }
}
