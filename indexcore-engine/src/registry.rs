use std::path::PathBuf;
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;

use indexcore_common::{IndexError, IndexKind, InstanceEvent, InstanceObserver, Result};
use indexcore_storage::{layout, MetadataStore};

use crate::arbiter::MemoryArbiter;
use crate::context::ContextRegistry;
use crate::events::{IndexRegistryEvent, IndexRegistryObserver};
use crate::index::Index;

type ShardTable = HashMap<u64, HashMap<IndexKind, Vec<Arc<Index>>>>;

/// Owns every shard on disk, split across `registry` (every shard, whether
/// or not it still accepts inserts) and `fillable` (the subset that does).
/// Reacts to `InstanceRegistry` lifecycle events so that a provider
/// instance's shards come and go with the instance itself.
pub struct IndexRegistry {
    root: PathBuf,
    dims: usize,
    arbiter: Arc<MemoryArbiter>,
    metadata_store: Arc<dyn MetadataStore>,
    context: Arc<ContextRegistry>,
    registry: Mutex<ShardTable>,
    fillable: Mutex<ShardTable>,
    observers: Mutex<Vec<Arc<dyn IndexRegistryObserver>>>,
}

impl IndexRegistry {
    pub fn new(
        root: PathBuf,
        dims: usize,
        arbiter: Arc<MemoryArbiter>,
        metadata_store: Arc<dyn MetadataStore>,
        context: Arc<ContextRegistry>,
    ) -> Self {
        Self {
            root,
            dims,
            arbiter,
            metadata_store,
            context,
            registry: Mutex::new(HashMap::new()),
            fillable: Mutex::new(HashMap::new()),
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn attach(&self, observer: Arc<dyn IndexRegistryObserver>) {
        self.observers.lock().push(observer);
    }

    fn notify(&self, event: IndexRegistryEvent) {
        for observer in self.observers.lock().iter() {
            observer.on_index_event(event);
        }
    }

    pub fn contains(&self, instance: u64) -> bool {
        self.registry.lock().contains_key(&instance)
    }

    pub fn kinds(&self, instance: u64) -> Result<Vec<IndexKind>> {
        let registry = self.registry.lock();
        let by_kind = registry.get(&instance).ok_or(IndexError::UnknownInstance(instance))?;
        Ok(by_kind.keys().copied().collect())
    }

    pub fn get(&self, instance: u64, kind: IndexKind) -> Result<Vec<Arc<Index>>> {
        let registry = self.registry.lock();
        let by_kind = registry.get(&instance).ok_or(IndexError::UnknownInstance(instance))?;
        Ok(by_kind.get(&kind).cloned().unwrap_or_default())
    }

    pub fn get_fillable(&self, instance: u64, kind: IndexKind) -> Result<Vec<Arc<Index>>> {
        if !self.registry.lock().contains_key(&instance) {
            return Err(IndexError::UnknownInstance(instance));
        }
        let fillable = self.fillable.lock();
        Ok(fillable.get(&instance).and_then(|by_kind| by_kind.get(&kind)).cloned().unwrap_or_default())
    }

    /// Allocates a new, empty shard for `instance`/`kind` at
    /// `<root>/<provider-kind>/<instance-name>_<instance-id>/<epoch-ms>.<ext>`,
    /// adds it to both tables, and emits `Add(instance)`.
    pub fn create(&self, instance: u64, kind: IndexKind) -> Result<Arc<Index>> {
        let dir = self.instance_dir(instance)?;
        std::fs::create_dir_all(&dir).map_err(|source| IndexError::TransientIo {
            path: dir.display().to_string(),
            source,
        })?;
        let path = layout::new_shard_path(&dir, kind);
        let shard = Arc::new(Index::new(kind, path, self.dims));

        self.registry.lock().entry(instance).or_default().entry(kind).or_default().push(shard.clone());
        self.fillable.lock().entry(instance).or_default().entry(kind).or_default().push(shard.clone());

        self.notify(IndexRegistryEvent::Add(instance));
        Ok(shard)
    }

    /// Removes `shard` from `fillable` only; `registry` keeps it so searches
    /// still see it. Emits `Full` with the shard's position within its
    /// (instance, kind) list in `registry`.
    pub fn mark_full(&self, instance: u64, kind: IndexKind, shard: &Arc<Index>) -> Result<()> {
        {
            let mut fillable = self.fillable.lock();
            if let Some(by_kind) = fillable.get_mut(&instance) {
                if let Some(list) = by_kind.get_mut(&kind) {
                    list.retain(|s| !Arc::ptr_eq(s, shard));
                }
            }
        }

        let registry = self.registry.lock();
        let position = registry
            .get(&instance)
            .and_then(|by_kind| by_kind.get(&kind))
            .and_then(|list| list.iter().position(|s| Arc::ptr_eq(s, shard)))
            .ok_or(IndexError::UnknownShard { instance, kind, position: 0 })?;
        drop(registry);

        self.notify(IndexRegistryEvent::Full(instance, kind, position));
        Ok(())
    }

    /// Scans the instance's directory for existing shard artifacts,
    /// instantiates one `Index` per recognised extension, opens each once
    /// (with a throwaway token) to populate its size/id cache, then closes
    /// it. A shard goes to `fillable` unless the arbiter already considers
    /// it full, in which case it's placed in `registry` only and a `Full`
    /// event fires immediately.
    pub fn load_existing(&self, instance: u64) -> Result<()> {
        let dir = self.instance_dir(instance)?;
        let found = layout::scan_shards(&dir).map_err(|source| IndexError::TransientIo {
            path: dir.display().to_string(),
            source,
        })?;

        self.registry.lock().entry(instance).or_insert_with(HashMap::new);
        self.fillable.lock().entry(instance).or_insert_with(HashMap::new);

        for (path, kind) in found {
            let shard = Arc::new(Index::new(kind, path, self.dims));
            let token = self.context.generate();
            shard.load(token)?;
            let size = shard.size();
            shard.release(token);
            self.context.release(token);

            self.registry.lock().entry(instance).or_default().entry(kind).or_default().push(shard.clone());

            if self.arbiter.is_index_full(size) {
                let registry = self.registry.lock();
                let position = registry
                    .get(&instance)
                    .and_then(|by_kind| by_kind.get(&kind))
                    .map(|list| list.len() - 1)
                    .unwrap_or(0);
                drop(registry);
                self.notify(IndexRegistryEvent::Full(instance, kind, position));
            } else {
                self.fillable.lock().entry(instance).or_default().entry(kind).or_default().push(shard);
            }
        }

        self.notify(IndexRegistryEvent::Add(instance));
        Ok(())
    }

    fn remove_instance(&self, instance: u64) {
        self.registry.lock().remove(&instance);
        self.fillable.lock().remove(&instance);
        self.notify(IndexRegistryEvent::Remove(instance));
    }

    fn instance_dir(&self, instance: u64) -> Result<PathBuf> {
        let row = self
            .metadata_store
            .find_instance_by_id(instance)
            .map_err(IndexError::Other)?
            .ok_or(IndexError::UnknownInstance(instance))?;
        Ok(layout::instance_dir(&self.root, &row.provider_kind, &row.name, row.id))
    }
}

impl InstanceObserver for IndexRegistry {
    fn on_instance_event(&self, event: InstanceEvent) {
        match event {
            InstanceEvent::Add(instance) => {
                if let Err(err) = self.load_existing(instance) {
                    log::error!("failed to load existing shards for instance {instance}: {err}");
                }
            }
            InstanceEvent::Remove(instance) => self.remove_instance(instance),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexcore_storage::{InMemoryMetadataStore, ProviderInstanceRow};

    fn registry(root: PathBuf) -> (IndexRegistry, Arc<InMemoryMetadataStore>) {
        let store = InMemoryMetadataStore::new();
        store.insert_instance(ProviderInstanceRow {
            id: 1,
            provider_kind: "imap".to_string(),
            name: "inbox".to_string(),
            connection_config: serde_json::json!({}),
            last_fetched: None,
        });
        let arbiter = Arc::new(MemoryArbiter::new(1000.0, 200.0, 200.0, 50.0, 0.95));
        let context = Arc::new(ContextRegistry::new());
        (IndexRegistry::new(root, 8, arbiter, store.clone(), context), store)
    }

    fn tmp_root(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("indexcore-registry-test-{}-{}", tag, std::process::id()));
        std::fs::create_dir_all(&dir).ok();
        dir
    }

    #[test]
    fn create_appends_to_both_tables_and_unknown_instance_errors() {
        let root = tmp_root("create");
        let (reg, _store) = registry(root.clone());
        assert!(matches!(reg.kinds(1), Err(IndexError::UnknownInstance(1))));

        let shard = reg.create(1, IndexKind::Vector).unwrap();
        assert_eq!(reg.get(1, IndexKind::Vector).unwrap().len(), 1);
        assert_eq!(reg.get_fillable(1, IndexKind::Vector).unwrap().len(), 1);
        assert!(Arc::ptr_eq(&reg.get(1, IndexKind::Vector).unwrap()[0], &shard));

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn mark_full_removes_from_fillable_but_keeps_in_registry() {
        let root = tmp_root("markfull");
        let (reg, _store) = registry(root.clone());
        let shard = reg.create(1, IndexKind::Vector).unwrap();
        reg.mark_full(1, IndexKind::Vector, &shard).unwrap();
        assert_eq!(reg.get_fillable(1, IndexKind::Vector).unwrap().len(), 0);
        assert_eq!(reg.get(1, IndexKind::Vector).unwrap().len(), 1);
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn scenario_s1_boot_recovery_rediscovers_shards_written_by_a_prior_process() {
        let root = tmp_root("bootrecovery");
        {
            let (reg, _store) = registry(root.clone());
            let shard = reg.create(1, IndexKind::Vector).unwrap();
            let token = reg.context.generate();
            shard.load(token).unwrap();
            shard
                .insert(&[(
                    indexcore_common::ProcessedDocument::new(1, "recovered"),
                    vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                )])
                .unwrap();
            shard.save(None).unwrap();
            shard.release(token);
            reg.context.release(token);
            // `reg` (and its in-memory tables) is dropped here, simulating a
            // process restart; only the on-disk shard artifact survives.
        }

        let (reg, _store) = registry(root.clone());
        assert!(matches!(reg.kinds(1), Err(IndexError::UnknownInstance(1))));

        reg.load_existing(1).unwrap();
        let shards = reg.get(1, IndexKind::Vector).unwrap();
        assert_eq!(shards.len(), 1);
        assert_eq!(reg.get_fillable(1, IndexKind::Vector).unwrap().len(), 1);

        let token = reg.context.generate();
        shards[0].load(token).unwrap();
        assert!(shards[0].has_id(1));
        shards[0].release(token);
        reg.context.release(token);

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn remove_drops_both_tables() {
        let root = tmp_root("remove");
        let (reg, _store) = registry(root.clone());
        reg.create(1, IndexKind::Vector).unwrap();
        reg.remove_instance(1);
        assert!(matches!(reg.kinds(1), Err(IndexError::UnknownInstance(1))));
        std::fs::remove_dir_all(&root).ok();
    }
}
