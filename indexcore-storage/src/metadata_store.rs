use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// A row mirroring the `provider_instance` table: connection config plus the
/// cursor the scheduler/provider use to decide what's new.
#[derive(Debug, Clone)]
pub struct ProviderInstanceRow {
    pub id: u64,
    pub provider_kind: String,
    pub name: String,
    pub connection_config: serde_json::Value,
    pub last_fetched: Option<DateTime<Utc>>,
}

/// Fields needed to persist one raw document before it is chunked.
#[derive(Debug, Clone)]
pub struct DocumentFields {
    pub instance_id: u64,
    pub doc_type: String,
    pub status: String,
    pub title: String,
    pub author: Option<String>,
    pub author_avatar: Option<String>,
    pub url: Option<String>,
    pub location: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// The abstract RDBMS boundary consumed by the core: provider instance rows
/// and document/sub-document creation. Every operation is synchronous and
/// may fail transiently or permanently; callers (providers) treat any
/// failure as a fetch failure and retry on the next cadence.
pub trait MetadataStore: Send + Sync + 'static {
    fn find_instance_by_id(&self, id: u64) -> anyhow::Result<Option<ProviderInstanceRow>>;

    fn find_instances_by_provider_kind(&self, kind: &str) -> anyhow::Result<Vec<ProviderInstanceRow>>;

    fn update_last_fetched(&self, id: u64, at: DateTime<Utc>) -> anyhow::Result<()>;

    /// Persists a raw document row, returning its globally unique id.
    fn create_document(&self, fields: DocumentFields) -> anyhow::Result<i64>;

    /// Persists one chunk of a document, returning its globally unique id.
    /// This is the id a `ProcessedDocument` carries into the indexing core.
    fn create_sub_document(&self, document_id: i64, data: &str) -> anyhow::Result<i64>;
}

/// An in-memory `MetadataStore` used by tests and local/demo runs. It is
/// intentionally not wired up for production use: the real store is a
/// relational database the host application owns.
#[derive(Default)]
pub struct InMemoryMetadataStore {
    instances: Mutex<HashMap<u64, ProviderInstanceRow>>,
    next_doc_id: AtomicI64,
    next_sub_doc_id: AtomicI64,
}

impl InMemoryMetadataStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert_instance(&self, row: ProviderInstanceRow) {
        self.instances.lock().insert(row.id, row);
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn find_instance_by_id(&self, id: u64) -> anyhow::Result<Option<ProviderInstanceRow>> {
        Ok(self.instances.lock().get(&id).cloned())
    }

    fn find_instances_by_provider_kind(&self, kind: &str) -> anyhow::Result<Vec<ProviderInstanceRow>> {
        Ok(self
            .instances
            .lock()
            .values()
            .filter(|row| row.provider_kind == kind)
            .cloned()
            .collect())
    }

    fn update_last_fetched(&self, id: u64, at: DateTime<Utc>) -> anyhow::Result<()> {
        if let Some(row) = self.instances.lock().get_mut(&id) {
            row.last_fetched = Some(at);
        }
        Ok(())
    }

    fn create_document(&self, _fields: DocumentFields) -> anyhow::Result<i64> {
        Ok(self.next_doc_id.fetch_add(1, Ordering::SeqCst))
    }

    fn create_sub_document(&self, _document_id: i64, _data: &str) -> anyhow::Result<i64> {
        Ok(self.next_sub_doc_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_last_fetched_defaults_to_none_not_a_sentinel() {
        let store = InMemoryMetadataStore::new();
        store.insert_instance(ProviderInstanceRow {
            id: 1,
            provider_kind: "imap".to_string(),
            name: "inbox".to_string(),
            connection_config: serde_json::json!({}),
            last_fetched: None,
        });

        let row = store.find_instance_by_id(1).unwrap().unwrap();
        assert!(row.last_fetched.is_none());
    }

    #[test]
    fn update_last_fetched_round_trips() {
        let store = InMemoryMetadataStore::new();
        store.insert_instance(ProviderInstanceRow {
            id: 1,
            provider_kind: "imap".to_string(),
            name: "inbox".to_string(),
            connection_config: serde_json::json!({}),
            last_fetched: None,
        });

        let now = Utc::now();
        store.update_last_fetched(1, now).unwrap();
        let row = store.find_instance_by_id(1).unwrap().unwrap();
        assert_eq!(row.last_fetched, Some(now));
    }
}
