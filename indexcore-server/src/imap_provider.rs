use std::sync::Arc;

use chrono::{DateTime, Utc};

use indexcore_common::{Mutation, ProcessedDocument, TextPipeline};
use indexcore_providers::{InstanceRegistry, Provider, ProviderState};
use indexcore_storage::{DocumentFields, MetadataStore};

/// One fetched message, already decoded to plain text. `id` is whatever the
/// mail source uses to identify the message (a UID, a `Message-Id` hash);
/// it plays no role once chunked, since `MetadataStore::create_sub_document`
/// is what actually assigns the `DocId` a `ProcessedDocument` carries.
#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub subject: String,
    pub from: String,
    pub date: DateTime<Utc>,
    pub body: String,
    pub url: Option<String>,
}

/// The external collaborator an `ImapProvider` fetches from. The bundled
/// reference implementation is this trait plus the provider below; a real
/// deployment supplies an adapter over an actual IMAP connection, tests
/// supply an in-memory one.
pub trait MessageSource: Send + Sync {
    /// Every message strictly newer than `since` (every message, if `since`
    /// is `None`), mirroring the original source's `ALL` vs `(SINCE ...)`
    /// IMAP search distinction.
    fn fetch_since(&self, since: Option<DateTime<Utc>>) -> anyhow::Result<Vec<EmailMessage>>;
}

/// Reference `Provider` implementation for IMAP mailboxes. Each `run()`
/// fetches everything newer than the instance's recorded cursor, persists
/// one document per message and one sub-document per chunk through
/// `MetadataStore`, enqueues an `Insert` mutation per chunk, then advances
/// the cursor — the same shape as the original queue-backed fetch/chunk/
/// enqueue/advance cycle, minus the `imaplib`/`email` parsing specifics,
/// which live in whatever `MessageSource` is plugged in.
///
/// Deliberately differs from the original in one place: a `None` cursor
/// here means "never fetched" and fetches everything, rather than aborting
/// the run outright — the rest of this system already treats a `None`
/// `last_fetched` as "due immediately" (see `FetchScheduler`), and aborting
/// silently would leave a freshly added instance permanently unindexed.
pub struct ImapProvider {
    instance: u64,
    registry: Arc<InstanceRegistry>,
    metadata_store: Arc<dyn MetadataStore>,
    source: Box<dyn MessageSource>,
    pipeline: Arc<dyn TextPipeline>,
    token_limit: usize,
    state: ProviderState,
}

impl ImapProvider {
    pub fn new(
        instance: u64,
        registry: Arc<InstanceRegistry>,
        metadata_store: Arc<dyn MetadataStore>,
        source: Box<dyn MessageSource>,
        pipeline: Arc<dyn TextPipeline>,
        token_limit: usize,
    ) -> Self {
        Self {
            instance,
            registry,
            metadata_store,
            source,
            pipeline,
            token_limit,
            state: ProviderState::new(),
        }
    }
}

impl Provider for ImapProvider {
    fn setup(&self) -> bool {
        self.state.ensure_setup(|| true)
    }

    fn run(&self) -> bool {
        if self.state.is_killed() {
            return false;
        }
        if !self.setup() {
            return false;
        }

        let since = match self.registry.metadata_store_lookup(self.instance) {
            Some(row) => row.last_fetched,
            None => {
                log::warn!("imap provider: instance {} has no metadata row", self.instance);
                return false;
            }
        };

        let initiated_at = Utc::now();
        let messages = match self.source.fetch_since(since) {
            Ok(messages) => messages,
            Err(err) => {
                log::warn!("imap fetch failed for instance {}: {err}", self.instance);
                return false;
            }
        };

        let queue = match self.registry.queue(self.instance) {
            Some(queue) => queue,
            None => return false,
        };

        for message in messages {
            if let Some(since) = since {
                if message.date <= since {
                    continue;
                }
            }

            let text = format!("{}\n{}\n{}", message.subject, message.from, message.body);
            let document_id = match self.metadata_store.create_document(DocumentFields {
                instance_id: self.instance,
                doc_type: "email".to_string(),
                status: "indexed".to_string(),
                title: message.subject.clone(),
                author: Some(message.from.clone()),
                author_avatar: None,
                url: message.url.clone(),
                location: None,
                timestamp: message.date,
            }) {
                Ok(id) => id,
                Err(err) => {
                    log::error!("imap provider: failed to persist document for instance {}: {err}", self.instance);
                    continue;
                }
            };

            for chunk in self.pipeline.chunk(&text, self.token_limit) {
                match self.metadata_store.create_sub_document(document_id, &chunk.text) {
                    Ok(id) => queue.push(Mutation::Insert(ProcessedDocument::new(id, chunk.text))),
                    Err(err) => {
                        log::error!("imap provider: failed to persist chunk for document {document_id}: {err}");
                    }
                }
            }
        }

        if let Err(err) = self.metadata_store.update_last_fetched(self.instance, initiated_at) {
            log::error!("imap provider: failed to advance cursor for instance {}: {err}", self.instance);
            return false;
        }

        true
    }

    fn kill(&self) {
        self.state.kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use indexcore_common::WhitespaceChunkingPipeline;
    use indexcore_storage::{InMemoryMetadataStore, ProviderInstanceRow};

    struct StubSource {
        messages: Vec<EmailMessage>,
    }

    impl MessageSource for StubSource {
        fn fetch_since(&self, since: Option<DateTime<Utc>>) -> anyhow::Result<Vec<EmailMessage>> {
            Ok(self
                .messages
                .iter()
                .filter(|m| since.map_or(true, |since| m.date > since))
                .cloned()
                .collect())
        }
    }

    fn message(subject: &str, at: DateTime<Utc>) -> EmailMessage {
        EmailMessage {
            subject: subject.to_string(),
            from: "sender@example.com".to_string(),
            date: at,
            body: "hello world this is the body".to_string(),
            url: None,
        }
    }

    #[test]
    fn run_enqueues_one_insert_per_chunk_and_advances_the_cursor() {
        let store = InMemoryMetadataStore::new();
        store.insert_instance(ProviderInstanceRow {
            id: 1,
            provider_kind: "imap".to_string(),
            name: "inbox".to_string(),
            connection_config: serde_json::json!({}),
            last_fetched: None,
        });
        let registry = Arc::new(InstanceRegistry::new(store.clone()));

        let source = Box::new(StubSource { messages: vec![message("hello", Utc::now())] });
        let provider = Arc::new(ImapProvider::new(
            1,
            registry.clone(),
            store.clone(),
            source,
            Arc::new(WhitespaceChunkingPipeline),
            2000,
        ));
        registry.add(1, provider.clone());

        assert!(provider.run());
        let queue = registry.queue(1).unwrap();
        assert!(!queue.is_empty());

        let row = store.find_instance_by_id(1).unwrap().unwrap();
        assert!(row.last_fetched.is_some());
    }

    #[test]
    fn messages_older_than_the_recorded_cursor_are_skipped() {
        let store = InMemoryMetadataStore::new();
        let now = Utc::now();
        store.insert_instance(ProviderInstanceRow {
            id: 1,
            provider_kind: "imap".to_string(),
            name: "inbox".to_string(),
            connection_config: serde_json::json!({}),
            last_fetched: Some(now),
        });
        let registry = Arc::new(InstanceRegistry::new(store.clone()));

        let source = Box::new(StubSource { messages: vec![message("old", now - chrono::Duration::seconds(5))] });
        let provider = Arc::new(ImapProvider::new(
            1,
            registry.clone(),
            store.clone(),
            source,
            Arc::new(WhitespaceChunkingPipeline),
            2000,
        ));
        registry.add(1, provider);

        let queue = registry.queue(1).unwrap();
        queue.drain();
        let provider = registry.get(1).unwrap();
        assert!(provider.run());
        assert!(registry.queue(1).unwrap().is_empty());
    }

    #[test]
    fn kill_prevents_further_runs() {
        let store = InMemoryMetadataStore::new();
        store.insert_instance(ProviderInstanceRow {
            id: 1,
            provider_kind: "imap".to_string(),
            name: "inbox".to_string(),
            connection_config: serde_json::json!({}),
            last_fetched: None,
        });
        let registry = Arc::new(InstanceRegistry::new(store.clone()));

        let source = Box::new(StubSource { messages: vec![message("hello", Utc::now())] });
        let provider = ImapProvider::new(1, registry.clone(), store, source, Arc::new(WhitespaceChunkingPipeline), 2000);
        provider.kill();
        assert!(!provider.run());
    }
}
