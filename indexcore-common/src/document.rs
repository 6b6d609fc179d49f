use serde::{Deserialize, Serialize};

pub type DocId = i64;

/// A token-bounded chunk derived from a raw provider document.
///
/// `id` is assigned by the `MetadataStore` at persistence time, before the
/// document ever reaches a shard, so by the time a `ProcessedDocument`
/// exists it is already immutable and uniquely addressable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessedDocument {
    pub id: DocId,
    pub text: String,
}

impl ProcessedDocument {
    pub fn new(id: DocId, text: impl Into<String>) -> Self {
        Self { id, text: text.into() }
    }
}
