use crate::document::{DocId, ProcessedDocument};

/// A tagged value applied against one (instance, kind) population of shards.
/// Update is deliberately not a first-class variant: callers model it as a
/// `Delete` immediately followed by an `Insert`, which the writer's
/// coalescer then collapses according to the rules in `indexcore-writer`.
#[derive(Debug, Clone)]
pub enum Mutation {
    Insert(ProcessedDocument),
    Delete(DocId),
}

impl Mutation {
    pub fn doc_id(&self) -> DocId {
        match self {
            Mutation::Insert(doc) => doc.id,
            Mutation::Delete(id) => *id,
        }
    }
}
