mod lexical;
mod vector;

pub use lexical::LexicalShard;
pub use vector::VectorShard;

use std::path::{Path, PathBuf};

use indexcore_common::{DocId, IndexError, IndexKind, ProcessedDocument, Result};

use crate::context::ContextToken;

/// One scored search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: DocId,
    pub score: f32,
}

/// A single on-disk shard, polymorphic over `IndexKind`.
///
/// Dispatch is a closed tagged union rather than a trait object: the set of
/// kinds is fixed by `IndexKind` and each variant's on-disk format, sizing
/// formula and clustering support differ enough that open-ended
/// implementations would buy nothing.
pub enum Index {
    Vector(VectorShard),
    Lexical(LexicalShard),
}

impl Index {
    pub fn new(kind: IndexKind, path: PathBuf, dims: usize) -> Self {
        match kind {
            IndexKind::Vector => Index::Vector(VectorShard::new(path, dims)),
            IndexKind::Lexical => Index::Lexical(LexicalShard::new(path)),
        }
    }

    pub fn kind(&self) -> IndexKind {
        match self {
            Index::Vector(_) => IndexKind::Vector,
            Index::Lexical(_) => IndexKind::Lexical,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Index::Vector(s) => s.path(),
            Index::Lexical(s) => s.path(),
        }
    }

    pub fn load(&self, token: ContextToken) -> Result<()> {
        match self {
            Index::Vector(s) => s.load(token),
            Index::Lexical(s) => s.load(token),
        }
    }

    pub fn release(&self, token: ContextToken) {
        match self {
            Index::Vector(s) => s.release(token),
            Index::Lexical(s) => s.release(token),
        }
    }

    pub fn search(&self, query: &[f32], query_text: &str, k: usize) -> Result<Vec<SearchHit>> {
        match self {
            Index::Vector(s) => s.search(query, k),
            Index::Lexical(s) => s.search(query_text, k),
        }
    }

    pub fn has_id(&self, id: DocId) -> bool {
        match self {
            Index::Vector(s) => s.has_id(id),
            Index::Lexical(s) => s.has_id(id),
        }
    }

    pub fn id_intersection(&self, ids: &std::collections::HashSet<DocId>) -> Vec<DocId> {
        match self {
            Index::Vector(s) => s.id_intersection(ids),
            Index::Lexical(s) => s.id_intersection(ids),
        }
    }

    pub fn insert(&self, docs: &[(ProcessedDocument, Vec<f32>)]) -> Result<()> {
        match self {
            Index::Vector(s) => s.insert(docs),
            Index::Lexical(s) => s.insert(docs),
        }
    }

    pub fn remove(&self, ids: &[DocId]) -> Result<()> {
        match self {
            Index::Vector(s) => s.remove(ids),
            Index::Lexical(s) => s.remove(ids),
        }
    }

    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        match self {
            Index::Vector(s) => s.save(path),
            Index::Lexical(s) => s.save(path),
        }
    }

    pub fn size(&self) -> f64 {
        match self {
            Index::Vector(s) => s.size(),
            Index::Lexical(s) => s.size(),
        }
    }

    pub fn max_doc_size(&self) -> f64 {
        match self {
            Index::Vector(s) => s.max_doc_size(),
            Index::Lexical(s) => s.max_doc_size(),
        }
    }

    pub fn capacity(&self, max_index_size: f64) -> usize {
        let remaining = max_index_size - self.size();
        if remaining <= 0.0 {
            return 0;
        }
        (remaining / self.max_doc_size()).floor() as usize
    }

    pub fn cluster(&self, cells: usize) -> Result<()> {
        match self {
            Index::Vector(s) => s.cluster(cells),
            Index::Lexical(_) => Err(IndexError::Unsupported {
                kind: IndexKind::Lexical,
                operation: "cluster",
            }),
        }
    }
}
