use serde::{Deserialize, Serialize};

/// The closed set of index variants. Modeled as a plain enum rather than a
/// trait object hierarchy: the set of kinds is fixed at compile time, so
/// there's no value in open extension here.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum IndexKind {
    Vector,
    Lexical,
}

impl IndexKind {
    pub const ALL: [IndexKind; 2] = [IndexKind::Vector, IndexKind::Lexical];

    /// The on-disk file extension associated with this kind.
    ///
    /// `faiss` names the naming convention this crate keeps, even though the
    /// bytes written under it are this crate's own shard format, not a
    /// libfaiss index file.
    pub fn extension(self) -> &'static str {
        match self {
            IndexKind::Vector => "faiss",
            IndexKind::Lexical => "bm25",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "faiss" => Some(IndexKind::Vector),
            "bm25" => Some(IndexKind::Lexical),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IndexKind::Vector => "vector",
            IndexKind::Lexical => "lexical",
        }
    }
}

impl std::fmt::Display for IndexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
