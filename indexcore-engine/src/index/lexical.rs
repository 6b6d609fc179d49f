use std::collections::HashSet;
use std::path::{Path, PathBuf};

use hashbrown::HashMap as FastHashMap;
use hashbrown::HashSet as FastHashSet;
use parking_lot::RwLock;

use indexcore_common::{DocId, IndexError, ProcessedDocument, Result};
use indexcore_storage::{layout, Sidecar};

use crate::context::ContextToken;
use crate::index::SearchHit;

const BM25_K: f32 = 1.5;
const BM25_B: f32 = 0.7;
const BM25_DELTA: f32 = 0.0;
const BYTES_PER_POSTING: f64 = 24.0;
const MIB: f64 = 1024.0 * 1024.0;

struct Resident {
    doc_lengths: FastHashMap<DocId, usize>,
    term_freqs: FastHashMap<String, FastHashMap<DocId, usize>>,
    doc_count: usize,
    total_len: usize,
}

struct Inner {
    resident: Option<Resident>,
    tokens: FastHashSet<u64>,
    id_set: FastHashSet<DocId>,
    size_mib: f64,
}

/// A lexical shard scored with BM25+ over whitespace-tokenized text.
/// Clustering is not a meaningful operation for an inverted index and is
/// rejected with `Unsupported`.
pub struct LexicalShard {
    path: PathBuf,
    state: RwLock<Inner>,
}

impl LexicalShard {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            state: RwLock::new(Inner {
                resident: None,
                tokens: FastHashSet::new(),
                id_set: FastHashSet::new(),
                size_mib: 0.0,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self, token: ContextToken) -> Result<()> {
        let mut inner = self.state.write();
        inner.tokens.insert(token.raw());
        if inner.resident.is_some() {
            return Ok(());
        }

        if !self.path.exists() {
            inner.resident = Some(empty_resident());
            return Ok(());
        }

        let bytes = std::fs::read(&self.path).map_err(|source| IndexError::TransientIo {
            path: self.path.display().to_string(),
            source,
        })?;
        let resident: SerializedResident = serde_json::from_slice(&bytes).map_err(|e| IndexError::PermanentIo {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })?;

        let sidecar_path = layout::sidecar_path(&self.path);
        if sidecar_path.exists() {
            if let Ok(sidecar) = Sidecar::read(&sidecar_path) {
                inner.size_mib = sidecar.size;
                inner.id_set = sidecar.ids.into_iter().collect();
            }
        }
        if inner.id_set.is_empty() {
            inner.id_set = resident.doc_lengths.keys().copied().collect();
        }

        inner.resident = Some(resident.into());
        Ok(())
    }

    pub fn release(&self, token: ContextToken) {
        let mut inner = self.state.write();
        inner.tokens.remove(&token.raw());
        if inner.tokens.is_empty() {
            inner.resident = None;
        }
    }

    pub fn search(&self, query_text: &str, k: usize) -> Result<Vec<SearchHit>> {
        let inner = self.state.read();
        let resident = inner.resident.as_ref().ok_or_else(|| IndexError::NotLoaded {
            path: self.path.display().to_string(),
        })?;

        if resident.doc_count == 0 {
            return Ok(Vec::new());
        }
        let avg_len = resident.total_len as f32 / resident.doc_count as f32;
        let query_terms: Vec<&str> = query_text.split_whitespace().collect();

        let mut scores: FastHashMap<DocId, f32> = FastHashMap::new();
        for term in &query_terms {
            let postings = match resident.term_freqs.get(*term) {
                Some(p) => p,
                None => continue,
            };
            let df = postings.len() as f32;
            let idf = ((resident.doc_count as f32 + 1.0) / (df + 0.5)).ln();
            for (&doc_id, &freq) in postings {
                let len = *resident.doc_lengths.get(&doc_id).unwrap_or(&0) as f32;
                let tf = ((BM25_K + 1.0) * freq as f32)
                    / (BM25_K * (1.0 - BM25_B + BM25_B * (len / avg_len)))
                    + BM25_DELTA;
                *scores.entry(doc_id).or_insert(0.0) += idf * tf;
            }
        }

        let mut hits: Vec<SearchHit> = scores.into_iter().map(|(id, score)| SearchHit { id, score }).collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }

    pub fn has_id(&self, id: DocId) -> bool {
        self.state.read().id_set.contains(&id)
    }

    pub fn id_intersection(&self, ids: &HashSet<DocId>) -> Vec<DocId> {
        let inner = self.state.read();
        ids.iter().copied().filter(|id| inner.id_set.contains(id)).collect()
    }

    pub fn insert(&self, docs: &[(ProcessedDocument, Vec<f32>)]) -> Result<()> {
        let mut inner = self.state.write();
        if inner.resident.is_none() {
            return Err(IndexError::NotLoaded { path: self.path.display().to_string() });
        }
        {
            let resident = inner.resident.as_mut().unwrap();
            for (doc, _) in docs {
                let tokens: Vec<&str> = doc.text.split_whitespace().collect();
                resident.doc_lengths.insert(doc.id, tokens.len());
                resident.doc_count += 1;
                resident.total_len += tokens.len();
                for token in tokens {
                    resident
                        .term_freqs
                        .entry(token.to_string())
                        .or_insert_with(FastHashMap::new)
                        .entry(doc.id)
                        .and_modify(|f| *f += 1)
                        .or_insert(1);
                }
            }
        }
        for (doc, _) in docs {
            inner.id_set.insert(doc.id);
        }
        let posting_count = inner.resident.as_ref().unwrap().term_freqs.values().map(|p| p.len()).sum::<usize>();
        inner.size_mib = (posting_count as f64 * BYTES_PER_POSTING) / MIB;
        Ok(())
    }

    pub fn remove(&self, ids: &[DocId]) -> Result<()> {
        let mut inner = self.state.write();
        if inner.resident.is_none() {
            return Err(IndexError::NotLoaded { path: self.path.display().to_string() });
        }
        let drop: HashSet<DocId> = ids.iter().copied().collect();
        {
            let resident = inner.resident.as_mut().unwrap();
            for id in &drop {
                if let Some(len) = resident.doc_lengths.remove(id) {
                    resident.doc_count = resident.doc_count.saturating_sub(1);
                    resident.total_len = resident.total_len.saturating_sub(len);
                }
            }
            resident.term_freqs.retain(|_, postings| {
                for id in &drop {
                    postings.remove(id);
                }
                !postings.is_empty()
            });
        }
        for id in ids {
            inner.id_set.remove(id);
        }
        let posting_count = inner.resident.as_ref().unwrap().term_freqs.values().map(|p| p.len()).sum::<usize>();
        inner.size_mib = (posting_count as f64 * BYTES_PER_POSTING) / MIB;
        Ok(())
    }

    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let inner = self.state.read();
        let resident = inner.resident.as_ref().ok_or_else(|| IndexError::NotLoaded {
            path: self.path.display().to_string(),
        })?;
        let target = path.map(Path::to_path_buf).unwrap_or_else(|| self.path.clone());

        let serialized = SerializedResident::from(resident);
        let bytes = serde_json::to_vec(&serialized).map_err(|e| IndexError::PermanentIo {
            path: target.display().to_string(),
            reason: e.to_string(),
        })?;
        std::fs::write(&target, bytes).map_err(|source| IndexError::TransientIo {
            path: target.display().to_string(),
            source,
        })?;

        let sidecar = Sidecar { size: inner.size_mib, ids: inner.id_set.iter().copied().collect() };
        sidecar.write(&layout::sidecar_path(&target)).map_err(|e| IndexError::PermanentIo {
            path: target.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    pub fn size(&self) -> f64 {
        self.state.read().size_mib
    }

    pub fn max_doc_size(&self) -> f64 {
        // Worst-case: every word of a reasonably-sized chunk becomes a
        // distinct posting; a conservative per-document estimate.
        (64.0 * BYTES_PER_POSTING) / MIB
    }
}

fn empty_resident() -> Resident {
    Resident {
        doc_lengths: FastHashMap::new(),
        term_freqs: FastHashMap::new(),
        doc_count: 0,
        total_len: 0,
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct SerializedResident {
    doc_lengths: std::collections::HashMap<DocId, usize>,
    term_freqs: std::collections::HashMap<String, std::collections::HashMap<DocId, usize>>,
}

impl From<&Resident> for SerializedResident {
    fn from(resident: &Resident) -> Self {
        Self {
            doc_lengths: resident.doc_lengths.iter().map(|(k, v)| (*k, *v)).collect(),
            term_freqs: resident
                .term_freqs
                .iter()
                .map(|(term, postings)| (term.clone(), postings.iter().map(|(k, v)| (*k, *v)).collect()))
                .collect(),
        }
    }
}

impl From<SerializedResident> for Resident {
    fn from(serialized: SerializedResident) -> Self {
        let doc_count = serialized.doc_lengths.len();
        let total_len: usize = serialized.doc_lengths.values().sum();
        Resident {
            doc_lengths: serialized.doc_lengths.into_iter().collect(),
            term_freqs: serialized
                .term_freqs
                .into_iter()
                .map(|(term, postings)| (term, postings.into_iter().collect()))
                .collect(),
            doc_count,
            total_len,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexcore_common::ProcessedDocument;

    fn doc(id: DocId, text: &str) -> ProcessedDocument {
        ProcessedDocument::new(id, text.to_string())
    }

    fn token() -> ContextToken {
        crate::context::ContextRegistry::new().generate()
    }

    #[test]
    fn search_ranks_documents_containing_more_query_terms_higher() {
        let dir = std::env::temp_dir().join(format!("lexical-shard-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let shard = LexicalShard::new(dir.join("shard.bm25"));
        let t = token();
        shard.load(t).unwrap();
        shard
            .insert(&[
                (doc(1, "the quick brown fox"), vec![]),
                (doc(2, "the lazy dog sleeps"), vec![]),
            ])
            .unwrap();
        let hits = shard.search("quick fox", 2).unwrap();
        assert_eq!(hits[0].id, 1);
        shard.release(t);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_query_term_contributes_zero_instead_of_panicking() {
        let dir = std::env::temp_dir().join(format!("lexical-shard-test-{}", std::process::id() as u64 + 1));
        std::fs::create_dir_all(&dir).unwrap();
        let shard = LexicalShard::new(dir.join("shard.bm25"));
        let t = token();
        shard.load(t).unwrap();
        shard.insert(&[(doc(1, "alpha beta"), vec![])]).unwrap();
        let hits = shard.search("gamma delta", 5).unwrap();
        assert!(hits.is_empty());
        shard.release(t);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn scenario_s6_top_score_matches_the_direct_bm25_formula() {
        let dir = std::env::temp_dir().join(format!("lexical-shard-test-{}", std::process::id() as u64 + 3));
        std::fs::create_dir_all(&dir).unwrap();
        let shard = LexicalShard::new(dir.join("shard.bm25"));
        let t = token();
        shard.load(t).unwrap();
        shard
            .insert(&[(doc(1, "alpha alpha beta"), vec![]), (doc(2, "alpha gamma delta epsilon"), vec![])])
            .unwrap();

        let hits = shard.search("alpha", 2).unwrap();
        assert_eq!(hits[0].id, 1);

        // Both docs contain "alpha", so df = 2, N = 2.
        let avg_len = (3.0 + 4.0) / 2.0;
        let idf = ((2.0_f32 + 1.0) / (2.0 + 0.5)).ln();
        let direct = |freq: f32, len: f32| -> f32 {
            idf * (((BM25_K + 1.0) * freq) / (BM25_K * (1.0 - BM25_B + BM25_B * (len / avg_len))) + BM25_DELTA)
        };

        let expected_top = direct(2.0, 3.0);
        assert!(
            (hits[0].score - expected_top).abs() < 1e-4,
            "expected {expected_top}, got {}",
            hits[0].score
        );

        let expected_second = direct(1.0, 4.0);
        assert!((hits[1].score - expected_second).abs() < 1e-4);

        shard.release(t);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn cluster_is_unsupported() {
        use indexcore_common::IndexKind;
        let shard = crate::index::Index::Lexical(LexicalShard::new(PathBuf::from("/tmp/x.bm25")));
        let err = shard.cluster(4).unwrap_err();
        assert!(matches!(err, IndexError::Unsupported { kind: IndexKind::Lexical, .. }));
    }

    #[test]
    fn remove_drops_postings_and_updates_average_length() {
        let dir = std::env::temp_dir().join(format!("lexical-shard-test-{}", std::process::id() as u64 + 2));
        std::fs::create_dir_all(&dir).unwrap();
        let shard = LexicalShard::new(dir.join("shard.bm25"));
        let t = token();
        shard.load(t).unwrap();
        shard
            .insert(&[(doc(1, "alpha beta"), vec![]), (doc(2, "alpha gamma delta"), vec![])])
            .unwrap();
        shard.remove(&[2]).unwrap();
        assert!(!shard.has_id(2));
        assert!(shard.has_id(1));
        shard.release(t);
        std::fs::remove_dir_all(&dir).ok();
    }
}
