use std::collections::HashSet;
use std::path::{Path, PathBuf};

use hashbrown::HashSet as FastHashSet;
use parking_lot::RwLock;

use indexcore_common::{normalize, DocId, IndexError, ProcessedDocument, Result};
use indexcore_storage::{layout, Sidecar};

use crate::context::ContextToken;

const BYTES_PER_F32: f64 = 4.0;
const MIB: f64 = 1024.0 * 1024.0;

struct Centroid {
    vector: Vec<f32>,
    members: Vec<usize>,
}

struct Resident {
    ids: Vec<DocId>,
    vectors: Vec<Vec<f32>>,
    clustered: Option<Vec<Centroid>>,
}

struct Inner {
    resident: Option<Resident>,
    tokens: FastHashSet<u64>,
    id_set: FastHashSet<DocId>,
    size_mib: f64,
}

/// A vector shard: L2-normalized embeddings searched by inner product
/// (equivalent to cosine similarity once normalized), optionally
/// partitioned into cells by a from-scratch k-means trainer.
pub struct VectorShard {
    path: PathBuf,
    dims: usize,
    state: RwLock<Inner>,
}

impl VectorShard {
    pub fn new(path: PathBuf, dims: usize) -> Self {
        Self {
            path,
            dims,
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
            inner.resident = Some(Resident { ids: Vec::new(), vectors: Vec::new(), clustered: None });
            return Ok(());
        }

        let bytes = std::fs::read(&self.path).map_err(|source| IndexError::TransientIo {
            path: self.path.display().to_string(),
            source,
        })?;
        let (ids, vectors) = decode_vectors(&bytes, self.dims).map_err(|reason| IndexError::PermanentIo {
            path: self.path.display().to_string(),
            reason,
        })?;

        let sidecar_path = layout::sidecar_path(&self.path);
        if sidecar_path.exists() {
            if let Ok(sidecar) = Sidecar::read(&sidecar_path) {
                inner.size_mib = sidecar.size;
                inner.id_set = sidecar.ids.into_iter().collect();
            }
        }
        if inner.id_set.is_empty() {
            inner.id_set = ids.iter().copied().collect();
        }

        inner.resident = Some(Resident { ids, vectors, clustered: None });
        Ok(())
    }

    pub fn release(&self, token: ContextToken) {
        let mut inner = self.state.write();
        inner.tokens.remove(&token.raw());
        if inner.tokens.is_empty() {
            inner.resident = None;
        }
    }

    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<crate::index::SearchHit>> {
        let inner = self.state.read();
        let resident = inner.resident.as_ref().ok_or_else(|| IndexError::NotLoaded {
            path: self.path.display().to_string(),
        })?;

        let mut query = query.to_vec();
        normalize(&mut query);

        let mut scored: Vec<crate::index::SearchHit> = resident
            .ids
            .iter()
            .zip(resident.vectors.iter())
            .map(|(id, vector)| {
                let dot: f32 = vector.iter().zip(query.iter()).map(|(a, b)| a * b).sum();
                crate::index::SearchHit { id: *id, score: (dot + 1.0) / 2.0 }
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
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
            for (doc, vector) in docs {
                let mut v = vector.clone();
                normalize(&mut v);
                resident.ids.push(doc.id);
                resident.vectors.push(v);
            }
            resident.clustered = None;
        }
        for (doc, _) in docs {
            inner.id_set.insert(doc.id);
        }
        let vector_count = inner.resident.as_ref().unwrap().vectors.len();
        inner.size_mib = resident_size_mib(vector_count, self.dims);
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
            let mut kept_ids = Vec::with_capacity(resident.ids.len());
            let mut kept_vectors = Vec::with_capacity(resident.vectors.len());
            for (id, vector) in resident.ids.drain(..).zip(resident.vectors.drain(..)) {
                if !drop.contains(&id) {
                    kept_ids.push(id);
                    kept_vectors.push(vector);
                }
            }
            resident.ids = kept_ids;
            resident.vectors = kept_vectors;
            resident.clustered = None;
        }
        for id in ids {
            inner.id_set.remove(id);
        }
        let vector_count = inner.resident.as_ref().unwrap().vectors.len();
        inner.size_mib = resident_size_mib(vector_count, self.dims);
        Ok(())
    }

    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let inner = self.state.read();
        let resident = inner.resident.as_ref().ok_or_else(|| IndexError::NotLoaded {
            path: self.path.display().to_string(),
        })?;
        let target = path.map(Path::to_path_buf).unwrap_or_else(|| self.path.clone());

        let bytes = encode_vectors(&resident.ids, &resident.vectors);
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
        (self.dims as f64 * BYTES_PER_F32) / MIB
    }

    /// Partitions the resident vectors into `cells` centroids via a
    /// bounded-iteration Lloyd's algorithm, trained on a sample whose size
    /// follows `N / e^log10(N) * (1 + log10(D))`. Once clustered, a shard is
    /// not re-clustered; a second call is a no-op.
    pub fn cluster(&self, cells: usize) -> Result<()> {
        let mut inner = self.state.write();
        let dims = self.dims;
        let resident = inner.resident.as_mut().ok_or_else(|| IndexError::NotLoaded {
            path: self.path.display().to_string(),
        })?;
        if resident.clustered.is_some() || resident.vectors.is_empty() {
            return Ok(());
        }

        let sample = training_sample(&resident.vectors, dims);
        let centroids = train_kmeans(&sample, cells.max(1), dims);
        let assignments = assign_to_centroids(&resident.vectors, &centroids);

        let mut cell_members: Vec<Vec<usize>> = vec![Vec::new(); centroids.len()];
        for (idx, cell) in assignments.into_iter().enumerate() {
            cell_members[cell].push(idx);
        }

        resident.clustered = Some(
            centroids
                .into_iter()
                .zip(cell_members)
                .map(|(vector, members)| Centroid { vector, members })
                .collect(),
        );
        Ok(())
    }
}

fn resident_size_mib(count: usize, dims: usize) -> f64 {
    (count as f64 * dims as f64 * BYTES_PER_F32) / MIB
}

/// Given N unique vectors of dimension D, picks a training sample sized
/// `min(N, N / e^log10(N) * (1 + log10(D)))`. When the unique set exceeds
/// the sample size, the sample is a uniform permutation prefix.
fn training_sample(vectors: &[Vec<f32>], dims: usize) -> Vec<Vec<f32>> {
    let unique = unique_vectors(vectors);

    let n = unique.len() as f64;
    if n <= 1.0 {
        return unique;
    }
    let d = dims.max(1) as f64;
    let target = (n / (n.log10()).exp()) * (1.0 + d.log10());
    let sample_size = (target.round() as usize).clamp(1, unique.len());

    if sample_size >= unique.len() {
        return unique;
    }

    let mut indices: Vec<usize> = (0..unique.len()).collect();
    let mut rng = rand::thread_rng();
    shuffle(&mut indices, &mut rng);
    indices.truncate(sample_size);
    indices.into_iter().map(|i| unique[i].clone()).collect()
}

/// Deduplicates by exact bit pattern, keeping first-seen order.
fn unique_vectors(vectors: &[Vec<f32>]) -> Vec<Vec<f32>> {
    let mut seen: FastHashSet<Vec<u32>> = FastHashSet::with_capacity(vectors.len());
    let mut out = Vec::with_capacity(vectors.len());
    for vector in vectors {
        let key: Vec<u32> = vector.iter().map(|v| v.to_bits()).collect();
        if seen.insert(key) {
            out.push(vector.clone());
        }
    }
    out
}

fn shuffle<R: rand::RngCore>(slice: &mut [usize], rng: &mut R) {
    for i in (1..slice.len()).rev() {
        let j = (rng.next_u32() as usize) % (i + 1);
        slice.swap(i, j);
    }
}

/// Lloyd's algorithm with a fixed iteration bound, seeded from the first
/// `cells` sample vectors (falling back to repeats if the sample is
/// smaller than `cells`).
fn train_kmeans(sample: &[Vec<f32>], cells: usize, dims: usize) -> Vec<Vec<f32>> {
    const MAX_ITERATIONS: usize = 25;

    let mut centroids: Vec<Vec<f32>> = (0..cells)
        .map(|i| sample.get(i % sample.len().max(1)).cloned().unwrap_or_else(|| vec![0.0; dims]))
        .collect();

    for _ in 0..MAX_ITERATIONS {
        let assignments = assign_to_centroids(sample, &centroids);
        let mut sums = vec![vec![0f32; dims]; centroids.len()];
        let mut counts = vec![0usize; centroids.len()];
        for (vector, cell) in sample.iter().zip(assignments.iter()) {
            for (s, v) in sums[*cell].iter_mut().zip(vector.iter()) {
                *s += v;
            }
            counts[*cell] += 1;
        }
        let mut moved = false;
        for (cell, sum) in sums.into_iter().enumerate() {
            if counts[cell] == 0 {
                continue;
            }
            let mut mean: Vec<f32> = sum.into_iter().map(|v| v / counts[cell] as f32).collect();
            normalize(&mut mean);
            if mean != centroids[cell] {
                moved = true;
            }
            centroids[cell] = mean;
        }
        if !moved {
            break;
        }
    }
    centroids
}

fn assign_to_centroids(vectors: &[Vec<f32>], centroids: &[Vec<f32>]) -> Vec<usize> {
    vectors
        .iter()
        .map(|vector| {
            centroids
                .iter()
                .enumerate()
                .map(|(i, c)| (i, vector.iter().zip(c.iter()).map(|(a, b)| a * b).sum::<f32>()))
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(i, _)| i)
                .unwrap_or(0)
        })
        .collect()
}

fn encode_vectors(ids: &[DocId], vectors: &[Vec<f32>]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(ids.len() as u64).to_le_bytes());
    let dims = vectors.first().map(|v| v.len()).unwrap_or(0);
    out.extend_from_slice(&(dims as u64).to_le_bytes());
    for (id, vector) in ids.iter().zip(vectors.iter()) {
        out.extend_from_slice(&id.to_le_bytes());
        for component in vector {
            out.extend_from_slice(&component.to_le_bytes());
        }
    }
    out
}

fn decode_vectors(bytes: &[u8], expected_dims: usize) -> std::result::Result<(Vec<DocId>, Vec<Vec<f32>>), String> {
    if bytes.len() < 16 {
        return Ok((Vec::new(), Vec::new()));
    }
    let count = u64::from_le_bytes(bytes[0..8].try_into().map_err(|_| "truncated header")?) as usize;
    let dims = u64::from_le_bytes(bytes[8..16].try_into().map_err(|_| "truncated header")?) as usize;
    if dims != 0 && expected_dims != 0 && dims != expected_dims {
        return Err(format!("dimension mismatch: file has {dims}, expected {expected_dims}"));
    }
    let mut cursor = 16usize;
    let record_len = 8 + dims * 4;
    let mut ids = Vec::with_capacity(count);
    let mut vectors = Vec::with_capacity(count);
    for _ in 0..count {
        if cursor + record_len > bytes.len() {
            return Err("truncated vector record".to_string());
        }
        let id = DocId::from_le_bytes(bytes[cursor..cursor + 8].try_into().map_err(|_| "bad id")?);
        cursor += 8;
        let mut vector = Vec::with_capacity(dims);
        for _ in 0..dims {
            let component = f32::from_le_bytes(bytes[cursor..cursor + 4].try_into().map_err(|_| "bad component")?);
            vector.push(component);
            cursor += 4;
        }
        ids.push(id);
        vectors.push(vector);
    }
    Ok((ids, vectors))
}
