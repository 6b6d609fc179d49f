/// Turns text into fixed-dimensional, L2-normalized vectors.
///
/// Treated as an opaque collaborator: the real implementation is a
/// sentence-embedding service the host application owns. The reference
/// implementation below is a deterministic hashing scheme used only by
/// tests and local/demo runs, so that indexing core tests don't depend on
/// a real model.
pub trait Embedder: Send + Sync + 'static {
    fn dims(&self) -> usize;

    /// Encodes a batch of texts into unit vectors of length `self.dims()`.
    fn encode(&self, texts: &[&str]) -> Vec<Vec<f32>>;
}

/// A deterministic, hash-based reference `Embedder`. Each token contributes
/// to a handful of dimensions selected by its hash, giving similar texts
/// (sharing tokens) similar vectors without needing a real model.
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    fn hash_token(token: &str, dims: usize) -> (usize, f32) {
        let mut hash: u64 = 1469598103934665603; // FNV offset basis
        for byte in token.bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(1099511628211); // FNV prime
        }
        let bucket = (hash as usize) % dims;
        let sign = if hash & 1 == 0 { 1.0 } else { -1.0 };
        (bucket, sign)
    }
}

impl Embedder for HashingEmbedder {
    fn dims(&self) -> usize {
        self.dims
    }

    fn encode(&self, texts: &[&str]) -> Vec<Vec<f32>> {
        texts
            .iter()
            .map(|text| {
                let mut vector = vec![0f32; self.dims];
                for token in text.split_whitespace() {
                    let (bucket, sign) = Self::hash_token(token, self.dims);
                    vector[bucket] += sign;
                }
                normalize(&mut vector);
                vector
            })
            .collect()
    }
}

pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_vectors_are_unit_length() {
        let embedder = HashingEmbedder::new(16);
        let vectors = embedder.encode(&["hello world", "a different sentence entirely"]);
        for v in vectors {
            let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-4 || norm == 0.0);
        }
    }

    #[test]
    fn identical_text_yields_identical_vector() {
        let embedder = HashingEmbedder::new(8);
        let a = embedder.encode(&["repeat this text"]);
        let b = embedder.encode(&["repeat this text"]);
        assert_eq!(a, b);
    }
}
