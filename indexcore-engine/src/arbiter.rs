use parking_lot::Mutex;

use indexcore_common::error::IndexError;
use indexcore_common::Result;

struct Budget {
    max: f64,
    available: f64,
}

impl Budget {
    fn new(max: f64) -> Self {
        Self { max, available: max }
    }
}

struct Inner {
    general: Budget,
    indexing: Budget,
    clustering: Budget,
}

/// Tracks the three memory budgets (general, indexing, clustering) and
/// grants/releases reservations against them. Every mutation is serialized
/// by a single lock held for O(1) work only; `reserve_*` never blocks,
/// returning `InsufficientMemory` instead so the caller can decide to wait
/// or abandon the operation.
pub struct MemoryArbiter {
    inner: Mutex<Inner>,
    max_index_size: f64,
    clustering_threshold: f64,
}

impl MemoryArbiter {
    pub fn new(
        max_memory: f64,
        max_indexing_memory: f64,
        max_clustering_memory: f64,
        max_index_size: f64,
        clustering_threshold: f64,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                general: Budget::new(max_memory),
                indexing: Budget::new(max_indexing_memory),
                clustering: Budget::new(max_clustering_memory),
            }),
            max_index_size,
            clustering_threshold,
        }
    }

    pub fn reserve_general(&self, amount: f64) -> Result<()> {
        let mut inner = self.inner.lock();
        if amount > inner.general.available {
            return Err(Self::insufficient("general", amount, inner.general.available));
        }
        inner.general.available -= amount;
        Ok(())
    }

    pub fn release_general(&self, amount: f64) {
        let mut inner = self.inner.lock();
        inner.general.available = (inner.general.available + amount).min(inner.general.max);
    }

    pub fn reserve_indexing(&self, amount: f64) -> Result<()> {
        let mut inner = self.inner.lock();
        if amount > inner.indexing.available || amount > inner.general.available {
            let available = inner.indexing.available.min(inner.general.available);
            return Err(Self::insufficient("indexing", amount, available));
        }
        inner.indexing.available -= amount;
        inner.general.available -= amount;
        Ok(())
    }

    pub fn release_indexing(&self, amount: f64) {
        let mut inner = self.inner.lock();
        inner.indexing.available = (inner.indexing.available + amount).min(inner.indexing.max);
        inner.general.available = (inner.general.available + amount).min(inner.general.max);
    }

    pub fn reserve_clustering(&self, amount: f64) -> Result<()> {
        let mut inner = self.inner.lock();
        if amount > inner.clustering.available || amount > inner.general.available {
            let available = inner.clustering.available.min(inner.general.available);
            return Err(Self::insufficient("clustering", amount, available));
        }
        inner.clustering.available -= amount;
        inner.general.available -= amount;
        Ok(())
    }

    pub fn release_clustering(&self, amount: f64) {
        let mut inner = self.inner.lock();
        inner.clustering.available = (inner.clustering.available + amount).min(inner.clustering.max);
        inner.general.available = (inner.general.available + amount).min(inner.general.max);
    }

    /// `round(size * threshold) >= max_index_size`.
    pub fn is_index_full(&self, size: f64) -> bool {
        (size * self.clustering_threshold).round() >= self.max_index_size
    }

    pub fn max_index_size(&self) -> f64 {
        self.max_index_size
    }

    fn insufficient(budget: &'static str, requested: f64, available: f64) -> IndexError {
        IndexError::InsufficientMemory { budget, requested, available }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arbiter() -> MemoryArbiter {
        MemoryArbiter::new(100.0, 20.0, 20.0, 10.0, 0.95)
    }

    #[test]
    fn reserve_decrements_both_specialized_and_general() {
        let a = arbiter();
        a.reserve_indexing(5.0).unwrap();
        assert!(a.reserve_general(94.0).is_ok());
        assert!(a.reserve_general(1.0).is_err());
    }

    #[test]
    fn release_never_exceeds_max() {
        let a = arbiter();
        a.release_indexing(1000.0);
        a.reserve_indexing(20.0).unwrap();
        assert!(a.reserve_indexing(0.001).is_err());
    }

    #[test]
    fn insufficient_memory_does_not_mutate_state() {
        let a = arbiter();
        assert!(a.reserve_indexing(21.0).is_err());
        // Indexing budget is untouched; a later reservation within range succeeds.
        assert!(a.reserve_indexing(20.0).is_ok());
    }

    #[test]
    fn fullness_uses_rounded_threshold() {
        let a = MemoryArbiter::new(100.0, 20.0, 20.0, 10.0, 0.95);
        assert!(!a.is_index_full(9.0));
        assert!(a.is_index_full(10.6));
    }

    #[test]
    fn interleaved_reserve_release_stays_non_negative() {
        let a = arbiter();
        for _ in 0..1000 {
            let _ = a.reserve_indexing(3.0);
            a.release_indexing(3.0);
        }
        assert!(a.reserve_indexing(20.0).is_ok());
    }
}
