use hashbrown::HashSet;
use parking_lot::Mutex;
use rand::RngCore;

/// An opaque 64-bit capability identifying one concurrent user of a loaded
/// shard. While at least one token is outstanding on a shard, the shard
/// stays resident; the shard drops to zero resident memory only once its
/// token set is empty.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ContextToken(u64);

impl ContextToken {
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Issues unique tokens drawn from a strong random source, rejecting
/// collisions against the live set, and tracks which tokens are still
/// outstanding. This is the only mechanism by which a shard learns whether
/// it still has readers or writers.
#[derive(Default)]
pub struct ContextRegistry {
    live: Mutex<HashSet<u64>>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generate(&self) -> ContextToken {
        let mut live = self.live.lock();
        let mut rng = rand::thread_rng();
        loop {
            let candidate = rng.next_u64();
            if live.insert(candidate) {
                return ContextToken(candidate);
            }
        }
    }

    /// Idempotent: releasing an already-released (or never-issued) token is
    /// a no-op.
    pub fn release(&self, token: ContextToken) {
        self.live.lock().remove(&token.0);
    }

    pub fn is_live(&self, token: ContextToken) -> bool {
        self.live.lock().contains(&token.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_unique_and_live_until_released() {
        let registry = ContextRegistry::new();
        let a = registry.generate();
        let b = registry.generate();
        assert_ne!(a, b);
        assert!(registry.is_live(a));
        assert!(registry.is_live(b));
    }

    #[test]
    fn release_is_idempotent() {
        let registry = ContextRegistry::new();
        let token = registry.generate();
        registry.release(token);
        assert!(!registry.is_live(token));
        registry.release(token);
        assert!(!registry.is_live(token));
    }
}
