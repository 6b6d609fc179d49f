use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use indexcore_common::Mutation;

/// A mutation sink shared between one provider instance and the writer that
/// eventually drains it. Pushes never block; `drain` atomically takes every
/// queued mutation, leaving the queue empty for the next fetch cycle.
#[derive(Default)]
pub struct MutationQueue {
    pending: Mutex<Vec<Mutation>>,
}

impl MutationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, mutation: Mutation) {
        self.pending.lock().push(mutation);
    }

    pub fn push_all(&self, mutations: impl IntoIterator<Item = Mutation>) {
        self.pending.lock().extend(mutations);
    }

    pub fn drain(&self) -> Vec<Mutation> {
        std::mem::take(&mut *self.pending.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

/// Tracks the idempotency state every `Provider` needs: `setup()` must run
/// at most once, and `kill()` must be safe to call more than once.
#[derive(Default)]
pub struct ProviderState {
    setup_done: AtomicBool,
    killed: AtomicBool,
}

impl ProviderState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `setup` the first time this is called and remembers the result;
    /// later calls return the remembered result without re-running `setup`.
    pub fn ensure_setup(&self, setup: impl FnOnce() -> bool) -> bool {
        if self.setup_done.swap(true, Ordering::SeqCst) {
            return true;
        }
        setup()
    }

    pub fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

/// A single source of documents. `run()` must idempotently `setup()`, fetch
/// everything newer than the last recorded cursor, chunk and enqueue it as
/// `Insert` mutations, then advance the cursor on success.
///
/// Concrete sources (the bundled IMAP reference implementation among them)
/// hold their own `MetadataStore`/`TextPipeline`/`MutationQueue` handles and
/// instance id; the trait itself stays free of those concerns so the
/// scheduler can treat every provider uniformly.
pub trait Provider: Send + Sync {
    fn setup(&self) -> bool;

    fn run(&self) -> bool;

    /// Must be safe to call more than once and must not block on the
    /// in-flight `run()`, if any; the provider observes a kill flag at its
    /// own safe points.
    fn kill(&self);
}
