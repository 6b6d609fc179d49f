use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Condvar, Mutex};

use indexcore_common::{InstanceEvent, InstanceObserver};

use crate::instance_registry::InstanceRegistry;

struct Inner {
    /// `(last_fetched_millis, instance_id)`, ordered ascending so the
    /// earliest-ready instance is always `iter().next()`. Keying on the pair
    /// rather than just the timestamp keeps the set a true multiset when two
    /// instances share a `last_fetched`.
    queue: BTreeSet<(i64, u64)>,
    in_flight: usize,
}

/// Dispatches `Provider::run()` at most once per `fetching_time` per
/// instance, across a bounded number of concurrently in-flight fetches.
/// Driven by a single control thread parked on a condition variable; woken
/// by instance add/remove and by task completion so deletions and new
/// instances can preempt a long sleep.
pub struct FetchScheduler {
    registry: Arc<InstanceRegistry>,
    inner: Mutex<Inner>,
    condvar: Condvar,
    fetching_time: Duration,
    pool_size: usize,
    stopped: AtomicBool,
}

impl FetchScheduler {
    pub fn new(registry: Arc<InstanceRegistry>, fetching_time: Duration, pool_size: usize) -> Arc<Self> {
        let scheduler = Arc::new(Self {
            registry,
            inner: Mutex::new(Inner { queue: BTreeSet::new(), in_flight: 0 }),
            condvar: Condvar::new(),
            fetching_time,
            pool_size: pool_size.max(1),
            stopped: AtomicBool::new(false),
        });
        for id in scheduler.registry.ids() {
            scheduler.insert_instance(id);
        }
        scheduler
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.condvar.notify_all();
    }

    fn last_fetched_millis(&self, instance: u64) -> i64 {
        let row = self.registry.metadata_store_lookup(instance);
        row.and_then(|r| r.last_fetched).map(|t| t.timestamp_millis()).unwrap_or(i64::MIN)
    }

    fn insert_instance(&self, instance: u64) {
        let last_fetched = self.last_fetched_millis(instance);
        let mut inner = self.inner.lock();
        inner.queue.insert((last_fetched, instance));
        drop(inner);
        self.condvar.notify_all();
    }

    fn remove_instance(&self, instance: u64) {
        let mut inner = self.inner.lock();
        inner.queue.retain(|(_, id)| *id != instance);
        drop(inner);
        self.condvar.notify_all();
    }

    /// Spawns the scheduler's control thread. Runs until `stop()` is called.
    pub fn spawn(self: &Arc<Self>) -> std::thread::JoinHandle<()> {
        let scheduler = self.clone();
        std::thread::Builder::new()
            .name("fetch-scheduler".to_string())
            .spawn(move || scheduler.run_forever())
            .expect("spawn fetch scheduler thread")
    }

    fn run_forever(self: Arc<Self>) {
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                return;
            }

            let instance = {
                let mut inner = self.inner.lock();
                loop {
                    if self.stopped.load(Ordering::SeqCst) {
                        return;
                    }
                    if inner.queue.is_empty() || inner.in_flight >= self.pool_size {
                        self.condvar.wait(&mut inner);
                        continue;
                    }

                    let &(last_fetched, instance) = inner.queue.iter().next().unwrap();
                    let now = Utc::now().timestamp_millis();
                    let wait = self.fetching_time.as_millis() as i64 - (now - last_fetched);
                    if wait > 0 {
                        self.condvar.wait_for(&mut inner, Duration::from_millis(wait as u64));
                        continue;
                    }

                    inner.queue.remove(&(last_fetched, instance));
                    inner.in_flight += 1;
                    break instance;
                }
            };

            let scheduler = self.clone();
            std::thread::spawn(move || {
                if let Some(provider) = scheduler.registry.get(instance) {
                    if !provider.run() {
                        log::warn!("fetch run failed for instance {instance}");
                    }
                }

                let mut inner = scheduler.inner.lock();
                inner.in_flight = inner.in_flight.saturating_sub(1);
                if scheduler.registry.contains(instance) {
                    let last_fetched = scheduler.last_fetched_millis(instance);
                    inner.queue.insert((last_fetched, instance));
                }
                drop(inner);
                scheduler.condvar.notify_all();
            });
        }
    }
}

impl InstanceObserver for FetchScheduler {
    fn on_instance_event(&self, event: InstanceEvent) {
        match event {
            InstanceEvent::Add(instance) => self.insert_instance(instance),
            InstanceEvent::Remove(instance) => self.remove_instance(instance),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexcore_storage::{InMemoryMetadataStore, ProviderInstanceRow};
    use std::sync::atomic::AtomicUsize;

    struct CountingProvider {
        runs: AtomicUsize,
    }

    impl crate::provider::Provider for CountingProvider {
        fn setup(&self) -> bool {
            true
        }
        fn run(&self) -> bool {
            self.runs.fetch_add(1, Ordering::SeqCst);
            true
        }
        fn kill(&self) {}
    }

    #[test]
    fn an_instance_is_fetched_and_then_rejoins_the_queue() {
        let store = InMemoryMetadataStore::new();
        store.insert_instance(ProviderInstanceRow {
            id: 1,
            provider_kind: "stub".to_string(),
            name: "a".to_string(),
            connection_config: serde_json::json!({}),
            last_fetched: None,
        });
        let registry = Arc::new(InstanceRegistry::new(store));
        let provider = Arc::new(CountingProvider { runs: AtomicUsize::new(0) });
        registry.add(1, provider.clone());

        let scheduler = FetchScheduler::new(registry.clone(), Duration::from_secs(3600), 2);
        registry.attach(scheduler.clone());
        let handle = scheduler.spawn();

        std::thread::sleep(Duration::from_millis(300));
        scheduler.stop();
        handle.join().unwrap();

        assert!(provider.runs.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn scenario_s5_adding_an_instance_preempts_a_long_sleep() {
        let store = InMemoryMetadataStore::new();
        // Instance 1 was just fetched, so under a 1h cadence it has nothing
        // to do for a long time; the control thread should be parked on that
        // full wait when instance 2 shows up.
        store.insert_instance(ProviderInstanceRow {
            id: 1,
            provider_kind: "stub".to_string(),
            name: "a".to_string(),
            connection_config: serde_json::json!({}),
            last_fetched: Some(Utc::now()),
        });
        let registry = Arc::new(InstanceRegistry::new(store));
        let provider1 = Arc::new(CountingProvider { runs: AtomicUsize::new(0) });
        registry.add(1, provider1.clone());

        let scheduler = FetchScheduler::new(registry.clone(), Duration::from_secs(3600), 2);
        registry.attach(scheduler.clone());
        let handle = scheduler.spawn();

        std::thread::sleep(Duration::from_millis(100));

        // Instance 2 has never been fetched, so it's immediately eligible.
        // Its `Add` notification must wake the scheduler out of instance 1's
        // hour-long wait rather than sit behind it.
        let provider2 = Arc::new(CountingProvider { runs: AtomicUsize::new(0) });
        registry.add(2, provider2.clone());

        std::thread::sleep(Duration::from_millis(300));
        scheduler.stop();
        handle.join().unwrap();

        assert!(provider2.runs.load(Ordering::SeqCst) >= 1);
        assert_eq!(provider1.runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn a_removed_instance_never_reenters_the_queue() {
        let store = InMemoryMetadataStore::new();
        store.insert_instance(ProviderInstanceRow {
            id: 1,
            provider_kind: "stub".to_string(),
            name: "a".to_string(),
            connection_config: serde_json::json!({}),
            last_fetched: None,
        });
        let registry = Arc::new(InstanceRegistry::new(store));
        registry.add(1, Arc::new(CountingProvider { runs: AtomicUsize::new(0) }));

        let scheduler = FetchScheduler::new(registry.clone(), Duration::from_millis(10), 2);
        registry.remove(1);
        scheduler.remove_instance(1);

        assert!(scheduler.inner.lock().queue.is_empty());
    }
}
