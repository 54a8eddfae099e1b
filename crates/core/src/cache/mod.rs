pub mod file;
pub mod memory;

use crate::domain::pool::NumberSet;
use crate::domain::recommendation::{BundleKey, Provenance, RecommendationBundle};
use crate::engine::{rng_for, RecommendationEngine};
use crate::ingest::HistorySource;
use crate::scheduler::{RefinementJob, RefinementQueue};
use crate::time::local_day::{local_day, valid_until};
use crate::time::Clock;
use anyhow::Context;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Durable home of daily bundles. `persist` replaces the bundle for its key as a whole.
#[async_trait::async_trait]
pub trait BundleStore: Send + Sync {
    fn name(&self) -> &'static str;

    async fn load(&self, key: &BundleKey) -> anyhow::Result<Option<RecommendationBundle>>;

    async fn persist(&self, bundle: &RecommendationBundle) -> anyhow::Result<()>;
}

/// One bundle per `(local day, identity)`: created on the first request of the day with the fast
/// path, upgraded at most once by background refinement.
pub struct DailyCache {
    store: Arc<dyn BundleStore>,
    history: Arc<dyn HistorySource>,
    engine: RecommendationEngine,
    clock: Arc<dyn Clock>,
    queue: Option<RefinementQueue>,
    // Serializes creation and in-place updates per key. Reads of existing bundles never wait.
    key_locks: KeyLocks,
}

/// One async mutex per live key. Slots are dropped once nobody holds or waits on them.
#[derive(Default)]
struct KeyLocks {
    slots: std::sync::Mutex<HashMap<BundleKey, Arc<Mutex<()>>>>,
}

struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: BundleKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyLocks {
    fn slots(&self) -> std::sync::MutexGuard<'_, HashMap<BundleKey, Arc<Mutex<()>>>> {
        match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn lock(&self, key: &BundleKey) -> KeyGuard<'_> {
        let slot = self.slots().entry(key.clone()).or_default().clone();
        KeyGuard {
            locks: self,
            key: key.clone(),
            guard: Some(slot.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots().len()
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut slots = self.locks.slots();
        if slots
            .get(&self.key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&self.key);
        }
    }
}

impl DailyCache {
    pub fn new(
        store: Arc<dyn BundleStore>,
        history: Arc<dyn HistorySource>,
        engine: RecommendationEngine,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            history,
            engine,
            clock,
            queue: None,
            key_locks: KeyLocks::default(),
        }
    }

    /// Enqueue refinement jobs on this queue after fast-path misses.
    pub fn with_refinement(mut self, queue: RefinementQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    /// Key for `identity` on the current local day.
    pub fn key_for(&self, identity: &str) -> anyhow::Result<BundleKey> {
        let day = local_day(self.clock.now(), self.engine.config().utc_offset_hours)?;
        Ok(BundleKey::new(day, identity))
    }

    /// Today's bundle for `identity`, creating it with `set_count` fast sets on a miss.
    ///
    /// An existing bundle is returned verbatim whatever `set_count` is. History or persistence
    /// failures degrade the result; they never fail the request.
    pub async fn get_or_create(
        &self,
        identity: &str,
        set_count: usize,
    ) -> anyhow::Result<RecommendationBundle> {
        anyhow::ensure!(set_count >= 1, "set count must be >= 1");
        let key = self.key_for(identity)?;

        if let Some(bundle) = self.lookup(&key).await {
            return Ok(bundle);
        }

        let _guard = self.key_locks.lock(&key).await;
        if let Some(bundle) = self.lookup(&key).await {
            return Ok(bundle);
        }

        let bundle = self.create_fast(&key, set_count).await?;
        match self.store.persist(&bundle).await {
            Ok(()) => {
                tracing::info!(key = %key, sets = set_count, store = self.store.name(), "created fast bundle");
                self.schedule_refinement(key, set_count);
            }
            Err(err) => {
                tracing::error!(key = %key, error = %err, "failed to persist fast bundle; serving unsaved");
            }
        }
        Ok(bundle)
    }

    /// Replaces the sets of a fast bundle with refined ones. Returns `false` when the bundle was
    /// already refined and nothing changed.
    pub async fn update_in_place(
        &self,
        key: &BundleKey,
        sets: Vec<NumberSet>,
        confidence_scores: Vec<f64>,
    ) -> anyhow::Result<bool> {
        let _guard = self.key_locks.lock(key).await;
        let current = self
            .store
            .load(key)
            .await?
            .with_context(|| format!("no bundle to refine for {key}"))?;

        if current.provenance == Provenance::Refined {
            tracing::debug!(key = %key, "bundle already refined; skipping update");
            return Ok(false);
        }

        let refined = current.refined(sets, confidence_scores)?;
        self.store
            .persist(&refined)
            .await
            .with_context(|| format!("failed to persist refined bundle {key}"))?;
        Ok(true)
    }

    async fn lookup(&self, key: &BundleKey) -> Option<RecommendationBundle> {
        match self.store.load(key).await {
            Ok(found) => found,
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "bundle load failed; treating as miss");
                None
            }
        }
    }

    async fn create_fast(
        &self,
        key: &BundleKey,
        set_count: usize,
    ) -> anyhow::Result<RecommendationBundle> {
        let config = self.engine.config();
        let history = match self.history.load_history().await {
            Ok(history) => history,
            Err(err) => {
                tracing::warn!(error = %err, "history unavailable; sampling uniformly");
                Vec::new()
            }
        };

        let mut rng = rng_for(config.deterministic_seed, &key.identity, key.day, "fast");
        let sets = self.engine.fast_sets(&mut rng, &history, set_count);
        let confidence_scores = vec![config.fast_confidence; sets.len()];

        Ok(RecommendationBundle {
            generated_for: key.day,
            user_key: key.identity.clone(),
            sets,
            confidence_scores,
            provenance: Provenance::Fast,
            created_at: self.clock.now(),
            valid_until: valid_until(key.day, config.utc_offset_hours)?,
        })
    }

    fn schedule_refinement(&self, key: BundleKey, set_count: usize) {
        if !self.engine.config().enable_refinement {
            return;
        }
        let Some(queue) = &self.queue else {
            return;
        };
        let job = RefinementJob::new(key, set_count);
        if queue.enqueue_if_absent(job.clone()) {
            tracing::debug!(job = %job, "queued refinement");
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Loads succeed with nothing; every write fails.
    #[derive(Debug, Default)]
    pub struct FailingStore;

    #[async_trait::async_trait]
    impl BundleStore for FailingStore {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn load(&self, _key: &BundleKey) -> anyhow::Result<Option<RecommendationBundle>> {
            Ok(None)
        }

        async fn persist(&self, _bundle: &RecommendationBundle) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryBundleStore;
    use super::testing::FailingStore;
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::refiner::UniformDistributions;
    use crate::ingest::StaticHistory;
    use crate::scheduler::refinement_channel;
    use crate::time::FixedClock;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn history() -> StaticHistory {
        StaticHistory(vec![
            vec![1, 7, 12, 23, 34, 45],
            vec![3, 7, 19, 23, 30, 41],
            vec![2, 11, 19, 27, 33, 40],
            vec![7, 9, 15, 23, 36, 44],
        ])
    }

    fn cache_with(store: Arc<dyn BundleStore>, clock: Arc<FixedClock>) -> DailyCache {
        let config = Arc::new(EngineConfig::default());
        let engine = RecommendationEngine::new(config, Arc::new(UniformDistributions));
        DailyCache::new(store, Arc::new(history()), engine, clock)
    }

    fn morning() -> Arc<FixedClock> {
        // 2026-01-03 09:00 KST
        Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 1, 3, 0, 0, 0).unwrap()))
    }

    #[tokio::test]
    async fn repeated_requests_return_the_same_bundle() {
        let cache = cache_with(Arc::new(MemoryBundleStore::new()), morning());
        let first = cache.get_or_create("anon", 5).await.unwrap();
        let second = cache.get_or_create("anon", 3).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.sets.len(), 5);
        assert_eq!(first.provenance, Provenance::Fast);
        assert!(first.confidence_scores.iter().all(|c| (*c - 0.45).abs() < 1e-12));
        assert_eq!(first.generated_for, NaiveDate::from_ymd_opt(2026, 1, 3).unwrap());
        assert_eq!(first.valid_until.to_rfc3339(), "2026-01-04T00:00:00+09:00");
    }

    #[tokio::test]
    async fn fresh_caches_agree_on_fast_sets() {
        let a = cache_with(Arc::new(MemoryBundleStore::new()), morning());
        let b = cache_with(Arc::new(MemoryBundleStore::new()), morning());
        let x = a.get_or_create("anon", 5).await.unwrap();
        let y = b.get_or_create("anon", 5).await.unwrap();
        assert_eq!(x.sets, y.sets);

        let other = a.get_or_create("someone-else", 5).await.unwrap();
        assert_ne!(x.sets, other.sets);
    }

    #[tokio::test]
    async fn concurrent_first_requests_create_one_bundle() {
        let store = Arc::new(MemoryBundleStore::new());
        let cache = Arc::new(cache_with(store.clone(), morning()));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.get_or_create("anon", 5).await }));
        }
        let mut bundles = Vec::new();
        for h in handles {
            bundles.push(h.await.unwrap().unwrap());
        }
        assert!(bundles.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(store.len().await, 1);
    }

    /// First load parks until released; later loads return at once.
    #[derive(Default)]
    struct GatedHistory {
        calls: std::sync::atomic::AtomicUsize,
        gate: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl HistorySource for GatedHistory {
        async fn load_history(&self) -> anyhow::Result<Vec<NumberSet>> {
            let n = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if n == 0 {
                self.gate.notified().await;
            }
            Ok(history().0)
        }
    }

    #[tokio::test]
    async fn slow_creation_does_not_block_other_identities() {
        let history = Arc::new(GatedHistory::default());
        let engine = RecommendationEngine::new(
            Arc::new(EngineConfig::default()),
            Arc::new(UniformDistributions),
        );
        let cache = Arc::new(DailyCache::new(
            Arc::new(MemoryBundleStore::new()),
            history.clone(),
            engine,
            morning(),
        ));

        let slow = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_or_create("slow", 5).await })
        };
        while history.calls.load(std::sync::atomic::Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let other = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            cache.get_or_create("other", 5),
        )
        .await
        .expect("unrelated identity waited on a slow creation")
        .unwrap();
        assert_eq!(other.user_key, "other");

        history.gate.notify_one();
        assert_eq!(slow.await.unwrap().unwrap().user_key, "slow");
        assert_eq!(cache.key_locks.len(), 0);
    }

    #[tokio::test]
    async fn new_local_day_starts_a_new_bundle() {
        let clock = morning();
        let cache = cache_with(Arc::new(MemoryBundleStore::new()), clock.clone());
        let today = cache.get_or_create("anon", 5).await.unwrap();

        // 2026-01-03 15:00 UTC = 2026-01-04 00:00 KST
        clock.set(Utc.with_ymd_and_hms(2026, 1, 3, 15, 0, 0).unwrap());
        let tomorrow = cache.get_or_create("anon", 5).await.unwrap();
        assert_eq!(tomorrow.generated_for, NaiveDate::from_ymd_opt(2026, 1, 4).unwrap());
        assert_ne!(today.sets, tomorrow.sets);
    }

    #[tokio::test]
    async fn persist_failure_still_serves_fast_sets() {
        let (queue, _worker) = refinement_channel();
        let cache = cache_with(Arc::new(FailingStore), morning()).with_refinement(queue.clone());
        let bundle = cache.get_or_create("anon", 4).await.unwrap();
        assert_eq!(bundle.sets.len(), 4);
        assert_eq!(queue.pending_len(), 0);
    }

    #[tokio::test]
    async fn miss_enqueues_refinement_once() {
        let (queue, _worker) = refinement_channel();
        let cache = cache_with(Arc::new(MemoryBundleStore::new()), morning())
            .with_refinement(queue.clone());

        let bundle = cache.get_or_create("anon", 5).await.unwrap();
        cache.get_or_create("anon", 5).await.unwrap();

        assert!(queue.is_pending(&RefinementJob::new(bundle.key(), 5)));
        assert_eq!(queue.pending_len(), 1);
    }

    #[tokio::test]
    async fn update_in_place_applies_once() {
        let cache = cache_with(Arc::new(MemoryBundleStore::new()), morning());
        let fast = cache.get_or_create("anon", 2).await.unwrap();
        let key = fast.key();

        let sets = vec![vec![2, 9, 16, 23, 30, 37], vec![4, 11, 18, 25, 32, 39]];
        assert!(cache
            .update_in_place(&key, sets.clone(), vec![0.61, 0.55])
            .await
            .unwrap());
        assert!(!cache
            .update_in_place(&key, vec![vec![1, 2, 3, 4, 5, 6]], vec![0.5])
            .await
            .unwrap());

        let after = cache.get_or_create("anon", 2).await.unwrap();
        assert_eq!(after.provenance, Provenance::Refined);
        assert_eq!(after.sets, sets);
        assert_eq!(after.created_at, fast.created_at);
        assert_eq!(after.valid_until, fast.valid_until);
    }

    #[tokio::test]
    async fn update_without_bundle_is_an_error() {
        let cache = cache_with(Arc::new(MemoryBundleStore::new()), morning());
        let key = BundleKey::new(NaiveDate::from_ymd_opt(2026, 1, 3).unwrap(), "ghost");
        assert!(cache
            .update_in_place(&key, vec![vec![1, 2, 3, 4, 5, 6]], vec![0.5])
            .await
            .is_err());
    }
}
