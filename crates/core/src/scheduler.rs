use crate::cache::DailyCache;
use crate::domain::recommendation::BundleKey;
use crate::engine::merger::MergedSets;
use crate::engine::{rng_for, RecommendationEngine};
use crate::ingest::HistorySource;
use crate::notify::Notifier;
use crate::time::local_day::day_key;
use anyhow::Context;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Background upgrade of one bundle. Jobs are deduplicated by `(day, identity, set_count)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RefinementJob {
    pub key: BundleKey,
    pub set_count: usize,
}

impl RefinementJob {
    pub fn new(key: BundleKey, set_count: usize) -> Self {
        Self { key, set_count }
    }
}

impl fmt::Display for RefinementJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            day_key(self.key.day),
            self.key.identity,
            self.set_count
        )
    }
}

type Pending = Arc<Mutex<HashSet<RefinementJob>>>;

fn lock(pending: &Pending) -> MutexGuard<'_, HashSet<RefinementJob>> {
    match pending.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Producer half: cheap to clone, shared with the cache.
#[derive(Debug, Clone)]
pub struct RefinementQueue {
    pending: Pending,
    tx: mpsc::UnboundedSender<RefinementJob>,
}

/// Consumer half: owns the receiver and runs jobs.
pub struct RefinementWorker {
    pending: Pending,
    rx: mpsc::UnboundedReceiver<RefinementJob>,
}

pub fn refinement_channel() -> (RefinementQueue, RefinementWorker) {
    let pending: Pending = Arc::default();
    let (tx, rx) = mpsc::unbounded_channel();
    (
        RefinementQueue {
            pending: pending.clone(),
            tx,
        },
        RefinementWorker { pending, rx },
    )
}

impl RefinementQueue {
    /// Queues `job` unless an equal job is pending or running. Returns whether it was queued.
    pub fn enqueue_if_absent(&self, job: RefinementJob) -> bool {
        let mut pending = lock(&self.pending);
        if !pending.insert(job.clone()) {
            return false;
        }
        if let Err(err) = self.tx.send(job) {
            pending.remove(&err.0);
            tracing::warn!(job = %err.0, "refinement worker is gone; dropping job");
            return false;
        }
        true
    }

    pub fn is_pending(&self, job: &RefinementJob) -> bool {
        lock(&self.pending).contains(job)
    }

    pub fn pending_len(&self) -> usize {
        lock(&self.pending).len()
    }
}

/// Produces refined sets for a job. Must not touch the cache itself.
#[async_trait::async_trait]
pub trait RefinementRunner: Send + Sync {
    async fn refine(&self, job: &RefinementJob) -> anyhow::Result<MergedSets>;
}

/// Runs the full ensemble over the current history on the blocking pool.
pub struct EnsembleRunner {
    history: Arc<dyn HistorySource>,
    engine: RecommendationEngine,
}

impl EnsembleRunner {
    pub fn new(history: Arc<dyn HistorySource>, engine: RecommendationEngine) -> Self {
        Self { history, engine }
    }
}

#[async_trait::async_trait]
impl RefinementRunner for EnsembleRunner {
    async fn refine(&self, job: &RefinementJob) -> anyhow::Result<MergedSets> {
        let history = self
            .history
            .load_history()
            .await
            .context("failed to load history for refinement")?;
        let engine = self.engine.clone();
        let job = job.clone();

        tokio::task::spawn_blocking(move || {
            let mut rng = rng_for(
                engine.config().deterministic_seed,
                &job.key.identity,
                job.key.day,
                "refine",
            );
            engine.refined_sets(&mut rng, &history, job.set_count)
        })
        .await
        .context("refinement task panicked")
    }
}

impl RefinementWorker {
    /// Consumes jobs one at a time until every queue handle is dropped.
    pub async fn run(
        mut self,
        cache: Arc<DailyCache>,
        runner: Arc<dyn RefinementRunner>,
        notifier: Arc<dyn Notifier>,
    ) {
        tracing::info!("refinement worker started");
        while let Some(job) = self.rx.recv().await {
            execute(&cache, runner.as_ref(), notifier.as_ref(), &job).await;
            lock(&self.pending).remove(&job);
        }
        tracing::info!("refinement worker stopped");
    }

    pub fn spawn(
        self,
        cache: Arc<DailyCache>,
        runner: Arc<dyn RefinementRunner>,
        notifier: Arc<dyn Notifier>,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(cache, runner, notifier))
    }
}

async fn execute(
    cache: &DailyCache,
    runner: &dyn RefinementRunner,
    notifier: &dyn Notifier,
    job: &RefinementJob,
) {
    let started = std::time::Instant::now();
    let result = match runner.refine(job).await {
        Ok(merged) => {
            cache
                .update_in_place(&job.key, merged.sets, merged.confidence_scores)
                .await
        }
        Err(err) => Err(err),
    };

    match result {
        Ok(true) => {
            tracing::info!(job = %job, elapsed_ms = started.elapsed().as_millis() as u64, "bundle refined")
        }
        Ok(false) => tracing::debug!(job = %job, "bundle was already refined"),
        Err(err) => {
            tracing::error!(job = %job, error = %err, "refinement failed; keeping fast bundle");
            notifier.send(&format!("Refinement failed for {job}: {err:#}"));
        }
    }
}
