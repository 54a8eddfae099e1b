pub mod diversity;
pub mod frequency;
pub mod merger;
pub mod refiner;
pub mod sampler;

use crate::config::EngineConfig;
use crate::domain::pool::{NumberPool, NumberSet};
use crate::time::local_day::day_key;
use chrono::NaiveDate;
use diversity::DiversityEnforcer;
use frequency::FrequencyWeights;
use merger::{EnsembleMerger, MergedSets};
use rand::rngs::StdRng;
use rand::SeedableRng;
use refiner::{PositionDistributionProvider, ProbabilisticRefiner};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Stable across processes: derived from the identity, the day and a purpose tag.
pub fn seed_for(identity: &str, day: NaiveDate, purpose: &str) -> u64 {
    let mut hasher = rustc_hash::FxHasher::default();
    identity.hash(&mut hasher);
    day_key(day).hash(&mut hasher);
    purpose.hash(&mut hasher);
    hasher.finish()
}

pub fn rng_for(deterministic: bool, identity: &str, day: NaiveDate, purpose: &str) -> StdRng {
    if deterministic {
        StdRng::seed_from_u64(seed_for(identity, day, purpose))
    } else {
        StdRng::from_entropy()
    }
}

/// Fast and refined set generation over one configuration and one distribution provider.
#[derive(Clone)]
pub struct RecommendationEngine {
    config: Arc<EngineConfig>,
    pool: NumberPool,
    enforcer: DiversityEnforcer,
    distributions: Arc<dyn PositionDistributionProvider>,
}

impl RecommendationEngine {
    pub fn new(
        config: Arc<EngineConfig>,
        distributions: Arc<dyn PositionDistributionProvider>,
    ) -> Self {
        Self {
            pool: NumberPool::from_config(&config),
            enforcer: DiversityEnforcer::from_config(&config),
            config,
            distributions,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pool(&self) -> &NumberPool {
        &self.pool
    }

    pub fn weights(&self, history: &[NumberSet]) -> FrequencyWeights {
        FrequencyWeights::compute(history, &self.pool, self.config.freq_decay_half_life)
    }

    /// Statistics-only sets: weighted sampling followed by the diversity repairs.
    pub fn fast_sets(
        &self,
        rng: &mut StdRng,
        history: &[NumberSet],
        count: usize,
    ) -> Vec<NumberSet> {
        let weights = self.weights(history);
        sampler::sample_sets(rng, &weights, &self.pool, count)
            .into_iter()
            .map(|set| self.enforcer.apply(rng, &set))
            .collect()
    }

    /// Statistical sets merged with position-refined sets, plus a confidence per set.
    pub fn refined_sets(
        &self,
        rng: &mut StdRng,
        history: &[NumberSet],
        count: usize,
    ) -> MergedSets {
        let weights = self.weights(history);
        let stat_sets = sampler::sample_sets(rng, &weights, &self.pool, count);

        let distributions = refiner::resolve_distributions(self.distributions.as_ref(), &self.pool);
        if distributions.is_none() {
            tracing::debug!(
                provider = self.distributions.name(),
                "no position distributions; refining from frequency weights"
            );
        }
        let refiner = ProbabilisticRefiner::new(self.config.refine_top_k, &self.enforcer);
        let refined = refiner.refine_sets(rng, distributions.as_deref(), &weights, count);

        EnsembleMerger::new(&self.config, &self.enforcer).merge(
            rng,
            &stat_sets,
            &refined,
            &weights,
            distributions.as_deref(),
        )
    }
}
