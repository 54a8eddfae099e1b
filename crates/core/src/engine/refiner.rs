use crate::domain::pool::{NumberPool, NumberSet};
use crate::engine::diversity::DiversityEnforcer;
use crate::engine::frequency::FrequencyWeights;
use crate::engine::sampler;
use anyhow::Context;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;

const DUPLICATE_RETRIES: usize = 10;
const PAD_ATTEMPTS: usize = 20;

/// Per-position probability distributions over the pool.
pub trait PositionDistributionProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Probability vector for `position` (one entry per pool number), or `None` when no trained
    /// distribution exists for it.
    fn distribution(&self, position: usize) -> Option<Vec<f64>>;
}

/// No trained state: every position is uniform, and refinement falls back to weighted sampling.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformDistributions;

impl PositionDistributionProvider for UniformDistributions {
    fn name(&self) -> &'static str {
        "uniform"
    }

    fn distribution(&self, _position: usize) -> Option<Vec<f64>> {
        None
    }
}

/// Distributions fitted offline, one optional vector per position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedDistributions {
    pub pool_max: u8,
    pub positions: Vec<Option<Vec<f64>>>,
}

impl TrainedDistributions {
    /// Fits position `i` to how often each number appeared as the `i`-th smallest of a draw,
    /// Dirichlet-smoothed by `alpha` and optionally decayed like the frequency model.
    pub fn fit(
        history: &[NumberSet],
        pool: &NumberPool,
        alpha: f64,
        half_life: Option<u32>,
    ) -> Self {
        let mut counts = vec![vec![0.0_f64; pool.size()]; pool.pick_size];
        let n = history.len();
        let lambda = half_life
            .filter(|h| *h > 0)
            .map(|h| std::f64::consts::LN_2 / f64::from(h));

        for (d, draw) in history.iter().enumerate() {
            let w = lambda.map_or(1.0, |l| (-l * (n - 1 - d) as f64).exp());
            let mut sorted = draw.clone();
            sorted.sort_unstable();
            for (pos, &num) in sorted.iter().enumerate().take(pool.pick_size) {
                if pool.contains(num) {
                    counts[pos][pool.index(num)] += w;
                }
            }
        }

        let positions = counts
            .into_iter()
            .map(|c| {
                let total: f64 = c.iter().sum::<f64>() + alpha.max(0.0) * pool.size() as f64;
                if total <= 0.0 {
                    return None;
                }
                Some(c.iter().map(|v| (v + alpha.max(0.0)) / total).collect())
            })
            .collect();

        Self {
            pool_max: pool.max,
            positions,
        }
    }

    pub fn load_json(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read position model {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse position model {}", path.display()))
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let text = serde_json::to_string(self).context("position model serialize failed")?;
        std::fs::write(path, text)
            .with_context(|| format!("failed to write position model {}", path.display()))
    }
}

impl PositionDistributionProvider for TrainedDistributions {
    fn name(&self) -> &'static str {
        "trained"
    }

    fn distribution(&self, position: usize) -> Option<Vec<f64>> {
        self.positions.get(position).cloned().flatten()
    }
}

/// Normalized per-position vectors for `pool`, or `None` when the provider has nothing trained.
/// Untrained or malformed positions become uniform.
pub fn resolve_distributions(
    provider: &dyn PositionDistributionProvider,
    pool: &NumberPool,
) -> Option<Vec<Vec<f64>>> {
    let uniform = vec![1.0 / pool.size() as f64; pool.size()];
    let mut trained = 0usize;
    let mut out = Vec::with_capacity(pool.pick_size);

    for pos in 0..pool.pick_size {
        let vec = provider.distribution(pos).and_then(|v| normalize(v, pool.size()));
        match vec {
            Some(v) => {
                trained += 1;
                out.push(v);
            }
            None => out.push(uniform.clone()),
        }
    }

    if trained == 0 {
        return None;
    }
    Some(out)
}

fn normalize(v: Vec<f64>, len: usize) -> Option<Vec<f64>> {
    if v.len() != len || v.iter().any(|p| !p.is_finite() || *p < 0.0) {
        return None;
    }
    let sum: f64 = v.iter().sum();
    if sum <= 0.0 {
        return None;
    }
    Some(v.into_iter().map(|p| p / sum).collect())
}

/// Builds sets position by position from the top candidates of each distribution.
#[derive(Debug, Clone)]
pub struct ProbabilisticRefiner<'a> {
    pool: NumberPool,
    top_k: usize,
    enforcer: &'a DiversityEnforcer,
}

impl<'a> ProbabilisticRefiner<'a> {
    pub fn new(top_k: usize, enforcer: &'a DiversityEnforcer) -> Self {
        Self {
            pool: *enforcer.pool(),
            top_k: top_k.max(1),
            enforcer,
        }
    }

    /// `count` refined sets. Without distributions this is plain weighted sampling.
    pub fn refine_sets<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        distributions: Option<&[Vec<f64>]>,
        weights: &FrequencyWeights,
        count: usize,
    ) -> Vec<NumberSet> {
        let Some(distributions) = distributions else {
            return sampler::sample_sets(rng, weights, &self.pool, count);
        };

        let candidates: Vec<(Vec<u8>, Option<WeightedIndex<f64>>)> = distributions
            .iter()
            .map(|vec| self.top_candidates(vec))
            .collect();

        (0..count)
            .map(|_| self.refine_one(rng, &candidates))
            .collect()
    }

    fn top_candidates(&self, vec: &[f64]) -> (Vec<u8>, Option<WeightedIndex<f64>>) {
        let mut ranked: Vec<usize> = (0..vec.len()).collect();
        ranked.sort_by(|&a, &b| {
            vec[b]
                .partial_cmp(&vec[a])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.cmp(&b))
        });
        ranked.truncate(self.top_k);

        let numbers: Vec<u8> = ranked.iter().map(|&i| i as u8 + 1).collect();
        let dist = WeightedIndex::new(ranked.iter().map(|&i| vec[i])).ok();
        (numbers, dist)
    }

    fn refine_one<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        candidates: &[(Vec<u8>, Option<WeightedIndex<f64>>)],
    ) -> NumberSet {
        let mut chosen: NumberSet = Vec::with_capacity(self.pool.pick_size);

        for (numbers, dist) in candidates.iter().take(self.pool.pick_size) {
            let draw = |rng: &mut R| match dist {
                Some(d) => numbers[d.sample(rng)],
                None => rng.gen_range(1..=self.pool.max),
            };

            let mut pick = draw(rng);
            let mut tries = 0;
            while chosen.contains(&pick) && tries < DUPLICATE_RETRIES {
                pick = draw(rng);
                tries += 1;
            }
            if chosen.contains(&pick) {
                pick = rng.gen_range(1..=self.pool.max);
            }
            chosen.push(pick);
        }

        let mut seen = Vec::with_capacity(chosen.len());
        chosen.retain(|n| {
            let fresh = !seen.contains(n);
            seen.push(*n);
            fresh
        });

        let mut attempts = 0;
        while chosen.len() < self.pool.pick_size && attempts < PAD_ATTEMPTS {
            let cand = rng.gen_range(1..=self.pool.max);
            if !chosen.contains(&cand) {
                chosen.push(cand);
            }
            attempts += 1;
        }
        sampler::fill_uniform(rng, &mut chosen, &self.pool);

        chosen.sort_unstable();
        chosen.truncate(self.pool.pick_size);
        self.enforcer.apply(rng, &chosen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    const POOL: NumberPool = NumberPool::LOTTO_6_45;

    fn history(rng: &mut StdRng, draws: usize) -> Vec<NumberSet> {
        (0..draws)
            .map(|_| {
                let all: Vec<u8> = POOL.numbers().collect();
                let mut s: Vec<u8> = all.choose_multiple(rng, 6).copied().collect();
                s.sort_unstable();
                s
            })
            .collect()
    }

    #[test]
    fn uniform_provider_resolves_to_none() {
        assert!(resolve_distributions(&UniformDistributions, &POOL).is_none());
    }

    #[test]
    fn partial_training_fills_uniform_positions() {
        let mut positions = vec![None; 6];
        positions[2] = Some(vec![2.0; 45]);
        let trained = TrainedDistributions {
            pool_max: 45,
            positions,
        };
        let resolved = resolve_distributions(&trained, &POOL).unwrap();
        assert_eq!(resolved.len(), 6);
        for v in &resolved {
            assert!((v.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn malformed_vectors_are_ignored() {
        let trained = TrainedDistributions {
            pool_max: 45,
            positions: vec![Some(vec![1.0; 10]), Some(vec![f64::NAN; 45])],
        };
        assert!(resolve_distributions(&trained, &POOL).is_none());
    }

    #[test]
    fn fitted_distributions_sum_to_one() {
        let mut rng = StdRng::seed_from_u64(3);
        let hist = history(&mut rng, 300);
        let fitted = TrainedDistributions::fit(&hist, &POOL, 0.5, Some(80));
        assert_eq!(fitted.positions.len(), 6);
        for pos in 0..6 {
            let v = fitted.distribution(pos).unwrap();
            assert_eq!(v.len(), 45);
            assert!((v.iter().sum::<f64>() - 1.0).abs() < 1e-9);
            assert!(v.iter().all(|&p| p > 0.0));
        }
        // The smallest number of a draw is rarely large.
        let first = fitted.distribution(0).unwrap();
        assert!(first[0] > first[44]);
    }

    #[test]
    fn refined_sets_are_valid() {
        let cfg = EngineConfig::default();
        let enforcer = DiversityEnforcer::from_config(&cfg);
        let refiner = ProbabilisticRefiner::new(cfg.refine_top_k, &enforcer);
        let mut rng = StdRng::seed_from_u64(17);
        let hist = history(&mut rng, 200);
        let fitted = TrainedDistributions::fit(&hist, &POOL, 1.0, None);
        let dists = resolve_distributions(&fitted, &POOL).unwrap();
        let weights = FrequencyWeights::compute(&hist, &POOL, None);

        for set in refiner.refine_sets(&mut rng, Some(&dists), &weights, 200) {
            assert!(POOL.is_valid_set(&set), "{set:?}");
        }
    }

    #[test]
    fn concentrated_distributions_still_yield_distinct_numbers() {
        let cfg = EngineConfig::default();
        let enforcer = DiversityEnforcer::from_config(&cfg);
        let refiner = ProbabilisticRefiner::new(1, &enforcer);
        let mut peaked = vec![0.0; 45];
        peaked[6] = 1.0;
        let dists = vec![peaked; 6];
        let mut rng = StdRng::seed_from_u64(4);
        let sets = refiner.refine_sets(&mut rng, Some(&dists), &FrequencyWeights::uniform(&POOL), 20);
        for set in sets {
            assert!(POOL.is_valid_set(&set), "{set:?}");
        }
    }

    #[test]
    fn degrades_to_weighted_sampling() {
        let cfg = EngineConfig::default();
        let enforcer = DiversityEnforcer::from_config(&cfg);
        let refiner = ProbabilisticRefiner::new(8, &enforcer);
        let weights = FrequencyWeights::uniform(&POOL);
        let a = refiner.refine_sets(&mut StdRng::seed_from_u64(8), None, &weights, 3);
        let b = sampler::sample_sets(&mut StdRng::seed_from_u64(8), &weights, &POOL, 3);
        assert_eq!(a, b);
    }

    #[test]
    fn model_artifact_round_trips_through_disk() {
        let dir = std::env::temp_dir().join(format!("lotto-core-{}", uuid::Uuid::new_v4()));
        let path = dir.join("positions.json");
        let fitted = TrainedDistributions::fit(&[vec![1, 2, 3, 4, 5, 6]], &POOL, 1.0, None);
        fitted.save_json(&path).unwrap();
        assert_eq!(TrainedDistributions::load_json(&path).unwrap(), fitted);
        let _ = std::fs::remove_dir_all(dir);
    }
}
