use crate::config::EngineConfig;
use crate::domain::pool::NumberSet;
use crate::engine::diversity::DiversityEnforcer;
use crate::engine::frequency::FrequencyWeights;
use crate::engine::sampler;
use rand::Rng;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq)]
pub struct MergedSets {
    pub sets: Vec<NumberSet>,
    pub confidence_scores: Vec<f64>,
}

/// Reconciles a statistical set and a refined set per output slot.
#[derive(Debug, Clone)]
pub struct EnsembleMerger<'a> {
    config: &'a EngineConfig,
    enforcer: &'a DiversityEnforcer,
}

impl<'a> EnsembleMerger<'a> {
    pub fn new(config: &'a EngineConfig, enforcer: &'a DiversityEnforcer) -> Self {
        Self { config, enforcer }
    }

    /// One merged set per statistical slot. Slot `i` pairs `stat_sets[i]` with
    /// `refined_sets[i % refined_sets.len()]`.
    pub fn merge<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        stat_sets: &[NumberSet],
        refined_sets: &[NumberSet],
        weights: &FrequencyWeights,
        distributions: Option<&[Vec<f64>]>,
    ) -> MergedSets {
        let pool = *self.enforcer.pool();
        let hot: BTreeSet<u8> = weights.hot_numbers(self.config.hot_top_k).into_iter().collect();
        let entropy = entropy_score(distributions, pool.size());

        let mut sets = Vec::with_capacity(stat_sets.len());
        let mut confidence_scores = Vec::with_capacity(stat_sets.len());

        for (i, stat) in stat_sets.iter().enumerate() {
            let refined = if refined_sets.is_empty() {
                stat
            } else {
                &refined_sets[i % refined_sets.len()]
            };

            let s: BTreeSet<u8> = stat.iter().copied().collect();
            let m: BTreeSet<u8> = refined.iter().copied().collect();
            let consensus: Vec<u8> = s.intersection(&m).copied().collect();

            let mut chosen: NumberSet = consensus.clone();
            for x in s.union(&m) {
                if chosen.len() >= pool.pick_size
                    || chosen.len() - consensus.len() >= self.config.merge_max_union_fill
                {
                    break;
                }
                if !chosen.contains(x) {
                    chosen.push(*x);
                }
            }

            sampler::fill_weighted(rng, &mut chosen, weights, &pool);
            chosen.sort_unstable();
            chosen.truncate(pool.pick_size);
            let chosen = self.enforcer.apply(rng, &chosen);

            let consensus_ratio = consensus.len() as f64 / pool.pick_size as f64;
            let hot_ratio =
                chosen.iter().filter(|n| hot.contains(n)).count() as f64 / pool.pick_size as f64;
            confidence_scores.push(self.confidence(consensus_ratio, hot_ratio, entropy));
            sets.push(chosen);
        }

        MergedSets {
            sets,
            confidence_scores,
        }
    }

    /// `base + w1*consensus + w2*hot + w3*entropy`, clamped and rounded to three decimals.
    pub fn confidence(&self, consensus_ratio: f64, hot_ratio: f64, entropy_score: f64) -> f64 {
        let c = &self.config;
        let raw = c.conf_base
            + c.conf_w_consensus * consensus_ratio
            + c.conf_w_hot * hot_ratio
            + c.conf_w_entropy * entropy_score;
        let clamped = raw.clamp(c.conf_min, c.conf_max);
        (clamped * 1000.0).round() / 1000.0
    }
}

/// `1 - Σ H(position) / (positions * ln(pool_size))`; `0.5` when no distributions exist.
pub fn entropy_score(distributions: Option<&[Vec<f64>]>, pool_size: usize) -> f64 {
    let Some(distributions) = distributions.filter(|d| !d.is_empty()) else {
        return 0.5;
    };
    let max_entropy = (pool_size as f64).ln();
    if max_entropy <= 0.0 {
        return 0.5;
    }
    let total: f64 = distributions
        .iter()
        .map(|vec| -vec.iter().map(|&p| p * (p + 1e-12).ln()).sum::<f64>())
        .sum();
    1.0 - total / (distributions.len() as f64 * max_entropy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pool::NumberPool;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const POOL: NumberPool = NumberPool::LOTTO_6_45;

    fn fixture() -> (EngineConfig, DiversityEnforcer) {
        let cfg = EngineConfig::default();
        let enforcer = DiversityEnforcer::from_config(&cfg);
        (cfg, enforcer)
    }

    #[test]
    fn identical_inputs_merge_to_the_same_set() {
        let (cfg, enforcer) = fixture();
        let merger = EnsembleMerger::new(&cfg, &enforcer);
        let set = vec![3, 8, 17, 24, 33, 42];
        let out = merger.merge(
            &mut StdRng::seed_from_u64(1),
            &[set.clone()],
            &[set.clone()],
            &FrequencyWeights::uniform(&POOL),
            None,
        );
        assert_eq!(out.sets, vec![set]);
        // 0.40 + 0.30 * 1.0 + 0.10 * hot + 0.20 * 0.5 clamps at 0.80.
        assert_eq!(out.confidence_scores, vec![0.8]);
    }

    #[test]
    fn keeps_consensus_then_lowest_union_members() {
        let (cfg, enforcer) = fixture();
        let merger = EnsembleMerger::new(&cfg, &enforcer);
        let stat = vec![2, 5, 17, 20, 33, 40];
        let refined = vec![2, 8, 17, 25, 33, 44];
        let mut rng = StdRng::seed_from_u64(12);
        let out = merger.merge(
            &mut rng,
            &[stat],
            &[refined],
            &FrequencyWeights::uniform(&POOL),
            None,
        );
        let set = &out.sets[0];
        assert!(POOL.is_valid_set(set));
        // Consensus {2, 17, 33}, then at most two union members in ascending order: 5 and 8.
        for n in [2, 5, 8, 17, 33] {
            assert!(set.contains(&n), "{set:?}");
        }
        // 0.40 + 0.30 * 0.5 + 0.10 * hot + 0.20 * 0.5 >= 0.65
        assert!(out.confidence_scores[0] >= 0.65);
    }

    #[test]
    fn scores_stay_within_bounds() {
        let (cfg, enforcer) = fixture();
        let merger = EnsembleMerger::new(&cfg, &enforcer);
        let mut rng = StdRng::seed_from_u64(99);
        let weights = FrequencyWeights::uniform(&POOL);
        let stat = sampler::sample_sets(&mut rng, &weights, &POOL, 50);
        let refined = sampler::sample_sets(&mut rng, &weights, &POOL, 50);
        let out = merger.merge(&mut rng, &stat, &refined, &weights, None);
        assert_eq!(out.sets.len(), 50);
        for (set, score) in out.sets.iter().zip(&out.confidence_scores) {
            assert!(POOL.is_valid_set(set));
            assert!((cfg.conf_min..=cfg.conf_max).contains(score));
        }
    }

    #[test]
    fn entropy_score_bounds() {
        assert_eq!(entropy_score(None, 45), 0.5);
        let uniform = vec![vec![1.0 / 45.0; 45]; 6];
        assert!(entropy_score(Some(&uniform), 45).abs() < 1e-6);

        let mut peaked = vec![0.0; 45];
        peaked[0] = 1.0;
        let certain = vec![peaked; 6];
        assert!((entropy_score(Some(&certain), 45) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn confidence_formula() {
        let (cfg, enforcer) = fixture();
        let merger = EnsembleMerger::new(&cfg, &enforcer);
        // 0.40 + 0.30 * 0.5 + 0.10 * 0.5 + 0.20 * 0.5 = 0.70
        assert_eq!(merger.confidence(0.5, 0.5, 0.5), 0.7);
        assert_eq!(merger.confidence(0.0, 0.0, 0.0), 0.4);
    }
}
