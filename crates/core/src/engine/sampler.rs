use crate::domain::pool::{NumberPool, NumberSet};
use crate::engine::frequency::FrequencyWeights;
use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use rand::Rng;

/// Weighted draws allowed per missing slot before the remaining slots are filled uniformly.
const WEIGHTED_DRAWS_PER_SLOT: usize = 16;

/// `count` sets of distinct numbers, each drawn proportionally to `weights` and sorted ascending.
pub fn sample_sets<R: Rng + ?Sized>(
    rng: &mut R,
    weights: &FrequencyWeights,
    pool: &NumberPool,
    count: usize,
) -> Vec<NumberSet> {
    (0..count).map(|_| sample_set(rng, weights, pool)).collect()
}

pub fn sample_set<R: Rng + ?Sized>(
    rng: &mut R,
    weights: &FrequencyWeights,
    pool: &NumberPool,
) -> NumberSet {
    let mut chosen = Vec::with_capacity(pool.pick_size);
    fill_weighted(rng, &mut chosen, weights, pool);
    chosen.sort_unstable();
    chosen
}

/// Tops `chosen` up to `pick_size` distinct numbers with weighted draws, rejecting duplicates.
///
/// Skewed weights can make distinct values rare; once the draw budget is spent the remaining
/// slots are taken uniformly from the numbers not yet chosen, so this always terminates.
pub fn fill_weighted<R: Rng + ?Sized>(
    rng: &mut R,
    chosen: &mut NumberSet,
    weights: &FrequencyWeights,
    pool: &NumberPool,
) {
    if chosen.len() >= pool.pick_size {
        return;
    }

    if let Ok(dist) = WeightedIndex::new(weights.as_slice()) {
        let mut budget = (pool.pick_size - chosen.len()) * WEIGHTED_DRAWS_PER_SLOT;
        while chosen.len() < pool.pick_size && budget > 0 {
            budget -= 1;
            let n = dist.sample(rng) as u8 + 1;
            if !chosen.contains(&n) {
                chosen.push(n);
            }
        }
    } else {
        tracing::warn!("invalid frequency weights; sampling uniformly");
    }

    fill_uniform(rng, chosen, pool);
}

/// Fills the remaining slots uniformly from numbers not yet in `chosen`.
pub fn fill_uniform<R: Rng + ?Sized>(rng: &mut R, chosen: &mut NumberSet, pool: &NumberPool) {
    if chosen.len() >= pool.pick_size {
        return;
    }
    let remaining: Vec<u8> = pool.numbers().filter(|n| !chosen.contains(n)).collect();
    let missing = pool.pick_size - chosen.len();
    chosen.extend(remaining.choose_multiple(rng, missing).copied());
}
