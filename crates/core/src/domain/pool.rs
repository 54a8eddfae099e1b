use crate::config::EngineConfig;
use serde::{Deserialize, Serialize};

/// A candidate selection. Always `pick_size` distinct values in ascending order once produced.
pub type NumberSet = Vec<u8>;

/// The closed range `1..=max` numbers are drawn from, plus the selection size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberPool {
    pub max: u8,
    pub pick_size: usize,
}

impl NumberPool {
    pub const LOTTO_6_45: NumberPool = NumberPool {
        max: 45,
        pick_size: 6,
    };

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max: config.pool_max,
            pick_size: config.pick_size,
        }
    }

    pub fn size(&self) -> usize {
        self.max as usize
    }

    pub fn contains(&self, n: u8) -> bool {
        (1..=self.max).contains(&n)
    }

    pub fn numbers(&self) -> impl Iterator<Item = u8> {
        1..=self.max
    }

    /// Zero-based slot of `n` in a weight or probability vector.
    pub fn index(&self, n: u8) -> usize {
        n as usize - 1
    }

    /// Three contiguous, inclusive segments covering the pool. Sizes differ by at most one.
    pub fn thirds(&self) -> [(u8, u8); 3] {
        let base = self.max / 3;
        let rem = self.max % 3;
        let mut out = [(0, 0); 3];
        let mut lo = 1u8;
        for (i, slot) in out.iter_mut().enumerate() {
            let len = base + u8::from((i as u8) < rem);
            let hi = lo + len - 1;
            *slot = (lo, hi);
            lo = hi + 1;
        }
        out
    }

    pub fn is_valid_set(&self, set: &[u8]) -> bool {
        set.len() == self.pick_size
            && set.iter().all(|&n| self.contains(n))
            && set.windows(2).all(|w| w[0] < w[1])
    }
}

impl Default for NumberPool {
    fn default() -> Self {
        Self::LOTTO_6_45
    }
}

/// Longest run of consecutive integers in an ascending set.
pub fn longest_run(sorted: &[u8]) -> usize {
    let mut best = usize::from(!sorted.is_empty());
    let mut current = best;
    for w in sorted.windows(2) {
        if w[1] == w[0] + 1 {
            current += 1;
            best = best.max(current);
        } else {
            current = 1;
        }
    }
    best
}

pub fn odd_count(set: &[u8]) -> usize {
    set.iter().filter(|&&n| n % 2 == 1).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thirds_partition_the_reference_pool() {
        assert_eq!(
            NumberPool::LOTTO_6_45.thirds(),
            [(1, 15), (16, 30), (31, 45)]
        );
    }

    #[test]
    fn thirds_spread_the_remainder() {
        let pool = NumberPool {
            max: 10,
            pick_size: 3,
        };
        assert_eq!(pool.thirds(), [(1, 4), (5, 7), (8, 10)]);
    }

    #[test]
    fn validates_sets() {
        let pool = NumberPool::LOTTO_6_45;
        assert!(pool.is_valid_set(&[1, 2, 3, 4, 5, 45]));
        assert!(!pool.is_valid_set(&[1, 2, 3, 4, 5]));
        assert!(!pool.is_valid_set(&[2, 1, 3, 4, 5, 6]));
        assert!(!pool.is_valid_set(&[1, 1, 3, 4, 5, 6]));
        assert!(!pool.is_valid_set(&[0, 1, 3, 4, 5, 6]));
        assert!(!pool.is_valid_set(&[1, 2, 3, 4, 5, 46]));
    }

    #[test]
    fn measures_runs() {
        assert_eq!(longest_run(&[]), 0);
        assert_eq!(longest_run(&[7]), 1);
        assert_eq!(longest_run(&[1, 2, 3, 10, 11, 40]), 3);
        assert_eq!(longest_run(&[1, 3, 5, 7, 9, 11]), 1);
    }
}
