use crate::config::EngineConfig;
use crate::domain::pool::{longest_run, odd_count, NumberPool, NumberSet};
use rand::seq::SliceRandom;
use rand::Rng;

/// Soft structural constraints applied to a finished set: odd/even balance, coverage of the three
/// pool segments and a cap on consecutive runs.
///
/// Each constraint works on a copy with a bounded attempt budget. A constraint that cannot be met
/// within its budget leaves the set as it was before that constraint ran. Replacements keep the
/// parity of the number they displace, so later repairs never undo the odd/even balance.
#[derive(Debug, Clone)]
pub struct DiversityEnforcer {
    pool: NumberPool,
    enforce_odd_even: bool,
    enforce_range_coverage: bool,
    max_consecutive: usize,
    repair_attempts: usize,
    run_repair_attempts: usize,
}

impl DiversityEnforcer {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            pool: NumberPool::from_config(config),
            enforce_odd_even: config.enforce_odd_even,
            enforce_range_coverage: config.enforce_range_coverage,
            max_consecutive: config.max_consecutive,
            repair_attempts: config.repair_attempts,
            run_repair_attempts: config.run_repair_attempts,
        }
    }

    pub fn pool(&self) -> &NumberPool {
        &self.pool
    }

    pub fn apply<R: Rng + ?Sized>(&self, rng: &mut R, set: &[u8]) -> NumberSet {
        let mut nums = set.to_vec();
        nums.sort_unstable();
        if !self.pool.is_valid_set(&nums) {
            return nums;
        }

        if self.enforce_odd_even {
            nums = self.balance_odd_even(rng, nums);
        }
        if self.enforce_range_coverage {
            nums = self.cover_ranges(rng, nums);
        }
        if self.max_consecutive > 0 {
            nums = self.break_runs(rng, nums);
        }
        nums
    }

    /// Accepted odd-count window, `[2, 4]` for six numbers.
    pub fn odd_bounds(&self) -> (usize, usize) {
        let lo = self.pool.pick_size / 3;
        (lo, self.pool.pick_size - lo)
    }

    fn balance_odd_even<R: Rng + ?Sized>(&self, rng: &mut R, original: NumberSet) -> NumberSet {
        let (lo, hi) = self.odd_bounds();
        let mut work = original.clone();

        for _ in 0..self.repair_attempts {
            let odd = odd_count(&work);
            if (lo..=hi).contains(&odd) {
                break;
            }
            let want_odd = odd < lo;

            let victims: Vec<usize> = (0..work.len())
                .filter(|&i| (work[i] % 2 == 1) != want_odd)
                .collect();
            let replacements: Vec<u8> = self
                .pool
                .numbers()
                .filter(|n| (n % 2 == 1) == want_odd && !work.contains(n))
                .collect();

            let (Some(&idx), Some(&cand)) = (victims.choose(rng), replacements.choose(rng)) else {
                break;
            };
            work[idx] = cand;
            work.sort_unstable();
        }

        if (lo..=hi).contains(&odd_count(&work)) {
            work
        } else {
            original
        }
    }

    fn cover_ranges<R: Rng + ?Sized>(&self, rng: &mut R, original: NumberSet) -> NumberSet {
        let thirds = self.pool.thirds();
        let third_of = |n: u8| thirds.iter().position(|&(a, b)| (a..=b).contains(&n));
        let mut work = original.clone();

        for _ in 0..self.repair_attempts {
            let Some(&(lo, hi)) = thirds
                .iter()
                .find(|&&(a, b)| !work.iter().any(|n| (a..=b).contains(n)))
            else {
                break;
            };

            // Only displace numbers whose segment stays covered without them.
            let victims: Vec<usize> = (0..work.len())
                .filter(|&i| {
                    let t = third_of(work[i]);
                    work.iter().filter(|&&n| third_of(n) == t).count() >= 2
                })
                .collect();
            let Some(&idx) = victims.choose(rng) else {
                break;
            };

            let parity = work[idx] % 2;
            let mut replacements: Vec<u8> = (lo..=hi)
                .filter(|n| n % 2 == parity && !work.contains(n))
                .collect();
            if replacements.is_empty() {
                replacements = (lo..=hi).filter(|n| !work.contains(n)).collect();
            }
            let Some(&cand) = replacements.choose(rng) else {
                break;
            };
            work[idx] = cand;
            work.sort_unstable();
        }

        let covered = thirds
            .iter()
            .all(|&(a, b)| work.iter().any(|n| (a..=b).contains(n)));
        if covered {
            work
        } else {
            original
        }
    }

    fn break_runs<R: Rng + ?Sized>(&self, rng: &mut R, original: NumberSet) -> NumberSet {
        let thirds = self.pool.thirds();
        let mut work = original.clone();

        for _ in 0..self.run_repair_attempts {
            if longest_run(&work) <= self.max_consecutive {
                break;
            }

            let in_long_run = run_members(&work, self.max_consecutive);
            let Some(&idx) = in_long_run.choose(rng) else {
                break;
            };
            let victim = work[idx];
            let (a, b) = thirds
                .iter()
                .copied()
                .find(|&(a, b)| (a..=b).contains(&victim))
                .unwrap_or((1, self.pool.max));

            let mut replacements: Vec<u8> = (a..=b)
                .filter(|n| n % 2 == victim % 2 && !work.contains(n))
                .collect();
            if replacements.is_empty() {
                replacements = self.pool.numbers().filter(|n| !work.contains(n)).collect();
            }
            let Some(&cand) = replacements.choose(rng) else {
                break;
            };
            work[idx] = cand;
            work.sort_unstable();
        }

        if longest_run(&work) <= self.max_consecutive {
            work
        } else {
            original
        }
    }
}

/// Indices of elements that belong to a run longer than `max`.
fn run_members(sorted: &[u8], max: usize) -> Vec<usize> {
    let mut out = Vec::new();
    let mut start = 0;
    for i in 1..=sorted.len() {
        let continues = i < sorted.len() && sorted[i] == sorted[i - 1] + 1;
        if !continues {
            if i - start > max {
                out.extend(start..i);
            }
            start = i;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn enforcer() -> DiversityEnforcer {
        DiversityEnforcer::from_config(&EngineConfig::default())
    }

    fn covers_thirds(set: &[u8]) -> bool {
        NumberPool::LOTTO_6_45
            .thirds()
            .iter()
            .all(|&(a, b)| set.iter().any(|n| (a..=b).contains(n)))
    }

    #[test]
    fn repairs_all_odd_set() {
        let e = enforcer();
        let mut rng = StdRng::seed_from_u64(11);
        let out = e.apply(&mut rng, &[1, 3, 5, 7, 9, 11]);
        assert!(NumberPool::LOTTO_6_45.is_valid_set(&out));
        assert!((2..=4).contains(&odd_count(&out)), "{out:?}");
    }

    #[test]
    fn repairs_missing_third() {
        let e = enforcer();
        let mut rng = StdRng::seed_from_u64(5);
        let out = e.apply(&mut rng, &[2, 5, 9, 12, 20, 27]);
        assert!(covers_thirds(&out), "{out:?}");
    }

    #[test]
    fn breaks_long_runs() {
        let e = enforcer();
        let mut rng = StdRng::seed_from_u64(9);
        let out = e.apply(&mut rng, &[10, 11, 12, 13, 25, 40]);
        assert!(longest_run(&out) <= 2, "{out:?}");
    }

    #[test]
    fn leaves_compliant_sets_alone() {
        let e = enforcer();
        let mut rng = StdRng::seed_from_u64(1);
        let set = vec![3, 8, 17, 24, 33, 42];
        assert_eq!(e.apply(&mut rng, &set), set);
    }

    #[test]
    fn disabled_constraints_are_skipped() {
        let cfg = EngineConfig {
            enforce_odd_even: false,
            enforce_range_coverage: false,
            max_consecutive: 0,
            ..EngineConfig::default()
        };
        let e = DiversityEnforcer::from_config(&cfg);
        let mut rng = StdRng::seed_from_u64(1);
        let set = vec![1, 2, 3, 4, 5, 6];
        assert_eq!(e.apply(&mut rng, &set), set);
    }

    #[test]
    fn zero_budget_fails_open() {
        let cfg = EngineConfig {
            repair_attempts: 0,
            run_repair_attempts: 0,
            ..EngineConfig::default()
        };
        let e = DiversityEnforcer::from_config(&cfg);
        let mut rng = StdRng::seed_from_u64(1);
        let set = vec![1, 3, 5, 7, 9, 11];
        assert_eq!(e.apply(&mut rng, &set), set);
    }

    #[test]
    fn output_is_balanced_or_untouched() {
        let e = enforcer();
        let pool = NumberPool::LOTTO_6_45;
        let mut rng = StdRng::seed_from_u64(2024);
        for _ in 0..2000 {
            let mut input: Vec<u8> = pool.numbers().collect();
            input.shuffle(&mut rng);
            input.truncate(6);
            input.sort_unstable();

            let out = e.apply(&mut rng, &input);
            assert!(pool.is_valid_set(&out), "{out:?}");
            assert!((2..=4).contains(&odd_count(&out)) || out == input, "{input:?} -> {out:?}");
        }
    }

    #[test]
    fn finds_run_members() {
        assert_eq!(run_members(&[1, 2, 3, 10, 11, 20], 2), vec![0, 1, 2]);
        assert!(run_members(&[1, 2, 10, 11, 20, 30], 2).is_empty());
    }
}
