use crate::config::EngineConfig;
use crate::domain::pool::{NumberPool, NumberSet};
use crate::engine::frequency::FrequencyWeights;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumberStat {
    pub number: u8,
    /// Raw occurrences over the whole history.
    pub count: u32,
    /// Sampling weight the fast path uses for this number.
    pub weight: f64,
}

/// Occurrence statistics over the stored history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrequencyReport {
    pub draws_analyzed: usize,
    pub recent_window: usize,
    pub numbers: Vec<NumberStat>,
    /// Most frequent numbers in the recent window, at most `hot_top_k`; ties go to the smaller
    /// number. Numbers absent from the window are never hot.
    pub hot_numbers: Vec<u8>,
    /// Numbers absent from the recent window, ascending.
    pub cold_numbers: Vec<u8>,
}

fn occurrences(history: &[NumberSet], pool: &NumberPool) -> Vec<u32> {
    let mut counts = vec![0u32; pool.size()];
    for &n in history.iter().flatten() {
        if pool.contains(n) {
            counts[pool.index(n)] += 1;
        }
    }
    counts
}

/// `history` is ordered oldest to newest; the window covers its last `recent_window` draws.
pub fn frequency_report(
    config: &EngineConfig,
    history: &[NumberSet],
    recent_window: usize,
) -> FrequencyReport {
    let pool = NumberPool::from_config(config);
    let weights = FrequencyWeights::compute(history, &pool, config.freq_decay_half_life);
    let totals = occurrences(history, &pool);

    let recent = &history[history.len().saturating_sub(recent_window)..];
    let recent_counts = occurrences(recent, &pool);

    let mut ranked: Vec<(u8, u32)> = pool
        .numbers()
        .map(|n| (n, recent_counts[pool.index(n)]))
        .filter(|(_, c)| *c > 0)
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let hot_numbers = ranked
        .into_iter()
        .take(config.hot_top_k)
        .map(|(n, _)| n)
        .collect();
    let cold_numbers = pool
        .numbers()
        .filter(|&n| recent_counts[pool.index(n)] == 0)
        .collect();

    FrequencyReport {
        draws_analyzed: history.len(),
        recent_window,
        numbers: pool
            .numbers()
            .map(|n| NumberStat {
                number: n,
                count: totals[pool.index(n)],
                weight: weights.weight(n),
            })
            .collect(),
        hot_numbers,
        cold_numbers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> Vec<NumberSet> {
        vec![
            vec![1, 2, 3, 4, 5, 6],
            vec![1, 2, 3, 10, 11, 12],
            vec![3, 20, 21, 22, 23, 24],
            vec![3, 20, 30, 31, 32, 33],
        ]
    }

    #[test]
    fn counts_cover_the_whole_history() {
        let report = frequency_report(&EngineConfig::default(), &history(), 40);
        assert_eq!(report.draws_analyzed, 4);
        assert_eq!(report.numbers.len(), 45);
        assert_eq!(report.numbers[2].number, 3);
        assert_eq!(report.numbers[2].count, 4);
        assert_eq!(report.numbers[44].count, 0);
        assert!(report.numbers.iter().all(|s| s.weight >= 1.0));
    }

    #[test]
    fn hot_and_cold_follow_the_recent_window() {
        let report = frequency_report(&EngineConfig::default(), &history(), 2);
        assert_eq!(report.hot_numbers[..2], [3, 20]);
        assert_eq!(report.hot_numbers.len(), 8);
        // 1 and 2 only appear outside the window
        assert!(report.cold_numbers.contains(&1));
        assert!(report.cold_numbers.contains(&2));
        assert!(!report.cold_numbers.contains(&3));
        assert_eq!(report.cold_numbers.len(), 45 - 10);
    }

    #[test]
    fn empty_history_is_all_cold() {
        let report = frequency_report(&EngineConfig::default(), &[], 40);
        assert_eq!(report.draws_analyzed, 0);
        assert!(report.hot_numbers.is_empty());
        assert_eq!(report.cold_numbers, (1..=45).collect::<Vec<u8>>());
    }
}
