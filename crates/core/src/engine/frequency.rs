use crate::domain::pool::{NumberPool, NumberSet};

/// Per-number selection weight derived from past winning sets. Every weight is at least 1.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyWeights {
    weights: Vec<f64>,
}

impl FrequencyWeights {
    /// `history` is ordered oldest to newest. With `half_life` set, a draw `age` draws older than
    /// the newest contributes `exp(-ln2 / half_life * age)` per number instead of 1.
    pub fn compute(history: &[NumberSet], pool: &NumberPool, half_life: Option<u32>) -> Self {
        let mut raw = vec![0.0_f64; pool.size()];
        let n = history.len();
        let lambda = half_life
            .filter(|h| *h > 0)
            .map(|h| std::f64::consts::LN_2 / f64::from(h));

        for (d, draw) in history.iter().enumerate() {
            let w = match lambda {
                Some(lambda) => (-lambda * (n - 1 - d) as f64).exp(),
                None => 1.0,
            };
            for &num in draw {
                if pool.contains(num) {
                    raw[pool.index(num)] += w;
                }
            }
        }

        let weights = raw.into_iter().map(|v| v.round().max(1.0)).collect();
        Self { weights }
    }

    pub fn uniform(pool: &NumberPool) -> Self {
        Self {
            weights: vec![1.0; pool.size()],
        }
    }

    #[cfg(test)]
    pub(crate) fn from_raw_for_tests(weights: Vec<f64>) -> Self {
        Self { weights }
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.weights
    }

    pub fn weight(&self, n: u8) -> f64 {
        self.weights.get(n as usize - 1).copied().unwrap_or(0.0)
    }

    /// The `k` heaviest numbers; ties go to the smaller number.
    pub fn hot_numbers(&self, k: usize) -> Vec<u8> {
        let mut ranked: Vec<(u8, f64)> = self
            .weights
            .iter()
            .enumerate()
            .map(|(i, &w)| (i as u8 + 1, w))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.into_iter().take(k).map(|(n, _)| n).collect()
    }
}
