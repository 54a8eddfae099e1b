use crate::domain::pool::{NumberPool, NumberSet};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Official result of one draw. Immutable once ingested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawResult {
    pub draw_number: i32,
    pub draw_date: NaiveDate,
    pub numbers: NumberSet,
    pub bonus_number: u8,
}

impl DrawResult {
    pub fn validate(&self, pool: &NumberPool) -> anyhow::Result<()> {
        anyhow::ensure!(self.draw_number >= 1, "draw_number must be >= 1");
        anyhow::ensure!(
            self.numbers.len() == pool.pick_size,
            "draw {} must have exactly {} numbers (got {})",
            self.draw_number,
            pool.pick_size,
            self.numbers.len()
        );
        let distinct: BTreeSet<u8> = self.numbers.iter().copied().collect();
        anyhow::ensure!(
            distinct.len() == self.numbers.len(),
            "draw {} has duplicate numbers: {:?}",
            self.draw_number,
            self.numbers
        );
        for &n in &self.numbers {
            anyhow::ensure!(pool.contains(n), "draw {} number out of range: {n}", self.draw_number);
        }
        anyhow::ensure!(
            pool.contains(self.bonus_number),
            "draw {} bonus out of range: {}",
            self.draw_number,
            self.bonus_number
        );
        anyhow::ensure!(
            !distinct.contains(&self.bonus_number),
            "draw {} bonus {} repeats a main number",
            self.draw_number,
            self.bonus_number
        );
        Ok(())
    }
}

/// Outcome of comparing one recommended set with one draw. Keyed by `(recommendation_id, draw_number)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub recommendation_id: Uuid,
    pub draw_number: i32,
    pub match_count: u8,
    pub bonus_match: bool,
    pub matched_numbers: NumberSet,
    pub rank: u8,
}

impl MatchRecord {
    pub fn classify(recommendation_id: Uuid, numbers: &[u8], draw: &DrawResult) -> Self {
        let picked: BTreeSet<u8> = numbers.iter().copied().collect();
        let matched_numbers: NumberSet = draw
            .numbers
            .iter()
            .copied()
            .filter(|n| picked.contains(n))
            .collect::<BTreeSet<u8>>()
            .into_iter()
            .collect();
        let match_count = matched_numbers.len() as u8;
        let bonus_match = picked.contains(&draw.bonus_number);

        Self {
            recommendation_id,
            draw_number: draw.draw_number,
            match_count,
            bonus_match,
            matched_numbers,
            rank: rank_for(match_count, bonus_match),
        }
    }
}

/// Prize tier for a 6-number game. `0` means no prize.
pub fn rank_for(match_count: u8, bonus_match: bool) -> u8 {
    match (match_count, bonus_match) {
        (6, _) => 1,
        (5, true) => 2,
        (5, false) => 3,
        (4, _) => 4,
        (3, _) => 5,
        _ => 0,
    }
}

pub const PRIZE_RANKS: std::ops::RangeInclusive<u8> = 1..=5;

/// Per-rank tallies for ranks 1..=5. Serializes as `{"1": n, ..., "5": n}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RankCounts {
    counts: BTreeMap<u8, u32>,
}

impl Default for RankCounts {
    fn default() -> Self {
        Self {
            counts: PRIZE_RANKS.map(|r| (r, 0)).collect(),
        }
    }
}

impl RankCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ranks outside 1..=5 (no prize) are not tallied.
    pub fn record(&mut self, rank: u8) {
        if let Some(c) = self.counts.get_mut(&rank) {
            *c += 1;
        }
    }

    pub fn get(&self, rank: u8) -> u32 {
        self.counts.get(&rank).copied().unwrap_or(0)
    }

    pub fn winners(&self) -> u32 {
        self.counts.values().sum()
    }

    pub fn summary(&self, draw_number: i32, evaluated: usize) -> String {
        let mut out = format!("Draw {draw_number} evaluation ({evaluated} recommendations)");
        for (rank, count) in &self.counts {
            out.push_str(&format!("\n- rank {rank}: {count}"));
        }
        out
    }
}
