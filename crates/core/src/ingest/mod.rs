pub mod provider;

use crate::domain::draw::DrawResult;
use crate::domain::pool::NumberSet;
use std::collections::BTreeMap;

/// Past winning sets, oldest first.
#[async_trait::async_trait]
pub trait HistorySource: Send + Sync {
    async fn load_history(&self) -> anyhow::Result<Vec<NumberSet>>;
}

#[async_trait::async_trait]
pub trait DrawSource: Send + Sync {
    async fn load_draw(&self, draw_number: i32) -> anyhow::Result<Option<DrawResult>>;
}

/// Stored draws: the full history plus the newest draw.
#[async_trait::async_trait]
pub trait DrawArchive: HistorySource {
    async fn latest_draw(&self) -> anyhow::Result<Option<DrawResult>>;
}

/// Draws held in memory, keyed by draw number.
#[derive(Debug, Clone, Default)]
pub struct StaticDraws {
    draws: BTreeMap<i32, DrawResult>,
}

impl StaticDraws {
    pub fn new(draws: impl IntoIterator<Item = DrawResult>) -> Self {
        Self {
            draws: draws.into_iter().map(|d| (d.draw_number, d)).collect(),
        }
    }
}

#[async_trait::async_trait]
impl HistorySource for StaticDraws {
    async fn load_history(&self) -> anyhow::Result<Vec<NumberSet>> {
        Ok(self.draws.values().map(|d| d.numbers.clone()).collect())
    }
}

#[async_trait::async_trait]
impl DrawSource for StaticDraws {
    async fn load_draw(&self, draw_number: i32) -> anyhow::Result<Option<DrawResult>> {
        Ok(self.draws.get(&draw_number).cloned())
    }
}

#[async_trait::async_trait]
impl DrawArchive for StaticDraws {
    async fn latest_draw(&self) -> anyhow::Result<Option<DrawResult>> {
        Ok(self.draws.values().next_back().cloned())
    }
}

/// A fixed history without draw metadata.
#[derive(Debug, Clone, Default)]
pub struct StaticHistory(pub Vec<NumberSet>);

#[async_trait::async_trait]
impl HistorySource for StaticHistory {
    async fn load_history(&self) -> anyhow::Result<Vec<NumberSet>> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn draw(draw_number: i32, numbers: [u8; 6]) -> DrawResult {
        DrawResult {
            draw_number,
            draw_date: NaiveDate::from_ymd_opt(2026, 1, 3).unwrap(),
            numbers: numbers.to_vec(),
            bonus_number: 45,
        }
    }

    #[tokio::test]
    async fn static_draws_report_history_and_latest_in_order() {
        let draws = StaticDraws::new([
            draw(1205, [2, 9, 16, 23, 30, 37]),
            draw(1204, [1, 7, 12, 23, 34, 44]),
        ]);
        assert_eq!(draws.latest_draw().await.unwrap().unwrap().draw_number, 1205);
        assert_eq!(draws.load_history().await.unwrap()[0], vec![1, 7, 12, 23, 34, 44]);
        assert!(StaticDraws::default().latest_draw().await.unwrap().is_none());
    }
}
