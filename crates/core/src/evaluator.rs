use crate::config::EngineConfig;
use crate::domain::draw::{DrawResult, MatchRecord, RankCounts};
use crate::domain::recommendation::StoredRecommendation;
use crate::notify::Notifier;
use crate::time::local_day::draw_cutoff_utc;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Storage the evaluator reads draws and recommendations from and writes match records to.
#[async_trait::async_trait]
pub trait MatchRepository: Send + Sync {
    async fn load_draw(&self, draw_number: i32) -> anyhow::Result<Option<DrawResult>>;

    /// Sets targeted at or before `draw_date` and created no later than `cutoff`.
    async fn eligible_recommendations(
        &self,
        draw_date: NaiveDate,
        cutoff: DateTime<Utc>,
    ) -> anyhow::Result<Vec<StoredRecommendation>>;

    async fn existing_rank(
        &self,
        recommendation_id: Uuid,
        draw_number: i32,
    ) -> anyhow::Result<Option<u8>>;

    /// Returns `false` when a record for the same `(recommendation_id, draw_number)` already exists.
    async fn insert_match(&self, record: &MatchRecord) -> anyhow::Result<bool>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DrawEvaluation {
    pub draw_number: i32,
    pub counts: RankCounts,
    /// Eligible recommendations looked at, matched now or earlier.
    pub evaluated: usize,
    /// Match records written by this pass.
    pub created: usize,
}

impl DrawEvaluation {
    fn empty(draw_number: i32) -> Self {
        Self {
            draw_number,
            counts: RankCounts::new(),
            evaluated: 0,
            created: 0,
        }
    }
}

/// Classifies stored recommendations against one draw. Safe to re-run: existing records are
/// counted, never recomputed.
pub struct RankEvaluator {
    repo: Arc<dyn MatchRepository>,
    config: Arc<EngineConfig>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl RankEvaluator {
    pub fn new(repo: Arc<dyn MatchRepository>, config: Arc<EngineConfig>) -> Self {
        Self {
            repo,
            config,
            notifier: None,
        }
    }

    /// Send a summary after every evaluation that found the draw.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub async fn evaluate_draw(&self, draw_number: i32) -> anyhow::Result<DrawEvaluation> {
        let Some(draw) = self.repo.load_draw(draw_number).await? else {
            tracing::info!(draw_number, "draw not found; nothing to evaluate");
            return Ok(DrawEvaluation::empty(draw_number));
        };

        let cutoff = draw_cutoff_utc(
            draw.draw_date,
            self.config.draw_cutoff,
            self.config.utc_offset_hours,
        )?;
        let eligible = self
            .repo
            .eligible_recommendations(draw.draw_date, cutoff)
            .await?;

        let mut out = DrawEvaluation::empty(draw_number);
        for rec in &eligible {
            out.evaluated += 1;
            if let Some(rank) = self.repo.existing_rank(rec.id, draw_number).await? {
                out.counts.record(rank);
                continue;
            }

            let record = MatchRecord::classify(rec.id, &rec.numbers, &draw);
            if self.repo.insert_match(&record).await? {
                out.created += 1;
                out.counts.record(record.rank);
            } else {
                // Another pass got there first; count what it stored.
                let rank = self
                    .repo
                    .existing_rank(rec.id, draw_number)
                    .await?
                    .unwrap_or(record.rank);
                out.counts.record(rank);
            }
        }

        tracing::info!(
            draw_number,
            %cutoff,
            evaluated = out.evaluated,
            created = out.created,
            winners = out.counts.winners(),
            "draw evaluated"
        );
        if let Some(notifier) = &self.notifier {
            notifier.send(&out.counts.summary(draw_number, out.evaluated));
        }
        Ok(out)
    }
}

/// In-process repository for tests and offline evaluation.
#[derive(Debug, Default)]
pub struct MemoryMatchRepository {
    draws: RwLock<BTreeMap<i32, DrawResult>>,
    recommendations: RwLock<Vec<StoredRecommendation>>,
    matches: RwLock<HashMap<(Uuid, i32), MatchRecord>>,
}

impl MemoryMatchRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_draw(&self, draw: DrawResult) {
        self.draws.write().await.insert(draw.draw_number, draw);
    }

    pub async fn add_recommendation(&self, rec: StoredRecommendation) {
        self.recommendations.write().await.push(rec);
    }

    pub async fn match_count(&self) -> usize {
        self.matches.read().await.len()
    }
}

#[async_trait::async_trait]
impl MatchRepository for MemoryMatchRepository {
    async fn load_draw(&self, draw_number: i32) -> anyhow::Result<Option<DrawResult>> {
        Ok(self.draws.read().await.get(&draw_number).cloned())
    }

    async fn eligible_recommendations(
        &self,
        draw_date: NaiveDate,
        cutoff: DateTime<Utc>,
    ) -> anyhow::Result<Vec<StoredRecommendation>> {
        Ok(self
            .recommendations
            .read()
            .await
            .iter()
            .filter(|r| r.target_day <= draw_date && r.created_at <= cutoff)
            .cloned()
            .collect())
    }

    async fn existing_rank(
        &self,
        recommendation_id: Uuid,
        draw_number: i32,
    ) -> anyhow::Result<Option<u8>> {
        Ok(self
            .matches
            .read()
            .await
            .get(&(recommendation_id, draw_number))
            .map(|m| m.rank))
    }

    async fn insert_match(&self, record: &MatchRecord) -> anyhow::Result<bool> {
        let mut matches = self.matches.write().await;
        let key = (record.recommendation_id, record.draw_number);
        if matches.contains_key(&key) {
            return Ok(false);
        }
        matches.insert(key, record.clone());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::testing::RecordingNotifier;
    use chrono::TimeZone;

    fn draw() -> DrawResult {
        DrawResult {
            draw_number: 1205,
            draw_date: NaiveDate::from_ymd_opt(2026, 1, 3).unwrap(),
            numbers: vec![1, 2, 3, 4, 5, 6],
            bonus_number: 10,
        }
    }

    fn rec(numbers: [u8; 6], day: u32, created: DateTime<Utc>) -> StoredRecommendation {
        StoredRecommendation {
            id: Uuid::new_v4(),
            user_key: "anon".to_string(),
            target_day: NaiveDate::from_ymd_opt(2026, 1, day).unwrap(),
            created_at: created,
            set_index: 0,
            numbers: numbers.to_vec(),
        }
    }

    fn morning_of(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, day, 0, 30, 0).unwrap()
    }

    async fn seeded() -> Arc<MemoryMatchRepository> {
        let repo = Arc::new(MemoryMatchRepository::new());
        repo.add_draw(draw()).await;
        for numbers in [
            [1, 2, 3, 4, 5, 6],
            [1, 2, 3, 4, 5, 10],
            [1, 2, 3, 4, 5, 9],
            [1, 2, 3, 4, 20, 21],
            [1, 2, 3, 40, 41, 42],
            [1, 2, 30, 31, 32, 33],
        ] {
            repo.add_recommendation(rec(numbers, 2, morning_of(2))).await;
        }
        repo
    }

    fn evaluator(repo: Arc<MemoryMatchRepository>) -> RankEvaluator {
        RankEvaluator::new(repo, Arc::new(EngineConfig::default()))
    }

    #[tokio::test]
    async fn classifies_every_prize_tier() {
        let repo = seeded().await;
        let out = evaluator(repo.clone()).evaluate_draw(1205).await.unwrap();

        for rank in 1..=5 {
            assert_eq!(out.counts.get(rank), 1, "rank {rank}");
        }
        assert_eq!(out.evaluated, 6);
        assert_eq!(out.created, 6);
        assert_eq!(repo.match_count().await, 6);
    }

    #[tokio::test]
    async fn rerun_creates_no_new_records() {
        let repo = seeded().await;
        let ev = evaluator(repo.clone());
        let first = ev.evaluate_draw(1205).await.unwrap();
        let second = ev.evaluate_draw(1205).await.unwrap();

        assert_eq!(first.counts, second.counts);
        assert_eq!(second.created, 0);
        assert_eq!(repo.match_count().await, 6);
    }

    #[tokio::test]
    async fn unknown_draw_yields_zero_counts() {
        let repo = seeded().await;
        let out = evaluator(repo.clone()).evaluate_draw(9999).await.unwrap();
        assert_eq!(out.counts, RankCounts::new());
        assert_eq!(out.evaluated, 0);
        assert_eq!(repo.match_count().await, 0);
    }

    #[tokio::test]
    async fn respects_target_day_and_local_cutoff() {
        let repo = Arc::new(MemoryMatchRepository::new());
        repo.add_draw(draw()).await;
        // 19:59 KST on the draw date
        repo.add_recommendation(rec(
            [1, 2, 3, 4, 5, 6],
            3,
            Utc.with_ymd_and_hms(2026, 1, 3, 10, 59, 0).unwrap(),
        ))
        .await;
        // 20:01 KST on the draw date
        repo.add_recommendation(rec(
            [1, 2, 3, 4, 5, 6],
            3,
            Utc.with_ymd_and_hms(2026, 1, 3, 11, 1, 0).unwrap(),
        ))
        .await;
        // targeted at the following day
        repo.add_recommendation(rec([1, 2, 3, 4, 5, 6], 4, morning_of(3)))
            .await;

        let out = evaluator(repo).evaluate_draw(1205).await.unwrap();
        assert_eq!(out.evaluated, 1);
        assert_eq!(out.counts.get(1), 1);
    }

    #[tokio::test]
    async fn sends_summary_when_notifier_is_set() {
        let repo = seeded().await;
        let notifier = Arc::new(RecordingNotifier::default());
        evaluator(repo)
            .with_notifier(notifier.clone())
            .evaluate_draw(1205)
            .await
            .unwrap();
        let messages = notifier.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("Draw 1205"));
    }
}
