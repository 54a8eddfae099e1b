use super::{from_db_numbers, to_db_numbers, PgStore};
use crate::domain::draw::{DrawResult, MatchRecord};
use crate::domain::recommendation::StoredRecommendation;
use crate::evaluator::MatchRepository;
use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

type RecommendationRow = (Uuid, String, NaiveDate, DateTime<Utc>, i32, Vec<i16>);

#[async_trait::async_trait]
impl MatchRepository for PgStore {
    async fn load_draw(&self, draw_number: i32) -> anyhow::Result<Option<DrawResult>> {
        self.fetch_draw(draw_number).await
    }

    async fn eligible_recommendations(
        &self,
        draw_date: NaiveDate,
        cutoff: DateTime<Utc>,
    ) -> anyhow::Result<Vec<StoredRecommendation>> {
        let rows: Vec<RecommendationRow> = sqlx::query_as(
            "SELECT id, user_key, target_day, created_at, set_index, numbers \
             FROM recommendations \
             WHERE target_day <= $1 AND created_at <= $2 \
             ORDER BY target_day, user_key, set_index",
        )
        .bind(draw_date)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .context("select eligible recommendations failed")?;

        rows.into_iter()
            .map(|(id, user_key, target_day, created_at, set_index, numbers)| {
                Ok(StoredRecommendation {
                    id,
                    user_key,
                    target_day,
                    created_at,
                    set_index,
                    numbers: from_db_numbers(numbers)?,
                })
            })
            .collect()
    }

    async fn existing_rank(
        &self,
        recommendation_id: Uuid,
        draw_number: i32,
    ) -> anyhow::Result<Option<u8>> {
        let row: Option<(i16,)> = sqlx::query_as(
            "SELECT rank FROM matches WHERE recommendation_id = $1 AND draw_number = $2",
        )
        .bind(recommendation_id)
        .bind(draw_number)
        .fetch_optional(&self.pool)
        .await
        .context("select matches failed")?;

        row.map(|(rank,)| u8::try_from(rank).with_context(|| format!("stored rank out of range: {rank}")))
            .transpose()
    }

    async fn insert_match(&self, record: &MatchRecord) -> anyhow::Result<bool> {
        let res = sqlx::query(
            "INSERT INTO matches (recommendation_id, draw_number, match_count, bonus_match, matched_numbers, rank) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (recommendation_id, draw_number) DO NOTHING",
        )
        .bind(record.recommendation_id)
        .bind(record.draw_number)
        .bind(i16::from(record.match_count))
        .bind(record.bonus_match)
        .bind(to_db_numbers(&record.matched_numbers))
        .bind(i16::from(record.rank))
        .execute(&self.pool)
        .await
        .context("insert matches failed")?;
        Ok(res.rows_affected() > 0)
    }
}
