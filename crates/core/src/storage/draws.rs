use super::{from_db_numbers, to_db_numbers, PgStore};
use crate::domain::draw::DrawResult;
use crate::domain::pool::NumberSet;
use crate::ingest::{DrawArchive, DrawSource, HistorySource};
use anyhow::Context;
use chrono::NaiveDate;

type DrawRow = (i32, NaiveDate, Vec<i16>, i16);

fn draw_from_row((draw_number, draw_date, numbers, bonus): DrawRow) -> anyhow::Result<DrawResult> {
    Ok(DrawResult {
        draw_number,
        draw_date,
        numbers: from_db_numbers(numbers)?,
        bonus_number: u8::try_from(bonus)
            .with_context(|| format!("draw {draw_number} bonus out of range: {bonus}"))?,
    })
}

impl PgStore {
    /// Inserts a draw unless it is already stored. Returns whether a row was written.
    pub async fn upsert_draw(&self, draw: &DrawResult) -> anyhow::Result<bool> {
        let res = sqlx::query(
            "INSERT INTO draws (draw_number, draw_date, numbers, bonus_number) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (draw_number) DO NOTHING",
        )
        .bind(draw.draw_number)
        .bind(draw.draw_date)
        .bind(to_db_numbers(&draw.numbers))
        .bind(i16::from(draw.bonus_number))
        .execute(&self.pool)
        .await
        .with_context(|| format!("insert draws failed (draw_number={})", draw.draw_number))?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn latest_draw_number(&self) -> anyhow::Result<Option<i32>> {
        let row: (Option<i32>,) = sqlx::query_as("SELECT MAX(draw_number) FROM draws")
            .persistent(false)
            .fetch_one(&self.pool)
            .await
            .context("select latest draw failed")?;
        Ok(row.0)
    }

    pub async fn fetch_latest_draw(&self) -> anyhow::Result<Option<DrawResult>> {
        let row: Option<DrawRow> = sqlx::query_as(
            "SELECT draw_number, draw_date, numbers, bonus_number FROM draws \
             ORDER BY draw_number DESC LIMIT 1",
        )
        .persistent(false)
        .fetch_optional(&self.pool)
        .await
        .context("select latest draw row failed")?;
        row.map(draw_from_row).transpose()
    }

    pub async fn fetch_draw(&self, draw_number: i32) -> anyhow::Result<Option<DrawResult>> {
        let row: Option<DrawRow> = sqlx::query_as(
            "SELECT draw_number, draw_date, numbers, bonus_number FROM draws WHERE draw_number = $1",
        )
        .bind(draw_number)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("select draws failed (draw_number={draw_number})"))?;
        row.map(draw_from_row).transpose()
    }
}

#[async_trait::async_trait]
impl HistorySource for PgStore {
    async fn load_history(&self) -> anyhow::Result<Vec<NumberSet>> {
        let rows: Vec<(Vec<i16>,)> =
            sqlx::query_as("SELECT numbers FROM draws ORDER BY draw_number ASC")
                .fetch_all(&self.pool)
                .await
                .context("select draw history failed")?;
        rows.into_iter().map(|(n,)| from_db_numbers(n)).collect()
    }
}

#[async_trait::async_trait]
impl DrawSource for PgStore {
    async fn load_draw(&self, draw_number: i32) -> anyhow::Result<Option<DrawResult>> {
        self.fetch_draw(draw_number).await
    }
}

#[async_trait::async_trait]
impl DrawArchive for PgStore {
    async fn latest_draw(&self) -> anyhow::Result<Option<DrawResult>> {
        self.fetch_latest_draw().await
    }
}
