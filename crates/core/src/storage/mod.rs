pub mod bundles;
pub mod draws;
pub mod lock;
pub mod matches;

use crate::domain::pool::NumberSet;
use anyhow::Context;

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}

/// Postgres-backed bundle store, history, draw source and match repository.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: sqlx::PgPool,
}

impl PgStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &sqlx::PgPool {
        &self.pool
    }
}

fn to_db_numbers(numbers: &[u8]) -> Vec<i16> {
    numbers.iter().map(|&n| i16::from(n)).collect()
}

fn from_db_numbers(numbers: Vec<i16>) -> anyhow::Result<NumberSet> {
    numbers
        .into_iter()
        .map(|n| u8::try_from(n).with_context(|| format!("stored number out of range: {n}")))
        .collect()
}
