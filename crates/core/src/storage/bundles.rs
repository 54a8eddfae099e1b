use super::{to_db_numbers, PgStore};
use crate::cache::BundleStore;
use crate::domain::recommendation::{BundleKey, RecommendationBundle};
use anyhow::Context;

#[async_trait::async_trait]
impl BundleStore for PgStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn load(&self, key: &BundleKey) -> anyhow::Result<Option<RecommendationBundle>> {
        let row: Option<(serde_json::Value,)> = sqlx::query_as(
            "SELECT bundle FROM daily_bundles WHERE target_day = $1 AND user_key = $2",
        )
        .persistent(false)
        .bind(key.day)
        .bind(&key.identity)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("select daily_bundles failed ({key})"))?;

        row.map(|(value,)| {
            serde_json::from_value(value).with_context(|| format!("invalid stored bundle ({key})"))
        })
        .transpose()
    }

    /// Bundle and its per-set rows are written in one transaction.
    async fn persist(&self, bundle: &RecommendationBundle) -> anyhow::Result<()> {
        let value = serde_json::to_value(bundle).context("bundle serialize failed")?;
        let mut tx = self.pool.begin().await.context("begin transaction failed")?;

        sqlx::query(
            "INSERT INTO daily_bundles (target_day, user_key, provenance, bundle, created_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (target_day, user_key) DO UPDATE \
               SET provenance = EXCLUDED.provenance, bundle = EXCLUDED.bundle, updated_at = now()",
        )
        .bind(bundle.generated_for)
        .bind(&bundle.user_key)
        .bind(bundle.provenance.as_str())
        .bind(value)
        .bind(bundle.created_at)
        .execute(&mut *tx)
        .await
        .context("upsert daily_bundles failed")?;

        for (idx, numbers) in bundle.sets.iter().enumerate() {
            upsert_set(&mut tx, bundle, idx as i32, numbers).await?;
        }

        sqlx::query(
            "DELETE FROM recommendations WHERE target_day = $1 AND user_key = $2 AND set_index >= $3",
        )
        .bind(bundle.generated_for)
        .bind(&bundle.user_key)
        .bind(bundle.sets.len() as i32)
        .execute(&mut *tx)
        .await
        .context("trim recommendations failed")?;

        tx.commit().await.context("commit transaction failed")?;
        Ok(())
    }
}

async fn upsert_set(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    bundle: &RecommendationBundle,
    set_index: i32,
    numbers: &[u8],
) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO recommendations (id, user_key, target_day, set_index, numbers, provenance, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         ON CONFLICT (target_day, user_key, set_index) DO UPDATE \
           SET numbers = EXCLUDED.numbers, provenance = EXCLUDED.provenance",
    )
    .bind(uuid::Uuid::new_v4())
    .bind(&bundle.user_key)
    .bind(bundle.generated_for)
    .bind(set_index)
    .bind(to_db_numbers(numbers))
    .bind(bundle.provenance.as_str())
    .bind(bundle.created_at)
    .execute(&mut **tx)
    .await
    .context("upsert recommendations failed")?;

    Ok(())
}
