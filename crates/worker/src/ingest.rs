use lotto_core::domain::draw::DrawResult;
use lotto_core::ingest::DrawSource;
use lotto_core::storage::PgStore;

const MAX_SPAN: i32 = 5000;

/// Where ingested draws are written.
#[async_trait::async_trait]
pub trait DrawSink: Send + Sync {
    /// Returns `false` when the draw was already stored.
    async fn save(&self, draw: &DrawResult) -> anyhow::Result<bool>;
}

#[async_trait::async_trait]
impl DrawSink for PgStore {
    async fn save(&self, draw: &DrawResult) -> anyhow::Result<bool> {
        self.upsert_draw(draw).await
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub fetched: usize,
    pub inserted: usize,
    /// Highest draw number seen, stored or already present.
    pub last_draw: Option<i32>,
}

/// Fetches draws `from..=to` in order, stopping at the first one the source has not published.
/// Without `to`, runs until that point (bounded by `MAX_SPAN`).
pub async fn ingest_draws(
    source: &dyn DrawSource,
    sink: &dyn DrawSink,
    from: i32,
    to: Option<i32>,
) -> anyhow::Result<IngestReport> {
    anyhow::ensure!(from >= 1, "--from must be >= 1 (got {from})");
    let to = to.unwrap_or(from.saturating_add(MAX_SPAN - 1));
    anyhow::ensure!(to >= from, "--to ({to}) must not be before --from ({from})");
    anyhow::ensure!(
        to - from < MAX_SPAN,
        "ingest span must be at most {MAX_SPAN} draws (got {})",
        to - from + 1
    );

    let mut report = IngestReport::default();
    for draw_number in from..=to {
        let Some(draw) = source.load_draw(draw_number).await? else {
            tracing::info!(draw_number, "draw not published yet; stopping");
            break;
        };
        report.fetched += 1;
        if sink.save(&draw).await? {
            report.inserted += 1;
        }
        report.last_draw = Some(draw_number);
        tracing::debug!(draw_number, %draw.draw_date, "draw ingested");
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use lotto_core::ingest::StaticDraws;
    use std::sync::Mutex;

    #[derive(Default)]
    struct VecSink(Mutex<Vec<i32>>);

    #[async_trait::async_trait]
    impl DrawSink for VecSink {
        async fn save(&self, draw: &DrawResult) -> anyhow::Result<bool> {
            let mut saved = self.0.lock().unwrap();
            if saved.contains(&draw.draw_number) {
                return Ok(false);
            }
            saved.push(draw.draw_number);
            Ok(true)
        }
    }

    fn draws(range: std::ops::RangeInclusive<i32>) -> StaticDraws {
        StaticDraws::new(range.map(|n| DrawResult {
            draw_number: n,
            draw_date: NaiveDate::from_ymd_opt(2026, 1, 3).unwrap(),
            numbers: vec![1, 2, 3, 4, 5, 6],
            bonus_number: 7,
        }))
    }

    #[tokio::test]
    async fn stops_at_first_unpublished_draw() {
        let sink = VecSink::default();
        let report = ingest_draws(&draws(1..=3), &sink, 1, None).await.unwrap();
        assert_eq!(report.fetched, 3);
        assert_eq!(report.inserted, 3);
        assert_eq!(report.last_draw, Some(3));
    }

    #[tokio::test]
    async fn rerun_inserts_nothing_new() {
        let sink = VecSink::default();
        let source = draws(1..=5);
        ingest_draws(&source, &sink, 2, Some(4)).await.unwrap();
        let again = ingest_draws(&source, &sink, 2, Some(4)).await.unwrap();
        assert_eq!(again.fetched, 3);
        assert_eq!(again.inserted, 0);
    }

    #[tokio::test]
    async fn rejects_inverted_range() {
        let sink = VecSink::default();
        assert!(ingest_draws(&draws(1..=3), &sink, 5, Some(2)).await.is_err());
    }
}
