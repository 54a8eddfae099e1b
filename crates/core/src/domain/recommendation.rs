use crate::domain::pool::NumberSet;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of a daily bundle: local calendar day plus the requester's opaque token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BundleKey {
    pub day: NaiveDate,
    pub identity: String,
}

impl BundleKey {
    pub fn new(day: NaiveDate, identity: impl Into<String>) -> Self {
        Self {
            day,
            identity: identity.into(),
        }
    }
}

impl fmt::Display for BundleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.day.format("%Y%m%d"), self.identity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Fast,
    Refined,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Fast => "fast",
            Provenance::Refined => "refined",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationBundle {
    pub generated_for: NaiveDate,
    pub user_key: String,
    pub sets: Vec<NumberSet>,
    pub confidence_scores: Vec<f64>,
    pub provenance: Provenance,
    pub created_at: DateTime<Utc>,
    pub valid_until: DateTime<FixedOffset>,
}

impl RecommendationBundle {
    pub fn key(&self) -> BundleKey {
        BundleKey::new(self.generated_for, self.user_key.clone())
    }

    /// Same key, creation time and validity boundary; new sets and scores tagged `refined`.
    pub fn refined(&self, sets: Vec<NumberSet>, confidence_scores: Vec<f64>) -> anyhow::Result<Self> {
        anyhow::ensure!(
            sets.len() == confidence_scores.len(),
            "refined sets/scores length mismatch: {} vs {}",
            sets.len(),
            confidence_scores.len()
        );
        anyhow::ensure!(!sets.is_empty(), "refined bundle must hold at least one set");

        Ok(Self {
            sets,
            confidence_scores,
            provenance: Provenance::Refined,
            ..self.clone()
        })
    }
}

/// One set of a persisted bundle, as seen by the rank evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecommendation {
    pub id: Uuid,
    pub user_key: String,
    pub target_day: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub set_index: i32,
    pub numbers: NumberSet,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bundle() -> RecommendationBundle {
        let tz = FixedOffset::east_opt(9 * 3600).unwrap();
        RecommendationBundle {
            generated_for: NaiveDate::from_ymd_opt(2026, 1, 3).unwrap(),
            user_key: "anon-1".to_string(),
            sets: vec![vec![1, 2, 3, 4, 5, 6]],
            confidence_scores: vec![0.45],
            provenance: Provenance::Fast,
            created_at: Utc.with_ymd_and_hms(2026, 1, 3, 1, 0, 0).unwrap(),
            valid_until: tz.with_ymd_and_hms(2026, 1, 4, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn refined_keeps_key_and_boundary() {
        let fast = bundle();
        let refined = fast
            .refined(vec![vec![7, 8, 9, 10, 11, 12]], vec![0.6])
            .unwrap();
        assert_eq!(refined.key(), fast.key());
        assert_eq!(refined.valid_until, fast.valid_until);
        assert_eq!(refined.created_at, fast.created_at);
        assert_eq!(refined.provenance, Provenance::Refined);
    }

    #[test]
    fn refined_rejects_mismatched_scores() {
        assert!(bundle().refined(vec![vec![1, 2, 3, 4, 5, 6]], vec![]).is_err());
    }

    #[test]
    fn serializes_provenance_as_snake_case() {
        let v = serde_json::to_value(bundle()).unwrap();
        assert_eq!(v["provenance"], "fast");
        assert_eq!(v["generated_for"], "2026-01-03");
    }

    #[test]
    fn key_displays_as_day_and_identity() {
        assert_eq!(bundle().key().to_string(), "20260103:anon-1");
    }
}
