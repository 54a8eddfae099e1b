use crate::domain::draw::DrawResult;
use crate::domain::pool::NumberPool;
use anyhow::ensure;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Draw payload as published by the results provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDrawPayload {
    #[serde(rename = "returnValue")]
    pub return_value: String,
    #[serde(rename = "drwNo", default)]
    pub draw_number: Option<i32>,
    #[serde(rename = "drwNoDate", default)]
    pub draw_date: Option<NaiveDate>,
    #[serde(rename = "drwtNo1", default)]
    pub n1: Option<u8>,
    #[serde(rename = "drwtNo2", default)]
    pub n2: Option<u8>,
    #[serde(rename = "drwtNo3", default)]
    pub n3: Option<u8>,
    #[serde(rename = "drwtNo4", default)]
    pub n4: Option<u8>,
    #[serde(rename = "drwtNo5", default)]
    pub n5: Option<u8>,
    #[serde(rename = "drwtNo6", default)]
    pub n6: Option<u8>,
    #[serde(rename = "bnusNo", default)]
    pub bonus: Option<u8>,
}

impl ProviderDrawPayload {
    /// `Ok(None)` when the provider reports the draw as not (yet) published.
    pub fn validate_and_into_draw(
        self,
        expected_draw_number: i32,
        pool: &NumberPool,
    ) -> anyhow::Result<Option<DrawResult>> {
        if self.return_value != "success" {
            return Ok(None);
        }

        let draw_number = self.draw_number.unwrap_or(expected_draw_number);
        ensure!(
            draw_number == expected_draw_number,
            "provider draw number mismatch: expected {expected_draw_number}, got {draw_number}"
        );

        let Some(draw_date) = self.draw_date else {
            anyhow::bail!("draw {draw_number}: missing drwNoDate");
        };

        let mut numbers = Vec::with_capacity(6);
        for (i, n) in [self.n1, self.n2, self.n3, self.n4, self.n5, self.n6]
            .into_iter()
            .enumerate()
        {
            match n {
                Some(n) => numbers.push(n),
                None => anyhow::bail!("draw {draw_number}: missing drwtNo{}", i + 1),
            }
        }
        numbers.sort_unstable();

        let Some(bonus_number) = self.bonus else {
            anyhow::bail!("draw {draw_number}: missing bnusNo");
        };

        let draw = DrawResult {
            draw_number,
            draw_date,
            numbers,
            bonus_number,
        };
        draw.validate(pool)?;
        Ok(Some(draw))
    }
}
