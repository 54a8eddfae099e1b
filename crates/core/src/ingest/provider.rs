use crate::config::{env_parse, Settings};
use crate::domain::contract::ProviderDrawPayload;
use crate::domain::draw::DrawResult;
use crate::domain::pool::NumberPool;
use crate::ingest::DrawSource;
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_PATH: &str = "/common.do";
const DEFAULT_RETRIES: u32 = 3;

/// Fetches official draw results one draw at a time from a JSON endpoint
/// (`GET {base}{path}?method=getLottoNumber&drwNo=N`).
#[derive(Debug, Clone)]
pub struct HttpJsonDrawProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    path: String,
    retries: u32,
    pool: NumberPool,
}

impl HttpJsonDrawProvider {
    pub fn from_settings(settings: &Settings, pool: NumberPool) -> Result<Self> {
        let base_url = settings.require_data_provider_base_url()?.to_string();
        let api_key = settings.data_provider_api_key.clone();

        let timeout_secs =
            env_parse::<u64>("DATA_PROVIDER_TIMEOUT_SECS").unwrap_or(DEFAULT_TIMEOUT_SECS);
        let retries = env_parse::<u32>("DATA_PROVIDER_RETRIES")
            .unwrap_or(DEFAULT_RETRIES)
            .max(1);

        let path = std::env::var("DATA_PROVIDER_DRAW_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PATH.to_string());

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build draw provider http client")?;

        Ok(Self {
            http,
            base_url,
            api_key,
            path,
            retries,
            pool,
        })
    }

    fn url(&self) -> String {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };

        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            headers.insert("x-api-key", HeaderValue::from_str(api_key)?);
        }
        Ok(headers)
    }

    async fn fetch_once(&self, draw_number: i32) -> Result<(ProviderDrawPayload, Value)> {
        let res = self
            .http
            .get(self.url())
            .headers(self.headers()?)
            .query(&[
                ("method", "getLottoNumber".to_string()),
                ("drwNo", draw_number.to_string()),
            ])
            .send()
            .await
            .context("draw provider request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read draw provider response")?;
        let raw_json = serde_json::from_str::<Value>(&text)
            .with_context(|| format!("draw provider response is not valid JSON: {text}"))?;

        if !status.is_success() {
            anyhow::bail!("draw provider HTTP {status}: {raw_json}");
        }

        let parsed = serde_json::from_value::<ProviderDrawPayload>(raw_json.clone())
            .context("failed to parse draw provider response")?;
        Ok((parsed, raw_json))
    }

    /// The draw, or `None` when the provider has not published it yet.
    pub async fn fetch_draw(&self, draw_number: i32) -> Result<Option<DrawResult>> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.fetch_once(draw_number).await {
                Ok((payload, raw)) => {
                    return payload
                        .validate_and_into_draw(draw_number, &self.pool)
                        .with_context(|| format!("invalid draw payload: {raw}"));
                }
                Err(err) => {
                    if attempt >= self.retries {
                        return Err(err);
                    }
                    let backoff = Duration::from_secs(1 << (attempt - 1));
                    tracing::warn!(attempt, draw_number, ?backoff, error = %err, "draw provider fetch failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl DrawSource for HttpJsonDrawProvider {
    async fn load_draw(&self, draw_number: i32) -> Result<Option<DrawResult>> {
        self.fetch_draw(draw_number).await
    }
}
