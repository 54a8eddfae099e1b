use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;

const SLACK_TIMEOUT_SECS: u64 = 10;

/// Best-effort outbound alerts. Sending never blocks the caller and never reports failure.
pub trait Notifier: Send + Sync {
    fn send(&self, text: &str);
}

/// Writes alerts to the log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, text: &str) {
        tracing::info!(text, "notification");
    }
}

/// Posts `{"text": ...}` to a Slack incoming webhook from a spawned task.
#[derive(Debug, Clone)]
pub struct SlackNotifier {
    http: reqwest::Client,
    webhook_url: String,
}

impl SlackNotifier {
    pub fn new(webhook_url: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(SLACK_TIMEOUT_SECS))
            .build()
            .context("failed to build slack http client")?;
        Ok(Self {
            http,
            webhook_url: webhook_url.into(),
        })
    }

    async fn post(&self, text: String) -> anyhow::Result<()> {
        self.http
            .post(&self.webhook_url)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

impl Notifier for SlackNotifier {
    fn send(&self, text: &str) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no async runtime; dropping slack notification");
            return;
        };
        let this = self.clone();
        let text = text.to_string();
        handle.spawn(async move {
            if let Err(err) = this.post(text).await {
                tracing::error!(error = %err, "failed to send slack notification");
            }
        });
    }
}

/// Slack when a webhook is configured, otherwise log-only.
pub fn from_webhook(webhook_url: Option<&str>) -> Arc<dyn Notifier> {
    match webhook_url.map(str::trim).filter(|s| !s.is_empty()) {
        Some(url) => match SlackNotifier::new(url) {
            Ok(n) => Arc::new(n),
            Err(err) => {
                tracing::warn!(error = %err, "slack notifier unavailable; logging notifications");
                Arc::new(LogNotifier)
            }
        },
        None => {
            tracing::info!("SLACK_WEBHOOK_URL not set; logging notifications");
            Arc::new(LogNotifier)
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_webhook_is_swallowed() {
        let n = SlackNotifier::new("http://127.0.0.1:9/hook").unwrap();
        n.send("hello");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[test]
    fn send_outside_runtime_does_not_panic() {
        let n = SlackNotifier::new("http://127.0.0.1:9/hook").unwrap();
        n.send("hello");
    }
}
