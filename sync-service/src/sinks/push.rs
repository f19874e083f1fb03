use std::time::Duration;

use anyhow::Context;
use meter_client::domain::{MetricKind, StatisticRecord};
use time::format_description::well_known::Rfc3339;

use crate::pipeline::SyncError;

/// Secondary per-interval notification channel.
///
/// Pushes are fire-and-forget: a failure is logged and counted, and never
/// reaches the import path.
#[async_trait::async_trait]
pub trait ReadingPush: Send + Sync {
    async fn push(&self, kind: MetricKind, record: &StatisticRecord) -> Result<(), SyncError>;
}

/// Push every record in order, swallowing failures.
pub async fn push_all(push: &dyn ReadingPush, kind: MetricKind, records: &[StatisticRecord]) {
    let mut failed = 0usize;
    for record in records {
        if let Err(e) = push.push(kind, record).await {
            failed += 1;
            metrics::counter!("push_failures_total", "stream" => kind.as_str()).increment(1);
            tracing::debug!(stream = %kind, start = %record.start, error = %e, "push failed");
        }
    }
    if failed > 0 {
        tracing::warn!(stream = %kind, failed, total = records.len(), "some interval pushes failed");
    }
}

/// POSTs `{stream, value, timestamp}` JSON to a cloud endpoint.
#[derive(Debug, Clone)]
pub struct HttpPushSink {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpPushSink {
    pub fn new(endpoint: String, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building push HTTP client")?;
        Ok(Self { http, endpoint })
    }
}

pub fn push_body(kind: MetricKind, record: &StatisticRecord) -> Result<serde_json::Value, SyncError> {
    let timestamp = record
        .start
        .format(&Rfc3339)
        .map_err(|e| SyncError::MalformedResponse(format!("unformattable timestamp: {e}")))?;

    Ok(serde_json::json!({
        "stream": kind.as_str(),
        "value": record.state,
        "timestamp": timestamp,
    }))
}

#[async_trait::async_trait]
impl ReadingPush for HttpPushSink {
    async fn push(&self, kind: MetricKind, record: &StatisticRecord) -> Result<(), SyncError> {
        let body = push_body(kind, record)?;
        let resp = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SyncError::Upstream {
                status: status.as_u16(),
                message: "push rejected".to_string(),
            });
        }
        Ok(())
    }
}
