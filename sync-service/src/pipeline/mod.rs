use std::sync::Arc;

use meter_client::domain::{Reading, StatisticMetadata, StatisticRecord};
use time::{Date, OffsetDateTime};

#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    #[error("metering api rejected the credential (status {0})")]
    Auth(u16),
    #[error("metering api rate limit exceeded")]
    RateLimit,
    #[error("metering api returned status {status}: {message}")]
    Upstream { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("invalid date range: start {start} is after end {end}")]
    InvalidRange { start: Date, end: Date },
    #[error("sink error: {0}")]
    Sink(String),
}

impl SyncError {
    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Auth(_) => "auth",
            SyncError::RateLimit => "rate_limit",
            SyncError::Upstream { .. } => "upstream",
            SyncError::Transport(_) => "transport",
            SyncError::MalformedResponse(_) => "malformed_response",
            SyncError::InvalidRange { .. } => "invalid_range",
            SyncError::Sink(_) => "sink",
        }
    }

    /// Errors that will not clear up by waiting for the next tick.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Auth(_) | SyncError::InvalidRange { .. })
    }
}

/// Destination for computed statistics.
///
/// A batch is handed over only once it is fully computed. Re-submitting a
/// record with the same `(statistic_id, start)` must overwrite the stored row.
#[async_trait::async_trait]
pub trait StatisticsSink: Send + Sync {
    async fn submit(
        &self,
        metadata: &StatisticMetadata,
        records: &[StatisticRecord],
    ) -> Result<(), SyncError>;
}

#[async_trait::async_trait]
impl<T> StatisticsSink for Arc<T>
where
    T: StatisticsSink + ?Sized,
{
    async fn submit(
        &self,
        metadata: &StatisticMetadata,
        records: &[StatisticRecord],
    ) -> Result<(), SyncError> {
        (**self).submit(metadata, records).await
    }
}

/// Result of folding an ordered run of readings into a running sum.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportBatch {
    pub records: Vec<StatisticRecord>,
    pub final_sum: f64,
    pub last_timestamp: Option<OffsetDateTime>,
}

impl ImportBatch {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Fold `readings` (ascending by timestamp) into statistics records starting
/// from `seed`. Each record carries the running sum including itself.
pub fn accumulate(readings: &[Reading], seed: f64) -> ImportBatch {
    let mut sum = seed;
    let mut records = Vec::with_capacity(readings.len());

    for r in readings {
        sum += r.value;
        records.push(StatisticRecord {
            start: r.ts,
            state: r.value,
            sum,
        });
    }

    ImportBatch {
        last_timestamp: records.last().map(|r| r.start),
        records,
        final_sum: sum,
    }
}
