//! Per-stream sync state machine.
//!
//! Each tick visits every stream once, concurrently. A stream is either
//! backfilled (first import), re-synced (full import every
//! `refresh_interval`), or polled for new readings. Any error is contained to
//! the stream that raised it; the stream keeps its previous state and the
//! next tick retries.

use std::{collections::BTreeMap, future::Future, sync::Arc, time::Instant};

use futures::future::join_all;
use meter_client::domain::{MetricKind, StatisticRecord};
use time::{Duration, OffsetDateTime, UtcOffset};
use tokio::{sync::Mutex, time::MissedTickBehavior};

use super::{
    importer::import_history,
    poller::poll_new,
    stream::{MeterStream, SyncAction},
};
use crate::{
    pipeline::{accumulate, StatisticsSink, SyncError},
    sinks::push::{push_all, ReadingPush},
    sources::{Aggregate, Credential, MeterApi},
};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Age of the last full import after which the next tick re-imports everything.
    pub refresh_interval: Duration,
    pub aggregate: Aggregate,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::days(7),
            aggregate: Aggregate::Hour,
        }
    }
}

#[derive(Debug)]
pub enum TickOutcome {
    Backfilled { records: usize },
    Resynced { records: usize },
    Polled { records: usize },
    NoNewData,
    Suspended,
    /// The previous invocation for this stream is still running.
    Busy,
    Failed(SyncError),
}

#[derive(Debug)]
pub struct StreamTick {
    pub stream_id: String,
    pub kind: MetricKind,
    pub outcome: TickOutcome,
}

struct StreamSlot {
    kind: MetricKind,
    stream: Mutex<MeterStream>,
}

pub struct SyncScheduler<A, K> {
    api: A,
    sink: K,
    push: Option<Arc<dyn ReadingPush>>,
    config: SchedulerConfig,
    streams: BTreeMap<String, StreamSlot>,
}

impl<A, K> SyncScheduler<A, K>
where
    A: MeterApi,
    K: StatisticsSink,
{
    pub fn new(api: A, sink: K, config: SchedulerConfig) -> Self {
        Self {
            api,
            sink,
            push: None,
            config,
            streams: BTreeMap::new(),
        }
    }

    pub fn with_push(mut self, push: Arc<dyn ReadingPush>) -> Self {
        self.push = Some(push);
        self
    }

    /// Register a stream. A stream with the same id is replaced.
    pub fn add_stream(&mut self, stream: MeterStream) {
        self.streams.insert(
            stream.id(),
            StreamSlot {
                kind: stream.kind(),
                stream: Mutex::new(stream),
            },
        );
    }

    pub fn stream_ids(&self) -> Vec<String> {
        self.streams.keys().cloned().collect()
    }

    /// Copy of a stream's current state.
    pub async fn snapshot(&self, stream_id: &str) -> Option<MeterStream> {
        match self.streams.get(stream_id) {
            Some(slot) => Some(slot.stream.lock().await.clone()),
            None => None,
        }
    }

    /// Install a new credential on every stream, lifting auth suspensions.
    pub async fn replace_credential(&self, credential: Credential) {
        for slot in self.streams.values() {
            slot.stream.lock().await.replace_credential(credential.clone());
        }
    }

    /// Evaluate every stream once.
    pub async fn tick(&self, now: OffsetDateTime) -> Vec<StreamTick> {
        join_all(
            self.streams
                .iter()
                .map(|(id, slot)| self.tick_guarded(id, slot, now)),
        )
        .await
    }

    async fn tick_guarded(&self, id: &str, slot: &StreamSlot, now: OffsetDateTime) -> StreamTick {
        let kind = slot.kind;
        let Ok(mut stream) = slot.stream.try_lock() else {
            tracing::warn!(stream = %kind, "previous sync still running, skipping tick");
            return StreamTick {
                stream_id: id.to_string(),
                kind,
                outcome: TickOutcome::Busy,
            };
        };

        let started = Instant::now();
        let outcome = match self.tick_stream(&mut stream, now).await {
            Ok(outcome) => outcome,
            Err(e) => {
                record_failure(&mut stream, &e);
                TickOutcome::Failed(e)
            }
        };

        metrics::histogram!("sync_tick_duration_seconds", "stream" => kind.as_str())
            .record(started.elapsed().as_secs_f64());
        metrics::gauge!("sync_stream_sum", "stream" => kind.as_str()).set(stream.sum());

        StreamTick {
            stream_id: id.to_string(),
            kind,
            outcome,
        }
    }

    /// Run one state transition for `stream`. The stream is only modified
    /// after the sink has accepted the batch.
    pub async fn tick_stream(
        &self,
        stream: &mut MeterStream,
        now: OffsetDateTime,
    ) -> Result<TickOutcome, SyncError> {
        let kind = stream.kind();
        let action = stream.next_action(now, self.config.refresh_interval);

        match action {
            SyncAction::Suspended => {
                tracing::debug!(
                    stream = %kind,
                    reason = stream.suspension_reason().unwrap_or_default(),
                    "stream suspended"
                );
                Ok(TickOutcome::Suspended)
            }
            SyncAction::Backfill | SyncAction::Resync => {
                let batch = import_history(
                    &self.api,
                    stream,
                    stream.earliest_date(),
                    stream.latest_date(),
                    self.config.aggregate,
                )
                .await?;

                self.sink.submit(&stream.metadata(), &batch.records).await?;
                if batch.is_empty() && action == SyncAction::Resync {
                    tracing::warn!(stream = %kind, "re-sync returned no data, keeping previous sum");
                }
                stream.commit_import(&batch, now);
                self.forward(kind, &batch.records);

                let records = batch.records.len();
                metrics::counter!("sync_records_imported_total", "stream" => kind.as_str())
                    .increment(records as u64);
                tracing::info!(
                    stream = %kind,
                    records,
                    sum = stream.sum(),
                    resync = action == SyncAction::Resync,
                    "historical import committed"
                );

                Ok(if action == SyncAction::Backfill {
                    TickOutcome::Backfilled { records }
                } else {
                    TickOutcome::Resynced { records }
                })
            }
            SyncAction::Poll => {
                let today = now.to_offset(UtcOffset::UTC).date();
                let fresh = poll_new(&self.api, stream, today, self.config.aggregate).await?;
                if fresh.is_empty() {
                    tracing::debug!(stream = %kind, "no new data");
                    return Ok(TickOutcome::NoNewData);
                }

                let batch = accumulate(&fresh, stream.poll_seed(&fresh));
                self.sink.submit(&stream.metadata(), &batch.records).await?;
                stream.commit_poll(&batch);
                self.forward(kind, &batch.records);

                let records = batch.records.len();
                metrics::counter!("sync_records_imported_total", "stream" => kind.as_str())
                    .increment(records as u64);
                tracing::info!(stream = %kind, records, sum = stream.sum(), "new readings committed");

                Ok(TickOutcome::Polled { records })
            }
        }
    }

    fn forward(&self, kind: MetricKind, records: &[StatisticRecord]) {
        let Some(push) = self.push.clone() else {
            return;
        };
        if records.is_empty() {
            return;
        }
        let records = records.to_vec();
        tokio::spawn(async move {
            push_all(push.as_ref(), kind, &records).await;
        });
    }

    /// Tick every `interval` until `shutdown` resolves. The first tick runs
    /// immediately. A tick in progress always runs to completion.
    pub async fn run<F>(&self, interval: std::time::Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tracing::info!(
            streams = self.streams.len(),
            interval_secs = interval.as_secs(),
            "sync scheduler started"
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("sync scheduler stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let report = self.tick(OffsetDateTime::now_utc()).await;
                    let failed = report
                        .iter()
                        .filter(|t| matches!(t.outcome, TickOutcome::Failed(_)))
                        .count();
                    tracing::debug!(streams = report.len(), failed, "tick finished");
                }
            }
        }
    }
}

fn record_failure(stream: &mut MeterStream, e: &SyncError) {
    let kind = stream.kind();
    metrics::counter!("sync_tick_errors_total", "stream" => kind.as_str(), "kind" => e.kind())
        .increment(1);

    match e {
        SyncError::Auth(_) => {
            tracing::error!(stream = %kind, error = %e, "credential rejected, suspending stream until reconfigured");
            stream.suspend(e.to_string());
        }
        SyncError::RateLimit | SyncError::Upstream { .. } | SyncError::Transport(_) => {
            tracing::warn!(stream = %kind, error = %e, "sync failed, retrying next tick");
        }
        SyncError::MalformedResponse(_) => {
            tracing::warn!(stream = %kind, error = %e, "unusable response, skipping this tick");
        }
        SyncError::InvalidRange { .. } => {
            tracing::error!(stream = %kind, error = %e, "sync misconfigured, will keep failing until fixed");
        }
        SyncError::Sink(_) => {
            tracing::error!(stream = %kind, error = %e, "statistics write failed, stream not advanced");
        }
    }
}
