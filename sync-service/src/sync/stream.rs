use meter_client::domain::{MetricKind, Reading, StatisticMetadata, StatisticRecord};
use time::{Date, Duration, OffsetDateTime, UtcOffset};

use crate::{
    pipeline::ImportBatch,
    sources::{AccountInfo, Credential, DateRange},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No historical import has completed yet.
    Uninitialized,
    /// History imported; `last_refresh` is when the last full import finished.
    Backfilled { last_refresh: OffsetDateTime },
}

/// What a tick should do with a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Backfill,
    Resync,
    Poll,
    /// Credential was rejected; wait for a new one.
    Suspended,
}

/// Sync state of one metric series for one account.
///
/// Only [`commit_import`](Self::commit_import) and
/// [`commit_poll`](Self::commit_poll) move `sum` and `last_imported`, and
/// they always move them together.
#[derive(Debug, Clone)]
pub struct MeterStream {
    kind: MetricKind,
    account_id: String,
    credential: Credential,
    earliest_date: Date,
    latest_date: Date,
    last_imported: Option<OffsetDateTime>,
    /// Stored `state` of the bucket at `last_imported`.
    last_state: f64,
    sum: f64,
    state: StreamState,
    suspended: Option<String>,
}

fn utc_date(ts: OffsetDateTime) -> Date {
    ts.to_offset(UtcOffset::UTC).date()
}

impl MeterStream {
    pub fn new(kind: MetricKind, account_id: impl Into<String>, credential: Credential, range: DateRange) -> Self {
        Self {
            kind,
            account_id: account_id.into(),
            credential,
            earliest_date: range.earliest,
            latest_date: range.latest,
            last_imported: None,
            last_state: 0.0,
            sum: 0.0,
            state: StreamState::Uninitialized,
            suspended: None,
        }
    }

    /// One stream per metric kind. Carbon shares the electricity date range.
    pub fn for_account(account: &AccountInfo, credential: &Credential) -> Vec<MeterStream> {
        MetricKind::ALL
            .iter()
            .map(|&kind| {
                MeterStream::new(
                    kind,
                    account.consent_uuid.clone(),
                    credential.clone(),
                    account.range_for(kind),
                )
            })
            .collect()
    }

    pub fn id(&self) -> String {
        self.kind.statistic_id()
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn unit(&self) -> &'static str {
        self.kind.unit()
    }

    pub fn metadata(&self) -> StatisticMetadata {
        StatisticMetadata::for_kind(self.kind)
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn earliest_date(&self) -> Date {
        self.earliest_date
    }

    pub fn latest_date(&self) -> Date {
        self.latest_date
    }

    pub fn last_imported(&self) -> Option<OffsetDateTime> {
        self.last_imported
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn last_state(&self) -> f64 {
        self.last_state
    }

    /// Running sum to fold `fresh` onto. When `fresh` starts by rewriting the
    /// bucket at `last_imported`, that bucket's stored state is taken back out
    /// first.
    pub fn poll_seed(&self, fresh: &[Reading]) -> f64 {
        match (fresh.first(), self.last_imported) {
            (Some(first), Some(last)) if first.ts == last => self.sum - self.last_state,
            _ => self.sum,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.is_some()
    }

    pub fn suspension_reason(&self) -> Option<&str> {
        self.suspended.as_deref()
    }

    pub fn next_action(&self, now: OffsetDateTime, refresh_interval: Duration) -> SyncAction {
        if self.suspended.is_some() {
            return SyncAction::Suspended;
        }
        match self.state {
            StreamState::Uninitialized => SyncAction::Backfill,
            StreamState::Backfilled { last_refresh } if now - last_refresh >= refresh_interval => {
                SyncAction::Resync
            }
            StreamState::Backfilled { .. } => SyncAction::Poll,
        }
    }

    /// Apply a full-range import. The batch's sum replaces the stream's sum.
    ///
    /// An empty batch leaves the previous sum and timestamp in place.
    pub fn commit_import(&mut self, batch: &ImportBatch, now: OffsetDateTime) {
        self.advance(batch);
        self.state = StreamState::Backfilled { last_refresh: now };
    }

    /// Apply readings folded on top of the current sum.
    pub fn commit_poll(&mut self, batch: &ImportBatch) {
        self.advance(batch);
    }

    fn advance(&mut self, batch: &ImportBatch) {
        let Some(last) = batch.records.last() else {
            return;
        };
        self.sum = batch.final_sum;
        self.last_imported = Some(last.start);
        self.last_state = last.state;
        self.latest_date = utc_date(last.start);
    }

    /// Continue from a statistic already present in the store instead of
    /// re-importing history.
    pub fn resume_from(&mut self, last: &StatisticRecord, now: OffsetDateTime) {
        self.sum = last.sum;
        self.last_imported = Some(last.start);
        self.last_state = last.state;
        self.latest_date = utc_date(last.start);
        self.state = StreamState::Backfilled { last_refresh: now };
    }

    pub fn suspend(&mut self, reason: impl Into<String>) {
        self.suspended = Some(reason.into());
    }

    /// Swap in a new credential and lift any suspension.
    pub fn replace_credential(&mut self, credential: Credential) {
        self.credential = credential;
        self.suspended = None;
    }
}
