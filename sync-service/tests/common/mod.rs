#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

use meter_client::domain::{ApiStream, StatisticMetadata, StatisticRecord};
use sync_service::{
    sinks::MemoryStatisticsSink,
    sources::{AccountInfo, Credential, DateRange, MeterApi, RawRecord, RequestDescriptor},
    StatisticsSink, SyncError,
};
use time::{Date, Duration, OffsetDateTime, UtcOffset};

pub const ACCOUNT: &str = "consent-1";

/// Fake provider backed by an in-memory dataset per API stream.
///
/// Requests are answered with the records whose UTC date falls inside the
/// requested range, the way the real endpoint filters by `start`/`end`.
#[derive(Default)]
pub struct ScriptedApi {
    data: Mutex<HashMap<ApiStream, Vec<RawRecord>>>,
    failing: Mutex<HashSet<ApiStream>>,
    requests: Mutex<Vec<RequestDescriptor>>,
}

impl ScriptedApi {
    pub fn push(&self, stream: ApiStream, records: impl IntoIterator<Item = RawRecord>) {
        self.data.lock().unwrap().entry(stream).or_default().extend(records);
    }

    pub fn fail(&self, stream: ApiStream) {
        self.failing.lock().unwrap().insert(stream);
    }

    pub fn recover(&self, stream: ApiStream) {
        self.failing.lock().unwrap().remove(&stream);
    }

    pub fn requests(&self) -> Vec<RequestDescriptor> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl MeterApi for ScriptedApi {
    async fn fetch_account(&self, _credential: &Credential) -> Result<AccountInfo, SyncError> {
        Err(SyncError::MalformedResponse("not scripted".into()))
    }

    async fn fetch(
        &self,
        request: &RequestDescriptor,
        _credential: &Credential,
    ) -> Result<Vec<RawRecord>, SyncError> {
        self.requests.lock().unwrap().push(request.clone());

        if self.failing.lock().unwrap().contains(&request.stream) {
            return Err(SyncError::Upstream {
                status: 503,
                message: "scripted outage".into(),
            });
        }

        let data = self.data.lock().unwrap();
        Ok(data
            .get(&request.stream)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| {
                        let day = r.time.to_offset(UtcOffset::UTC).date();
                        day >= request.start && day <= request.end
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Memory sink that can be told to reject submissions.
#[derive(Default)]
pub struct FlakySink {
    pub inner: MemoryStatisticsSink,
    down: AtomicBool,
}

impl FlakySink {
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl StatisticsSink for FlakySink {
    async fn submit(
        &self,
        metadata: &StatisticMetadata,
        records: &[StatisticRecord],
    ) -> Result<(), SyncError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(SyncError::Sink("store unavailable".into()));
        }
        self.inner.submit(metadata, records).await
    }
}

/// `count` hourly energy records of `kwh` each, starting at `from`.
pub fn hourly_energy(from: OffsetDateTime, count: i64, kwh: f64) -> Vec<RawRecord> {
    (0..count)
        .map(|i| RawRecord::energy(from + Duration::hours(i), kwh))
        .collect()
}

/// Electricity records carrying both energy and carbon.
pub fn hourly_electricity(from: OffsetDateTime, count: i64, kwh: f64, kg: f64) -> Vec<RawRecord> {
    (0..count)
        .map(|i| RawRecord {
            time: from + Duration::hours(i),
            energy_kwh: Some(kwh),
            carbon_kg: Some(kg),
        })
        .collect()
}

pub fn account(earliest: Date, latest: Date) -> AccountInfo {
    let range = DateRange { earliest, latest };
    AccountInfo {
        consent_uuid: ACCOUNT.to_string(),
        electricity: range,
        gas: range,
    }
}

pub fn credential() -> Credential {
    Credential::new("test-token")
}
