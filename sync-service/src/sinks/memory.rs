use std::{
    collections::{BTreeMap, HashMap},
    sync::{Mutex, MutexGuard, PoisonError},
};

use meter_client::domain::{StatisticMetadata, StatisticRecord};
use time::OffsetDateTime;

use crate::pipeline::{StatisticsSink, SyncError};

#[derive(Debug, Default)]
struct Series {
    metadata: Option<StatisticMetadata>,
    rows: BTreeMap<OffsetDateTime, StatisticRecord>,
}

/// Process-local statistics store with overwrite-by-`start` semantics.
#[derive(Debug, Default)]
pub struct MemoryStatisticsSink {
    series: Mutex<HashMap<String, Series>>,
    submissions: Mutex<usize>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStatisticsSink {
    /// Stored rows for `statistic_id`, ascending by start.
    pub fn series(&self, statistic_id: &str) -> Vec<StatisticRecord> {
        lock(&self.series)
            .get(statistic_id)
            .map(|s| s.rows.values().copied().collect())
            .unwrap_or_default()
    }

    pub fn metadata(&self, statistic_id: &str) -> Option<StatisticMetadata> {
        lock(&self.series)
            .get(statistic_id)
            .and_then(|s| s.metadata.clone())
    }

    /// Number of non-empty batches accepted so far.
    pub fn submissions(&self) -> usize {
        *lock(&self.submissions)
    }
}

#[async_trait::async_trait]
impl StatisticsSink for MemoryStatisticsSink {
    async fn submit(
        &self,
        metadata: &StatisticMetadata,
        records: &[StatisticRecord],
    ) -> Result<(), SyncError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut all = lock(&self.series);
        let series = all.entry(metadata.statistic_id.clone()).or_default();
        series.metadata = Some(metadata.clone());
        for r in records {
            series.rows.insert(r.start, *r);
        }
        drop(all);

        *lock(&self.submissions) += 1;
        tracing::debug!(
            statistic_id = %metadata.statistic_id,
            records = records.len(),
            "statistics stored in memory"
        );
        Ok(())
    }
}
