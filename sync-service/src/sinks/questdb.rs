use std::time::Duration;

use meter_client::domain::{StatisticMetadata, StatisticRecord};
use sqlx::{postgres::PgPool, Postgres, QueryBuilder};

use crate::pipeline::{StatisticsSink, SyncError};

/// Writes statistics over QuestDB's Postgres wire protocol.
///
/// The `energy_statistics` table is expected to be created with
/// `DEDUP UPSERT KEYS(ts, statistic_id)` so a re-import replaces rows.
pub struct QuestDbStatisticsSink {
    pool: PgPool,
    batch_size: usize,
    max_retries: u32,
    retry_backoff: Duration,
}

impl QuestDbStatisticsSink {
    pub fn new(pool: PgPool, batch_size: usize, max_retries: u32, retry_backoff: Duration) -> Self {
        Self {
            pool,
            batch_size: batch_size.max(1),
            max_retries,
            retry_backoff,
        }
    }

    async fn flush_batch(
        &self,
        metadata: &StatisticMetadata,
        batch: &[StatisticRecord],
    ) -> Result<(), SyncError> {
        let mut attempt: u32 = 0;
        loop {
            match self.insert_batch(metadata, batch).await {
                Ok(()) => {
                    metrics::counter!("questdb_ingested_records_total").increment(batch.len() as u64);
                    return Ok(());
                }
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    let sleep_for = self.retry_backoff * attempt;
                    tracing::warn!(
                        error = %e,
                        attempt,
                        statistic_id = %metadata.statistic_id,
                        "questdb statistics insert failed, retrying with backoff"
                    );
                    tokio::time::sleep(sleep_for).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "questdb statistics insert failed, giving up");
                    metrics::counter!("statistics_sink_errors_total").increment(1);
                    return Err(SyncError::Sink(e.to_string()));
                }
            }
        }
    }

    async fn insert_batch(
        &self,
        metadata: &StatisticMetadata,
        batch: &[StatisticRecord],
    ) -> Result<(), sqlx::Error> {
        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO energy_statistics (ts, statistic_id, unit, state, sum) ",
        );

        builder.push_values(batch, |mut b, r| {
            b.push_bind(r.start)
                .push_bind(&metadata.statistic_id)
                .push_bind(&metadata.unit_of_measurement)
                .push_bind(r.state)
                .push_bind(r.sum);
        });

        builder.build().execute(&self.pool).await.map(|_| ())
    }
}

#[async_trait::async_trait]
impl StatisticsSink for QuestDbStatisticsSink {
    async fn submit(
        &self,
        metadata: &StatisticMetadata,
        records: &[StatisticRecord],
    ) -> Result<(), SyncError> {
        for chunk in records.chunks(self.batch_size) {
            self.flush_batch(metadata, chunk).await?;
        }
        Ok(())
    }
}
