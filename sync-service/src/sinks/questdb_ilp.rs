use std::{net::SocketAddr, time::Duration};

use meter_client::domain::{StatisticMetadata, StatisticRecord};
use time::OffsetDateTime;
use tokio::{io::AsyncWriteExt, net::TcpStream};

use crate::pipeline::{StatisticsSink, SyncError};

const MEASUREMENT: &str = "energy_statistics";

/// Escape measurement/tag keys/tag values/field keys for ILP.
///
/// ILP requires escaping commas, spaces and equals with a backslash.
fn ilp_escape_ident(s: &str, out: &mut String) {
    for ch in s.chars() {
        if matches!(ch, ',' | ' ' | '=') {
            out.push('\\');
        }
        out.push(ch);
    }
}

fn push_tag(out: &mut String, key: &str, value: &str) {
    out.push(',');
    ilp_escape_ident(key, out);
    out.push('=');
    ilp_escape_ident(value, out);
}

fn ts_to_unix_nanos(ts: OffsetDateTime) -> i128 {
    ts.unix_timestamp_nanos()
}

/// Row identity: one row per statistic per hour, whatever its values.
fn event_id(statistic_id: &str, start: OffsetDateTime) -> String {
    let mut h = blake3::Hasher::new();
    h.update(&(statistic_id.len() as u32).to_le_bytes());
    h.update(statistic_id.as_bytes());
    h.update(&ts_to_unix_nanos(start).to_le_bytes());
    h.finalize().to_hex().to_string()
}

/// One ILP line: `energy_statistics,<tags> state=..,sum=.. <nanos>`.
pub fn write_ilp_line(metadata: &StatisticMetadata, record: &StatisticRecord, out: &mut String) {
    out.push_str(MEASUREMENT);

    push_tag(out, "event_id", &event_id(&metadata.statistic_id, record.start));
    push_tag(out, "statistic_id", &metadata.statistic_id);
    push_tag(out, "unit", &metadata.unit_of_measurement);

    out.push_str(" state=");
    out.push_str(&record.state.to_string());
    out.push_str(",sum=");
    out.push_str(&record.sum.to_string());

    out.push(' ');
    out.push_str(&ts_to_unix_nanos(record.start).to_string());
}

/// Streams statistics to QuestDB over ILP/TCP, one connection per batch.
pub struct QuestDbIlpStatisticsSink {
    addr: SocketAddr,
    batch_size: usize,
    max_retries: u32,
    retry_backoff: Duration,
}

impl QuestDbIlpStatisticsSink {
    pub fn new(addr: SocketAddr, batch_size: usize, max_retries: u32, retry_backoff: Duration) -> Self {
        Self {
            addr,
            batch_size: batch_size.max(1),
            max_retries,
            retry_backoff,
        }
    }

    async fn connect(&self) -> Result<TcpStream, SyncError> {
        let stream = TcpStream::connect(self.addr)
            .await
            .map_err(|e| SyncError::Sink(format!("failed to connect to QuestDB ILP: {e}")))?;
        let _ = stream.set_nodelay(true);
        Ok(stream)
    }

    fn encode_batch(metadata: &StatisticMetadata, batch: &[StatisticRecord]) -> Vec<u8> {
        // Heuristic capacity: ~200 bytes per line (the event id alone is 64).
        let mut s = String::with_capacity(batch.len().saturating_mul(200));
        for r in batch {
            write_ilp_line(metadata, r, &mut s);
            s.push('\n');
        }
        s.into_bytes()
    }

    async fn flush_batch(&self, conn: &mut TcpStream, payload: &[u8], records: usize) -> Result<(), SyncError> {
        let mut attempt: u32 = 0;
        loop {
            match conn.write_all(payload).await {
                Ok(()) => {
                    metrics::counter!("questdb_ingested_records_total").increment(records as u64);
                    metrics::counter!("questdb_ilp_bytes_total").increment(payload.len() as u64);
                    return Ok(());
                }
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        error = %e,
                        attempt,
                        "QuestDB ILP flush failed, reconnecting and retrying"
                    );
                    metrics::counter!("questdb_ilp_retry_total").increment(1);

                    tokio::time::sleep(self.retry_backoff * attempt).await;
                    *conn = self.connect().await?;
                }
                Err(e) => {
                    tracing::error!(error = %e, "QuestDB ILP flush failed, giving up");
                    metrics::counter!("statistics_sink_errors_total").increment(1);
                    return Err(SyncError::Sink(format!("ilp write failed: {e}")));
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl StatisticsSink for QuestDbIlpStatisticsSink {
    async fn submit(
        &self,
        metadata: &StatisticMetadata,
        records: &[StatisticRecord],
    ) -> Result<(), SyncError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut conn = self.connect().await?;
        for chunk in records.chunks(self.batch_size) {
            let payload = Self::encode_batch(metadata, chunk);
            self.flush_batch(&mut conn, &payload, chunk.len()).await?;
        }

        // Best-effort flush.
        let _ = conn.shutdown().await;
        Ok(())
    }
}
