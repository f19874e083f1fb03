pub mod memory;
pub mod push;
pub mod questdb;
pub mod questdb_ilp;

pub use memory::MemoryStatisticsSink;
pub use push::{HttpPushSink, ReadingPush};
pub use questdb::QuestDbStatisticsSink;
pub use questdb_ilp::QuestDbIlpStatisticsSink;

use anyhow::Context;
use meter_client::domain::{StatisticMetadata, StatisticRecord};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::net::SocketAddr;

use crate::{
    config::{AppConfig, SinkKind},
    pipeline::{StatisticsSink, SyncError},
};

/// The statistics sink selected by `[sink].kind`.
pub enum ConfiguredSink {
    Ilp(QuestDbIlpStatisticsSink),
    Pgwire(QuestDbStatisticsSink),
    Memory(MemoryStatisticsSink),
}

impl ConfiguredSink {
    /// Build the sink. The pgwire pool is returned too so callers can read
    /// back stored statistics.
    pub async fn from_config(cfg: &AppConfig) -> anyhow::Result<(Self, Option<PgPool>)> {
        let sink_cfg = &cfg.sink;
        match sink_cfg.kind {
            SinkKind::Memory => Ok((Self::Memory(MemoryStatisticsSink::default()), None)),
            SinkKind::Ilp => {
                let qdb = cfg.questdb.as_ref().context("[questdb] section is required for the ilp sink")?;
                let addr: SocketAddr = qdb
                    .ilp_tcp_addr
                    .parse()
                    .map_err(|e| anyhow::anyhow!("invalid questdb.ilp_tcp_addr: {e}"))?;
                Ok((
                    Self::Ilp(QuestDbIlpStatisticsSink::new(
                        addr,
                        sink_cfg.batch_size,
                        sink_cfg.max_retries,
                        sink_cfg.retry_backoff(),
                    )),
                    None,
                ))
            }
            SinkKind::Pgwire => {
                let qdb = cfg.questdb.as_ref().context("[questdb] section is required for the pgwire sink")?;
                let pool = PgPoolOptions::new()
                    .max_connections(qdb.max_connections)
                    .connect(&qdb.uri)
                    .await
                    .context("connecting to QuestDB over pgwire")?;
                Ok((
                    Self::Pgwire(QuestDbStatisticsSink::new(
                        pool.clone(),
                        sink_cfg.batch_size,
                        sink_cfg.max_retries,
                        sink_cfg.retry_backoff(),
                    )),
                    Some(pool),
                ))
            }
        }
    }
}

#[async_trait::async_trait]
impl StatisticsSink for ConfiguredSink {
    async fn submit(
        &self,
        metadata: &StatisticMetadata,
        records: &[StatisticRecord],
    ) -> Result<(), SyncError> {
        match self {
            Self::Ilp(s) => s.submit(metadata, records).await,
            Self::Pgwire(s) => s.submit(metadata, records).await,
            Self::Memory(s) => s.submit(metadata, records).await,
        }
    }
}
