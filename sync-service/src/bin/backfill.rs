use anyhow::{bail, Result};
use meter_client::domain::MetricKind;
use std::env;
use sync_service::{app, config::AppConfig, observability, sync::TickOutcome};
use time::OffsetDateTime;

/// Run a single sync tick for every stream and exit.
///
/// With no stored state every stream is backfilled from its earliest date.
/// Point `SYNC_CONFIG` at a backfill-specific file to pick a different sink.
///
/// usage: backfill [gas|electricity|elec_carbon ...]
#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let mut kinds = env::args()
        .skip(1)
        .map(|arg| arg.parse::<MetricKind>())
        .collect::<Result<Vec<_>, _>>()?;
    if kinds.is_empty() {
        kinds = MetricKind::ALL.to_vec();
    }

    let cfg = AppConfig::load()?;
    let now = OffsetDateTime::now_utc();
    let app::App { scheduler, pool } = app::build_for(&cfg, now, &kinds).await?;

    let report = scheduler.tick(now).await;

    let mut failed = Vec::new();
    for tick in &report {
        match &tick.outcome {
            TickOutcome::Failed(e) => {
                tracing::error!(stream = %tick.stream_id, error = %e, fatal = e.is_fatal(), "backfill failed");
                failed.push(tick.stream_id.clone());
            }
            outcome => {
                tracing::info!(stream = %tick.stream_id, ?outcome, "backfill finished");
            }
        }
    }

    if let Some(pool) = &pool {
        for id in scheduler.stream_ids() {
            let Some(stream) = scheduler.snapshot(&id).await else {
                continue;
            };
            let from = stream.earliest_date().midnight().assume_utc();
            let stored = meter_client::db::load_statistics(pool, &id, from, now).await?;
            tracing::info!(
                stream = %id,
                rows = stored.len(),
                sum = stored.last().map(|r| r.sum),
                "stored statistics"
            );
        }
    }

    if !failed.is_empty() {
        bail!("backfill failed for: {}", failed.join(", "));
    }
    Ok(())
}
