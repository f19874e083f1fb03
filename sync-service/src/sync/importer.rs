use time::Date;

use super::stream::MeterStream;
use crate::{
    pipeline::{accumulate, ImportBatch, SyncError},
    sources::{build_request, powershaper::readings_for, Aggregate, MeterApi},
    transform::{aggregate_hourly, retain_valid},
};

/// Full-range imports always recompute the running sum from zero; the store
/// overwrites rows by `start`, so a repeated import replaces earlier sums.
pub const HISTORY_SEED: f64 = 0.0;

/// Fetch `[start, end]` for `stream` and turn it into hourly statistics.
///
/// Nothing is emitted unless the fetch succeeds; the stream itself is not
/// touched.
pub async fn import_history<A>(
    api: &A,
    stream: &MeterStream,
    start: Date,
    end: Date,
    aggregate: Aggregate,
) -> Result<ImportBatch, SyncError>
where
    A: MeterApi + ?Sized,
{
    let kind = stream.kind();
    let request = build_request(kind, stream.account_id(), start, end, aggregate)?;
    let records = api.fetch(&request, stream.credential()).await?;

    let readings = retain_valid(kind, readings_for(kind, &records)?);
    let buckets = aggregate_hourly(readings);

    tracing::debug!(
        stream = %kind,
        %start,
        %end,
        fetched = records.len(),
        buckets = buckets.len(),
        "historical range aggregated"
    );

    Ok(accumulate(&buckets, HISTORY_SEED))
}
