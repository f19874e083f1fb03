use meter_client::domain::{MetricKind, Reading};
use time::{macros::datetime, Duration, OffsetDateTime, UtcOffset};

/// Why a reading was rejected by [`validate_reading`].
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Rejected {
    #[error("value must be non-negative, got {0}")]
    NegativeValue(f64),
    #[error("value is not a finite number")]
    NotFinite,
    #[error("timestamp {0} out of allowed range")]
    TimestampOutOfRange(OffsetDateTime),
}

/// Pure validation of a single `Reading`.
///
/// Rules:
/// - value must be finite and non-negative (the running sum never decreases).
/// - ts must be within a broad sanity window [2000-01-01, 2100-01-01].
pub fn validate_reading(r: &Reading) -> Result<(), Rejected> {
    if !r.value.is_finite() {
        return Err(Rejected::NotFinite);
    }
    if r.value < 0.0 {
        return Err(Rejected::NegativeValue(r.value));
    }

    let min_ts = datetime!(2000-01-01 00:00:00 UTC);
    let max_ts = datetime!(2100-01-01 00:00:00 UTC);

    if r.ts < min_ts || r.ts > max_ts {
        return Err(Rejected::TimestampOutOfRange(r.ts));
    }

    Ok(())
}

/// Drop readings that fail validation, counting each rejection.
pub fn retain_valid(kind: MetricKind, readings: Vec<Reading>) -> Vec<Reading> {
    readings
        .into_iter()
        .filter(|r| match validate_reading(r) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(stream = %kind, ts = %r.ts, error = %e, "dropping invalid reading");
                metrics::counter!("sync_readings_rejected_total", "stream" => kind.as_str()).increment(1);
                false
            }
        })
        .collect()
}

/// Start of the UTC hour containing `ts`.
pub fn truncate_to_hour(ts: OffsetDateTime) -> OffsetDateTime {
    let ts = ts.to_offset(UtcOffset::UTC);
    ts - Duration::seconds(i64::from(ts.minute()) * 60 + i64::from(ts.second()))
        - Duration::nanoseconds(i64::from(ts.nanosecond()))
}

/// Collapse readings into one reading per UTC hour.
///
/// Buckets are keyed by the hour-truncated timestamp and carry the summed
/// value. Hours with no input produce no bucket. Input that is already
/// hourly comes back unchanged.
pub fn aggregate_hourly(mut readings: Vec<Reading>) -> Vec<Reading> {
    if !readings.windows(2).all(|w| w[0].ts <= w[1].ts) {
        readings.sort_by_key(|r| r.ts);
    }

    let mut out: Vec<Reading> = Vec::new();
    let mut current: Option<Reading> = None;

    for r in readings {
        let hour = truncate_to_hour(r.ts);
        match current.as_mut() {
            Some(bucket) if bucket.ts == hour => bucket.value += r.value,
            _ => {
                if let Some(done) = current.take() {
                    out.push(done);
                }
                current = Some(Reading::new(hour, r.value));
            }
        }
    }

    // Trailing bucket is emitted even if the hour may still be filling up.
    if let Some(done) = current {
        out.push(done);
    }

    out
}
