use meter_client::domain::Reading;
use time::{Date, OffsetDateTime};

use super::stream::MeterStream;
use crate::{
    pipeline::SyncError,
    sources::{build_request, powershaper::readings_for, Aggregate, MeterApi},
    transform::{aggregate_hourly, retain_valid},
};

/// Keep the readings the stream has not imported yet, in order.
///
/// That is every bucket strictly after `last_imported`, led by the bucket at
/// `last_imported` itself when its value differs from `last_state` (an hour
/// that was still filling when it was stored). If nothing qualifies the
/// upstream has nothing new and the result is empty.
pub fn select_new(readings: Vec<Reading>, last_imported: Option<OffsetDateTime>, last_state: f64) -> Vec<Reading> {
    let Some(last) = last_imported else {
        return readings;
    };

    match readings.last() {
        Some(newest) if newest.ts >= last => readings
            .into_iter()
            .filter(|r| r.ts > last || (r.ts == last && r.value != last_state))
            .collect(),
        _ => Vec::new(),
    }
}

/// Fetch `[stream.latest_date, today]` and return the readings the stream
/// has not imported yet. Does not modify the stream.
pub async fn poll_new<A>(
    api: &A,
    stream: &MeterStream,
    today: Date,
    aggregate: Aggregate,
) -> Result<Vec<Reading>, SyncError>
where
    A: MeterApi + ?Sized,
{
    let kind = stream.kind();
    let start = stream.latest_date();
    // Upstream dates can run ahead of a lagging local clock.
    let end = today.max(start);

    let request = build_request(kind, stream.account_id(), start, end, aggregate)?;
    let records = api.fetch(&request, stream.credential()).await?;

    if records.is_empty() {
        tracing::debug!(stream = %kind, %start, %end, "poll returned no records");
        return Ok(Vec::new());
    }

    let buckets = aggregate_hourly(retain_valid(kind, readings_for(kind, &records)?));
    Ok(select_new(buckets, stream.last_imported(), stream.last_state()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::accumulate;
    use crate::sources::RawRecord;
    use crate::sync::test_support::{gas_stream, StaticApi};
    use time::macros::{date, datetime};

    fn reading(ts: OffsetDateTime) -> Reading {
        Reading::new(ts, 1.0)
    }

    #[test]
    fn select_new_filters_already_imported() {
        let readings = vec![
            reading(datetime!(2023-05-02 08:00:00 UTC)),
            reading(datetime!(2023-05-02 09:00:00 UTC)),
            reading(datetime!(2023-05-02 10:00:00 UTC)),
        ];

        let fresh = select_new(readings, Some(datetime!(2023-05-02 09:00:00 UTC)), 1.0);
        assert_eq!(fresh, vec![reading(datetime!(2023-05-02 10:00:00 UTC))]);
    }

    #[test]
    fn select_new_reemits_a_last_bucket_that_grew() {
        let readings = vec![
            reading(datetime!(2023-05-02 08:00:00 UTC)),
            Reading::new(datetime!(2023-05-02 09:00:00 UTC), 2.0),
        ];

        let fresh = select_new(readings, Some(datetime!(2023-05-02 09:00:00 UTC)), 1.0);
        assert_eq!(fresh, vec![Reading::new(datetime!(2023-05-02 09:00:00 UTC), 2.0)]);
    }

    #[test]
    fn select_new_is_empty_when_upstream_is_stale() {
        let readings = vec![
            reading(datetime!(2023-05-02 08:00:00 UTC)),
            reading(datetime!(2023-05-02 09:00:00 UTC)),
        ];
        assert!(select_new(readings, Some(datetime!(2023-05-02 09:00:00 UTC)), 1.0).is_empty());
    }

    #[test]
    fn select_new_without_history_keeps_everything() {
        let readings = vec![reading(datetime!(2023-05-02 08:00:00 UTC))];
        assert_eq!(select_new(readings.clone(), None, 0.0), readings);
    }

    fn imported_stream() -> MeterStream {
        let mut s = gas_stream(date!(2023 - 05 - 01), date!(2023 - 05 - 02));
        s.commit_import(
            &accumulate(&[Reading::new(datetime!(2023-05-02 09:00:00 UTC), 5.0)], 0.0),
            datetime!(2023-05-02 12:00:00 UTC),
        );
        s
    }

    #[tokio::test]
    async fn poll_requests_from_latest_date_to_today() {
        let api = StaticApi::new(vec![
            RawRecord::energy(datetime!(2023-05-02 09:00:00 UTC), 5.0),
            RawRecord::energy(datetime!(2023-05-02 10:00:00 UTC), 1.0),
        ]);
        let stream = imported_stream();

        let fresh = poll_new(&api, &stream, date!(2023 - 05 - 04), Aggregate::Hour)
            .await
            .unwrap();

        assert_eq!(fresh, vec![Reading::new(datetime!(2023-05-02 10:00:00 UTC), 1.0)]);
        let req = &api.requests()[0];
        assert_eq!(req.start, date!(2023 - 05 - 02));
        assert_eq!(req.end, date!(2023 - 05 - 04));
    }

    #[tokio::test]
    async fn stale_poll_returns_nothing_and_leaves_stream_alone() {
        let api = StaticApi::new(vec![RawRecord::energy(datetime!(2023-05-02 09:00:00 UTC), 5.0)]);
        let stream = imported_stream();
        let before = (stream.sum(), stream.last_imported());

        let fresh = poll_new(&api, &stream, date!(2023 - 05 - 02), Aggregate::Hour)
            .await
            .unwrap();

        assert!(fresh.is_empty());
        assert_eq!((stream.sum(), stream.last_imported()), before);
    }

    #[tokio::test]
    async fn empty_response_is_no_new_data() {
        let api = StaticApi::new(Vec::new());
        let fresh = poll_new(&api, &imported_stream(), date!(2023 - 05 - 03), Aggregate::Hour)
            .await
            .unwrap();
        assert!(fresh.is_empty());
    }

    #[tokio::test]
    async fn clock_behind_upstream_does_not_invert_range() {
        let api = StaticApi::new(Vec::new());
        poll_new(&api, &imported_stream(), date!(2023 - 05 - 01), Aggregate::Hour)
            .await
            .unwrap();
        let req = &api.requests()[0];
        assert_eq!(req.start, req.end);
    }
}
