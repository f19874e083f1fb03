use time::OffsetDateTime;

use super::MetricKind;

/// One hourly row in the long-term statistics store.
///
/// `sum` is the running total since the first imported reading of the stream.
/// There is no reset marker; the total never resets.
#[derive(Debug, Clone, Copy, PartialEq, sqlx::FromRow, serde::Serialize, serde::Deserialize)]
pub struct StatisticRecord {
    #[sqlx(rename = "ts")]
    pub start: OffsetDateTime,
    pub state: f64,
    pub sum: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StatisticMetadata {
    pub statistic_id: String,
    pub unit_of_measurement: String,
    pub has_sum: bool,
    pub has_mean: bool,
}

impl StatisticMetadata {
    pub fn for_kind(kind: MetricKind) -> Self {
        Self {
            statistic_id: kind.statistic_id(),
            unit_of_measurement: kind.unit().to_string(),
            has_sum: true,
            has_mean: false,
        }
    }
}
