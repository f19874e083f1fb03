use time::OffsetDateTime;

/// A single data point reported by the metering API.
///
/// `value` is kWh for energy streams and kg for the carbon stream.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Reading {
    pub ts: OffsetDateTime,
    pub value: f64,
}

impl Reading {
    pub fn new(ts: OffsetDateTime, value: f64) -> Self {
        Self { ts, value }
    }
}
