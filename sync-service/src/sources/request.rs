use meter_client::domain::{ApiStream, MetricKind};
use serde::Deserialize;
use time::Date;

use crate::pipeline::SyncError;

/// Server-side aggregation requested from the meter data endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregate {
    /// Raw (sub-hourly) readings.
    None,
    #[default]
    Hour,
}

impl Aggregate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregate::None => "none",
            Aggregate::Hour => "hour",
        }
    }
}

/// Everything needed to issue one meter data request, independent of the
/// HTTP client and base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub account_id: String,
    pub stream: ApiStream,
    pub start: Date,
    pub end: Date,
    pub aggregate: Aggregate,
}

impl RequestDescriptor {
    /// Path relative to the data base URL: `<consent_uuid>/<gas|electricity>`.
    pub fn path(&self) -> String {
        format!("{}/{}", self.account_id, self.stream.as_str())
    }

    pub fn query(&self) -> Vec<(&'static str, String)> {
        vec![
            ("start", self.start.to_string()),
            ("end", self.end.to_string()),
            ("aggregate", self.aggregate.as_str().to_string()),
            ("tz", "UTC".to_string()),
        ]
    }

    /// Full URL against `base_url`, query string included.
    pub fn url(&self, base_url: &str) -> String {
        let query = self
            .query()
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}/{}?{}", base_url.trim_end_matches('/'), self.path(), query)
    }
}

/// Build the request for `kind` over the inclusive date range `[start, end]`.
pub fn build_request(
    kind: MetricKind,
    account_id: &str,
    start: Date,
    end: Date,
    aggregate: Aggregate,
) -> Result<RequestDescriptor, SyncError> {
    if start > end {
        return Err(SyncError::InvalidRange { start, end });
    }

    Ok(RequestDescriptor {
        account_id: account_id.to_string(),
        stream: kind.api_stream(),
        start,
        end,
        aggregate,
    })
}
