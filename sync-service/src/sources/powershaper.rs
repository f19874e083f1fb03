use std::{fmt, sync::Arc, time::Duration};

use anyhow::Context;
use meter_client::domain::{MetricKind, Reading};
use serde::Deserialize;
use time::{macros::format_description, Date, OffsetDateTime};

use super::request::RequestDescriptor;
use crate::pipeline::SyncError;

pub const DEFAULT_AUTH_URL: &str = "https://app.powershaper.io/meters/api/v1/meters/";
pub const DEFAULT_DATA_BASE_URL: &str = "https://app.powershaper.io/meters/api/v1/meter/";

/// API token supplied by the account owner. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    fn header_value(&self) -> String {
        format!("Token {}", self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// One element of a meter data response.
///
/// Energy streams carry `energy_kwh`, the electricity stream also carries
/// `carbon_kg`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawRecord {
    #[serde(with = "time::serde::rfc3339")]
    pub time: OffsetDateTime,
    pub energy_kwh: Option<f64>,
    pub carbon_kg: Option<f64>,
}

impl RawRecord {
    pub fn energy(time: OffsetDateTime, kwh: f64) -> Self {
        Self {
            time,
            energy_kwh: Some(kwh),
            carbon_kg: None,
        }
    }

    pub fn value_for(&self, kind: MetricKind) -> Option<f64> {
        match kind {
            MetricKind::GasEnergy | MetricKind::ElectricityEnergy => self.energy_kwh,
            MetricKind::ElectricityCarbon => self.carbon_kg,
        }
    }
}

/// Select `kind`'s value from every record. A record lacking the field makes
/// the whole response unusable.
pub fn readings_for(kind: MetricKind, records: &[RawRecord]) -> Result<Vec<Reading>, SyncError> {
    records
        .iter()
        .map(|rec| {
            rec.value_for(kind)
                .map(|v| Reading::new(rec.time, v))
                .ok_or_else(|| {
                    SyncError::MalformedResponse(format!(
                        "record at {} has no '{}' field",
                        rec.time,
                        kind.value_field()
                    ))
                })
        })
        .collect()
}

/// Inclusive range of dates for which the provider holds data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub earliest: Date,
    pub latest: Date,
}

/// Account details returned by the auth endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub consent_uuid: String,
    pub electricity: DateRange,
    pub gas: DateRange,
}

impl AccountInfo {
    pub fn range_for(&self, kind: MetricKind) -> DateRange {
        match kind {
            MetricKind::GasEnergy => self.gas,
            MetricKind::ElectricityEnergy | MetricKind::ElectricityCarbon => self.electricity,
        }
    }
}

#[derive(Deserialize)]
struct AccountEntry {
    consent_uuid: String,
    range: AccountRange,
}

#[derive(Deserialize)]
struct AccountRange {
    earliest: String,
    latest: String,
}

fn parse_leading_date(s: &str) -> Result<Date, SyncError> {
    let day = s
        .get(..10)
        .ok_or_else(|| SyncError::MalformedResponse(format!("date '{s}' too short")))?;
    Date::parse(day, format_description!("[year]-[month]-[day]"))
        .map_err(|e| SyncError::MalformedResponse(format!("invalid date '{s}': {e}")))
}

impl TryFrom<&AccountRange> for DateRange {
    type Error = SyncError;

    fn try_from(r: &AccountRange) -> Result<Self, Self::Error> {
        Ok(DateRange {
            earliest: parse_leading_date(&r.earliest)?,
            latest: parse_leading_date(&r.latest)?,
        })
    }
}

/// Parse the auth endpoint body: element 0 describes electricity, element 1 gas.
pub fn parse_account(body: &[u8]) -> Result<AccountInfo, SyncError> {
    let entries: Vec<AccountEntry> = serde_json::from_slice(body)
        .map_err(|e| SyncError::MalformedResponse(format!("account json decode failed: {e}")))?;

    let [electricity, gas, ..] = entries.as_slice() else {
        return Err(SyncError::MalformedResponse(format!(
            "expected electricity and gas meters, got {} entries",
            entries.len()
        )));
    };

    Ok(AccountInfo {
        consent_uuid: electricity.consent_uuid.clone(),
        electricity: DateRange::try_from(&electricity.range)?,
        gas: DateRange::try_from(&gas.range)?,
    })
}

/// Access to the metering provider.
///
/// Implementations make exactly one outbound call per method and never retry.
#[async_trait::async_trait]
pub trait MeterApi: Send + Sync {
    async fn fetch_account(&self, credential: &Credential) -> Result<AccountInfo, SyncError>;

    /// Records in the requested range. An empty list means the provider has
    /// no data there yet and is not an error.
    async fn fetch(
        &self,
        request: &RequestDescriptor,
        credential: &Credential,
    ) -> Result<Vec<RawRecord>, SyncError>;
}

#[async_trait::async_trait]
impl<T> MeterApi for Arc<T>
where
    T: MeterApi + ?Sized,
{
    async fn fetch_account(&self, credential: &Credential) -> Result<AccountInfo, SyncError> {
        (**self).fetch_account(credential).await
    }

    async fn fetch(
        &self,
        request: &RequestDescriptor,
        credential: &Credential,
    ) -> Result<Vec<RawRecord>, SyncError> {
        (**self).fetch(request, credential).await
    }
}

/// Map an HTTP status to the error taxonomy. `Ok` for 2xx.
pub fn check_status(status: u16, body: &[u8]) -> Result<(), SyncError> {
    match status {
        200..=299 => Ok(()),
        401 | 403 => Err(SyncError::Auth(status)),
        426 | 429 => Err(SyncError::RateLimit),
        _ => Err(SyncError::Upstream {
            status,
            message: String::from_utf8_lossy(body).chars().take(200).collect(),
        }),
    }
}

/// reqwest-backed Powershaper client.
///
/// The token is passed per call; do not log it.
#[derive(Debug, Clone)]
pub struct HttpMeterApi {
    http: reqwest::Client,
    auth_url: String,
    data_base_url: String,
}

impl HttpMeterApi {
    pub fn new(auth_url: String, data_base_url: String, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            http,
            auth_url,
            data_base_url,
        })
    }

    async fn get(
        &self,
        url: &str,
        credential: &Credential,
    ) -> Result<Vec<u8>, SyncError> {
        metrics::counter!("sync_fetch_requests_total").increment(1);

        let resp = self
            .http
            .get(url)
            .header(reqwest::header::AUTHORIZATION, credential.header_value())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        let status = resp.status().as_u16();
        let body = resp
            .bytes()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        check_status(status, &body)?;
        Ok(body.to_vec())
    }
}

#[async_trait::async_trait]
impl MeterApi for HttpMeterApi {
    async fn fetch_account(&self, credential: &Credential) -> Result<AccountInfo, SyncError> {
        let body = self.get(&self.auth_url, credential).await?;
        parse_account(&body)
    }

    async fn fetch(
        &self,
        request: &RequestDescriptor,
        credential: &Credential,
    ) -> Result<Vec<RawRecord>, SyncError> {
        let body = self
            .get(&request.url(&self.data_base_url), credential)
            .await?;

        let records: Vec<RawRecord> = serde_json::from_slice(&body)
            .map_err(|e| SyncError::MalformedResponse(format!("meter data json decode failed: {e}")))?;

        tracing::debug!(
            path = %request.path(),
            start = %request.start,
            end = %request.end,
            records = records.len(),
            "fetched meter data"
        );
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::request::{build_request, Aggregate};
    use httpmock::prelude::*;
    use serde_json::json;
    use time::macros::{date, datetime};

    fn api(server: &MockServer) -> HttpMeterApi {
        HttpMeterApi::new(
            server.url("/meters/"),
            server.url("/meter/"),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn elec_request() -> RequestDescriptor {
        build_request(
            MetricKind::ElectricityCarbon,
            "consent-1",
            date!(2023 - 05 - 01),
            date!(2023 - 05 - 02),
            Aggregate::Hour,
        )
        .unwrap()
    }

    #[test]
    fn credential_is_redacted_in_debug_output() {
        let c = Credential::new("super-secret-token");
        assert_eq!(format!("{c:?}"), "Credential(***)");
    }

    #[test]
    fn status_mapping_follows_taxonomy() {
        assert!(check_status(200, b"").is_ok());
        assert!(matches!(check_status(403, b""), Err(SyncError::Auth(403))));
        assert!(matches!(check_status(426, b""), Err(SyncError::RateLimit)));
        assert!(matches!(
            check_status(502, b"bad gateway"),
            Err(SyncError::Upstream { status: 502, .. })
        ));
    }

    #[test]
    fn account_parsing_takes_dates_from_iso_prefix() {
        let body = json!([
            {"consent_uuid": "c-1", "range": {"earliest": "2022-11-01T00:00:00Z", "latest": "2023-05-01T23:30:00Z"}},
            {"consent_uuid": "c-1", "range": {"earliest": "2022-12-15T00:00:00Z", "latest": "2023-04-30T23:30:00Z"}}
        ]);

        let info = parse_account(body.to_string().as_bytes()).unwrap();
        assert_eq!(info.consent_uuid, "c-1");
        assert_eq!(info.electricity.earliest, date!(2022 - 11 - 01));
        assert_eq!(info.gas.latest, date!(2023 - 04 - 30));
        assert_eq!(info.range_for(MetricKind::ElectricityCarbon), info.electricity);
    }

    #[test]
    fn account_with_single_meter_is_malformed() {
        let body = json!([{"consent_uuid": "c-1", "range": {"earliest": "2022-11-01", "latest": "2023-05-01"}}]);
        assert!(matches!(
            parse_account(body.to_string().as_bytes()),
            Err(SyncError::MalformedResponse(_))
        ));
    }

    #[test]
    fn readings_select_value_key_by_kind() {
        let records = vec![RawRecord {
            time: datetime!(2023-05-02 09:00:00 UTC),
            energy_kwh: Some(1.2),
            carbon_kg: Some(0.3),
        }];

        let carbon = readings_for(MetricKind::ElectricityCarbon, &records).unwrap();
        assert_eq!(carbon[0].value, 0.3);
        let energy = readings_for(MetricKind::ElectricityEnergy, &records).unwrap();
        assert_eq!(energy[0].value, 1.2);
    }

    #[test]
    fn missing_value_key_is_malformed() {
        let records = vec![RawRecord::energy(datetime!(2023-05-02 09:00:00 UTC), 1.0)];
        assert!(matches!(
            readings_for(MetricKind::ElectricityCarbon, &records),
            Err(SyncError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn fetch_sends_token_and_query_and_parses_records() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/meter/consent-1/electricity")
                    .query_param("start", "2023-05-01")
                    .query_param("end", "2023-05-02")
                    .query_param("aggregate", "hour")
                    .query_param("tz", "UTC")
                    .header("Authorization", "Token tok");
                then.status(200).json_body(json!([
                    {"time": "2023-05-02T09:00:00Z", "energy_kwh": 1.0, "carbon_kg": 0.2},
                    {"time": "2023-05-02T10:00:00Z", "energy_kwh": 2.0, "carbon_kg": 0.4}
                ]));
            })
            .await;

        let records = api(&server)
            .fetch(&elec_request(), &Credential::new("tok"))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].time, datetime!(2023-05-02 10:00:00 UTC));
        assert_eq!(records[1].carbon_kg, Some(0.4));
    }

    #[tokio::test]
    async fn empty_list_is_not_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/meter/consent-1/electricity");
                then.status(200).json_body(json!([]));
            })
            .await;

        let records = api(&server)
            .fetch(&elec_request(), &Credential::new("tok"))
            .await
            .unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn forbidden_maps_to_auth_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/meter/consent-1/electricity");
                then.status(403).body("invalid token");
            })
            .await;

        let err = api(&server)
            .fetch(&elec_request(), &Credential::new("bad"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Auth(403)));
    }

    #[tokio::test]
    async fn upgrade_required_maps_to_rate_limit() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/meters/");
                then.status(426);
            })
            .await;

        let err = api(&server)
            .fetch_account(&Credential::new("tok"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::RateLimit));
    }

    #[tokio::test]
    async fn server_error_maps_to_upstream() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/meter/consent-1/electricity");
                then.status(500).body("boom");
            })
            .await;

        let err = api(&server)
            .fetch(&elec_request(), &Credential::new("tok"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Upstream { status: 500, .. }));
    }

    #[tokio::test]
    async fn garbage_body_maps_to_malformed_response() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/meter/consent-1/electricity");
                then.status(200).body("<html>maintenance</html>");
            })
            .await;

        let err = api(&server)
            .fetch(&elec_request(), &Credential::new("tok"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn connection_refused_maps_to_transport() {
        let api = HttpMeterApi::new(
            "http://127.0.0.1:1/meters/".to_string(),
            "http://127.0.0.1:1/meter/".to_string(),
            Duration::from_secs(2),
        )
        .unwrap();

        let err = api
            .fetch(&elec_request(), &Credential::new("tok"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Transport(_)));
    }

    #[tokio::test]
    async fn account_endpoint_round_trip() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/meters/").header("Authorization", "Token tok");
                then.status(200).json_body(json!([
                    {"consent_uuid": "c-9", "range": {"earliest": "2022-01-01T00:00:00Z", "latest": "2023-01-01T00:00:00Z"}},
                    {"consent_uuid": "c-9", "range": {"earliest": "2022-02-01T00:00:00Z", "latest": "2023-01-02T00:00:00Z"}}
                ]));
            })
            .await;

        let info = api(&server).fetch_account(&Credential::new("tok")).await.unwrap();
        assert_eq!(info.consent_uuid, "c-9");
        assert_eq!(info.gas.earliest, date!(2022 - 02 - 01));
    }
}
