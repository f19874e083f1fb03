use std::{fmt, str::FromStr};

/// The three series tracked per account.
///
/// Carbon is not billed separately: it is read from the `carbon_kg` field of
/// the electricity meter's data, so it shares the electricity API stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    GasEnergy,
    ElectricityEnergy,
    ElectricityCarbon,
}

/// Stream identifiers understood by the metering API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiStream {
    Gas,
    Electricity,
}

impl ApiStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiStream::Gas => "gas",
            ApiStream::Electricity => "electricity",
        }
    }
}

impl fmt::Display for ApiStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl MetricKind {
    pub const ALL: [MetricKind; 3] = [
        MetricKind::GasEnergy,
        MetricKind::ElectricityEnergy,
        MetricKind::ElectricityCarbon,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::GasEnergy => "gas",
            MetricKind::ElectricityEnergy => "electricity",
            MetricKind::ElectricityCarbon => "elec_carbon",
        }
    }

    pub fn api_stream(&self) -> ApiStream {
        match self {
            MetricKind::GasEnergy => ApiStream::Gas,
            MetricKind::ElectricityEnergy | MetricKind::ElectricityCarbon => ApiStream::Electricity,
        }
    }

    /// JSON field carrying this kind's value in a meter data record.
    pub fn value_field(&self) -> &'static str {
        match self {
            MetricKind::GasEnergy | MetricKind::ElectricityEnergy => "energy_kwh",
            MetricKind::ElectricityCarbon => "carbon_kg",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            MetricKind::GasEnergy | MetricKind::ElectricityEnergy => "kWh",
            MetricKind::ElectricityCarbon => "kg",
        }
    }

    pub fn statistic_id(&self) -> String {
        format!("sensor.{}", self.as_str())
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("unknown metric kind '{0}', expected one of: gas | electricity | elec_carbon")]
pub struct UnknownMetricKind(pub String);

impl FromStr for MetricKind {
    type Err = UnknownMetricKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gas" | "gas_energy" => Ok(MetricKind::GasEnergy),
            "electricity" | "electricity_energy" => Ok(MetricKind::ElectricityEnergy),
            "elec_carbon" | "carbon" | "electricity_carbon" => Ok(MetricKind::ElectricityCarbon),
            other => Err(UnknownMetricKind(other.to_string())),
        }
    }
}
