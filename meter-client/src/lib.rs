pub mod db;
pub mod domain;

pub use domain::{ApiStream, MetricKind, Reading, StatisticMetadata, StatisticRecord};
