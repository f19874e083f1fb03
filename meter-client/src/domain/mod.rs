mod metric;
mod reading;
mod statistic;

pub use metric::{ApiStream, MetricKind, UnknownMetricKind};
pub use reading::Reading;
pub use statistic::{StatisticMetadata, StatisticRecord};
