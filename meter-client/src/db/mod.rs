pub mod statistics_queries;

pub use statistics_queries::{latest_statistic, load_statistics};
