pub mod app;
pub mod config;
pub mod metrics_server;
pub mod observability;
pub mod pipeline;
pub mod sinks;
pub mod sources;
pub mod sync;
pub mod transform;

pub use pipeline::{accumulate, ImportBatch, StatisticsSink, SyncError};
pub use sync::{MeterStream, SyncScheduler};
