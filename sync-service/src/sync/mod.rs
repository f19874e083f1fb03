pub mod importer;
pub mod poller;
pub mod scheduler;
pub mod stream;

pub use importer::{import_history, HISTORY_SEED};
pub use poller::{poll_new, select_new};
pub use scheduler::{SchedulerConfig, StreamTick, SyncScheduler, TickOutcome};
pub use stream::{MeterStream, StreamState, SyncAction};
