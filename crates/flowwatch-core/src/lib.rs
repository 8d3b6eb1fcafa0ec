//! Flowwatch Core - change detection, watermark state and the polling loop.

pub mod config;
pub mod error;
pub mod models;
pub mod poller;
pub mod store;
pub mod sync;
pub mod traits;

pub use config::{
    default_config_path, default_state_path, load_watchers_config, parse_watchers_config,
    Credentials, CredentialsConfig, HttpConfig, WatcherConfig, WatchersConfig,
};
pub use error::AppError;
pub use models::{
    split_listing, CandidateItem, ChangeRecord, Enrichment, WatermarkState, WatermarkUpdate,
    EPOCH_ISO,
};
pub use poller::{Poller, PollerHandle};
pub use store::{JsonFileWatermarkStore, MemoryWatermarkStore};
pub use sync::{
    format_timestamp, parse_timestamp, should_emit, CycleOutcome, CycleReport, CycleStats,
    WatchSummary,
};
pub use traits::{EmissionSink, WatermarkStore, WorkflowSource};
