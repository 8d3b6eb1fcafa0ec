//! Flowwatch DB - PostgreSQL persistence for watcher watermarks.

pub mod repository;

pub use repository::{ScopeSummary, WatermarkRepository};
