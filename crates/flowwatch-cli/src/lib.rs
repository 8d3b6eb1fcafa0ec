//! Flowwatch CLI - Command-line interface for the workflow change poller
//!
//! This crate provides the CLI application that ties together all Flowwatch components.

pub mod backends;
pub mod config;

pub use backends::{state_file_path, AnySink, AnyStore, ScopeLine, StdoutSink};
pub use config::{Command, Config, WatcherArgs};
