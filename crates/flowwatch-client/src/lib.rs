//! Flowwatch Client - HTTP clients for external APIs
//!
//! This crate provides HTTP clients for:
//!
//! - [`n8n`] - the public REST API of an n8n instance (the workflow source)
//! - [`webhook`] - delivering change batches to an HTTP endpoint
//!
//! # Overview
//!
//! The clients handle authentication, request building, response parsing,
//! and error mapping for their respective endpoints.

pub mod n8n;
pub mod webhook;

// Re-export main client types
pub use n8n::N8nClient;
pub use webhook::WebhookSink;
