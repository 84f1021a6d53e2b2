//! relaymq: resilient client-side event delivery for MQTT ingestion
//! pipelines.
//!
//! Callers hand payloads to a [`RelayClient`]; a background pipeline
//! drains them to the broker, riding out disconnects, publish failures,
//! and credential expiry without losing events.

// Core plumbing
pub mod config;
pub mod error;
pub mod event;

// Delivery components
pub mod auth;
pub mod queue;
pub mod sink;

// Orchestration
pub mod pipeline;
pub mod relay;

pub use error::{RelayError, Result};
pub use event::Event;
pub use relay::RelayClient;
