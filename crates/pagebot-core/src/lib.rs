//! Pagebot Core Library
//!
//! Messenger webhook pipeline: delivery dedup, per-sender batching, human
//! takeover, catalog cards, AI replies, receipt handling and lead bookkeeping.

pub mod ai;
pub mod background;
pub mod batcher;
pub mod bookkeeping;
pub mod cards;
pub mod collaborators;
pub mod config;
pub mod contact;
pub mod dedup;
pub mod dispatcher;
pub mod intent;
pub mod leads;
pub mod messenger;
pub mod model;
pub mod pipeline;
pub mod receipt;
pub mod reply;
pub mod schema;
pub mod storage;
pub mod takeover;
pub mod vision;
pub mod webhook;

#[cfg(test)]
pub mod testing;

// Re-export key types for convenience
pub use config::Config;
pub use pipeline::{Collaborators, EventOutcome, Pipeline, PipelineSettings};
pub use storage::PgStore;
