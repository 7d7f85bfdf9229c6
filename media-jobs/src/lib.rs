//! media-jobs library crate.
//!
//! A resource-aware asynchronous job engine for long media work:
//! transcription, subtitle rendering, clip splitting and joining, and audio
//! mixing. Jobs are admitted according to live memory and CPU telemetry and
//! processed in bounded time windows.

pub mod api;
pub mod config;
pub mod engines;
pub mod error;
pub mod job;
pub mod lifecycle;
pub mod logging;
pub mod pipeline;
pub mod policy;
pub mod scheduler;
pub mod store;
pub mod subtitles;
pub mod telemetry;

pub use error::{Error, Result};
