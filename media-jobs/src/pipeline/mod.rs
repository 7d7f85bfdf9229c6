//! Chunked processing pipeline.
//!
//! A job's input is divided into time windows sized by the active resource
//! decision. Windows are processed independently through the external
//! engines, at most `parallel_chunks` at a time, and merged in window order.

pub mod chunked;
pub mod processors;
pub mod progress;
pub mod purge;
pub mod segment;

pub use chunked::run_segments;
pub use processors::{Processor, ProcessorContext, ProcessorRegistry, ResourceBudget};
pub use progress::ProgressReporter;
pub use purge::{JobPurgeService, PurgeConfig};
pub use segment::{Segment, plan_segments};
