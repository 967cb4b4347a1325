//! Analysis orchestration.
//!
//! The aggregator fans one request out across the modality analyzers; the
//! job tracker runs aggregate calls in the background and exposes their
//! status.

pub mod aggregator;
pub mod jobs;

pub use aggregator::Aggregator;
pub use jobs::JobTracker;
