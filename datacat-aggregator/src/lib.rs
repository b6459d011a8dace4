//! The Local Aggregator: a per-application-instance sidecar that batches,
//! deduplicates, aggregates counters and histograms, monitors liveness of
//! both the supervised application and the remote Server, queues failed
//! operations for retry, and transparently operates offline.

pub mod aggregator;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod metrics;
pub mod parent_liveness;
pub mod retry_queue;
pub mod session_table;
pub mod workers;

pub use aggregator::Aggregator;
pub use config::AggregatorConfig;
pub use error::{AggregatorError, Result};
