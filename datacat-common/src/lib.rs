//! Shared data model for the DataCat telemetry pipeline.
//!
//! This crate holds everything the Local Aggregator and the Session Store
//! agree on: the [`Session`] aggregate, its append-only event and metric
//! logs, the deep-merge algorithm used for state patches, and local session
//! identifier generation. It performs no I/O.

pub mod ids;
pub mod json_ext;
pub mod model;

pub use ids::LocalSessionIdGenerator;
pub use json_ext::deep_merge;
pub use model::{
    EventRecord, ExceptionInfo, MetricRecord, MetricType, Session, SessionSnapshot,
    StateHistoryEntry,
};
