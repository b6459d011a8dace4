//! Local session identifier generation.
//!
//! Local identifiers follow the shape `local-session-<unix-seconds>-<counter>`
//! (spec.md §3) and are only ever used while the Server is unreachable; once
//! the create-session retry succeeds they are rewritten to the server-issued
//! UUID.

use std::sync::atomic::{AtomicU64, Ordering};

/// Generates process-unique local session identifiers.
///
/// The counter guarantees uniqueness within a single process even if two
/// registrations land in the same wall-clock second; it is not meant to
/// survive a restart, since a restarted Aggregator starts with an empty
/// session table anyway.
#[derive(Debug, Default)]
pub struct LocalSessionIdGenerator {
    counter: AtomicU64,
}

impl LocalSessionIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generate(&self) -> String {
        let unix_seconds = chrono::Utc::now().timestamp();
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("local-session-{unix_seconds}-{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_well_shaped() {
        let gen = LocalSessionIdGenerator::new();
        let a = gen.generate();
        let b = gen.generate();
        assert_ne!(a, b);
        assert!(a.starts_with("local-session-"));
    }
}
