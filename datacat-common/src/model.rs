//! The Session aggregate and its append-only logs.
//!
//! `Session` is the root type shared by the Aggregator (which keeps a
//! shadow copy per supervised session) and the Store (which owns the
//! authoritative copy). Status flags that are *derived* (`active`,
//! `suspended`) are never stored on `Session` itself — they depend on wall
//! clock time at read time — and are computed into a [`SessionSnapshot`]
//! instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A logical run of one application instance.
///
/// `ended_at` and `crashed` are the only status bits that are persistent;
/// `active`, `suspended`, and `hung` are derived or event-toggled and live
/// on [`SessionSnapshot`] instead, except `hung`, which is cheap enough to
/// carry here directly since it only ever flips on two named events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: String,
    pub product: String,
    pub version: String,
    #[serde(default)]
    pub machine_id: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_heartbeat: Option<DateTime<Utc>>,
    #[serde(default)]
    pub crashed: bool,
    #[serde(default)]
    pub hung: bool,
    #[serde(default = "default_state")]
    pub state: Value,
    #[serde(default)]
    pub state_history: Vec<StateHistoryEntry>,
    #[serde(default)]
    pub events: Vec<EventRecord>,
    #[serde(default)]
    pub metrics: Vec<MetricRecord>,
}

fn default_state() -> Value {
    Value::Object(serde_json::Map::new())
}

impl Session {
    /// Construct a freshly created session. `id` is supplied by the caller
    /// since the Store mints a UUID and the Aggregator mints a local id;
    /// neither policy belongs here.
    pub fn new(id: String, product: String, version: String, machine_id: Option<String>, hostname: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            product,
            version,
            machine_id,
            hostname,
            created_at: now,
            updated_at: now,
            ended_at: None,
            last_heartbeat: None,
            crashed: false,
            hung: false,
            state: default_state(),
            state_history: Vec::new(),
            events: Vec::new(),
            metrics: Vec::new(),
        }
    }

    /// `active` per spec.md §4.3: not ended, not crashed, and either no
    /// heartbeat has ever been recorded or the most recent one is within
    /// `timeout`. A crashed session is as terminal as an ended one (spec.md
    /// §8 scenario 4: a crash read shows `active=false, suspended=false`).
    pub fn is_active(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        if self.ended_at.is_some() || self.crashed {
            return false;
        }
        match self.last_heartbeat {
            None => true,
            Some(last) => now - last < timeout,
        }
    }

    /// `suspended` per spec.md §4.3: not ended, not crashed, has a recorded
    /// heartbeat, and that heartbeat is stale.
    pub fn is_suspended(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        if self.ended_at.is_some() || self.crashed {
            return false;
        }
        match self.last_heartbeat {
            None => false,
            Some(last) => now - last >= timeout,
        }
    }

    /// Applies a name-driven hang/recovery toggle. No-op for any other
    /// event name.
    pub fn apply_event_flag_transition(&mut self, event_name: &str) {
        match event_name {
            "application_appears_hung" => self.hung = true,
            "application_recovered" => self.hung = false,
            _ => {}
        }
    }

    /// Takes a snapshot with derived flags baked in for a given instant.
    pub fn snapshot_at(&self, now: DateTime<Utc>, heartbeat_timeout: chrono::Duration) -> SessionSnapshot {
        SessionSnapshot {
            active: self.is_active(now, heartbeat_timeout),
            suspended: self.is_suspended(now, heartbeat_timeout),
            session: self.clone(),
        }
    }
}

/// A read-only view of a [`Session`] with derived status flags computed
/// for the instant the snapshot was taken. This is the shape returned over
/// HTTP; `active`/`suspended` are flattened alongside the session fields.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub active: bool,
    pub suspended: bool,
    #[serde(flatten)]
    pub session: Session,
}

/// One entry in a session's state-history log: the full state tree after
/// a single accepted merge. History is never mutated after being appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub snapshot: Value,
}

/// One entry in a session's append-only event log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    pub name: String,
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub labels: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub exception: Option<ExceptionInfo>,
}

/// Structured exception payload attached to an [`EventRecord`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ExceptionInfo {
    #[serde(rename = "type")]
    pub exception_type: String,
    pub message: String,
    #[serde(default)]
    pub stacktrace: Vec<String>,
    #[serde(default)]
    pub source_file: Option<String>,
    #[serde(default)]
    pub source_line: Option<u32>,
    #[serde(default)]
    pub source_function: Option<String>,
}

/// The kind of a [`MetricRecord`], matching spec.md §3's four metric types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Gauge,
    Counter,
    Histogram,
    Timer,
}

/// One entry in a session's append-only metric log. For counters and
/// histograms this is a cumulative snapshot written by the Aggregator's
/// batch worker, not a per-sample delta; see `datacat-aggregator`'s
/// `metrics` module for the accumulation logic that produces these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricRecord {
    pub timestamp: DateTime<Utc>,
    pub name: String,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    pub value: f64,
    #[serde(default)]
    pub tags: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: i64) -> chrono::Duration {
        chrono::Duration::seconds(n)
    }

    #[test]
    fn active_with_no_heartbeat_ever_sent() {
        let s = Session::new("s1".into(), "p".into(), "1.0".into(), None, None);
        assert!(s.is_active(Utc::now(), secs(60)));
        assert!(!s.is_suspended(Utc::now(), secs(60)));
    }

    #[test]
    fn suspended_after_timeout_elapses() {
        let mut s = Session::new("s1".into(), "p".into(), "1.0".into(), None, None);
        s.last_heartbeat = Some(Utc::now() - secs(70));
        assert!(!s.is_active(Utc::now(), secs(60)));
        assert!(s.is_suspended(Utc::now(), secs(60)));
    }

    #[test]
    fn ended_session_is_never_active_or_suspended() {
        let mut s = Session::new("s1".into(), "p".into(), "1.0".into(), None, None);
        s.last_heartbeat = Some(Utc::now() - secs(70));
        s.ended_at = Some(Utc::now());
        assert!(!s.is_active(Utc::now(), secs(60)));
        assert!(!s.is_suspended(Utc::now(), secs(60)));
    }

    #[test]
    fn crashed_session_with_a_stale_heartbeat_is_not_suspended() {
        // spec.md §8 scenario 4: a session already suspended (stale
        // heartbeat, not ended) that is then marked crashed must read back
        // as `active=false, suspended=false`, not still-suspended.
        let mut s = Session::new("s1".into(), "p".into(), "1.0".into(), Some("m1".into()), None);
        s.last_heartbeat = Some(Utc::now() - secs(70));
        assert!(s.is_suspended(Utc::now(), secs(60)));

        s.crashed = true;
        assert!(!s.is_active(Utc::now(), secs(60)));
        assert!(!s.is_suspended(Utc::now(), secs(60)));
    }

    #[test]
    fn hang_toggle_follows_most_recent_named_event() {
        let mut s = Session::new("s1".into(), "p".into(), "1.0".into(), None, None);
        assert!(!s.hung);
        s.apply_event_flag_transition("application_appears_hung");
        assert!(s.hung);
        s.apply_event_flag_transition("some_other_event");
        assert!(s.hung);
        s.apply_event_flag_transition("application_recovered");
        assert!(!s.hung);
    }
}
