//! The Aggregator's in-memory session table (spec.md §3, §5).
//!
//! Mirrors the Store's own table shape: a single reader-writer lock over a
//! hash map, with finer-grained locks underneath for the pieces that change
//! on every fast-path write. Each session keeps a *shadow* of the
//! last-known state for change-detection only — the state tree itself is
//! owned by the Store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use datacat_common::EventRecord;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::Arc;

use crate::metrics::MetricAccumulator;

/// Buffered, not-yet-forwarded writes for one session. Drained by the
/// batch worker; each category keeps acceptance order.
#[derive(Default)]
pub struct SessionBuffer {
    pub state_patches: Vec<Value>,
    pub events: Vec<EventRecord>,
    pub metrics: MetricAccumulator,
}

/// One entry in the Aggregator's session table.
///
/// `current_id` is the only field that ever changes identity: it starts as
/// a locally minted identifier when the Server is unreachable at
/// `register` time and is atomically rewritten to the server-issued UUID
/// once the queued `create_session` retry succeeds.
pub struct SessionEntry {
    pub current_id: RwLock<String>,
    pub product: String,
    pub version: String,
    pub machine_id: Option<String>,
    pub hostname: Option<String>,
    pub parent_pid: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub synced_with_server: AtomicBool,
    pub last_heartbeat: Mutex<Option<DateTime<Utc>>>,
    pub heartbeat_paused: AtomicBool,
    pub hang_logged: AtomicBool,
    pub parent_crashed_logged: AtomicBool,
    pub ending: AtomicBool,
    pub shadow_state: Mutex<Value>,
    pub buffer: Mutex<SessionBuffer>,
}

impl SessionEntry {
    pub fn new(
        id: String,
        product: String,
        version: String,
        machine_id: Option<String>,
        hostname: Option<String>,
        parent_pid: Option<u32>,
        synced_with_server: bool,
    ) -> Self {
        Self {
            current_id: RwLock::new(id),
            product,
            version,
            machine_id,
            hostname,
            parent_pid,
            created_at: Utc::now(),
            synced_with_server: AtomicBool::new(synced_with_server),
            last_heartbeat: Mutex::new(None),
            heartbeat_paused: AtomicBool::new(false),
            hang_logged: AtomicBool::new(false),
            parent_crashed_logged: AtomicBool::new(false),
            ending: AtomicBool::new(false),
            shadow_state: Mutex::new(Value::Object(serde_json::Map::new())),
            buffer: Mutex::new(SessionBuffer::default()),
        }
    }

    pub fn id(&self) -> String {
        self.current_id.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_synced(&self) -> bool {
        self.synced_with_server.load(Ordering::Acquire)
    }
}

/// Thread-safe table of sessions keyed by their *current* identifier.
///
/// `aliases` remembers every identifier a session has ever been known
/// under, so a retry-queue entry enqueued before a `create_session` rewrite
/// still resolves to the right entry after the rewrite lands.
#[derive(Default)]
pub struct SessionTable {
    inner: RwLock<FxHashMap<String, Arc<SessionEntry>>>,
    aliases: RwLock<FxHashMap<String, String>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entry: Arc<SessionEntry>) {
        let id = entry.id();
        self.inner.write().unwrap_or_else(|e| e.into_inner()).insert(id, entry);
    }

    pub fn get(&self, id: &str) -> Option<Arc<SessionEntry>> {
        let canonical = self
            .aliases
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .unwrap_or_else(|| id.to_string());
        self.inner.read().unwrap_or_else(|e| e.into_inner()).get(&canonical).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<Arc<SessionEntry>> {
        let canonical = self
            .aliases
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .unwrap_or_else(|| id.to_string());
        self.inner.write().unwrap_or_else(|e| e.into_inner()).remove(&canonical)
    }

    pub fn all(&self) -> Vec<Arc<SessionEntry>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).values().cloned().collect()
    }

    /// Atomically moves `entry` from `old_id` to `new_id`, updates its
    /// `current_id`, and records `old_id -> new_id` so any pending retry
    /// queue entry still addressed by `old_id` keeps resolving correctly.
    pub fn rewrite_id(&self, old_id: &str, new_id: &str) {
        let mut table = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = table.remove(old_id) {
            *entry.current_id.write().unwrap_or_else(|e| e.into_inner()) = new_id.to_string();
            entry.synced_with_server.store(true, Ordering::Release);
            table.insert(new_id.to_string(), entry);
        }
        drop(table);
        self.aliases
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(old_id.to_string(), new_id.to_string());
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

pub fn sorted_tags(tags: &BTreeMap<String, String>) -> Vec<(String, String)> {
    tags.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}
