//! The Session Store: deep-merged state, append-only event/metric logs,
//! heartbeat-derived liveness, and same-machine crash correlation.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use datacat_common::{deep_merge, EventRecord, MetricRecord, Session, SessionSnapshot, StateHistoryEntry};
use rustc_hash::FxHashMap;
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::instrument;
use uuid::Uuid;

use crate::db;
use crate::error::{Result, StoreError};

/// Reason recorded on a session marked crashed by same-machine
/// re-registration (spec.md §4.4), as opposed to an explicit `crash` call
/// from the Aggregator's parent-process monitor.
pub const CRASH_REASON_SAME_MACHINE: &str = "new_session_from_same_machine";

/// In-memory table plus SQLite-backed persistence for every known session.
///
/// The table is guarded by a single `RwLock`; getters return deep copies
/// (`Session` is `Clone`) so no caller holds the lock while serializing a
/// response, matching spec.md §5's snapshot-read policy.
pub struct Store {
    pool: SqlitePool,
    table: RwLock<FxHashMap<String, Session>>,
    heartbeat_timeout: chrono::Duration,
}

impl Store {
    /// Connects to the backing database and rebuilds the in-memory table
    /// from every persisted `session:` document.
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, heartbeat_timeout: chrono::Duration) -> Result<Self> {
        let pool = db::connect(database_url).await?;
        let sessions = db::load_all(&pool).await?;
        let mut table = FxHashMap::default();
        for session in sessions {
            table.insert(session.id.clone(), session);
        }
        Ok(Self {
            pool,
            table: RwLock::new(table),
            heartbeat_timeout,
        })
    }

    fn read_table(&self) -> std::sync::RwLockReadGuard<'_, FxHashMap<String, Session>> {
        self.table.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_table(&self) -> std::sync::RwLockWriteGuard<'_, FxHashMap<String, Session>> {
        self.table.write().unwrap_or_else(|e| e.into_inner())
    }

    async fn persist(&self, session: &Session) -> Result<()> {
        db::upsert(&self.pool, session).await
    }

    /// Creates a new session with a server-issued UUID, then marks every
    /// other non-ended, non-crashed session sharing the same (non-empty)
    /// `machine_id` as crashed (spec.md §4.4).
    #[instrument(skip(self), fields(product = %product, machine_id = ?machine_id))]
    pub async fn create(
        &self,
        product: String,
        version: String,
        machine_id: Option<String>,
        hostname: Option<String>,
    ) -> Result<Session> {
        let id = Uuid::new_v4().to_string();
        let session = Session::new(id.clone(), product, version, machine_id.clone(), hostname);

        let mut to_crash = Vec::new();
        if let Some(machine_id) = machine_id.filter(|m| !m.is_empty()) {
            let table = self.read_table();
            for other in table.values() {
                if other.id != id
                    && other.machine_id.as_deref() == Some(machine_id.as_str())
                    && other.ended_at.is_none()
                    && !other.crashed
                {
                    to_crash.push(other.id.clone());
                }
            }
        }

        {
            let mut table = self.write_table();
            table.insert(id.clone(), session.clone());
        }
        self.persist(&session).await?;

        for crashed_id in to_crash {
            self.crash(&crashed_id, CRASH_REASON_SAME_MACHINE).await?;
        }

        Ok(session)
    }

    pub fn get(&self, session_id: &str) -> Result<SessionSnapshot> {
        let table = self.read_table();
        let session = table
            .get(session_id)
            .ok_or_else(|| StoreError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;
        Ok(session.snapshot_at(Utc::now(), self.heartbeat_timeout))
    }

    pub fn list(&self) -> Vec<SessionSnapshot> {
        let now = Utc::now();
        self.read_table()
            .values()
            .map(|s| s.snapshot_at(now, self.heartbeat_timeout))
            .collect()
    }

    /// Applies `patch` on top of the session's current state via deep
    /// merge and appends the resulting full state to the history log.
    /// Per spec.md §3, this is unconditional even if the patch is
    /// semantically a no-op — the Aggregator is responsible for filtering
    /// identical patches before they ever reach the Store.
    #[instrument(skip(self, patch))]
    pub async fn update_state(&self, session_id: &str, patch: &Value) -> Result<()> {
        let updated = {
            let mut table = self.write_table();
            let session = table
                .get_mut(session_id)
                .ok_or_else(|| StoreError::SessionNotFound {
                    session_id: session_id.to_string(),
                })?;
            session.state = deep_merge(&session.state, patch);
            session.state_history.push(StateHistoryEntry {
                timestamp: Utc::now(),
                snapshot: session.state.clone(),
            });
            session.updated_at = Utc::now();
            session.clone()
        };
        self.persist(&updated).await
    }

    #[instrument(skip(self, event))]
    pub async fn add_event(&self, session_id: &str, event: EventRecord) -> Result<()> {
        let updated = {
            let mut table = self.write_table();
            let session = table
                .get_mut(session_id)
                .ok_or_else(|| StoreError::SessionNotFound {
                    session_id: session_id.to_string(),
                })?;
            session.apply_event_flag_transition(&event.name);
            session.events.push(event);
            session.updated_at = Utc::now();
            session.clone()
        };
        self.persist(&updated).await
    }

    #[instrument(skip(self, metric))]
    pub async fn add_metric(&self, session_id: &str, metric: MetricRecord) -> Result<()> {
        let updated = {
            let mut table = self.write_table();
            let session = table
                .get_mut(session_id)
                .ok_or_else(|| StoreError::SessionNotFound {
                    session_id: session_id.to_string(),
                })?;
            session.metrics.push(metric);
            session.updated_at = Utc::now();
            session.clone()
        };
        self.persist(&updated).await
    }

    pub async fn heartbeat(&self, session_id: &str) -> Result<()> {
        let updated = {
            let mut table = self.write_table();
            let session = table
                .get_mut(session_id)
                .ok_or_else(|| StoreError::SessionNotFound {
                    session_id: session_id.to_string(),
                })?;
            session.last_heartbeat = Some(Utc::now());
            session.updated_at = Utc::now();
            session.clone()
        };
        self.persist(&updated).await
    }

    /// Sets `ended_at` at most once (idempotent: a second `end` call on an
    /// already-ended session is a no-op, not an error, since retries of
    /// the same operation must be safe per spec.md §8's at-least-once
    /// forwarding property).
    pub async fn end(&self, session_id: &str) -> Result<()> {
        let updated = {
            let mut table = self.write_table();
            let session = table
                .get_mut(session_id)
                .ok_or_else(|| StoreError::SessionNotFound {
                    session_id: session_id.to_string(),
                })?;
            if session.ended_at.is_none() {
                session.ended_at = Some(Utc::now());
            }
            session.updated_at = Utc::now();
            session.clone()
        };
        self.persist(&updated).await
    }

    #[instrument(skip(self))]
    pub async fn crash(&self, session_id: &str, reason: &str) -> Result<()> {
        let updated = {
            let mut table = self.write_table();
            let session = table
                .get_mut(session_id)
                .ok_or_else(|| StoreError::SessionNotFound {
                    session_id: session_id.to_string(),
                })?;
            if !session.crashed {
                session.crashed = true;
                session.events.push(EventRecord {
                    timestamp: Utc::now(),
                    name: "session_crashed_detected".to_string(),
                    level: "error".to_string(),
                    category: "datacat.daemon".to_string(),
                    message: Some(reason.to_string()),
                    ..Default::default()
                });
            }
            session.updated_at = Utc::now();
            session.clone()
        };
        self.persist(&updated).await
    }

    /// Removes every session created before `now - retention`, both from
    /// the in-memory table and the backing database.
    #[instrument(skip(self))]
    pub async fn cleanup_expired(&self, now: DateTime<Utc>, retention: chrono::Duration) -> Result<usize> {
        let cutoff = now - retention;
        let removed_ids = db::delete_older_than(&self.pool, cutoff).await?;
        if !removed_ids.is_empty() {
            let mut table = self.write_table();
            for id in &removed_ids {
                table.remove(id);
            }
        }
        Ok(removed_ids.len())
    }
}
