//! The Aggregator's public contract (spec.md §4.1): every write returns
//! success to the caller as soon as the session exists locally, regardless
//! of Server reachability. All outbound HTTP happens on background
//! workers, never on the request path.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use datacat_common::{deep_merge, EventRecord, LocalSessionIdGenerator};
use serde_json::{json, Value};
use tracing::{instrument, warn};

use crate::client::ServerClient;
use crate::config::AggregatorConfig;
use crate::error::{AggregatorError, Result};
use crate::metrics::MetricSample;
use crate::parent_liveness::is_process_alive;
use crate::retry_queue::{RetryOperation, RetryQueue};
use crate::session_table::{SessionEntry, SessionTable};
use crate::workers::Worker;

fn not_found(session_id: &str) -> AggregatorError {
    AggregatorError::SessionNotFound {
        session_id: session_id.to_string(),
    }
}

fn drain_up_to<T>(items: &mut Vec<T>, max: usize) -> Vec<T> {
    let n = items.len().min(max.max(1));
    items.drain(..n).collect()
}

pub struct Aggregator {
    config: Arc<AggregatorConfig>,
    table: SessionTable,
    retry_queue: RetryQueue,
    client: ServerClient,
    id_gen: LocalSessionIdGenerator,
}

impl Aggregator {
    pub fn new(config: Arc<AggregatorConfig>) -> Arc<Self> {
        let client = ServerClient::new(&config);
        Arc::new(Self {
            config,
            table: SessionTable::new(),
            retry_queue: RetryQueue::new(),
            client,
            id_gen: LocalSessionIdGenerator::new(),
        })
    }

    pub fn session_count(&self) -> usize {
        self.table.len()
    }

    /// Launches the five periodic workers described in spec.md §4.1/§4.2.
    /// Callers keep the returned handles to shut them down cooperatively.
    pub fn spawn_workers(self: &Arc<Self>) -> Vec<Worker> {
        let mut workers = Vec::new();

        let agg = self.clone();
        workers.push(Worker::spawn(self.config.batch_interval(), move || {
            let agg = agg.clone();
            async move { agg.batch_tick().await }
        }));

        let agg = self.clone();
        workers.push(Worker::spawn(std::time::Duration::from_secs(5), move || {
            let agg = agg.clone();
            async move { agg.heartbeat_monitor_tick().await }
        }));

        let agg = self.clone();
        workers.push(Worker::spawn(std::time::Duration::from_secs(5), move || {
            let agg = agg.clone();
            async move { agg.parent_monitor_tick().await }
        }));

        let agg = self.clone();
        workers.push(Worker::spawn(std::time::Duration::from_secs(10), move || {
            let agg = agg.clone();
            async move { agg.retry_processor_tick().await }
        }));

        let agg = self.clone();
        workers.push(Worker::spawn(std::time::Duration::from_secs(15), move || {
            let agg = agg.clone();
            async move { agg.server_heartbeat_forwarder_tick().await }
        }));

        workers
    }

    #[instrument(skip(self))]
    pub async fn register(
        &self,
        product: String,
        version: String,
        parent_pid: Option<u32>,
    ) -> Result<String> {
        if product.trim().is_empty() || version.trim().is_empty() {
            return Err(AggregatorError::InvalidRequest {
                message: "product and version must be non-empty".to_string(),
            });
        }
        let machine_id = self.config.machine_id.clone();
        let hostname = self.config.hostname.clone();

        match self
            .client
            .create_session(&product, &version, machine_id.as_deref(), hostname.as_deref())
            .await
        {
            Ok(server_id) => {
                let entry = Arc::new(SessionEntry::new(
                    server_id.clone(),
                    product,
                    version,
                    machine_id,
                    hostname,
                    parent_pid,
                    true,
                ));
                self.table.insert(entry);
                Ok(server_id)
            }
            Err(err) => {
                warn!(%err, "server unreachable at register, minting a local session id");
                let local_id = self.id_gen.generate();
                let entry = Arc::new(SessionEntry::new(
                    local_id.clone(),
                    product.clone(),
                    version.clone(),
                    machine_id.clone(),
                    hostname.clone(),
                    parent_pid,
                    false,
                ));
                self.table.insert(entry);
                self.retry_queue.push(RetryOperation::CreateSession {
                    local_id: local_id.clone(),
                    product,
                    version,
                    machine_id,
                    hostname,
                });
                Ok(local_id)
            }
        }
    }

    pub async fn update_state(&self, session_id: &str, patch: Value) -> Result<()> {
        let entry = self.table.get(session_id).ok_or_else(|| not_found(session_id))?;
        let mut shadow = entry.shadow_state.lock().unwrap_or_else(|e| e.into_inner());
        let merged = deep_merge(&shadow, &patch);
        if merged == *shadow {
            return Ok(());
        }
        *shadow = merged;
        drop(shadow);
        entry.buffer.lock().unwrap_or_else(|e| e.into_inner()).state_patches.push(patch);
        Ok(())
    }

    pub async fn add_event(&self, session_id: &str, event: EventRecord) -> Result<()> {
        let entry = self.table.get(session_id).ok_or_else(|| not_found(session_id))?;
        entry.buffer.lock().unwrap_or_else(|e| e.into_inner()).events.push(event);
        Ok(())
    }

    pub async fn add_metric(&self, session_id: &str, sample: MetricSample) -> Result<()> {
        let entry = self.table.get(session_id).ok_or_else(|| not_found(session_id))?;
        entry.buffer.lock().unwrap_or_else(|e| e.into_inner()).metrics.record(sample);
        Ok(())
    }

    pub async fn heartbeat(&self, session_id: &str) -> Result<()> {
        let entry = self.table.get(session_id).ok_or_else(|| not_found(session_id))?;
        *entry.last_heartbeat.lock().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
        // "On the next heartbeat, if hang_logged was set, it appends
        // application_recovered and clears the flag" (spec.md §4.1) — the
        // recovery check rides the heartbeat call itself rather than
        // waiting for the monitor's next tick.
        if entry.hang_logged.swap(false, Ordering::AcqRel) {
            entry.buffer.lock().unwrap_or_else(|e| e.into_inner()).events.push(EventRecord {
                timestamp: Utc::now(),
                name: "application_recovered".to_string(),
                level: "info".to_string(),
                category: "datacat.daemon".to_string(),
                ..Default::default()
            });
        }
        Ok(())
    }

    pub async fn pause_heartbeat(&self, session_id: &str) -> Result<()> {
        let entry = self.table.get(session_id).ok_or_else(|| not_found(session_id))?;
        entry.heartbeat_paused.store(true, Ordering::Release);
        Ok(())
    }

    pub async fn resume_heartbeat(&self, session_id: &str) -> Result<()> {
        let entry = self.table.get(session_id).ok_or_else(|| not_found(session_id))?;
        entry.heartbeat_paused.store(false, Ordering::Release);
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn end(&self, session_id: &str) -> Result<()> {
        let entry = self.table.get(session_id).ok_or_else(|| not_found(session_id))?;
        entry.ending.store(true, Ordering::Release);
        self.flush_entry(&entry).await;

        let current_id = entry.id();
        match self.client.end_session(&current_id).await {
            Ok(()) => {
                self.table.remove(&current_id);
            }
            Err(err) => {
                warn!(%err, session_id = %current_id, "end failed, queued for retry");
                self.retry_queue.push(RetryOperation::End { session_id: current_id });
            }
        }
        Ok(())
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Value> {
        let entry = self.table.get(session_id).ok_or_else(|| not_found(session_id))?;
        let current_id = entry.id();
        match self.client.get_session(&current_id).await {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(%err, "get_session falling back to local snapshot");
                Ok(local_snapshot(&entry))
            }
        }
    }

    pub async fn list_sessions(&self) -> Value {
        match self.client.list_sessions().await {
            Ok(value) => value,
            Err(err) => {
                warn!(%err, "list_sessions falling back to local snapshots");
                Value::Array(self.table.all().iter().map(|e| local_snapshot(e)).collect())
            }
        }
    }

    /// Forwards every buffered state patch, event, and metric snapshot for
    /// one session, up to `max_batch_size` items per category; anything
    /// left over stays buffered for the next tick. Failures are queued for
    /// retry instead of propagated, since the fast path has already
    /// returned success to the caller.
    async fn flush_entry(&self, entry: &Arc<SessionEntry>) {
        let (state_patches, events, metrics) = {
            let mut buffer = entry.buffer.lock().unwrap_or_else(|e| e.into_inner());
            let max = self.config.max_batch_size;
            (
                drain_up_to(&mut buffer.state_patches, max),
                drain_up_to(&mut buffer.events, max),
                buffer.metrics.drain_for_flush(),
            )
        };
        let current_id = entry.id();

        for patch in state_patches {
            if let Err(err) = self.client.update_state(&current_id, &patch).await {
                warn!(%err, session_id = %current_id, "state update failed, queued for retry");
                self.retry_queue.push(RetryOperation::State {
                    session_id: current_id.clone(),
                    patch,
                });
            }
        }
        for event in events {
            if let Err(err) = self.client.add_event(&current_id, &event).await {
                warn!(%err, session_id = %current_id, "event forward failed, queued for retry");
                self.retry_queue.push(RetryOperation::Event {
                    session_id: current_id.clone(),
                    event,
                });
            }
        }
        for metric in metrics {
            if let Err(err) = self.client.add_metric(&current_id, &metric).await {
                warn!(%err, session_id = %current_id, "metric forward failed, queued for retry");
                self.retry_queue.push(RetryOperation::Metric {
                    session_id: current_id.clone(),
                    metric,
                });
            }
        }
    }

    async fn batch_tick(&self) {
        for entry in self.table.all() {
            self.flush_entry(&entry).await;
        }
    }

    async fn heartbeat_monitor_tick(&self) {
        let timeout = self.config.heartbeat_timeout();
        let now = Utc::now();
        for entry in self.table.all() {
            if entry.heartbeat_paused.load(Ordering::Acquire) {
                continue;
            }
            let last = *entry.last_heartbeat.lock().unwrap_or_else(|e| e.into_inner());
            let Some(last) = last else { continue };
            let elapsed = now - last;
            let hang_logged = entry.hang_logged.load(Ordering::Acquire);
            if !hang_logged && elapsed >= timeout {
                entry.hang_logged.store(true, Ordering::Release);
                entry.buffer.lock().unwrap_or_else(|e| e.into_inner()).events.push(EventRecord {
                    timestamp: now,
                    name: "application_appears_hung".to_string(),
                    level: "error".to_string(),
                    category: "datacat.daemon".to_string(),
                    ..Default::default()
                });
            }
        }
    }

    async fn parent_monitor_tick(&self) {
        for entry in self.table.all() {
            let Some(pid) = entry.parent_pid else { continue };
            if entry.parent_crashed_logged.load(Ordering::Acquire) {
                continue;
            }
            if is_process_alive(pid) {
                continue;
            }
            entry.parent_crashed_logged.store(true, Ordering::Release);
            entry.buffer.lock().unwrap_or_else(|e| e.into_inner()).events.push(EventRecord {
                timestamp: Utc::now(),
                name: "parent_process_crashed".to_string(),
                level: "critical".to_string(),
                category: "datacat.daemon".to_string(),
                ..Default::default()
            });
            self.flush_entry(&entry).await;

            let current_id = entry.id();
            if let Err(err) = self.client.crash_session(&current_id, "parent_process_crashed").await {
                warn!(%err, session_id = %current_id, "could not notify server of parent process crash");
            }
        }
    }

    async fn retry_processor_tick(&self) {
        let entries = self.retry_queue.take_all();
        for retry_entry in entries {
            match retry_entry.operation {
                RetryOperation::CreateSession {
                    local_id,
                    product,
                    version,
                    machine_id,
                    hostname,
                } => {
                    match self
                        .client
                        .create_session(&product, &version, machine_id.as_deref(), hostname.as_deref())
                        .await
                    {
                        Ok(server_id) => self.table.rewrite_id(&local_id, &server_id),
                        Err(_) => self.retry_queue.push(RetryOperation::CreateSession {
                            local_id,
                            product,
                            version,
                            machine_id,
                            hostname,
                        }),
                    }
                }
                RetryOperation::State { session_id, patch } => {
                    let Some(entry) = self.table.get(&session_id) else { continue };
                    let current_id = entry.id();
                    if self.client.update_state(&current_id, &patch).await.is_err() {
                        self.retry_queue.push(RetryOperation::State { session_id, patch });
                    }
                }
                RetryOperation::Event { session_id, event } => {
                    let Some(entry) = self.table.get(&session_id) else { continue };
                    let current_id = entry.id();
                    if self.client.add_event(&current_id, &event).await.is_err() {
                        self.retry_queue.push(RetryOperation::Event { session_id, event });
                    }
                }
                RetryOperation::Metric { session_id, metric } => {
                    let Some(entry) = self.table.get(&session_id) else { continue };
                    let current_id = entry.id();
                    if self.client.add_metric(&current_id, &metric).await.is_err() {
                        self.retry_queue.push(RetryOperation::Metric { session_id, metric });
                    }
                }
                RetryOperation::End { session_id } => {
                    let Some(entry) = self.table.get(&session_id) else { continue };
                    let current_id = entry.id();
                    match self.client.end_session(&current_id).await {
                        Ok(()) => {
                            self.table.remove(&current_id);
                        }
                        Err(_) => self.retry_queue.push(RetryOperation::End { session_id }),
                    }
                }
            }
        }
    }

    async fn server_heartbeat_forwarder_tick(&self) {
        for entry in self.table.all() {
            if !entry.is_synced() || entry.ending.load(Ordering::Acquire) {
                continue;
            }
            let current_id = entry.id();
            if let Err(err) = self.client.heartbeat(&current_id).await {
                warn!(%err, session_id = %current_id, "server heartbeat forward failed");
            }
        }
    }
}

fn local_snapshot(entry: &Arc<SessionEntry>) -> Value {
    let last_heartbeat = *entry.last_heartbeat.lock().unwrap_or_else(|e| e.into_inner());
    let state = entry.shadow_state.lock().unwrap_or_else(|e| e.into_inner()).clone();
    json!({
        "id": entry.id(),
        "product": entry.product,
        "version": entry.version,
        "machine_id": entry.machine_id,
        "hostname": entry.hostname,
        "created_at": entry.created_at,
        "last_heartbeat": last_heartbeat,
        "hung": entry.hang_logged.load(Ordering::Acquire),
        "state": state,
        "source": "aggregator_local_fallback",
    })
}
