//! Connector health tracking.
//!
//! [`PollHealth`] keeps per-server availability and counters for one
//! connector and can publish a [`HealthSnapshot`] to `<prefix>/@/health`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::sink::ZenohSink;

/// Consecutive failures after which a server is reported offline.
const OFFLINE_AFTER_FAILURES: u32 = 3;

/// Availability of one polled server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    /// Last read succeeded.
    Online,
    /// Recent reads failed, not yet given up.
    Degraded,
    /// Repeated read failures.
    Offline,
    /// Never polled.
    #[default]
    Unknown,
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerStatus::Online => write!(f, "online"),
            ServerStatus::Offline => write!(f, "offline"),
            ServerStatus::Degraded => write!(f, "degraded"),
            ServerStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Liveness of one server, as published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerLiveness {
    pub server: String,
    pub status: ServerStatus,
    /// Last successful read (millis since epoch), 0 if never.
    pub last_seen: i64,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ServerLiveness {
    fn new(server: &str) -> Self {
        Self {
            server: server.to_string(),
            status: ServerStatus::Unknown,
            last_seen: 0,
            consecutive_failures: 0,
            last_error: None,
        }
    }
}

/// Health snapshot for serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub connector: String,
    /// "healthy", "degraded" or "error".
    pub status: String,
    pub uptime_secs: u64,
    pub servers_total: u64,
    pub servers_responding: u64,
    pub servers_failed: u64,
    pub last_cycle_duration_ms: u64,
    pub read_errors: u64,
    pub records_stored: u64,
    pub servers: Vec<ServerLiveness>,
}

/// Health tracker for one connector.
#[derive(Debug)]
pub struct PollHealth {
    connector: String,
    start_time: Instant,
    servers_total: AtomicU64,
    read_errors: AtomicU64,
    records_stored: AtomicU64,
    last_cycle_duration_ms: AtomicU64,
    servers: Mutex<BTreeMap<String, ServerLiveness>>,
}

impl PollHealth {
    /// Create a new health tracker.
    pub fn new(connector: impl Into<String>) -> Self {
        Self {
            connector: connector.into(),
            start_time: Instant::now(),
            servers_total: AtomicU64::new(0),
            read_errors: AtomicU64::new(0),
            records_stored: AtomicU64::new(0),
            last_cycle_duration_ms: AtomicU64::new(0),
            servers: Mutex::new(BTreeMap::new()),
        }
    }

    fn servers(&self) -> MutexGuard<'_, BTreeMap<String, ServerLiveness>> {
        self.servers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the number of servers the connector polls.
    pub fn set_servers_total(&self, count: u64) {
        self.servers_total.store(count, Ordering::SeqCst);
    }

    /// Record a successful batched read.
    pub fn record_server_success(&self, server: &str) {
        let now = tagbridge_common::current_timestamp_millis();
        let mut servers = self.servers();
        let state = servers
            .entry(server.to_string())
            .or_insert_with(|| ServerLiveness::new(server));

        state.status = ServerStatus::Online;
        state.last_seen = now;
        state.consecutive_failures = 0;
        state.last_error = None;
    }

    /// Record a failed batched read and return the server's new status.
    pub fn record_server_failure(&self, server: &str, error: &str) -> ServerStatus {
        self.read_errors.fetch_add(1, Ordering::SeqCst);

        let mut servers = self.servers();
        let state = servers
            .entry(server.to_string())
            .or_insert_with(|| ServerLiveness::new(server));

        state.consecutive_failures += 1;
        state.last_error = Some(error.to_string());
        state.status = if state.consecutive_failures >= OFFLINE_AFTER_FAILURES {
            ServerStatus::Offline
        } else {
            ServerStatus::Degraded
        };
        state.status
    }

    /// Record that records were handed to storage.
    pub fn record_stored(&self, count: u64) {
        self.records_stored.fetch_add(count, Ordering::SeqCst);
    }

    /// Record the duration of one poll cycle.
    pub fn record_cycle_duration(&self, duration_ms: u64) {
        self.last_cycle_duration_ms
            .store(duration_ms, Ordering::SeqCst);
    }

    /// Liveness of one server.
    pub fn server_liveness(&self, server: &str) -> Option<ServerLiveness> {
        self.servers().get(server).cloned()
    }

    /// Get a snapshot of current health.
    pub fn snapshot(&self) -> HealthSnapshot {
        let servers: Vec<ServerLiveness> = self.servers().values().cloned().collect();
        let servers_total = self.servers_total.load(Ordering::SeqCst);
        let responding = servers
            .iter()
            .filter(|s| matches!(s.status, ServerStatus::Online | ServerStatus::Degraded))
            .count() as u64;
        let failed = servers
            .iter()
            .filter(|s| s.status == ServerStatus::Offline)
            .count() as u64;

        let status = if failed == 0 {
            "healthy"
        } else if responding > 0 {
            "degraded"
        } else {
            "error"
        };

        HealthSnapshot {
            connector: self.connector.clone(),
            status: status.to_string(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            servers_total,
            servers_responding: responding,
            servers_failed: failed,
            last_cycle_duration_ms: self.last_cycle_duration_ms.load(Ordering::SeqCst),
            read_errors: self.read_errors.load(Ordering::SeqCst),
            records_stored: self.records_stored.load(Ordering::SeqCst),
            servers,
        }
    }

    /// Publish the current snapshot to `<prefix>/@/health`.
    pub async fn publish(&self, sink: &ZenohSink) -> Result<()> {
        sink.publish_json(&sink.keys().health(), &self.snapshot())
            .await
    }
}
