//! OPC server polling and record forwarding.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tagbridge_framework::{PollHealth, StorageSink};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::client::OpcError;
use crate::config::{OpcDaConfig, RetryConfig};
use crate::pool::LiveServerHandle;
use crate::registry::DeviceRegistry;
use crate::state::{LifecycleState, Statistics};

/// Why a polling task ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PollExit {
    /// The stop signal was raised or the connector disconnected.
    Stopped,
    /// The server failed in a way polling cannot recover from.
    Fatal { server: String, error: OpcError },
}

/// Timeouts and failure thresholds of a polling task.
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub read_timeout: Duration,
    pub max_consecutive_failures: u32,
    pub retry: RetryConfig,
}

impl From<&OpcDaConfig> for PollSettings {
    fn from(config: &OpcDaConfig) -> Self {
        Self {
            read_timeout: config.read_timeout(),
            max_consecutive_failures: config.max_consecutive_failures.max(1),
            retry: config.retry.clone(),
        }
    }
}

/// Everything a polling task shares with its connector.
#[derive(Clone)]
pub struct PollContext {
    pub connector: String,
    pub devices: Arc<DeviceRegistry>,
    pub sink: Arc<dyn StorageSink>,
    pub health: Arc<PollHealth>,
    pub statistics: Arc<Statistics>,
    pub state: Arc<LifecycleState>,
    pub settings: PollSettings,
}

/// Polls one OPC server on its own interval.
pub struct ServerPoller {
    handle: LiveServerHandle,
    ctx: PollContext,
    tags: Vec<String>,
}

impl ServerPoller {
    /// Create a poller. The server's tag list is computed once here.
    pub fn new(handle: LiveServerHandle, ctx: PollContext) -> Self {
        let tags = ctx.devices.tag_list(&handle.server_id);
        Self { handle, ctx, tags }
    }

    pub fn server_id(&self) -> &str {
        &self.handle.server_id
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Run the polling loop until stopped or a fatal fault.
    pub async fn run(self, mut stop: watch::Receiver<bool>) -> PollExit {
        let server = self.handle.server_id.clone();
        let interval = self.handle.collect_interval;
        let max_failures = self.ctx.settings.max_consecutive_failures;

        info!(
            connector = %self.ctx.connector,
            server = %server,
            tags = self.tags.len(),
            interval_secs = interval.as_secs(),
            "Starting OPC poller"
        );

        let mut failures = 0u32;

        loop {
            if *stop.borrow() || !self.ctx.state.is_connected() {
                break;
            }

            let started = Instant::now();
            let delay = match self.poll_once().await {
                Ok(stored) => {
                    failures = 0;
                    self.ctx.health.record_server_success(&server);
                    debug!(server = %server, records = stored, "Poll cycle complete");
                    interval
                }
                Err(e) => {
                    failures += 1;
                    let status = self
                        .ctx
                        .health
                        .record_server_failure(&server, &e.to_string());

                    if !e.is_transient() || failures >= max_failures {
                        error!(
                            connector = %self.ctx.connector,
                            server = %server,
                            failures,
                            error = %e,
                            "Polling stopped on unrecoverable read fault"
                        );
                        return PollExit::Fatal { server, error: e };
                    }

                    let backoff = self.ctx.settings.retry.backoff(failures);
                    warn!(
                        server = %server,
                        failures,
                        max_failures,
                        status = %status,
                        retry_in_ms = (interval + backoff).as_millis() as u64,
                        error = %e,
                        "Read failed, skipping server for this cycle"
                    );
                    interval + backoff
                }
            };
            self.ctx
                .health
                .record_cycle_duration(started.elapsed().as_millis() as u64);

            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!(connector = %self.ctx.connector, server = %server, "OPC poller stopped");
        PollExit::Stopped
    }

    /// One cycle: batched read, per-device conversion, forwarding.
    ///
    /// Returns the number of records the sink accepted. Conversion and send
    /// faults are logged per device; only read faults are returned.
    pub async fn poll_once(&self) -> Result<usize, OpcError> {
        if self.tags.is_empty() {
            return Ok(0);
        }

        let read_timeout = self.ctx.settings.read_timeout;
        let readings = timeout(read_timeout, self.handle.client.read(&self.tags))
            .await
            .map_err(|_| OpcError::Timeout {
                operation: "read",
                millis: read_timeout.as_millis() as u64,
            })??;
        self.ctx.statistics.received(readings.len());

        let mut stored = 0;
        for device in self.ctx.devices.devices_for_server(&self.handle.server_id) {
            let record = match device.convert(&readings) {
                Ok(record) => record,
                Err(e) => {
                    warn!(
                        server = %self.handle.server_id,
                        device = %device.name(),
                        error = %e,
                        "Conversion failed, record skipped"
                    );
                    continue;
                }
            };

            match self
                .ctx
                .sink
                .send_to_storage(&self.ctx.connector, &record)
                .await
            {
                Ok(()) => {
                    stored += 1;
                    self.ctx.statistics.sent();
                }
                Err(e) => {
                    warn!(
                        connector = %self.ctx.connector,
                        device = %device.name(),
                        error = %e,
                        "Failed to send record to storage"
                    );
                }
            }
        }

        self.ctx.health.record_stored(stored as u64);
        Ok(stored)
    }
}
