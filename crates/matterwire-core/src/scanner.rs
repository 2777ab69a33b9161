// ── Discovery gap-filling scanner ──
//
// The SDK only starts listening for a node's network announcement after
// the node has entered AwaitingDiscovery. A node that announced itself
// just before that is missed until the SDK's much slower fallback poll.
// This loop closes the gap with short discovery queries for waiting
// nodes and kicks a reconnect as soon as one answers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ScannerConfig;
use crate::error::SdkError;
use crate::model::{ConnectionState, NodeId};
use crate::sdk::DiscoveryController;
use crate::task::{lock, sleep_or_cancel};

/// Outcome of one scan cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// The cycle did not run: another one was in flight, or the scanner
    /// is stopped.
    pub skipped: bool,
    /// Nodes found in AwaitingDiscovery when the cycle started.
    pub waiting: usize,
    /// Nodes a discovery query was sent for.
    pub queried: Vec<NodeId>,
    /// Nodes a reconnect was triggered for.
    pub reconnected: Vec<NodeId>,
}

impl ScanReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

struct ScannerControl {
    /// `None` while stopped.
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

struct ScannerInner<C> {
    controller: Arc<C>,
    config: ScannerConfig,
    runtime: Option<Handle>,
    in_flight: AtomicBool,
    control: Mutex<ScannerControl>,
}

/// Clears the single-flight flag however the cycle ends.
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Periodic discovery re-query for nodes stuck in AwaitingDiscovery.
///
/// Cheap to clone; clones share the same loop.
pub struct DiscoveryScanner<C> {
    inner: Arc<ScannerInner<C>>,
}

impl<C> Clone for DiscoveryScanner<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: DiscoveryController + 'static> DiscoveryScanner<C> {
    /// Uses the current Tokio runtime if there is one, otherwise the one
    /// [`start`](Self::start) is called from.
    pub fn new(controller: Arc<C>, config: ScannerConfig) -> Self {
        Self::build(controller, config, Handle::try_current().ok())
    }

    /// Run the loop on `runtime`.
    pub fn with_runtime(controller: Arc<C>, config: ScannerConfig, runtime: Handle) -> Self {
        Self::build(controller, config, Some(runtime))
    }

    fn build(controller: Arc<C>, config: ScannerConfig, runtime: Option<Handle>) -> Self {
        Self {
            inner: Arc::new(ScannerInner {
                controller,
                config,
                runtime,
                in_flight: AtomicBool::new(false),
                control: Mutex::new(ScannerControl {
                    cancel: None,
                    task: None,
                }),
            }),
        }
    }

    /// Spawn the periodic loop. No-op if already running, or if no Tokio
    /// runtime is available.
    pub fn start(&self) {
        let mut control = lock(&self.inner.control);
        if control.cancel.is_some() {
            return;
        }
        let runtime = self
            .inner
            .runtime
            .clone()
            .or_else(|| Handle::try_current().ok());
        let Some(runtime) = runtime else {
            warn!("no Tokio runtime available, discovery scanner not started");
            return;
        };

        let cancel = CancellationToken::new();
        control.cancel = Some(cancel.clone());
        control.task = Some(runtime.spawn(scan_task(Arc::clone(&self.inner), cancel)));
        info!(
            interval_secs = self.inner.config.interval.as_secs(),
            "discovery scanner started"
        );
    }

    /// Cancel the loop and any cycle in progress. Idempotent.
    pub fn stop(&self) {
        let mut control = lock(&self.inner.control);
        let Some(cancel) = control.cancel.take() else {
            return;
        };
        cancel.cancel();
        if let Some(task) = control.task.take() {
            task.abort();
        }
        info!("discovery scanner stopped");
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.control).cancel.is_some()
    }

    /// Run one cycle now. Skipped when a cycle is already in flight or
    /// the scanner is stopped.
    pub async fn scan_now(&self) -> ScanReport {
        let cancel = lock(&self.inner.control).cancel.clone();
        match cancel {
            Some(cancel) => self.inner.scan(&cancel).await,
            None => {
                debug!("scan requested while scanner is stopped");
                ScanReport::skipped()
            }
        }
    }
}

impl<C: DiscoveryController> ScannerInner<C> {
    async fn scan(&self, cancel: &CancellationToken) -> ScanReport {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("discovery scan already in flight, skipping");
            return ScanReport::skipped();
        }
        let _guard = FlightGuard(&self.in_flight);
        self.run_cycle(cancel).await
    }

    async fn run_cycle(&self, cancel: &CancellationToken) -> ScanReport {
        let waiting: Vec<NodeId> = self
            .controller
            .node_states()
            .into_iter()
            .filter(|(_, state)| state.is_awaiting_discovery())
            .map(|(node_id, _)| node_id)
            .collect();

        let mut report = ScanReport {
            waiting: waiting.len(),
            ..ScanReport::default()
        };

        for (index, node_id) in waiting.into_iter().enumerate() {
            if index > 0 && !sleep_or_cancel(self.config.inter_node_delay, cancel).await {
                break;
            }
            if cancel.is_cancelled() {
                break;
            }
            if !self.still_waiting(node_id) {
                debug!(node_id, "node left AwaitingDiscovery, skipping");
                continue;
            }

            report.queried.push(node_id);
            let timeout = self.config.discovery_timeout;
            let discovered = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                result = tokio::time::timeout(timeout, self.controller.discover(node_id, timeout)) => {
                    result.unwrap_or_else(|_| Err(SdkError::Timeout {
                        node_id,
                        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    }))
                }
            };

            let addresses = match discovered {
                Ok(addresses) => addresses,
                Err(e) => {
                    debug!(node_id, error = %e, "discovery query failed");
                    continue;
                }
            };
            if addresses.is_empty() {
                continue;
            }

            // The node may have reconnected on its own while we were asking.
            if !self.still_waiting(node_id) {
                debug!(node_id, "node state changed during discovery, not reconnecting");
                continue;
            }

            match self.controller.trigger_reconnect(node_id).await {
                Ok(()) => {
                    info!(node_id, addresses = addresses.len(), "node rediscovered, reconnect triggered");
                    report.reconnected.push(node_id);
                }
                Err(e) => warn!(node_id, error = %e, "failed to trigger reconnect"),
            }
        }

        report
    }

    fn still_waiting(&self, node_id: NodeId) -> bool {
        self.controller.connection_state(node_id) == Some(ConnectionState::AwaitingDiscovery)
    }
}

async fn scan_task<C: DiscoveryController>(inner: Arc<ScannerInner<C>>, cancel: CancellationToken) {
    let interval: Duration = inner.config.interval;
    loop {
        if !sleep_or_cancel(interval, &cancel).await {
            break;
        }
        let report = inner.scan(&cancel).await;
        if !report.reconnected.is_empty() {
            debug!(
                waiting = report.waiting,
                reconnected = report.reconnected.len(),
                "discovery scan complete"
            );
        }
    }
}
