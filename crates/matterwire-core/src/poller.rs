// ── Custom cluster poller ──
//
// Some vendor power-metering firmware exposes its measurements on a
// private cluster that never sends subscription reports. Nodes carrying
// it get their measurement attributes re-read on a fixed interval, one
// node at a time, from a single timer task.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PollerConfig;
use crate::model::{AttributeId, AttributePath, AttributeTable, AttributeValue, ClusterId, NodeId};
use crate::sdk::AttributeReader;
use crate::task::{LoopPhase, lock, sleep_or_cancel};

/// Basic Information cluster, VendorID attribute (`0/40/2`).
pub const VENDOR_ID_PATH: AttributePath = AttributePath::new(0, 0x0028, 2);

/// Vendor whose firmware needs polling.
pub const POLLED_VENDOR_ID: i128 = 4874;

/// Private energy cluster published by that vendor.
pub const VENDOR_ENERGY_CLUSTER: ClusterId = 0x130A_FC01;

/// Standard Electrical Power Measurement cluster. Firmware that implements
/// it reports measurements normally and needs no polling.
pub const STANDARD_POWER_CLUSTER: ClusterId = 0x0090;

/// Voltage, current, watt and accumulated watt-hours.
pub const VENDOR_ENERGY_ATTRIBUTES: [AttributeId; 4] =
    [0x130A_0008, 0x130A_0009, 0x130A_000A, 0x130A_000B];

/// Paths that need polling for a node with this attribute table.
///
/// Empty unless the node reports the polled vendor id, exposes the vendor
/// energy cluster, and does not expose the standard power cluster.
pub fn compute_polled_attributes(table: &AttributeTable) -> BTreeSet<AttributePath> {
    let vendor_matches = table
        .get_path(&VENDOR_ID_PATH)
        .and_then(AttributeValue::as_int)
        == Some(POLLED_VENDOR_ID);
    if !vendor_matches
        || !table.contains_cluster(VENDOR_ENERGY_CLUSTER)
        || table.contains_cluster(STANDARD_POWER_CLUSTER)
    {
        return BTreeSet::new();
    }

    table
        .paths()
        .filter(|path| {
            path.cluster == Some(VENDOR_ENERGY_CLUSTER)
                && path
                    .attribute
                    .is_some_and(|id| VENDOR_ENERGY_ATTRIBUTES.contains(&id))
        })
        .collect()
}

struct PollerState {
    registrations: BTreeMap<NodeId, BTreeSet<AttributePath>>,
    phase: LoopPhase,
    cancel: CancellationToken,
    timer: Option<JoinHandle<()>>,
}

struct PollerInner<R> {
    reader: Arc<R>,
    config: PollerConfig,
    runtime: Option<Handle>,
    state: Mutex<PollerState>,
}

impl<R> PollerInner<R> {
    fn runtime(&self) -> Option<Handle> {
        self.runtime.clone().or_else(|| Handle::try_current().ok())
    }
}

/// Periodic re-read of vendor attributes that don't report on their own.
///
/// Cheap to clone; clones share the same timer and registrations.
///
/// The timer runs on the runtime captured at construction, so nodes can be
/// registered from threads outside Tokio.
pub struct CustomClusterPoller<R> {
    inner: Arc<PollerInner<R>>,
}

impl<R> Clone for CustomClusterPoller<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: AttributeReader + 'static> CustomClusterPoller<R> {
    /// Uses the current Tokio runtime if there is one. Without it the
    /// timer starts from the first registration made inside a runtime.
    pub fn new(reader: Arc<R>, config: PollerConfig) -> Self {
        Self::build(reader, config, Handle::try_current().ok())
    }

    /// Schedule the timer on `runtime`.
    pub fn with_runtime(reader: Arc<R>, config: PollerConfig, runtime: Handle) -> Self {
        Self::build(reader, config, Some(runtime))
    }

    fn build(reader: Arc<R>, config: PollerConfig, runtime: Option<Handle>) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                reader,
                config,
                runtime,
                state: Mutex::new(PollerState {
                    registrations: BTreeMap::new(),
                    phase: LoopPhase::Idle,
                    cancel: CancellationToken::new(),
                    timer: None,
                }),
            }),
        }
    }

    /// (Re)evaluate a node against its current attribute table.
    ///
    /// An empty applicable set unregisters the node. Returns the set now
    /// registered.
    pub fn register_node(&self, node_id: NodeId, table: &AttributeTable) -> BTreeSet<AttributePath> {
        let paths = compute_polled_attributes(table);
        if paths.is_empty() {
            self.unregister_node(node_id);
            return paths;
        }

        let mut state = lock(&self.inner.state);
        if state.registrations.get(&node_id) != Some(&paths) {
            debug!(node_id, paths = paths.len(), "node registered for custom cluster polling");
            state.registrations.insert(node_id, paths.clone());
        }

        if state.phase == LoopPhase::Idle {
            let Some(runtime) = self.inner.runtime() else {
                warn!(node_id, "no Tokio runtime available, poll timer not started");
                return paths;
            };
            let delay = jitter(self.inner.config.max_initial_jitter);
            debug!(delay_ms = delay.as_millis(), "scheduling first poll cycle");
            state.phase = LoopPhase::Scheduled;
            let cancel = state.cancel.clone();
            state.timer = Some(runtime.spawn(poll_task(Arc::clone(&self.inner), delay, cancel)));
        }
        paths
    }

    pub fn unregister_node(&self, node_id: NodeId) {
        if lock(&self.inner.state).registrations.remove(&node_id).is_some() {
            debug!(node_id, "node unregistered from custom cluster polling");
        }
    }

    /// Registered nodes and their paths.
    pub fn registered(&self) -> BTreeMap<NodeId, BTreeSet<AttributePath>> {
        lock(&self.inner.state).registrations.clone()
    }

    pub fn phase(&self) -> LoopPhase {
        lock(&self.inner.state).phase
    }

    /// Cancel any pending delay and the timer, and forget every
    /// registration. Idempotent; a later registration starts afresh.
    pub fn stop(&self) {
        let mut state = lock(&self.inner.state);
        state.cancel.cancel();
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        if !state.registrations.is_empty() {
            info!(nodes = state.registrations.len(), "custom cluster poller stopped");
        }
        state.registrations.clear();
        state.phase = LoopPhase::Idle;
        state.cancel = CancellationToken::new();
    }
}

impl<R: AttributeReader> PollerInner<R> {
    /// Read every registered node once, in node id order.
    async fn run_cycle(&self, cancel: &CancellationToken) {
        let nodes: Vec<NodeId> = lock(&self.state).registrations.keys().copied().collect();

        for (index, node_id) in nodes.into_iter().enumerate() {
            if index > 0 && !sleep_or_cancel(self.config.inter_node_delay, cancel).await {
                return;
            }

            let registered = lock(&self.state).registrations.get(&node_id).cloned();
            let Some(paths) = registered else {
                debug!(node_id, "node unregistered mid-cycle, skipping");
                continue;
            };
            let paths: Vec<AttributePath> = paths.into_iter().collect();

            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                result = self.reader.read_attributes(node_id, &paths) => result,
            };
            match result {
                Ok(values) => debug!(node_id, attributes = values.len(), "polled custom cluster attributes"),
                Err(e) => debug!(node_id, error = %e, "custom cluster poll failed"),
            }
        }
    }
}

/// Timer task: wait, run a cycle, reschedule while registrations remain.
async fn poll_task<R: AttributeReader>(
    inner: Arc<PollerInner<R>>,
    first_delay: Duration,
    cancel: CancellationToken,
) {
    let mut delay = first_delay;
    loop {
        if !sleep_or_cancel(delay, &cancel).await {
            break;
        }

        {
            let mut state = lock(&inner.state);
            if cancel.is_cancelled() {
                break;
            }
            if state.registrations.is_empty() {
                state.phase = LoopPhase::Idle;
                break;
            }
            state.phase = LoopPhase::Running;
        }

        inner.run_cycle(&cancel).await;

        {
            let mut state = lock(&inner.state);
            if cancel.is_cancelled() {
                break;
            }
            if state.registrations.is_empty() {
                state.phase = LoopPhase::Idle;
                break;
            }
            state.phase = LoopPhase::Scheduled;
        }
        delay = inner.config.interval;
    }
}

fn jitter(max: Duration) -> Duration {
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(rand::rng().random_range(0..=max_ms))
}
