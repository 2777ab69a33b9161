// ── Bridge facade ──
//
// Wires the SDK callbacks into the cache, node registry and poller, owns
// the background loops, and broadcasts what changed to the API layer.

use std::sync::Arc;

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::codec;
use crate::config::BridgeConfig;
use crate::convert::ValueConverter;
use crate::error::CoreError;
use crate::model::{
    AttributePath, AttributeValue, ConnectionState, NodeId, NodeModel, NodeRecord,
};
use crate::poller::{self, CustomClusterPoller};
use crate::scanner::DiscoveryScanner;
use crate::schema::SchemaRegistry;
use crate::sdk::{AttributeReader, DiscoveryController};
use crate::store::{AttributeCache, NodeRegistry};

/// Change notifications for the API layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BridgeEvent {
    NodeAdded {
        node: NodeRecord,
    },
    /// The node's cached attribute table changed structurally.
    NodeUpdated {
        node_id: NodeId,
    },
    AttributeUpdated {
        node_id: NodeId,
        path: AttributePath,
        value: AttributeValue,
    },
    NodeAvailabilityChanged {
        node_id: NodeId,
        available: bool,
    },
    NodeRemoved {
        node_id: NodeId,
    },
}

struct BridgeInner<S> {
    schema: Arc<SchemaRegistry>,
    cache: AttributeCache,
    registry: NodeRegistry,
    poller: CustomClusterPoller<S>,
    scanner: DiscoveryScanner<S>,
    event_tx: broadcast::Sender<BridgeEvent>,
}

/// Entry point for the embedding service.
///
/// Cheaply cloneable. The service forwards SDK callbacks to the
/// `node_*` / `*_changed` methods and relays [`BridgeEvent`]s to clients.
/// Callbacks may arrive on SDK threads outside Tokio; background loops run
/// on the runtime the bridge was built in (or given with
/// [`with_runtime`](Self::with_runtime)).
pub struct Bridge<S> {
    inner: Arc<BridgeInner<S>>,
}

impl<S> Clone for Bridge<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: AttributeReader + DiscoveryController + 'static> Bridge<S> {
    pub fn new(sdk: Arc<S>, schema: Arc<SchemaRegistry>, config: BridgeConfig) -> Self {
        let poller = CustomClusterPoller::new(Arc::clone(&sdk), config.poller);
        let scanner = DiscoveryScanner::new(sdk, config.scanner);
        Self::assemble(schema, config, poller, scanner)
    }

    /// Run the poller and scanner on `runtime` regardless of which thread
    /// the bridge is built or called from.
    pub fn with_runtime(
        sdk: Arc<S>,
        schema: Arc<SchemaRegistry>,
        config: BridgeConfig,
        runtime: &Handle,
    ) -> Self {
        let poller = CustomClusterPoller::with_runtime(Arc::clone(&sdk), config.poller, runtime.clone());
        let scanner = DiscoveryScanner::with_runtime(sdk, config.scanner, runtime.clone());
        Self::assemble(schema, config, poller, scanner)
    }

    fn assemble(
        schema: Arc<SchemaRegistry>,
        config: BridgeConfig,
        poller: CustomClusterPoller<S>,
        scanner: DiscoveryScanner<S>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_channel_size.max(1));
        Self {
            inner: Arc::new(BridgeInner {
                cache: AttributeCache::new(Arc::clone(&schema)),
                schema,
                registry: NodeRegistry::new(),
                poller,
                scanner,
                event_tx,
            }),
        }
    }

    /// Start the discovery scanner. The poller starts on its own once a
    /// node needs it.
    pub fn start(&self) {
        self.inner.scanner.start();
        info!(clusters = self.inner.schema.cluster_count(), "bridge started");
    }

    /// Stop both background loops.
    pub fn shutdown(&self) {
        self.inner.scanner.stop();
        self.inner.poller.stop();
        info!("bridge shut down");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.inner.event_tx.subscribe()
    }

    // ── SDK callbacks ───────────────────────────────────────────────

    /// A node became known to the SDK (commissioned, or restored at
    /// startup).
    pub fn node_registered(&self, node: &NodeModel) {
        let known = self.inner.registry.contains(node.id);
        if known {
            self.connection_state_changed(node.id, node.connection_state);
        } else {
            self.inner.registry.register(node.id, node.connection_state);
            self.inner.cache.track(node.id);
        }
        self.inner.cache.populate(node);
        self.refresh_poll_registration(node.id);

        if known {
            return;
        }
        if let Some(record) = self.inner.registry.get(node.id) {
            info!(node_id = node.id, state = %node.connection_state, "node added");
            self.emit(BridgeEvent::NodeAdded { node: record });
        }
    }

    /// Endpoints or clusters appeared or disappeared.
    pub fn node_structure_changed(&self, node: &NodeModel) {
        if !self.inner.registry.contains(node.id) {
            debug!(node_id = node.id, "structure change for unknown node dropped");
            return;
        }
        if !self.inner.cache.merge(node) {
            debug!(node_id = node.id, "structure change while node not settled, cache kept");
            return;
        }
        self.refresh_poll_registration(node.id);
        self.emit(BridgeEvent::NodeUpdated { node_id: node.id });
    }

    pub fn connection_state_changed(&self, node_id: NodeId, state: ConnectionState) {
        if let Some(change) = self.inner.registry.transition(node_id, state) {
            info!(node_id, available = change.available, %state, "node availability changed");
            self.emit(BridgeEvent::NodeAvailabilityChanged {
                node_id,
                available: change.available,
            });
        }
    }

    /// A pushed attribute report. `value` is in model form.
    ///
    /// Reports for nodes that are not registered (late pushes after a
    /// decommission) are dropped.
    pub fn attribute_changed(&self, node_id: NodeId, path: AttributePath, value: &AttributeValue) {
        if !self.inner.registry.contains(node_id) {
            debug!(node_id, %path, "attribute report for unknown node dropped");
            return;
        }
        let wire = self.inner.cache.update_one(node_id, &path, value);
        if affects_polling(&path) {
            self.refresh_poll_registration(node_id);
        }
        self.emit(BridgeEvent::AttributeUpdated {
            node_id,
            path,
            value: wire,
        });
    }

    /// The node was removed from the fabric. Cache, node record and poll
    /// registration are cleared together.
    pub fn node_decommissioned(&self, node_id: NodeId) {
        self.inner.cache.remove(node_id);
        self.inner.registry.remove(node_id);
        self.inner.poller.unregister_node(node_id);
        info!(node_id, "node decommissioned");
        self.emit(BridgeEvent::NodeRemoved { node_id });
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub fn node(&self, node_id: NodeId) -> Option<NodeRecord> {
        self.inner.registry.get(node_id)
    }

    pub fn nodes(&self) -> Vec<NodeRecord> {
        self.inner.registry.records()
    }

    /// The node's attributes as the JSON dictionary clients expect,
    /// keyed by `"endpoint/cluster/attribute"`.
    pub fn attributes_json(&self, node_id: NodeId) -> Result<String, CoreError> {
        let table = self
            .inner
            .cache
            .get(node_id)
            .ok_or(CoreError::NodeNotFound { node_id })?;
        let dictionary = AttributeValue::Struct(table.to_wire_map());
        Ok(codec::encode(&dictionary)?)
    }

    pub fn cache(&self) -> &AttributeCache {
        &self.inner.cache
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.inner.registry
    }

    pub fn poller(&self) -> &CustomClusterPoller<S> {
        &self.inner.poller
    }

    pub fn scanner(&self) -> &DiscoveryScanner<S> {
        &self.inner.scanner
    }

    pub fn converter(&self) -> ValueConverter<'_> {
        ValueConverter::new(&self.inner.schema)
    }

    // ── Private helpers ─────────────────────────────────────────────

    fn refresh_poll_registration(&self, node_id: NodeId) {
        match self.inner.cache.get(node_id) {
            Some(table) => {
                self.inner.poller.register_node(node_id, &table);
            }
            None => self.inner.poller.unregister_node(node_id),
        }
    }

    fn emit(&self, event: BridgeEvent) {
        // No receivers is fine.
        let _ = self.inner.event_tx.send(event);
    }
}

/// Whether an attribute can change the outcome of the polling
/// applicability test.
fn affects_polling(path: &AttributePath) -> bool {
    path.matches(&poller::VENDOR_ID_PATH)
        || matches!(
            path.cluster,
            Some(poller::VENDOR_ENERGY_CLUSTER | poller::STANDARD_POWER_CLUSTER)
        )
}
