// ── Node registry ──
//
// Owns the `NodeRecord` of every commissioned node. The previous
// connection state is recorded here, in the same step that recomputes
// availability, so callers can't get the order wrong.

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use crate::availability::is_available;
use crate::model::{ConnectionState, NodeId, NodeRecord};

/// Emitted when a node's availability boolean flips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AvailabilityChange {
    pub node_id: NodeId,
    pub available: bool,
    pub state: ConnectionState,
    pub previous: Option<ConnectionState>,
}

pub struct NodeRegistry {
    nodes: DashMap<NodeId, NodeRecord>,
    version: watch::Sender<u64>,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeRegistry {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0u64);
        Self {
            nodes: DashMap::new(),
            version,
        }
    }

    /// Start tracking a node. Returns `true` if it was new; a node that is
    /// already known goes through [`transition`](Self::transition) instead.
    pub fn register(&self, node_id: NodeId, state: ConnectionState) -> bool {
        if self.nodes.contains_key(&node_id) {
            self.transition(node_id, state);
            return false;
        }

        self.nodes.insert(
            node_id,
            NodeRecord {
                id: node_id,
                connection_state: state,
                previous_connection_state: None,
                available: is_available(state, None),
                last_transition: Utc::now(),
            },
        );
        self.bump_version();
        true
    }

    /// Record a connection-state transition.
    ///
    /// Returns a change only when the availability boolean flips. Unknown
    /// nodes and repeats of the current state are ignored.
    pub fn transition(&self, node_id: NodeId, state: ConnectionState) -> Option<AvailabilityChange> {
        let change = {
            let Some(mut record) = self.nodes.get_mut(&node_id) else {
                debug!(node_id, %state, "state change for unknown node ignored");
                return None;
            };
            if record.connection_state == state {
                return None;
            }

            let previous = record.connection_state;
            let was_available = record.available;
            record.previous_connection_state = Some(previous);
            record.connection_state = state;
            record.available = is_available(state, Some(previous));
            record.last_transition = Utc::now();

            (record.available != was_available).then_some(AvailabilityChange {
                node_id,
                available: record.available,
                state,
                previous: Some(previous),
            })
        };

        self.bump_version();
        change
    }

    pub fn get(&self, node_id: NodeId) -> Option<NodeRecord> {
        self.nodes.get(&node_id).map(|r| r.value().clone())
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.nodes.contains_key(&node_id)
    }

    pub fn remove(&self, node_id: NodeId) -> Option<NodeRecord> {
        let removed = self.nodes.remove(&node_id).map(|(_, record)| record);
        if removed.is_some() {
            self.bump_version();
        }
        removed
    }

    /// All records, ordered by node id.
    pub fn records(&self) -> Vec<NodeRecord> {
        let mut records: Vec<NodeRecord> = self.nodes.iter().map(|r| r.value().clone()).collect();
        records.sort_unstable_by_key(|record| record.id);
        records
    }

    /// Nodes currently waiting for a network announcement.
    pub fn waiting(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|r| r.connection_state.is_awaiting_discovery())
            .map(|r| *r.key())
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    fn bump_version(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}
