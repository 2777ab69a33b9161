// ── Node domain types ──
//
// Connection state, the tracked per-node record, and the collaborator's
// view of a device (`NodeModel`) that feeds the attribute cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};

use super::path::NodeId;
use super::table::AttributeTable;

/// Connection state reported by the device-control SDK.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    Reconnecting,
    AwaitingDiscovery,
    Disconnected,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn is_awaiting_discovery(self) -> bool {
        matches!(self, Self::AwaitingDiscovery)
    }
}

/// Tracked state of one commissioned node.
///
/// `previous_connection_state` is written by the node registry in the
/// same step that recomputes `available`, never by callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub connection_state: ConnectionState,
    pub previous_connection_state: Option<ConnectionState>,
    pub available: bool,
    pub last_transition: DateTime<Utc>,
}

/// Snapshot of a device as exposed by the SDK.
///
/// `ready` is the SDK's opaque "structurally initialized" flag; the cache
/// only trusts `attributes` wholesale when it is set and the node is
/// connected. Values in `attributes` are in model form.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeModel {
    pub id: NodeId,
    pub connection_state: ConnectionState,
    pub ready: bool,
    pub attributes: AttributeTable,
}

impl NodeModel {
    pub fn new(id: NodeId, connection_state: ConnectionState, ready: bool) -> Self {
        Self {
            id,
            connection_state,
            ready,
            attributes: AttributeTable::default(),
        }
    }

    /// Whether the SDK view can be trusted as a full picture of the node.
    pub fn is_settled(&self) -> bool {
        self.ready && self.connection_state.is_connected()
    }
}
