// ── Device-control SDK seams ──
//
// The core never talks to devices itself. The embedding service wraps
// its SDK handle in these traits; the poller and scanner only ever see
// them, which keeps both loops testable with in-memory fakes.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::SdkError;
use crate::model::{AttributePath, AttributeTable, ConnectionState, NodeId};

/// Bounded-duration reads of explicit attribute paths.
pub trait AttributeReader: Send + Sync {
    /// Read `paths` from `node_id`. Returned values are in model form;
    /// the SDK also reports them through its normal change callbacks.
    fn read_attributes(
        &self,
        node_id: NodeId,
        paths: &[AttributePath],
    ) -> impl Future<Output = Result<AttributeTable, SdkError>> + Send;
}

/// Connection state queries plus the discovery/reconnect controls used to
/// recover nodes stuck waiting for a network announcement.
pub trait DiscoveryController: Send + Sync {
    /// Every known node with its current connection state.
    fn node_states(&self) -> Vec<(NodeId, ConnectionState)>;

    /// Current state of one node, `None` once it is gone.
    fn connection_state(&self, node_id: NodeId) -> Option<ConnectionState>;

    /// Short discovery query for one node. An empty result means the node
    /// did not answer.
    fn discover(
        &self,
        node_id: NodeId,
        timeout: Duration,
    ) -> impl Future<Output = Result<Vec<SocketAddr>, SdkError>> + Send;

    /// Ask the SDK to reconnect immediately instead of waiting for its own
    /// fallback poll.
    fn trigger_reconnect(&self, node_id: NodeId) -> impl Future<Output = Result<(), SdkError>> + Send;
}
