// ── Core error types ──
//
// One enum per concern, plus the umbrella `CoreError` surfaced by the
// bridge facade. Per-device failures inside the background loops are
// logged and swallowed; these types only reach callers of single
// operations (one attribute write, one schema load, one decode).

use thiserror::Error;

use crate::model::{ClusterId, NodeId};

/// Wire ⇄ model conversion failure for a single attribute.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConvertError {
    #[error("bitmap value must be an integer, got {found}")]
    InvalidBitmap { found: &'static str },
}

/// JSON text could not be parsed or produced.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Cluster schema definitions could not be interned.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("cluster {cluster_id:#06x} is defined more than once")]
    DuplicateCluster { cluster_id: ClusterId },

    #[error("bitmap member '{member}' has invalid bit range {min_bit}..={max_bit}")]
    InvalidBitRange {
        member: String,
        min_bit: u8,
        max_bit: u8,
    },

    #[error("schema JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure reported by the device-control SDK collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SdkError {
    #[error("node {node_id} not found")]
    NodeNotFound { node_id: NodeId },

    #[error("attribute read failed for node {node_id}: {reason}")]
    Read { node_id: NodeId, reason: String },

    #[error("discovery failed for node {node_id}: {reason}")]
    Discovery { node_id: NodeId, reason: String },

    #[error("reconnect could not be triggered for node {node_id}: {reason}")]
    Reconnect { node_id: NodeId, reason: String },

    #[error("operation on node {node_id} timed out after {timeout_ms}ms")]
    Timeout { node_id: NodeId, timeout_ms: u64 },
}

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Node not found: {node_id}")]
    NodeNotFound { node_id: NodeId },

    #[error(transparent)]
    Convert(#[from] ConvertError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Sdk(#[from] SdkError),
}
