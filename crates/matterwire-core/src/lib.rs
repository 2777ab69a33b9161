//! matterwire-core: translation and resilience layer between a Matter
//! device-control SDK and a flat JSON/WebSocket API.
//!
//! The [`Bridge`] is the usual entry point. The individual pieces
//! ([`ValueConverter`], [`codec`], [`AttributeCache`], [`is_available`],
//! [`CustomClusterPoller`], [`DiscoveryScanner`]) are usable on their own.

pub mod availability;
pub mod bridge;
pub mod codec;
pub mod config;
pub mod convert;
pub mod error;
pub mod model;
pub mod poller;
pub mod scanner;
pub mod schema;
pub mod sdk;
pub mod store;
mod task;

// ── Primary re-exports ──────────────────────────────────────────────
pub use availability::is_available;
pub use bridge::{Bridge, BridgeEvent};
pub use config::{BridgeConfig, PollerConfig, ScannerConfig};
pub use convert::ValueConverter;
pub use error::{CodecError, ConvertError, CoreError, SchemaError, SdkError};
pub use poller::{CustomClusterPoller, compute_polled_attributes};
pub use scanner::{DiscoveryScanner, ScanReport};
pub use schema::SchemaRegistry;
pub use sdk::{AttributeReader, DiscoveryController};
pub use store::{AttributeCache, AvailabilityChange, NodeRegistry};
pub use task::LoopPhase;

pub use model::{
    AttributeId, AttributePath, AttributeTable, AttributeValue, ClusterId, ConnectionState,
    EndpointId, NodeId, NodeModel, NodeRecord, StructValue,
};
