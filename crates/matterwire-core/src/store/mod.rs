// ── Reactive node state ──
//
// Attribute tables and node records, both backed by `DashMap` with a
// `watch` version counter for change notification.

mod attribute_cache;
mod node_registry;

pub use attribute_cache::AttributeCache;
pub use node_registry::{AvailabilityChange, NodeRegistry};
