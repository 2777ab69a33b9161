// ── Domain model ──
//
// Identity, value, and node types shared by every core component.

pub mod node;
pub mod path;
pub mod table;
pub mod value;

pub use node::{ConnectionState, NodeModel, NodeRecord};
pub use path::{AttributeId, AttributePath, ClusterId, EndpointId, NodeId, ParsePathError};
pub use table::{AttributeTable, ClusterAttributes, EndpointClusters};
pub use value::{AttributeValue, StructValue};
