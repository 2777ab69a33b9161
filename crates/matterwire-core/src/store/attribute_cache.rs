// ── Per-node attribute cache ──
//
// Wire-form attribute tables keyed by node id. The SDK reports structure
// changes while a node is still initializing, so a partial view must never
// erase what an earlier full view established: rebuilds only happen once
// the node is ready and connected, and merges only ever add or overwrite.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::watch;
use tracing::trace;

use crate::convert::ValueConverter;
use crate::model::{AttributePath, AttributeTable, AttributeValue, NodeId, NodeModel};
use crate::schema::SchemaRegistry;

/// Concurrent cache of wire-form attribute tables.
///
/// Every table is stored behind an `Arc` and replaced in one swap, so a
/// reader holding a table never sees it change underneath.
pub struct AttributeCache {
    schema: Arc<SchemaRegistry>,
    tables: DashMap<NodeId, Arc<AttributeTable>>,
    version: watch::Sender<u64>,
}

impl AttributeCache {
    pub fn new(schema: Arc<SchemaRegistry>) -> Self {
        let (version, _) = watch::channel(0u64);
        Self {
            schema,
            tables: DashMap::new(),
            version,
        }
    }

    /// Rebuild the node's table from its current model view.
    ///
    /// Returns `false` without touching the cache unless the node is
    /// ready and connected.
    pub fn populate(&self, node: &NodeModel) -> bool {
        if !node.is_settled() {
            trace!(node_id = node.id, "populate skipped, node not settled");
            return false;
        }

        let table = self.converter().table_to_wire(&node.attributes);
        self.tables.insert(node.id, Arc::new(table));
        self.bump_version();
        true
    }

    /// Overlay the node's currently visible attributes onto its cached
    /// table. Endpoints and clusters the node doesn't expose right now are
    /// kept from the previous snapshot.
    ///
    /// Same readiness guard as [`populate`](Self::populate).
    pub fn merge(&self, node: &NodeModel) -> bool {
        if !node.is_settled() {
            trace!(node_id = node.id, "merge skipped, node not settled");
            return false;
        }

        let incoming = self.converter().table_to_wire(&node.attributes);
        match self.tables.entry(node.id) {
            Entry::Occupied(mut entry) => {
                let mut merged = AttributeTable::clone(entry.get());
                merged.overlay(&incoming);
                entry.insert(Arc::new(merged));
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(incoming));
            }
        }
        self.bump_version();
        true
    }

    /// Start an empty table for a node the SDK just reported, so pushes
    /// that arrive before the first full view have somewhere to land.
    /// Returns `false` if the node already has a table.
    pub fn track(&self, node_id: NodeId) -> bool {
        match self.tables.entry(node_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(AttributeTable::new()));
                self.bump_version();
                true
            }
        }
    }

    /// Store a single pushed attribute value, regardless of readiness.
    ///
    /// Returns the converted wire value. Nothing is stored for wildcard
    /// paths or for nodes without a table (never tracked, or removed).
    pub fn update_one(
        &self,
        node_id: NodeId,
        path: &AttributePath,
        value: &AttributeValue,
    ) -> AttributeValue {
        let wire = match (path.cluster, path.attribute) {
            (Some(cluster), Some(attribute)) => {
                self.converter().attribute_to_wire(cluster, attribute, value)
            }
            _ => value.clone(),
        };
        if !path.is_concrete() {
            return wire;
        }

        let Some(mut entry) = self.tables.get_mut(&node_id) else {
            trace!(node_id, %path, "push for untracked node not stored");
            return wire;
        };
        let mut updated = AttributeTable::clone(entry.value());
        updated.insert_path(path, wire.clone());
        *entry.value_mut() = Arc::new(updated);
        drop(entry);

        self.bump_version();
        wire
    }

    pub fn get(&self, node_id: NodeId) -> Option<Arc<AttributeTable>> {
        self.tables.get(&node_id).map(|r| Arc::clone(r.value()))
    }

    /// Drop a node's table. Only used when the node is decommissioned.
    pub fn remove(&self, node_id: NodeId) -> Option<Arc<AttributeTable>> {
        let removed = self.tables.remove(&node_id).map(|(_, table)| table);
        if removed.is_some() {
            self.bump_version();
        }
        removed
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.tables.iter().map(|r| *r.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Version counter bumped on every mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    fn converter(&self) -> ValueConverter<'_> {
        ValueConverter::new(&self.schema)
    }

    fn bump_version(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}
