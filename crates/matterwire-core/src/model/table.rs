// ── Attribute table ──
//
// Nested `endpoint → cluster → attribute → value` map. Used both for the
// SDK's model view of a node and for the cached wire-form snapshot.

use std::collections::BTreeMap;

use indexmap::IndexMap;

use super::path::{AttributeId, AttributePath, ClusterId, EndpointId};
use super::value::AttributeValue;

pub type ClusterAttributes = BTreeMap<AttributeId, AttributeValue>;
pub type EndpointClusters = BTreeMap<ClusterId, ClusterAttributes>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeTable {
    endpoints: BTreeMap<EndpointId, EndpointClusters>,
}

impl AttributeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite one attribute. Returns the previous value.
    pub fn insert(
        &mut self,
        endpoint: EndpointId,
        cluster: ClusterId,
        attribute: AttributeId,
        value: AttributeValue,
    ) -> Option<AttributeValue> {
        self.endpoints
            .entry(endpoint)
            .or_default()
            .entry(cluster)
            .or_default()
            .insert(attribute, value)
    }

    /// Insert by path. Wildcard paths are ignored and return `false`.
    pub fn insert_path(&mut self, path: &AttributePath, value: AttributeValue) -> bool {
        let (Some(endpoint), Some(cluster), Some(attribute)) =
            (path.endpoint, path.cluster, path.attribute)
        else {
            return false;
        };
        self.insert(endpoint, cluster, attribute, value);
        true
    }

    pub fn get(
        &self,
        endpoint: EndpointId,
        cluster: ClusterId,
        attribute: AttributeId,
    ) -> Option<&AttributeValue> {
        self.endpoints.get(&endpoint)?.get(&cluster)?.get(&attribute)
    }

    pub fn get_path(&self, path: &AttributePath) -> Option<&AttributeValue> {
        self.get(path.endpoint?, path.cluster?, path.attribute?)
    }

    pub fn endpoint(&self, endpoint: EndpointId) -> Option<&EndpointClusters> {
        self.endpoints.get(&endpoint)
    }

    pub fn endpoint_ids(&self) -> impl Iterator<Item = EndpointId> + '_ {
        self.endpoints.keys().copied()
    }

    /// Whether any endpoint has at least one attribute of `cluster`.
    pub fn contains_cluster(&self, cluster: ClusterId) -> bool {
        self.endpoints
            .values()
            .filter_map(|clusters| clusters.get(&cluster))
            .any(|attributes| !attributes.is_empty())
    }

    /// All attributes in path order.
    pub fn iter(&self) -> impl Iterator<Item = (AttributePath, &AttributeValue)> + '_ {
        self.endpoints.iter().flat_map(|(&endpoint, clusters)| {
            clusters.iter().flat_map(move |(&cluster, attributes)| {
                attributes.iter().map(move |(&attribute, value)| {
                    (AttributePath::new(endpoint, cluster, attribute), value)
                })
            })
        })
    }

    pub fn paths(&self) -> impl Iterator<Item = AttributePath> + '_ {
        self.iter().map(|(path, _)| path)
    }

    /// Attributes falling within a (possibly wildcard) path.
    pub fn filter<'a>(
        &'a self,
        pattern: &'a AttributePath,
    ) -> impl Iterator<Item = (AttributePath, &'a AttributeValue)> + 'a {
        self.iter().filter(move |(path, _)| pattern.matches(path))
    }

    pub fn len(&self) -> usize {
        self.endpoints
            .values()
            .flat_map(BTreeMap::values)
            .map(BTreeMap::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overlay every attribute of `other` onto `self`.
    ///
    /// Endpoints, clusters and attributes absent from `other` are kept.
    pub fn overlay(&mut self, other: &AttributeTable) {
        for (&endpoint, clusters) in &other.endpoints {
            let target = self.endpoints.entry(endpoint).or_default();
            for (&cluster, attributes) in clusters {
                let target = target.entry(cluster).or_default();
                for (&attribute, value) in attributes {
                    target.insert(attribute, value.clone());
                }
            }
        }
    }

    /// Flat `"endpoint/cluster/attribute" → value` dictionary, the shape
    /// clients expect in node payloads.
    pub fn to_wire_map(&self) -> IndexMap<String, AttributeValue> {
        self.iter()
            .map(|(path, value)| (path.to_string(), value.clone()))
            .collect()
    }
}

impl FromIterator<(AttributePath, AttributeValue)> for AttributeTable {
    fn from_iter<I: IntoIterator<Item = (AttributePath, AttributeValue)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (path, value) in iter {
            table.insert_path(&path, value);
        }
        table
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample() -> AttributeTable {
        let mut table = AttributeTable::new();
        table.insert(0, 40, 2, AttributeValue::from(4874_u32));
        table.insert(1, 6, 0, AttributeValue::from(true));
        table.insert(2, 6, 0, AttributeValue::from(false));
        table
    }

    #[test]
    fn insert_and_get() {
        let table = sample();
        assert_eq!(table.get(0, 40, 2), Some(&AttributeValue::Int(4874)));
        assert_eq!(table.get_path(&"1/6/0".parse().unwrap()), Some(&AttributeValue::Bool(true)));
        assert!(table.get(3, 6, 0).is_none());
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn wildcard_insert_is_rejected() {
        let mut table = AttributeTable::new();
        assert!(!table.insert_path(&"*/6/0".parse().unwrap(), AttributeValue::Null));
        assert!(table.is_empty());
    }

    #[test]
    fn filter_by_wildcard() {
        let table = sample();
        let pattern: AttributePath = "*/6/*".parse().unwrap();
        let paths: Vec<String> = table.filter(&pattern).map(|(p, _)| p.to_string()).collect();
        assert_eq!(paths, ["1/6/0", "2/6/0"]);
    }

    #[test]
    fn overlay_keeps_absent_entries() {
        let mut table = sample();
        let mut update = AttributeTable::new();
        update.insert(1, 6, 0, AttributeValue::from(false));
        update.insert(1, 8, 0, AttributeValue::from(254_u8));

        table.overlay(&update);
        assert_eq!(table.get(1, 6, 0), Some(&AttributeValue::Bool(false)));
        assert_eq!(table.get(1, 8, 0), Some(&AttributeValue::Int(254)));
        assert_eq!(table.get(2, 6, 0), Some(&AttributeValue::Bool(false)));
        assert_eq!(table.get(0, 40, 2), Some(&AttributeValue::Int(4874)));
    }

    #[test]
    fn contains_cluster_on_any_endpoint() {
        let table = sample();
        assert!(table.contains_cluster(6));
        assert!(!table.contains_cluster(0x0090));
    }

    #[test]
    fn wire_map_keys_are_path_strings() {
        let map = sample().to_wire_map();
        let keys: Vec<&str> = map.keys().map(String::as_str).collect();
        assert_eq!(keys, ["0/40/2", "1/6/0", "2/6/0"]);
    }
}
