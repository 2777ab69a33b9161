//! Cluster schema definitions and the interned registry.
//!
//! Schemas arrive as serde-loadable [`ClusterDefinition`]s and are interned
//! into a [`SchemaRegistry`] arena. Every type node is classified into a
//! [`ValueKind`] exactly once, at load time, and struct/bitmap member lists
//! are resolved (wire names, tags, masks) alongside it. Conversion code only
//! ever dispatches on that precomputed tag via a stable [`SchemaId`].

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::error::SchemaError;
use crate::model::{AttributeId, ClusterId};

// ── Definitions (external input) ────────────────────────────────────

/// Declared value type of an attribute or member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Metatype {
    Boolean,
    Integer,
    Float,
    Enum,
    String,
    Bytes,
    Bitmap,
    Struct,
    List,
    #[serde(rename = "epoch-s")]
    #[strum(serialize = "epoch-s")]
    EpochSeconds,
    #[serde(rename = "epoch-us")]
    #[strum(serialize = "epoch-us")]
    EpochMicroseconds,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDefinition {
    pub metatype: Metatype,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bits: Vec<BitDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<Box<TypeDefinition>>,
}

impl TypeDefinition {
    pub fn of(metatype: Metatype) -> Self {
        Self {
            metatype,
            fields: Vec::new(),
            bits: Vec::new(),
            element: None,
        }
    }

    pub fn structure(fields: Vec<FieldDefinition>) -> Self {
        Self {
            fields,
            ..Self::of(Metatype::Struct)
        }
    }

    pub fn bitmap(bits: Vec<BitDefinition>) -> Self {
        Self {
            bits,
            ..Self::of(Metatype::Bitmap)
        }
    }

    pub fn list(element: TypeDefinition) -> Self {
        Self {
            element: Some(Box::new(element)),
            ..Self::of(Metatype::List)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub id: u32,
    pub name: String,
    #[serde(flatten)]
    pub ty: TypeDefinition,
}

impl FieldDefinition {
    pub fn new(id: u32, name: impl Into<String>, ty: TypeDefinition) -> Self {
        Self {
            id,
            name: name.into(),
            ty,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitDefinition {
    pub name: String,
    #[serde(flatten)]
    pub position: BitPosition,
}

impl BitDefinition {
    pub fn flag(name: impl Into<String>, bit: u8) -> Self {
        Self {
            name: name.into(),
            position: BitPosition::Flag { bit },
        }
    }

    pub fn range(name: impl Into<String>, min_bit: u8, max_bit: u8) -> Self {
        Self {
            name: name.into(),
            position: BitPosition::Range { min_bit, max_bit },
        }
    }
}

/// Either a single flag bit or an inclusive multi-bit field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BitPosition {
    Flag {
        bit: u8,
    },
    #[serde(rename_all = "camelCase")]
    Range {
        min_bit: u8,
        max_bit: u8,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDefinition {
    pub id: AttributeId,
    pub name: String,
    #[serde(flatten)]
    pub ty: TypeDefinition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterDefinition {
    pub id: ClusterId,
    pub name: String,
    #[serde(default)]
    pub attributes: Vec<AttributeDefinition>,
}

// ── Interned schema ─────────────────────────────────────────────────

/// Conversion strategy of a type node, decided once per node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Passthrough,
    EpochSeconds,
    EpochMicroseconds,
    Bytes,
    Bitmap,
    Struct,
    List,
}

impl ValueKind {
    /// Structs without fields, bitmaps without members and lists without an
    /// element type carry nothing to translate.
    fn classify(def: &TypeDefinition) -> Self {
        match def.metatype {
            Metatype::EpochSeconds => Self::EpochSeconds,
            Metatype::EpochMicroseconds => Self::EpochMicroseconds,
            Metatype::Bytes => Self::Bytes,
            Metatype::Bitmap if !def.bits.is_empty() => Self::Bitmap,
            Metatype::Struct if !def.fields.is_empty() => Self::Struct,
            Metatype::List if def.element.is_some() => Self::List,
            _ => Self::Passthrough,
        }
    }
}

/// Stable handle to an interned type node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchemaId(u32);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructMember {
    pub id: u32,
    /// Model key.
    pub name: String,
    /// camelCase key used by name-keyed wire payloads.
    pub wire_name: String,
    /// Decimal field id used by tag-keyed wire payloads.
    pub tag: String,
    pub schema: SchemaId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitmapMember {
    pub name: String,
    pub min_bit: u8,
    pub max_bit: u8,
}

impl BitmapMember {
    pub fn is_flag(&self) -> bool {
        self.min_bit == self.max_bit
    }

    /// `((1 << width) - 1) << min_bit`.
    pub fn mask(&self) -> i128 {
        let width = u32::from(self.max_bit - self.min_bit) + 1;
        ((1_i128 << width) - 1) << self.min_bit
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeNode {
    pub metatype: Metatype,
    pub kind: ValueKind,
    pub fields: Vec<StructMember>,
    pub bits: Vec<BitmapMember>,
    pub element: Option<SchemaId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeSchema {
    pub cluster_id: ClusterId,
    pub id: AttributeId,
    pub name: String,
    pub schema: SchemaId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSchema {
    pub id: ClusterId,
    pub name: String,
    attributes: BTreeMap<AttributeId, AttributeSchema>,
}

impl ClusterSchema {
    pub fn attribute(&self, id: AttributeId) -> Option<&AttributeSchema> {
        self.attributes.get(&id)
    }

    pub fn attributes(&self) -> impl Iterator<Item = &AttributeSchema> {
        self.attributes.values()
    }
}

/// Read-only schema model shared by the converter and cache.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    clusters: HashMap<ClusterId, ClusterSchema>,
    nodes: Vec<TypeNode>,
}

impl SchemaRegistry {
    /// Intern a set of cluster definitions.
    pub fn new(
        definitions: impl IntoIterator<Item = ClusterDefinition>,
    ) -> Result<Self, SchemaError> {
        let mut registry = Self::default();
        for cluster in definitions {
            if registry.clusters.contains_key(&cluster.id) {
                return Err(SchemaError::DuplicateCluster {
                    cluster_id: cluster.id,
                });
            }

            let mut attributes = BTreeMap::new();
            for attribute in &cluster.attributes {
                let schema = registry.intern(&attribute.ty)?;
                attributes.insert(
                    attribute.id,
                    AttributeSchema {
                        cluster_id: cluster.id,
                        id: attribute.id,
                        name: attribute.name.clone(),
                        schema,
                    },
                );
            }

            registry.clusters.insert(
                cluster.id,
                ClusterSchema {
                    id: cluster.id,
                    name: cluster.name,
                    attributes,
                },
            );
        }
        Ok(registry)
    }

    /// Parse a JSON array of cluster definitions.
    pub fn from_json(text: &str) -> Result<Self, SchemaError> {
        let definitions: Vec<ClusterDefinition> = serde_json::from_str(text)?;
        Self::new(definitions)
    }

    pub fn cluster(&self, id: ClusterId) -> Option<&ClusterSchema> {
        self.clusters.get(&id)
    }

    pub fn attribute(&self, cluster: ClusterId, attribute: AttributeId) -> Option<&AttributeSchema> {
        self.cluster(cluster)?.attribute(attribute)
    }

    pub fn node(&self, id: SchemaId) -> Option<&TypeNode> {
        usize::try_from(id.0).ok().and_then(|idx| self.nodes.get(idx))
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    fn intern(&mut self, def: &TypeDefinition) -> Result<SchemaId, SchemaError> {
        let mut fields = Vec::with_capacity(def.fields.len());
        for field in &def.fields {
            fields.push(StructMember {
                id: field.id,
                name: field.name.clone(),
                wire_name: camelize(&field.name),
                tag: field.id.to_string(),
                schema: self.intern(&field.ty)?,
            });
        }

        let mut bits = Vec::with_capacity(def.bits.len());
        for bit in &def.bits {
            let (min_bit, max_bit) = match bit.position {
                BitPosition::Flag { bit } => (bit, bit),
                BitPosition::Range { min_bit, max_bit } => (min_bit, max_bit),
            };
            if min_bit > max_bit || max_bit > 63 {
                return Err(SchemaError::InvalidBitRange {
                    member: bit.name.clone(),
                    min_bit,
                    max_bit,
                });
            }
            bits.push(BitmapMember {
                name: bit.name.clone(),
                min_bit,
                max_bit,
            });
        }

        let element = match &def.element {
            Some(element) => Some(self.intern(element)?),
            None => None,
        };

        let id = SchemaId(u32::try_from(self.nodes.len()).unwrap_or(u32::MAX));
        self.nodes.push(TypeNode {
            metatype: def.metatype,
            kind: ValueKind::classify(def),
            fields,
            bits,
            element,
        });
        Ok(id)
    }
}

/// Field name → camelCase wire key (`"vendor_id"` → `"vendorId"`,
/// `"FabricIndex"` → `"fabricIndex"`, `"ID"` → `"id"`).
pub fn camelize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let parts = name
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty());

    for (idx, part) in parts.enumerate() {
        let mut chars = part.chars();
        let Some(first) = chars.next() else {
            continue;
        };
        if idx == 0 {
            if part.chars().all(|c| !c.is_ascii_lowercase()) {
                out.push_str(&part.to_ascii_lowercase());
            } else {
                out.push(first.to_ascii_lowercase());
                out.push_str(chars.as_str());
            }
        } else {
            out.push(first.to_ascii_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SCHEMA_JSON: &str = r#"[
        {
            "id": 40,
            "name": "BasicInformation",
            "attributes": [
                { "id": 2, "name": "vendorId", "metatype": "integer" },
                {
                    "id": 20,
                    "name": "capabilityMinima",
                    "metatype": "struct",
                    "fields": [
                        { "id": 0, "name": "caseSessionsPerFabric", "metatype": "integer" },
                        { "id": 1, "name": "subscriptionsPerFabric", "metatype": "integer" }
                    ]
                }
            ]
        },
        {
            "id": 513,
            "name": "Thermostat",
            "attributes": [
                {
                    "id": 9,
                    "name": "remoteSensing",
                    "metatype": "bitmap",
                    "bits": [
                        { "name": "localTemperature", "bit": 0 },
                        { "name": "mode", "minBit": 1, "maxBit": 2 }
                    ]
                },
                { "id": 16, "name": "schedule", "metatype": "list", "element": { "metatype": "epoch-s" } }
            ]
        }
    ]"#;

    #[test]
    fn loads_and_classifies_from_json() {
        let registry = SchemaRegistry::from_json(SCHEMA_JSON).unwrap();
        assert_eq!(registry.cluster_count(), 2);

        let vendor = registry.attribute(40, 2).unwrap();
        assert_eq!(registry.node(vendor.schema).unwrap().kind, ValueKind::Passthrough);

        let minima = registry.attribute(40, 20).unwrap();
        let node = registry.node(minima.schema).unwrap();
        assert_eq!(node.kind, ValueKind::Struct);
        assert_eq!(node.fields[1].tag, "1");
        assert_eq!(node.fields[1].wire_name, "subscriptionsPerFabric");

        let sensing = registry.attribute(513, 9).unwrap();
        let node = registry.node(sensing.schema).unwrap();
        assert_eq!(node.kind, ValueKind::Bitmap);
        assert!(node.bits[0].is_flag());
        assert_eq!(node.bits[1].mask(), 0b110);

        let schedule = registry.attribute(513, 16).unwrap();
        let node = registry.node(schedule.schema).unwrap();
        assert_eq!(node.kind, ValueKind::List);
        let element = registry.node(node.element.unwrap()).unwrap();
        assert_eq!(element.kind, ValueKind::EpochSeconds);
    }

    #[test]
    fn empty_composites_are_passthrough() {
        let registry = SchemaRegistry::new([ClusterDefinition {
            id: 1,
            name: "Empty".into(),
            attributes: vec![
                AttributeDefinition {
                    id: 0,
                    name: "s".into(),
                    ty: TypeDefinition::of(Metatype::Struct),
                },
                AttributeDefinition {
                    id: 1,
                    name: "b".into(),
                    ty: TypeDefinition::of(Metatype::Bitmap),
                },
            ],
        }])
        .unwrap();
        for attribute in registry.cluster(1).unwrap().attributes() {
            assert_eq!(
                registry.node(attribute.schema).unwrap().kind,
                ValueKind::Passthrough
            );
        }
    }

    #[test]
    fn rejects_duplicate_clusters() {
        let cluster = ClusterDefinition {
            id: 6,
            name: "OnOff".into(),
            attributes: Vec::new(),
        };
        let err = SchemaRegistry::new([cluster.clone(), cluster]).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateCluster { cluster_id: 6 }));
    }

    #[test]
    fn rejects_inverted_bit_range() {
        let err = SchemaRegistry::new([ClusterDefinition {
            id: 1,
            name: "Bad".into(),
            attributes: vec![AttributeDefinition {
                id: 0,
                name: "b".into(),
                ty: TypeDefinition::bitmap(vec![BitDefinition::range("x", 4, 2)]),
            }],
        }])
        .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidBitRange { .. }));
    }

    #[test]
    fn camelize_names() {
        assert_eq!(camelize("vendor_id"), "vendorId");
        assert_eq!(camelize("FabricIndex"), "fabricIndex");
        assert_eq!(camelize("fabricIndex"), "fabricIndex");
        assert_eq!(camelize("ID"), "id");
        assert_eq!(camelize("node id"), "nodeId");
    }
}
