// ── Wire ⇄ model value conversion ──
//
// Schema-driven transcoding between the flat wire representation used by
// API clients and the SDK's typed model values. Dispatch is a single
// match on the `ValueKind` the registry computed when it interned the
// schema node; values whose shape doesn't match their schema pass through.

use base64::Engine as _;
use bytes::Bytes;
use tracing::debug;

use crate::error::ConvertError;
use crate::model::{
    AttributeId, AttributePath, AttributeTable, AttributeValue, ClusterId, StructValue,
};
use crate::schema::{AttributeSchema, BitmapMember, SchemaId, SchemaRegistry, TypeNode, ValueKind};

/// Seconds between the Unix epoch and the protocol epoch (2000-01-01).
pub const EPOCH_OFFSET_SECONDS: i128 = 946_684_800;

/// Same offset in microseconds.
pub const EPOCH_OFFSET_MICROS: i128 = EPOCH_OFFSET_SECONDS * 1_000_000;

/// Key style for struct values on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StructKeys {
    /// Numeric field ids, used for attribute reads and reports.
    Tagged,
    /// camelCase field names, used for command results.
    Named,
}

/// Converter over a borrowed schema registry. Cheap to construct.
#[derive(Debug, Clone, Copy)]
pub struct ValueConverter<'a> {
    schema: &'a SchemaRegistry,
}

impl<'a> ValueConverter<'a> {
    pub fn new(schema: &'a SchemaRegistry) -> Self {
        Self { schema }
    }

    // ── Attribute-schema entry points ───────────────────────────────

    /// Model → wire with structs keyed by field id.
    pub fn to_wire_tagged(&self, value: &AttributeValue, attribute: &AttributeSchema) -> AttributeValue {
        self.encode(value, attribute.schema, StructKeys::Tagged)
    }

    /// Model → wire with structs keyed by camelCase field name.
    pub fn to_wire_named(&self, value: &AttributeValue, attribute: &AttributeSchema) -> AttributeValue {
        self.encode(value, attribute.schema, StructKeys::Named)
    }

    /// Wire → model. Structs may be keyed by field id or by name.
    pub fn from_wire(
        &self,
        value: &AttributeValue,
        attribute: &AttributeSchema,
    ) -> Result<AttributeValue, ConvertError> {
        self.decode(value, attribute.schema)
    }

    // ── Id-based entry points ───────────────────────────────────────

    /// Model → tagged wire value for an attribute addressed by id.
    /// Attributes missing from the schema pass through unchanged.
    pub fn attribute_to_wire(
        &self,
        cluster: ClusterId,
        attribute: AttributeId,
        value: &AttributeValue,
    ) -> AttributeValue {
        match self.schema.attribute(cluster, attribute) {
            Some(schema) => self.to_wire_tagged(value, schema),
            None => value.clone(),
        }
    }

    /// Wire → model for an attribute addressed by id.
    pub fn attribute_from_wire(
        &self,
        cluster: ClusterId,
        attribute: AttributeId,
        value: &AttributeValue,
    ) -> Result<AttributeValue, ConvertError> {
        match self.schema.attribute(cluster, attribute) {
            Some(schema) => self.from_wire(value, schema),
            None => Ok(value.clone()),
        }
    }

    /// Convert a batch of wire writes, one result per attribute, so a
    /// malformed value only fails its own entry.
    pub fn attributes_from_wire(
        &self,
        entries: impl IntoIterator<Item = (AttributePath, AttributeValue)>,
    ) -> Vec<(AttributePath, Result<AttributeValue, ConvertError>)> {
        entries
            .into_iter()
            .map(|(path, value)| {
                let converted = match (path.cluster, path.attribute) {
                    (Some(cluster), Some(attribute)) => {
                        self.attribute_from_wire(cluster, attribute, &value)
                    }
                    _ => Ok(value),
                };
                (path, converted)
            })
            .collect()
    }

    /// Convert a whole model table into its tagged wire form.
    pub fn table_to_wire(&self, model: &AttributeTable) -> AttributeTable {
        model
            .iter()
            .map(|(path, value)| {
                let wire = match (path.cluster, path.attribute) {
                    (Some(cluster), Some(attribute)) => {
                        self.attribute_to_wire(cluster, attribute, value)
                    }
                    _ => value.clone(),
                };
                (path, wire)
            })
            .collect()
    }

    // ── Model → wire ────────────────────────────────────────────────

    fn encode(&self, value: &AttributeValue, schema: SchemaId, keys: StructKeys) -> AttributeValue {
        let Some(node) = self.schema.node(schema) else {
            return value.clone();
        };

        match (node.kind, value) {
            (ValueKind::EpochSeconds, AttributeValue::Int(v)) => {
                AttributeValue::Int(v.saturating_sub(EPOCH_OFFSET_SECONDS))
            }
            (ValueKind::EpochMicroseconds, AttributeValue::Int(v)) => {
                AttributeValue::Int(v.saturating_sub(EPOCH_OFFSET_MICROS))
            }
            (ValueKind::Bytes, AttributeValue::Bytes(b)) => {
                AttributeValue::String(base64::engine::general_purpose::STANDARD.encode(b))
            }
            (ValueKind::Bitmap, AttributeValue::Struct(flags)) => {
                AttributeValue::Int(pack_bitmap(&node.bits, flags))
            }
            (ValueKind::Struct, AttributeValue::Struct(fields)) => {
                AttributeValue::Struct(self.encode_struct(node, fields, keys))
            }
            (ValueKind::List, AttributeValue::List(items)) => match node.element {
                Some(element) => AttributeValue::List(
                    items
                        .iter()
                        .map(|item| self.encode(item, element, keys))
                        .collect(),
                ),
                None => value.clone(),
            },
            _ => value.clone(),
        }
    }

    fn encode_struct(&self, node: &TypeNode, fields: &StructValue, keys: StructKeys) -> StructValue {
        let mut out = StructValue::with_capacity(fields.len());
        for member in &node.fields {
            if let Some(field) = fields.get(&member.name) {
                let key = match keys {
                    StructKeys::Tagged => member.tag.clone(),
                    StructKeys::Named => member.wire_name.clone(),
                };
                out.insert(key, self.encode(field, member.schema, keys));
            }
        }

        // Keys the schema doesn't know about travel unchanged.
        for (key, field) in fields {
            if !node.fields.iter().any(|member| member.name == *key) {
                out.insert(key.clone(), field.clone());
            }
        }
        out
    }

    // ── Wire → model ────────────────────────────────────────────────

    fn decode(&self, value: &AttributeValue, schema: SchemaId) -> Result<AttributeValue, ConvertError> {
        let Some(node) = self.schema.node(schema) else {
            return Ok(value.clone());
        };

        let converted = match (node.kind, value) {
            (ValueKind::EpochSeconds, AttributeValue::Int(v)) => {
                AttributeValue::Int(v.saturating_add(EPOCH_OFFSET_SECONDS))
            }
            (ValueKind::EpochMicroseconds, AttributeValue::Int(v)) => {
                AttributeValue::Int(v.saturating_add(EPOCH_OFFSET_MICROS))
            }
            (ValueKind::Bytes, AttributeValue::String(encoded)) => {
                match base64::engine::general_purpose::STANDARD.decode(encoded) {
                    Ok(raw) => AttributeValue::Bytes(Bytes::from(raw)),
                    Err(e) => {
                        debug!(error = %e, "bytes value is not valid base64, passing through");
                        value.clone()
                    }
                }
            }
            (ValueKind::Bitmap, AttributeValue::Int(raw)) => {
                AttributeValue::Struct(unpack_bitmap(&node.bits, *raw))
            }
            (ValueKind::Bitmap, AttributeValue::Null) => AttributeValue::Null,
            (ValueKind::Bitmap, other) => {
                return Err(ConvertError::InvalidBitmap {
                    found: other.kind_name(),
                });
            }
            (ValueKind::Struct, AttributeValue::Struct(fields)) => {
                AttributeValue::Struct(self.decode_struct(node, fields)?)
            }
            (ValueKind::List, AttributeValue::List(items)) => match node.element {
                Some(element) => AttributeValue::List(
                    items
                        .iter()
                        .map(|item| self.decode(item, element))
                        .collect::<Result<_, _>>()?,
                ),
                None => value.clone(),
            },
            _ => value.clone(),
        };
        Ok(converted)
    }

    fn decode_struct(&self, node: &TypeNode, fields: &StructValue) -> Result<StructValue, ConvertError> {
        let mut out = StructValue::with_capacity(fields.len());
        let mut consumed: Vec<&str> = Vec::with_capacity(node.fields.len());

        for member in &node.fields {
            let found = [&member.tag, &member.wire_name, &member.name]
                .into_iter()
                .find_map(|key| fields.get_key_value(key.as_str()));
            if let Some((key, field)) = found {
                consumed.push(key.as_str());
                out.insert(member.name.clone(), self.decode(field, member.schema)?);
            }
        }

        for (key, field) in fields {
            if !consumed.contains(&key.as_str()) {
                out.insert(key.clone(), field.clone());
            }
        }
        Ok(out)
    }
}

// ── Bitmap packing ──────────────────────────────────────────────────

/// Named members → integer. Undeclared names are ignored.
fn pack_bitmap(members: &[BitmapMember], flags: &StructValue) -> i128 {
    members.iter().fold(0, |acc, member| {
        let bits = match flags.get(&member.name) {
            Some(AttributeValue::Bool(true)) => member.mask(),
            Some(AttributeValue::Int(v)) => (v << member.min_bit) & member.mask(),
            _ => 0,
        };
        acc | bits
    })
}

/// Integer → named members. Undeclared bits are dropped.
fn unpack_bitmap(members: &[BitmapMember], raw: i128) -> StructValue {
    members
        .iter()
        .map(|member| {
            let extracted = (raw & member.mask()) >> member.min_bit;
            let value = if member.is_flag() {
                AttributeValue::Bool(extracted != 0)
            } else {
                AttributeValue::Int(extracted)
            };
            (member.name.clone(), value)
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::schema::{
        AttributeDefinition, BitDefinition, ClusterDefinition, FieldDefinition, Metatype,
        TypeDefinition,
    };
    use pretty_assertions::assert_eq;

    const CLUSTER: ClusterId = 0xFFF1_FC00;

    fn attr(id: AttributeId, ty: TypeDefinition) -> AttributeDefinition {
        AttributeDefinition {
            id,
            name: format!("attr{id}"),
            ty,
        }
    }

    fn target_struct() -> TypeDefinition {
        TypeDefinition::structure(vec![
            FieldDefinition::new(1, "node", TypeDefinition::of(Metatype::Integer)),
            FieldDefinition::new(2, "group", TypeDefinition::of(Metatype::Integer)),
            FieldDefinition::new(3, "endpoint", TypeDefinition::of(Metatype::Integer)),
        ])
    }

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new([ClusterDefinition {
            id: CLUSTER,
            name: "Sample".into(),
            attributes: vec![
                attr(0, TypeDefinition::of(Metatype::Integer)),
                attr(1, TypeDefinition::of(Metatype::EpochSeconds)),
                attr(2, TypeDefinition::of(Metatype::EpochMicroseconds)),
                attr(3, TypeDefinition::of(Metatype::Bytes)),
                attr(
                    4,
                    TypeDefinition::bitmap(vec![
                        BitDefinition::flag("occupied", 0),
                        BitDefinition::range("level", 2, 4),
                    ]),
                ),
                attr(
                    5,
                    TypeDefinition::structure(vec![
                        FieldDefinition::new(0, "privilege", TypeDefinition::of(Metatype::Enum)),
                        FieldDefinition::new(1, "auth_mode", TypeDefinition::of(Metatype::Enum)),
                        FieldDefinition::new(
                            3,
                            "targets",
                            TypeDefinition::list(target_struct()),
                        ),
                        FieldDefinition::new(
                            4,
                            "last_change",
                            TypeDefinition::of(Metatype::EpochSeconds),
                        ),
                    ]),
                ),
                attr(6, TypeDefinition::list(TypeDefinition::of(Metatype::Integer))),
                attr(7, TypeDefinition::list(TypeDefinition::of(Metatype::Bytes))),
                attr(8, TypeDefinition::of(Metatype::String)),
            ],
        }])
        .unwrap()
    }

    fn schema(registry: &SchemaRegistry, id: AttributeId) -> &AttributeSchema {
        registry.attribute(CLUSTER, id).unwrap()
    }

    fn round_trip(registry: &SchemaRegistry, id: AttributeId, model: &AttributeValue) {
        let converter = ValueConverter::new(registry);
        let attribute = schema(registry, id);
        let wire = converter.to_wire_tagged(model, attribute);
        assert_eq!(&converter.from_wire(&wire, attribute).unwrap(), model, "attribute {id}");
    }

    fn acl_entry() -> AttributeValue {
        let target: AttributeValue = [
            ("node", AttributeValue::from(5_u64)),
            ("group", AttributeValue::Null),
            ("endpoint", AttributeValue::from(1_u16)),
        ]
        .into_iter()
        .collect();
        [
            ("privilege", AttributeValue::from(5_u8)),
            ("auth_mode", AttributeValue::from(2_u8)),
            ("targets", AttributeValue::List(vec![target])),
            ("last_change", AttributeValue::from(1_700_000_000_i64)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn passthrough_round_trips() {
        let registry = registry();
        round_trip(&registry, 0, &AttributeValue::Int(i128::from(u64::MAX)));
        round_trip(&registry, 8, &AttributeValue::from("kitchen"));
        round_trip(&registry, 0, &AttributeValue::Null);
    }

    #[test]
    fn epoch_seconds_offset() {
        let registry = registry();
        let converter = ValueConverter::new(&registry);
        let unix = AttributeValue::from(1_700_000_000_i64);
        let wire = converter.to_wire_tagged(&unix, schema(&registry, 1));
        assert_eq!(wire, AttributeValue::Int(1_700_000_000 - 946_684_800));
        round_trip(&registry, 1, &unix);
    }

    #[test]
    fn epoch_micros_offset_keeps_precision() {
        let registry = registry();
        let converter = ValueConverter::new(&registry);
        let unix = AttributeValue::Int(1_700_000_000_123_457);
        let wire = converter.to_wire_tagged(&unix, schema(&registry, 2));
        assert_eq!(wire, AttributeValue::Int(753_315_200_123_457));
        round_trip(&registry, 2, &unix);
    }

    #[test]
    fn bytes_as_base64() {
        let registry = registry();
        let converter = ValueConverter::new(&registry);
        let model = AttributeValue::Bytes(Bytes::from_static(&[0xDE, 0xAD, 0xBE, 0xEF]));
        let wire = converter.to_wire_tagged(&model, schema(&registry, 3));
        assert_eq!(wire, AttributeValue::from("3q2+7w=="));
        round_trip(&registry, 3, &model);
    }

    #[test]
    fn malformed_base64_passes_through() {
        let registry = registry();
        let converter = ValueConverter::new(&registry);
        let wire = AttributeValue::from("not base64!");
        assert_eq!(converter.from_wire(&wire, schema(&registry, 3)).unwrap(), wire);
    }

    #[test]
    fn bitmap_unpacks_flags_and_ranges() {
        let registry = registry();
        let converter = ValueConverter::new(&registry);
        // bit 0 set, level = 0b101, bit 7 undeclared
        let wire = AttributeValue::Int(0b1001_0101);
        let model = converter.from_wire(&wire, schema(&registry, 4)).unwrap();
        let expected: AttributeValue = [
            ("occupied", AttributeValue::Bool(true)),
            ("level", AttributeValue::Int(0b101)),
        ]
        .into_iter()
        .collect();
        assert_eq!(model, expected);

        // Undeclared bit 7 is not re-encoded.
        let back = converter.to_wire_tagged(&model, schema(&registry, 4));
        assert_eq!(back, AttributeValue::Int(0b0001_0101));
    }

    #[test]
    fn bitmap_round_trip() {
        let registry = registry();
        let model: AttributeValue = [
            ("occupied", AttributeValue::Bool(false)),
            ("level", AttributeValue::Int(7)),
        ]
        .into_iter()
        .collect();
        round_trip(&registry, 4, &model);
    }

    #[test]
    fn bitmap_rejects_non_numeric_wire_value() {
        let registry = registry();
        let converter = ValueConverter::new(&registry);
        let err = converter
            .from_wire(&AttributeValue::from("3"), schema(&registry, 4))
            .unwrap_err();
        assert_eq!(err, ConvertError::InvalidBitmap { found: "string" });
    }

    #[test]
    fn bitmap_error_is_isolated_in_batch() {
        let registry = registry();
        let converter = ValueConverter::new(&registry);
        let results = converter.attributes_from_wire([
            (AttributePath::new(1, CLUSTER, 4), AttributeValue::from("bad")),
            (AttributePath::new(1, CLUSTER, 1), AttributeValue::Int(0)),
        ]);
        assert!(results[0].1.is_err());
        assert_eq!(
            results[1].1.as_ref().unwrap(),
            &AttributeValue::Int(EPOCH_OFFSET_SECONDS)
        );
    }

    #[test]
    fn struct_tagged_keys_and_nested_conversion() {
        let registry = registry();
        let converter = ValueConverter::new(&registry);
        let wire = converter.to_wire_tagged(&acl_entry(), schema(&registry, 5));
        let fields = wire.as_struct().unwrap();
        let keys: Vec<&str> = fields.keys().map(String::as_str).collect();
        assert_eq!(keys, ["0", "1", "3", "4"]);
        assert_eq!(fields["4"], AttributeValue::Int(1_700_000_000 - EPOCH_OFFSET_SECONDS));
        let target = fields["3"].as_list().unwrap()[0].as_struct().unwrap();
        assert_eq!(target["1"], AttributeValue::Int(5));
    }

    #[test]
    fn struct_named_keys_are_camel_case() {
        let registry = registry();
        let converter = ValueConverter::new(&registry);
        let wire = converter.to_wire_named(&acl_entry(), schema(&registry, 5));
        let keys: Vec<&str> = wire.as_struct().unwrap().keys().map(String::as_str).collect();
        assert_eq!(keys, ["privilege", "authMode", "targets", "lastChange"]);

        // Name-keyed input decodes to the same model value.
        let model = converter.from_wire(&wire, schema(&registry, 5)).unwrap();
        assert_eq!(model, acl_entry());
    }

    #[test]
    fn nested_struct_and_list_of_struct_round_trip() {
        let registry = registry();
        round_trip(&registry, 5, &acl_entry());
    }

    #[test]
    fn list_of_primitives_round_trip() {
        let registry = registry();
        round_trip(
            &registry,
            6,
            &AttributeValue::List(vec![AttributeValue::Int(1), AttributeValue::Int(1_i128 << 62)]),
        );
        round_trip(
            &registry,
            7,
            &AttributeValue::List(vec![AttributeValue::Bytes(Bytes::from_static(b"ab"))]),
        );
    }

    #[test]
    fn unknown_struct_keys_survive_round_trip() {
        let registry = registry();
        let converter = ValueConverter::new(&registry);
        let attribute = schema(&registry, 5);
        let wire: AttributeValue = [
            ("0", AttributeValue::Int(3)),
            ("254", AttributeValue::Int(1)),
        ]
        .into_iter()
        .collect();

        let model = converter.from_wire(&wire, attribute).unwrap();
        assert_eq!(model.as_struct().unwrap()["privilege"], AttributeValue::Int(3));
        assert_eq!(model.as_struct().unwrap()["254"], AttributeValue::Int(1));

        assert_eq!(converter.to_wire_tagged(&model, attribute), wire);
    }

    #[test]
    fn shape_mismatch_passes_through() {
        let registry = registry();
        let converter = ValueConverter::new(&registry);
        let odd = AttributeValue::from("not a struct");
        assert_eq!(converter.to_wire_tagged(&odd, schema(&registry, 5)), odd);
        assert_eq!(converter.from_wire(&odd, schema(&registry, 5)).unwrap(), odd);
    }

    #[test]
    fn unknown_attribute_passes_through() {
        let registry = registry();
        let converter = ValueConverter::new(&registry);
        let value = AttributeValue::from(4874_u32);
        assert_eq!(converter.attribute_to_wire(40, 2, &value), value);
        assert_eq!(converter.attribute_from_wire(40, 2, &value).unwrap(), value);
    }

    #[test]
    fn table_to_wire_converts_each_attribute() {
        let registry = registry();
        let converter = ValueConverter::new(&registry);
        let mut model = AttributeTable::new();
        model.insert(1, CLUSTER, 3, AttributeValue::Bytes(Bytes::from_static(b"\x01")));
        model.insert(0, 40, 2, AttributeValue::from(4874_u32));

        let wire = converter.table_to_wire(&model);
        assert_eq!(wire.get(1, CLUSTER, 3), Some(&AttributeValue::from("AQ==")));
        assert_eq!(wire.get(0, 40, 2), Some(&AttributeValue::Int(4874)));
    }
}
