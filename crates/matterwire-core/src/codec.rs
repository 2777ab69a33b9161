//! Precision-preserving JSON codec.
//!
//! Clients of the wire API exchange JSON produced by runtimes whose numbers
//! are IEEE doubles, so integers beyond ±(2^53 − 1) must still travel as
//! bare JSON numbers without being rounded. `serde_json::Value` only holds
//! 64-bit integers, which is not enough either, so both directions work
//! around the parser/serializer:
//!
//! - [`decode`] scans the raw text once, tracking whether it is inside a
//!   string literal, and rewrites every out-of-range integer literal into a
//!   marker-prefixed string before handing the text to `serde_json`. The
//!   parsed tree is then revived into [`AttributeValue`], turning marker
//!   strings back into `Int`. Digits inside string literals are never
//!   touched.
//! - [`encode`] swaps out-of-range integers for placeholder strings while
//!   building the `serde_json::Value`, serializes, then substitutes each
//!   quoted placeholder with its decimal digits.
//!
//! The marker carries a random per-call nonce. If a string in the caller's
//! data happens to contain it, the call is retried with a fresh one, so
//! caller strings always come back as strings.

use std::borrow::Cow;

use base64::Engine as _;
use rand::Rng;
use serde_json::{Map, Number, Value};
use tracing::trace;

use crate::error::CodecError;
use crate::model::AttributeValue;

/// Largest integer a double represents exactly (2^53 − 1).
pub const MAX_SAFE_INTEGER: i128 = (1 << 53) - 1;

/// Smallest integer a double represents exactly.
pub const MIN_SAFE_INTEGER: i128 = -MAX_SAFE_INTEGER;

/// Literals shorter than this always fit a double exactly.
const MIN_CHECKED_DIGITS: usize = 15;

/// Marker prefix for rewritten integers, as the parsed string value.
const BIG_INT_SENTINEL: &str = "\u{1}bigint:";

/// The same prefix as it must appear inside JSON text.
const BIG_INT_SENTINEL_JSON: &str = "\\u0001bigint:";

pub fn is_safe_integer(value: i128) -> bool {
    (MIN_SAFE_INTEGER..=MAX_SAFE_INTEGER).contains(&value)
}

/// Sentinel prefix plus a nonce, in both string and JSON-text form.
struct Marker {
    text: String,
    json: String,
}

impl Marker {
    fn fresh() -> Self {
        Self::from_nonce(rand::rng().random())
    }

    fn from_nonce(nonce: u64) -> Self {
        Self {
            text: format!("{BIG_INT_SENTINEL}{nonce:016x}:"),
            json: format!("{BIG_INT_SENTINEL_JSON}{nonce:016x}:"),
        }
    }
}

// ── Decode ──────────────────────────────────────────────────────────

/// Parse JSON text, keeping every integer literal exact.
///
/// Integer literals wider than `i128` cannot be represented and fall back
/// to `serde_json`'s float parsing.
pub fn decode(text: &str) -> Result<AttributeValue, CodecError> {
    loop {
        let marker = Marker::fresh();
        let (rewritten, protected) = protect_large_integers(text, &marker);
        let parsed: Value = serde_json::from_str(&rewritten)?;

        let mut reviver = Reviver {
            marker: &marker,
            matched: 0,
        };
        let value = reviver.revive(parsed);
        if reviver.matched == protected {
            return Ok(value);
        }
        trace!("input string collided with integer marker, retrying");
    }
}

/// Rewrite out-of-range integer literals outside strings as marker strings.
/// Returns the text and the number of literals rewritten.
fn protect_large_integers<'t>(text: &'t str, marker: &Marker) -> (Cow<'t, str>, usize) {
    let bytes = text.as_bytes();
    let mut protected = 0;
    let mut out: Option<String> = None;
    let mut copied_to = 0;
    let mut in_string = false;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];

        if in_string {
            match b {
                b'\\' => i += 2,
                b'"' => {
                    in_string = false;
                    i += 1;
                }
                _ => i += 1,
            }
            continue;
        }

        match b {
            b'"' => {
                in_string = true;
                i += 1;
            }
            b'-' | b'0'..=b'9' => {
                let start = i;
                let (end, is_integer) = scan_number(bytes, start);
                let literal = &text[start..end];
                let digits = literal.trim_start_matches('-').len();

                if is_integer && digits >= MIN_CHECKED_DIGITS {
                    let out_of_range = literal
                        .parse::<i128>()
                        .is_ok_and(|value| !is_safe_integer(value));
                    if out_of_range {
                        let buf = out.get_or_insert_with(|| String::with_capacity(text.len() + 32));
                        buf.push_str(&text[copied_to..start]);
                        buf.push('"');
                        buf.push_str(&marker.json);
                        buf.push_str(literal);
                        buf.push('"');
                        copied_to = end;
                        protected += 1;
                    }
                }
                i = end.max(start + 1);
            }
            _ => i += 1,
        }
    }

    let rewritten = match out {
        Some(mut buf) => {
            buf.push_str(&text[copied_to..]);
            Cow::Owned(buf)
        }
        None => Cow::Borrowed(text),
    };
    (rewritten, protected)
}

/// Consume one number literal. Returns its end offset and whether it is a
/// pure integer (no fraction, no exponent).
fn scan_number(bytes: &[u8], start: usize) -> (usize, bool) {
    let skip_digits = |mut i: usize| {
        while bytes.get(i).is_some_and(u8::is_ascii_digit) {
            i += 1;
        }
        i
    };

    let mut i = start;
    if bytes.get(i) == Some(&b'-') {
        i += 1;
    }
    i = skip_digits(i);

    let mut is_integer = true;
    if bytes.get(i) == Some(&b'.') {
        is_integer = false;
        i = skip_digits(i + 1);
    }
    if matches!(bytes.get(i), Some(b'e' | b'E')) {
        is_integer = false;
        i += 1;
        if matches!(bytes.get(i), Some(b'+' | b'-')) {
            i += 1;
        }
        i = skip_digits(i);
    }
    (i, is_integer)
}

/// Converts the parsed tree, restoring marker strings to integers.
struct Reviver<'m> {
    marker: &'m Marker,
    /// Strings seen carrying the marker. More than were rewritten means a
    /// caller string collided with it.
    matched: usize,
}

impl Reviver<'_> {
    fn revive(&mut self, value: Value) -> AttributeValue {
        match value {
            Value::Null => AttributeValue::Null,
            Value::Bool(b) => AttributeValue::Bool(b),
            Value::Number(n) => {
                if let Some(v) = n.as_i64() {
                    AttributeValue::Int(i128::from(v))
                } else if let Some(v) = n.as_u64() {
                    AttributeValue::Int(i128::from(v))
                } else {
                    n.as_f64().map_or(AttributeValue::Null, AttributeValue::Float)
                }
            }
            Value::String(s) => {
                let Some(digits) = s.strip_prefix(self.marker.text.as_str()) else {
                    return AttributeValue::String(s);
                };
                self.matched += 1;
                match digits.parse::<i128>() {
                    Ok(v) => AttributeValue::Int(v),
                    Err(_) => AttributeValue::String(s),
                }
            }
            Value::Array(items) => {
                AttributeValue::List(items.into_iter().map(|item| self.revive(item)).collect())
            }
            Value::Object(fields) => AttributeValue::Struct(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, self.revive(v)))
                    .collect(),
            ),
        }
    }
}

// ── Encode ──────────────────────────────────────────────────────────

/// A placeholder emitted in place of an out-of-range integer.
struct PendingInteger {
    placeholder: String,
    digits: String,
}

/// Serialize to JSON text, emitting every integer as exact bare digits.
///
/// Bytes are written as base64 strings; non-finite floats become `null`.
pub fn encode(value: &AttributeValue) -> Result<String, CodecError> {
    loop {
        let mut encoder = Encoder::new(Marker::fresh());
        let tree = encoder.build(value);
        if encoder.collided {
            trace!("value string collided with integer marker, retrying");
            continue;
        }
        return encoder.finish(&tree);
    }
}

struct Encoder {
    marker: Marker,
    pending: Vec<PendingInteger>,
    /// A caller string or key contains the marker.
    collided: bool,
}

impl Encoder {
    fn new(marker: Marker) -> Self {
        Self {
            marker,
            pending: Vec::new(),
            collided: false,
        }
    }

    fn check(&mut self, s: &str) {
        if s.contains(self.marker.text.as_str()) {
            self.collided = true;
        }
    }

    fn build(&mut self, value: &AttributeValue) -> Value {
        match value {
            AttributeValue::Null => Value::Null,
            AttributeValue::Bool(b) => Value::Bool(*b),
            AttributeValue::Int(v) => match i64::try_from(*v) {
                Ok(small) if is_safe_integer(*v) => Value::Number(Number::from(small)),
                _ => {
                    let placeholder = format!("{}{}", self.marker.text, self.pending.len());
                    self.pending.push(PendingInteger {
                        placeholder: placeholder.clone(),
                        digits: v.to_string(),
                    });
                    Value::String(placeholder)
                }
            },
            AttributeValue::Float(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
            AttributeValue::String(s) => {
                self.check(s);
                Value::String(s.clone())
            }
            AttributeValue::Bytes(b) => {
                Value::String(base64::engine::general_purpose::STANDARD.encode(b))
            }
            AttributeValue::List(items) => {
                Value::Array(items.iter().map(|item| self.build(item)).collect())
            }
            AttributeValue::Struct(fields) => {
                let mut map = Map::with_capacity(fields.len());
                for (key, field) in fields {
                    self.check(key);
                    map.insert(key.clone(), self.build(field));
                }
                Value::Object(map)
            }
        }
    }

    /// Serialize the tree and splice the digits over each placeholder.
    fn finish(&self, tree: &Value) -> Result<String, CodecError> {
        let text = serde_json::to_string(tree)?;
        if self.pending.is_empty() {
            return Ok(text);
        }

        // Placeholders appear in traversal order, so each search resumes
        // where the previous substitution ended.
        let mut out = String::with_capacity(text.len());
        let mut rest = text.as_str();
        for entry in &self.pending {
            let quoted = serde_json::to_string(&entry.placeholder)?;
            if let Some(pos) = rest.find(&quoted) {
                out.push_str(&rest[..pos]);
                out.push_str(&entry.digits);
                rest = &rest[pos + quoted.len()..];
            }
        }
        out.push_str(rest);
        Ok(out)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn obj(pairs: Vec<(&str, AttributeValue)>) -> AttributeValue {
        pairs.into_iter().collect()
    }

    #[test]
    fn decode_keeps_large_integer_exact() {
        let value = decode(r#"{"id": 18446744073709551615, "small": 42}"#).unwrap();
        let fields = value.as_struct().unwrap();
        assert_eq!(fields["id"], AttributeValue::Int(18_446_744_073_709_551_615));
        assert_eq!(fields["small"], AttributeValue::Int(42));
    }

    #[test]
    fn decode_never_touches_digits_inside_strings() {
        let text = r#"{"label": "serial 123456789012345678901234", "n": 123456789012345678901234}"#;
        let value = decode(text).unwrap();
        let fields = value.as_struct().unwrap();
        assert_eq!(
            fields["label"],
            AttributeValue::from("serial 123456789012345678901234")
        );
        assert_eq!(fields["n"], AttributeValue::Int(123_456_789_012_345_678_901_234));
    }

    #[test]
    fn decode_handles_escaped_quotes_in_strings() {
        let text = r#"["say \"99999999999999999999\" twice", "\\", 99999999999999999999]"#;
        let value = decode(text).unwrap();
        let items = value.as_list().unwrap();
        assert_eq!(items[0], AttributeValue::from("say \"99999999999999999999\" twice"));
        assert_eq!(items[1], AttributeValue::from("\\"));
        assert_eq!(items[2], AttributeValue::Int(99_999_999_999_999_999_999));
    }

    #[test]
    fn decode_leaves_floats_and_exponents_alone() {
        let value = decode("[1.2345678901234567890, 12345678901234567890e2, 1E5]").unwrap();
        let items = value.as_list().unwrap();
        assert!(matches!(items[0], AttributeValue::Float(_)));
        assert!(matches!(items[1], AttributeValue::Float(_)));
        assert_eq!(items[2], AttributeValue::Float(100_000.0));
    }

    #[test]
    fn decode_safe_fifteen_digit_integer_stays_plain() {
        let marker = Marker::from_nonce(0);
        assert_eq!(
            protect_large_integers("[123456789012345]", &marker),
            (Cow::Borrowed("[123456789012345]"), 0)
        );
        assert_eq!(
            decode("[123456789012345]").unwrap(),
            AttributeValue::List(vec![AttributeValue::Int(123_456_789_012_345)])
        );
    }

    #[test]
    fn decode_boundary_values() {
        let value = decode("[9007199254740991, 9007199254740992, -9007199254740993]").unwrap();
        assert_eq!(
            value,
            AttributeValue::List(vec![
                AttributeValue::Int(9_007_199_254_740_991),
                AttributeValue::Int(9_007_199_254_740_992),
                AttributeValue::Int(-9_007_199_254_740_993),
            ])
        );
    }

    #[test]
    fn decode_rejects_invalid_json() {
        assert!(decode("{\"a\": }").is_err());
    }

    #[test]
    fn encode_emits_bare_digits() {
        let value = obj(vec![
            ("big", AttributeValue::Int(1_i128 << 70)),
            ("neg", AttributeValue::Int(-(1_i128 << 70))),
            ("small", AttributeValue::Int(7)),
        ]);
        assert_eq!(
            encode(&value).unwrap(),
            r#"{"big":1180591620717411303424,"neg":-1180591620717411303424,"small":7}"#
        );
    }

    #[test]
    fn encode_does_not_confuse_lookalike_strings() {
        let value = AttributeValue::List(vec![
            AttributeValue::from("0x40000000000000000"),
            AttributeValue::Int(1_i128 << 66),
        ]);
        assert_eq!(
            encode(&value).unwrap(),
            r#"["0x40000000000000000",73786976294838206464]"#
        );
    }

    #[test]
    fn decode_keeps_marker_lookalike_strings() {
        let value = decode(r#"["\u0001bigint:123", 18446744073709551616]"#).unwrap();
        assert_eq!(
            value,
            AttributeValue::List(vec![
                AttributeValue::from("\u{1}bigint:123"),
                AttributeValue::Int(18_446_744_073_709_551_616),
            ])
        );
    }

    #[test]
    fn decode_detects_string_carrying_the_marker() {
        let marker = Marker::from_nonce(0xfeed);
        let text = r#"["\u0001bigint:000000000000feed:5", 18446744073709551616]"#;
        let (rewritten, protected) = protect_large_integers(text, &marker);
        assert_eq!(protected, 1);

        let mut reviver = Reviver {
            marker: &marker,
            matched: 0,
        };
        reviver.revive(serde_json::from_str(&rewritten).unwrap());
        assert_eq!(reviver.matched, 2);

        // A fresh marker on the public path keeps the string intact.
        assert_eq!(
            decode(text).unwrap().as_list().unwrap()[0],
            AttributeValue::from("\u{1}bigint:000000000000feed:5")
        );
    }

    #[test]
    fn encode_keeps_marker_lookalike_strings_in_place() {
        let value = AttributeValue::List(vec![
            AttributeValue::from("\u{1}bigint:0x40000000000000000"),
            AttributeValue::Int(1_i128 << 66),
        ]);
        let text = encode(&value).unwrap();
        assert_eq!(
            text,
            r#"["\u0001bigint:0x40000000000000000",73786976294838206464]"#
        );
        assert_eq!(decode(&text).unwrap(), value);
    }

    #[test]
    fn encoder_flags_strings_carrying_the_marker() {
        let marker = Marker::from_nonce(7);
        let colliding = format!("{}0", marker.text);
        let mut encoder = Encoder::new(marker);
        encoder.build(&obj(vec![
            ("n", AttributeValue::Int(1_i128 << 66)),
            ("s", AttributeValue::from(colliding)),
        ]));
        assert!(encoder.collided);

        let mut clean = Encoder::new(Marker::from_nonce(7));
        clean.build(&AttributeValue::from("\u{1}bigint:0"));
        assert!(!clean.collided);
    }

    #[test]
    fn encode_non_finite_float_as_null() {
        assert_eq!(encode(&AttributeValue::Float(f64::NAN)).unwrap(), "null");
    }

    #[test]
    fn round_trip_across_seventy_bits() {
        for shift in 0..=70_u32 {
            let base = 1_i128 << shift;
            for v in [base - 1, base, base + 1, -base + 1, -base, -base - 1] {
                let doc = obj(vec![
                    ("n", AttributeValue::Int(v)),
                    (
                        "list",
                        AttributeValue::List(vec![
                            AttributeValue::Int(v),
                            AttributeValue::from(format!("text {v} 123456789012345678901")),
                        ]),
                    ),
                    (
                        "nested",
                        obj(vec![
                            ("s", AttributeValue::from("9007199254740993")),
                            ("v", AttributeValue::Int(v)),
                        ]),
                    ),
                ]);
                let text = encode(&doc).unwrap();
                assert_eq!(decode(&text).unwrap(), doc, "value {v} via {text}");
            }
        }
    }
}
