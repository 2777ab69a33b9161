// ── Attribute addressing ──
//
// `AttributePath` is the `(endpoint, cluster, attribute)` triple used on the
// wire as `"{endpoint}/{cluster}/{attribute}"`. Any component may be the
// wildcard `*`, which matches every value when filtering.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub type NodeId = u64;
pub type EndpointId = u16;
pub type ClusterId = u32;
pub type AttributeId = u32;

/// Token used for a wildcard path segment.
pub const WILDCARD: &str = "*";

/// Address of one attribute (or, with wildcards, a set of attributes).
///
/// `None` in any position is a wildcard. Ordering is lexicographic by
/// endpoint, cluster, then attribute, with wildcards sorting first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributePath {
    pub endpoint: Option<EndpointId>,
    pub cluster: Option<ClusterId>,
    pub attribute: Option<AttributeId>,
}

impl AttributePath {
    /// A fully-specified path.
    pub const fn new(endpoint: EndpointId, cluster: ClusterId, attribute: AttributeId) -> Self {
        Self {
            endpoint: Some(endpoint),
            cluster: Some(cluster),
            attribute: Some(attribute),
        }
    }

    /// A path matching every attribute.
    pub const fn wildcard() -> Self {
        Self {
            endpoint: None,
            cluster: None,
            attribute: None,
        }
    }

    /// True when no component is a wildcard.
    pub fn is_concrete(&self) -> bool {
        self.endpoint.is_some() && self.cluster.is_some() && self.attribute.is_some()
    }

    /// Whether `other` falls within this (possibly wildcard) path.
    pub fn matches(&self, other: &AttributePath) -> bool {
        fn segment<T: PartialEq>(pattern: Option<T>, value: Option<T>) -> bool {
            match (pattern, value) {
                (None, _) => true,
                (Some(p), Some(v)) => p == v,
                (Some(_), None) => false,
            }
        }
        segment(self.endpoint, other.endpoint)
            && segment(self.cluster, other.cluster)
            && segment(self.attribute, other.attribute)
    }

    /// Whether a concrete `(endpoint, cluster, attribute)` falls within this path.
    pub fn matches_ids(
        &self,
        endpoint: EndpointId,
        cluster: ClusterId,
        attribute: AttributeId,
    ) -> bool {
        self.matches(&Self::new(endpoint, cluster, attribute))
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write_segment<T: fmt::Display>(
            f: &mut fmt::Formatter<'_>,
            segment: Option<T>,
        ) -> fmt::Result {
            match segment {
                Some(v) => write!(f, "{v}"),
                None => f.write_str(WILDCARD),
            }
        }
        write_segment(f, self.endpoint)?;
        f.write_str("/")?;
        write_segment(f, self.cluster)?;
        f.write_str("/")?;
        write_segment(f, self.attribute)
    }
}

/// Error returned when a path string is not `a/b/c`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid attribute path '{input}': {reason}")]
pub struct ParsePathError {
    pub input: String,
    pub reason: &'static str,
}

impl FromStr for AttributePath {
    type Err = ParsePathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        fn parse_segment<T: FromStr>(raw: &str, input: &str) -> Result<Option<T>, ParsePathError> {
            let raw = raw.trim();
            if raw == WILDCARD {
                return Ok(None);
            }
            raw.parse().map(Some).map_err(|_| ParsePathError {
                input: input.to_owned(),
                reason: "segment is neither a number nor '*'",
            })
        }

        let mut parts = s.split('/');
        let (Some(endpoint), Some(cluster), Some(attribute), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ParsePathError {
                input: s.to_owned(),
                reason: "expected exactly three '/'-separated segments",
            });
        };

        Ok(Self {
            endpoint: parse_segment(endpoint, s)?,
            cluster: parse_segment(cluster, s)?,
            attribute: parse_segment(attribute, s)?,
        })
    }
}

impl Serialize for AttributePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AttributePath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
