//! Claim paths: sequences of object-key / array-index segments.
//!
//! Relying parties reference claims with JSONPath-style strings
//! (`$.address.street_address`, `$.nationalities[0]`, `$['claim.with.dots']`).
//! Only child access is supported — no wildcards, slices or filters.

use serde_json::Value;

use super::{JsonObject, SdJwtError};

/// A path segment, either an object key or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClaimPathSegment {
    /// Object key path segment.
    Key(String),
    /// Array index path segment.
    Index(u32),
}

impl From<&str> for ClaimPathSegment {
    fn from(key: &str) -> Self {
        Self::Key(key.to_owned())
    }
}

impl From<u32> for ClaimPathSegment {
    fn from(index: u32) -> Self {
        Self::Index(index)
    }
}

/// A claim path: the segments to follow from the credential's claim root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ClaimPath(Vec<ClaimPathSegment>);

impl ClaimPath {
    /// The empty (root) path.
    #[must_use]
    pub const fn root() -> Self {
        Self(Vec::new())
    }

    /// Builds a path from segments.
    #[must_use]
    pub fn from_segments(segments: Vec<ClaimPathSegment>) -> Self {
        Self(segments)
    }

    /// The path's segments.
    #[must_use]
    pub fn segments(&self) -> &[ClaimPathSegment] {
        &self.0
    }

    /// Returns a new path with `segment` appended.
    #[must_use]
    pub fn child(&self, segment: ClaimPathSegment) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment);
        Self(segments)
    }

    /// Whether `self` lies on the path from the root to `other`
    /// (inclusive).
    #[must_use]
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        other.0.len() >= self.0.len() && self.0.iter().zip(&other.0).all(|(a, b)| a == b)
    }

    /// Resolves the path against a claim object.
    #[must_use]
    pub fn resolve<'v>(&self, claims: &'v JsonObject) -> Option<&'v Value> {
        let (head, tail) = self.0.split_first()?;
        let ClaimPathSegment::Key(key) = head else {
            return None;
        };
        let mut value = claims.get(key)?;
        for segment in tail {
            value = match (value, segment) {
                (Value::Object(object), ClaimPathSegment::Key(key)) => object.get(key)?,
                (Value::Array(array), ClaimPathSegment::Index(index)) => {
                    array.get(*index as usize)?
                }
                _ => return None,
            };
        }
        Some(value)
    }

    /// Parses a JSONPath-style string.
    ///
    /// Accepted syntax: a leading `$`, then any number of `.key`,
    /// `['key']`, `["key"]` or `[index]` segments.
    ///
    /// # Errors
    ///
    /// Returns an error on unsupported or malformed syntax.
    pub fn parse(input: &str) -> Result<Self, SdJwtError> {
        let error = |message: &str| SdJwtError::ClaimPath(format!("{message} in `{input}`"));

        let rest = input
            .strip_prefix('$')
            .ok_or_else(|| error("path must start with `$`"))?;

        let mut segments = Vec::new();
        let mut pos = 0;
        while pos < rest.len() {
            if rest[pos..].starts_with('.') {
                let key_start = pos + 1;
                let key_end = rest[key_start..]
                    .find(['.', '['])
                    .map_or(rest.len(), |i| key_start + i);
                let key = &rest[key_start..key_end];
                if key.is_empty() {
                    return Err(error("empty key segment"));
                }
                segments.push(ClaimPathSegment::Key(key.to_owned()));
                pos = key_end;
            } else if rest[pos..].starts_with('[') {
                let close = rest[pos..]
                    .find(']')
                    .map(|i| i + pos)
                    .ok_or_else(|| error("unterminated `[`"))?;
                let inner = &rest[pos + 1..close];
                if let Some(quoted) = inner
                    .strip_prefix('\'')
                    .and_then(|s| s.strip_suffix('\''))
                    .or_else(|| inner.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
                {
                    if quoted.is_empty() {
                        return Err(error("empty bracketed key"));
                    }
                    segments.push(ClaimPathSegment::Key(quoted.to_owned()));
                } else {
                    let index: u32 = inner
                        .parse()
                        .map_err(|_| error("bracket segment is neither quoted nor an index"))?;
                    segments.push(ClaimPathSegment::Index(index));
                }
                pos = close + 1;
            } else {
                return Err(error("expected `.` or `[`"));
            }
        }

        Ok(Self(segments))
    }
}

impl std::fmt::Display for ClaimPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "$")?;
        for segment in &self.0 {
            match segment {
                // Keys containing dots would need bracket syntax; plain
                // rendering is for logs and error messages only.
                ClaimPathSegment::Key(key) => write!(f, ".{key}")?,
                ClaimPathSegment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

/// Utility macro for writing path literals ergonomically.
///
/// ```
/// let path = eudikit_core::claim_path!["address", "region"];
/// let indexed = eudikit_core::claim_path!["nationalities", 0u32];
/// ```
#[macro_export]
macro_rules! claim_path {
    [ $( $segment:expr ),* ] => {
        $crate::sd_jwt::ClaimPath::from_segments(
            vec![ $( $crate::sd_jwt::ClaimPathSegment::from($segment) ),* ]
        )
    };
}
