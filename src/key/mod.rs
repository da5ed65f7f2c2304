//! Composite Key Model
//!
//! A leaf is addressed by the ordered tuple (L5, L4, L3, L2, L1):
//!
//! ```text
//! L5 (u64, page) → L4 (str) → L3 (str) → L2 (str) → L1 (u64) → L0 payload
//! ```
//!
//! Callers hand keys over as JSON values; [`validator`] classifies them and
//! turns them into typed [`Segment`]s.

pub mod validator;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// =============================================================================
// Levels
// =============================================================================

/// One of the five key levels, outermost first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    /// Page (selects the cache bucket)
    L5,
    L4,
    L3,
    L2,
    /// Innermost key, unique among its siblings
    L1,
}

impl Level {
    /// All levels, outermost first
    pub const ALL: [Level; 5] = [Level::L5, Level::L4, Level::L3, Level::L2, Level::L1];

    /// Position of this level in the key tuple (L5 = 0)
    #[inline]
    pub fn depth(self) -> usize {
        match self {
            Level::L5 => 0,
            Level::L4 => 1,
            Level::L3 => 2,
            Level::L2 => 3,
            Level::L1 => 4,
        }
    }

    /// Level at the given tuple position
    pub fn from_depth(depth: usize) -> Option<Level> {
        Self::ALL.get(depth).copied()
    }

    /// Semantic type of keys at this level
    pub fn key_type(self) -> KeyType {
        match self {
            Level::L5 | Level::L1 => KeyType::Int,
            Level::L4 | Level::L3 | Level::L2 => KeyType::Str,
        }
    }

    /// Next level down, `None` below L1
    pub fn child(self) -> Option<Level> {
        Self::from_depth(self.depth() + 1)
    }

    /// Next level up, `None` above L5
    pub fn parent(self) -> Option<Level> {
        self.depth().checked_sub(1).and_then(Self::from_depth)
    }

    /// Field name used in matrix records
    pub fn name(self) -> &'static str {
        match self {
            Level::L5 => "l5",
            Level::L4 => "l4",
            Level::L3 => "l3",
            Level::L2 => "l2",
            Level::L1 => "l1",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", 5 - self.depth())
    }
}

impl FromStr for Level {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "l5" | "5" => Ok(Level::L5),
            "l4" | "4" => Ok(Level::L4),
            "l3" | "3" => Ok(Level::L3),
            "l2" | "2" => Ok(Level::L2),
            "l1" | "1" => Ok(Level::L1),
            other => Err(Error::invalid_key(format!("unknown level '{}'", other))),
        }
    }
}

/// Semantic type of a key level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    /// Non-negative integer
    Int,
    /// Genuine string token
    Str,
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyType::Int => write!(f, "int"),
            KeyType::Str => write!(f, "string"),
        }
    }
}

/// Whether a key argument is a single value or a set of values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Scalar,
    Set,
}

// =============================================================================
// Segment
// =============================================================================

/// One typed key component
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Segment {
    Int(u64),
    Str(String),
}

impl Segment {
    /// Integer value, if this is an int segment
    pub fn as_int(&self) -> Option<u64> {
        match self {
            Segment::Int(v) => Some(*v),
            Segment::Str(_) => None,
        }
    }

    /// String value, if this is a string segment
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Segment::Int(_) => None,
            Segment::Str(s) => Some(s),
        }
    }

    /// Whether this segment has the type required at `level`
    pub fn fits(&self, level: Level) -> bool {
        matches!(
            (self, level.key_type()),
            (Segment::Int(_), KeyType::Int) | (Segment::Str(_), KeyType::Str)
        )
    }

    /// JSON value form (used in matrix records)
    pub fn to_value(&self) -> serde_json::Value {
        match self {
            Segment::Int(v) => serde_json::Value::from(*v),
            Segment::Str(s) => serde_json::Value::String(s.clone()),
        }
    }

    /// JSON object-key form (used in trie maps)
    pub fn to_map_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Int(v) => write!(f, "{}", v),
            Segment::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<u64> for Segment {
    fn from(v: u64) -> Self {
        Segment::Int(v)
    }
}

impl From<&str> for Segment {
    fn from(s: &str) -> Self {
        Segment::Str(s.to_string())
    }
}

impl From<String> for Segment {
    fn from(s: String) -> Self {
        Segment::Str(s)
    }
}

// =============================================================================
// Key Path
// =============================================================================

/// A validated key prefix starting at L5 (zero to five segments)
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyPath(Vec<Segment>);

impl KeyPath {
    /// The empty path (the whole datastore)
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Build from typed segments, checking each one against its level
    pub fn new(segments: Vec<Segment>) -> Result<Self> {
        if segments.len() > Level::ALL.len() {
            return Err(Error::invalid_key(format!(
                "a key path has at most 5 levels, got {}",
                segments.len()
            )));
        }
        for (segment, level) in segments.iter().zip(Level::ALL) {
            if !segment.fits(level) {
                return Err(Error::invalid_key(format!(
                    "{} key must be {}, got '{}'",
                    level,
                    level.key_type(),
                    segment
                )));
            }
        }
        Ok(Self(segments))
    }

    /// Build from caller-supplied JSON scalars, one per level from L5 down
    pub fn from_values(values: &[serde_json::Value], strict: bool) -> Result<Self> {
        if values.len() > Level::ALL.len() {
            return Err(Error::invalid_key(format!(
                "a key path has at most 5 levels, got {}",
                values.len()
            )));
        }
        values
            .iter()
            .zip(Level::ALL)
            .map(|(value, level)| validator::segment(level, value, strict))
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }

    /// Number of levels named
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the root path
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// All segments, L5 first
    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    /// Segments below L5 (the path relative to the page bucket)
    pub fn relative(&self) -> &[Segment] {
        self.0.get(1..).unwrap_or(&[])
    }

    /// The L5 value, if named
    pub fn page(&self) -> Option<u64> {
        self.0.first().and_then(Segment::as_int)
    }

    /// Level of the deepest named segment
    pub fn level(&self) -> Option<Level> {
        self.0.len().checked_sub(1).and_then(Level::from_depth)
    }

    /// Extend by one segment (unchecked; callers supply a segment of the right type)
    pub fn child(&self, segment: Segment) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment);
        Self(segments)
    }

    /// Extend by a relative path
    pub fn join(&self, rest: &[Segment]) -> Self {
        let mut segments = self.0.clone();
        segments.extend_from_slice(rest);
        Self(segments)
    }

    /// Whether `self` is a (non-strict) prefix of `other`
    pub fn is_prefix_of(&self, other: &[Segment]) -> bool {
        other.len() >= self.0.len() && other[..self.0.len()] == self.0[..]
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "/");
        }
        for segment in &self.0 {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_level_navigation() {
        assert_eq!(Level::L5.child(), Some(Level::L4));
        assert_eq!(Level::L1.child(), None);
        assert_eq!(Level::L5.parent(), None);
        assert_eq!(Level::L2.parent(), Some(Level::L3));
        assert_eq!(Level::from_depth(4), Some(Level::L1));
        assert_eq!(Level::from_depth(5), None);
    }

    #[test]
    fn test_level_display_and_parse() {
        assert_eq!(Level::L5.to_string(), "L5");
        assert_eq!(Level::L1.to_string(), "L1");
        assert_eq!("l3".parse::<Level>().unwrap(), Level::L3);
        assert_eq!("L2".parse::<Level>().unwrap(), Level::L2);
        assert!("l0".parse::<Level>().is_err());
    }

    #[test]
    fn test_level_key_types() {
        assert_eq!(Level::L5.key_type(), KeyType::Int);
        assert_eq!(Level::L4.key_type(), KeyType::Str);
        assert_eq!(Level::L2.key_type(), KeyType::Str);
        assert_eq!(Level::L1.key_type(), KeyType::Int);
    }

    #[test]
    fn test_segment_ordering_and_forms() {
        assert!(Segment::Int(2) < Segment::Int(10));
        assert_eq!(Segment::from("X").to_value(), json!("X"));
        assert_eq!(Segment::from(7).to_map_key(), "7");
        assert!(Segment::from(7).fits(Level::L1));
        assert!(!Segment::from("7").fits(Level::L1));
    }

    #[test]
    fn test_key_path_from_values() {
        let path = KeyPath::from_values(&[json!(1), json!("X"), json!("K")], true).unwrap();
        assert_eq!(path.len(), 3);
        assert_eq!(path.page(), Some(1));
        assert_eq!(path.level(), Some(Level::L3));
        assert_eq!(path.relative(), &[Segment::from("X"), Segment::from("K")]);
        assert_eq!(path.to_string(), "/1/X/K");
    }

    #[test]
    fn test_key_path_rejects_wrong_types() {
        assert!(KeyPath::from_values(&[json!("1")], true).is_err());
        assert!(KeyPath::from_values(&[json!(1), json!(2)], true).is_err());
        assert!(KeyPath::new(vec![Segment::from(1), Segment::from(2)]).is_err());
    }

    #[test]
    fn test_key_path_prefix() {
        let path = KeyPath::new(vec![Segment::from(1), Segment::from("X")]).unwrap();
        let leaf = [
            Segment::from(1),
            Segment::from("X"),
            Segment::from("K"),
            Segment::from("K"),
            Segment::from(3),
        ];
        assert!(path.is_prefix_of(&leaf));
        assert!(KeyPath::root().is_prefix_of(&leaf));
        assert!(!path.is_prefix_of(&leaf[..1]));
        assert_eq!(KeyPath::root().to_string(), "/");
    }
}
