//! Strongly typed index keys.
//!
//! Candidates and areas are keyed by `(osm type, id)` rather than a
//! concatenated string, so way 42 and relation 42 can never collide.

use std::fmt;

use serde::{Deserialize, Serialize};

/// OSM object type of a candidate boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsmType {
    Way,
    Relation,
}

impl fmt::Display for OsmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OsmType::Way => write!(f, "way"),
            OsmType::Relation => write!(f, "relation"),
        }
    }
}

/// Composite key identifying a candidate or produced area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AreaKey {
    pub osm_type: OsmType,
    pub id: u64,
}

impl AreaKey {
    pub fn way(id: u64) -> Self {
        Self {
            osm_type: OsmType::Way,
            id,
        }
    }

    pub fn relation(id: u64) -> Self {
        Self {
            osm_type: OsmType::Relation,
            id,
        }
    }
}

impl fmt::Display for AreaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.osm_type, self.id)
    }
}

/// Output partition key derived from the `admin_level` tag.
///
/// Only exact digit-only strings form their own partition, so `"8"` and
/// `"08"` are distinct. Everything else (including a missing tag) lands in
/// the `other` partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LevelKey {
    Level(String),
    Other,
}

impl LevelKey {
    /// Normalize an `admin_level` tag value into a partition key.
    pub fn from_tag(value: Option<&str>) -> Self {
        match value {
            Some(v) if !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()) => {
                LevelKey::Level(v.to_string())
            }
            _ => LevelKey::Other,
        }
    }
}

impl fmt::Display for LevelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LevelKey::Level(v) => write!(f, "{}", v),
            LevelKey::Other => write!(f, "other"),
        }
    }
}
