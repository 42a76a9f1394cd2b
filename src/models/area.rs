//! Candidate and area payloads flowing through the pipeline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::key::{AreaKey, OsmType};

/// Tag set of an OSM object. Ordered so serialized `properties` blocks are
/// byte-stable across runs.
pub type Tags = BTreeMap<String, String>;

/// Member type within a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberType {
    Node,
    Way,
    Relation,
}

/// A relation member reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    #[serde(rename = "type")]
    pub member_type: MemberType,
    #[serde(rename = "ref")]
    pub member_ref: u64,
    pub role: String,
}

/// A raw way or relation as reported by the geometry engine, before any
/// geometry has been built for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawObject {
    #[serde(flatten)]
    pub key: AreaKey,
    pub tags: Tags,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<Member>,
}

impl RawObject {
    pub fn way(id: u64, tags: Tags) -> Self {
        Self {
            key: AreaKey::way(id),
            tags,
            members: Vec::new(),
        }
    }

    pub fn relation(id: u64, tags: Tags, members: Vec<Member>) -> Self {
        Self {
            key: AreaKey::relation(id),
            tags,
            members,
        }
    }
}

/// A boundary of interest that has been seen in the source but has not yet
/// produced an area. Owned exclusively by the reconciliation index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(flatten)]
    pub key: AreaKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub tags: Tags,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<Member>,
}

impl Candidate {
    /// Build a candidate from a raw object, deriving a best-effort name for
    /// diagnostics.
    pub fn from_raw(raw: RawObject) -> Self {
        let name = raw.tags.get("name").cloned();
        Self {
            key: raw.key,
            name,
            tags: raw.tags,
            members: raw.members,
        }
    }

    pub fn is_relation(&self) -> bool {
        self.key.osm_type == OsmType::Relation
    }
}

/// A completed boundary polygon with derived name and GeoJSON geometry.
///
/// At most one area exists per candidate key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Area {
    #[serde(flatten)]
    pub key: AreaKey,
    pub name: String,
    pub tags: Tags,
    /// GeoJSON geometry, passed through untouched from the engine.
    pub geometry: serde_json::Value,
}

/// An area event from the geometry engine, prior to naming and filtering.
#[derive(Debug, Clone)]
pub struct CompletedArea {
    pub key: AreaKey,
    pub tags: Tags,
    pub geometry: serde_json::Value,
}
