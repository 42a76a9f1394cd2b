//! Core data models for the boundary extraction pipeline.

pub mod area;
pub mod key;
pub mod stats;

pub use area::{Area, Candidate, CompletedArea, Member, MemberType, RawObject, Tags};
pub use key::{AreaKey, LevelKey, OsmType};
pub use stats::StreamStats;
