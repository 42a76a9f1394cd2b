//! Error taxonomy.
//!
//! Per-record errors never halt a run; they are appended to the error sink
//! and counted. Fatal errors abort the run and invalidate any output written
//! so far.

use serde::Serialize;
use thiserror::Error;

/// Classification of a per-record extraction error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The engine failed to build geometry for a filtered candidate.
    GeometryBuild,
    /// A completed area had no derivable name and was dropped.
    MissingName,
    /// A relation candidate has no members at all.
    NoMembers,
    /// A relation candidate references way members missing from the source.
    MissingWayMembers,
    /// A candidate never produced an area for no identifiable reason.
    Unexplained,
}

/// A single non-fatal error record, serialized into `errors.json`.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    pub kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_way_count: Option<usize>,
    /// The offending candidate, area, or raw object.
    pub data: serde_json::Value,
}

impl ErrorRecord {
    pub fn new(message: impl Into<String>, kind: ErrorKind, data: serde_json::Value) -> Self {
        Self {
            message: message.into(),
            kind,
            missing_way_count: None,
            data,
        }
    }
}

/// Fatal failure of an extraction run.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("output sink failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("geometry engine failed: {0}")]
    Engine(anyhow::Error),

    #[error("worker terminated abnormally before completion: {0}")]
    Process(String),
}
