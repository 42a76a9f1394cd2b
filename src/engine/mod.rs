//! Geometry engine seam.
//!
//! The engine is a synchronous, non-preemptible producer: `run` blocks for
//! the whole scan and delivers raw objects, completed areas, and
//! malformed-geometry notifications through the sink callbacks. It returns
//! its summary only after every callback has fired, which is the ordering
//! guarantee reconciliation relies on. The worker runs the engine on a
//! dedicated thread so the orchestrator's event loop is never blocked.

pub mod pbf;

use serde::{Deserialize, Serialize};

use crate::models::{CompletedArea, RawObject};

pub use pbf::PbfEngine;

/// Counters and timings reported by the engine on completion.
/// Timings are in microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSummary {
    pub area_count: u64,
    pub error_count: u64,
    pub time_in_area: u64,
    pub time_in_area_handler: u64,
    pub time_in_preprocess: u64,
}

/// Receiver for engine events.
pub trait EngineSink {
    /// A raw way or relation was seen in the source.
    fn on_raw(&mut self, raw: RawObject);

    /// Geometry was successfully built for an object.
    fn on_area(&mut self, area: CompletedArea);

    /// Geometry construction failed for an object.
    fn on_geometry_error(&mut self, message: &str, raw: RawObject);
}

/// A source of boundary candidates and completed areas.
pub trait GeometryEngine {
    /// Drive the scan to completion, delivering events into `sink`.
    ///
    /// Blocks until the entire source has been processed. All area and error
    /// events are delivered before this returns.
    fn run(&mut self, sink: &mut dyn EngineSink) -> anyhow::Result<EngineSummary>;
}
