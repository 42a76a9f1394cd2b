//! Run statistics.

use serde::{Deserialize, Serialize};

/// Counters and timings for a single extraction run.
///
/// `area_total`/`error_total` count everything the engine reported;
/// `area_matched`/`error_matched` count what was actually delivered to the
/// output sinks after filtering. Timings are in microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStats {
    pub area_total: u64,
    pub area_matched: u64,
    pub error_total: u64,
    pub error_matched: u64,
    pub time_in_area: u64,
    pub time_in_area_handler: u64,
    pub time_in_preprocess: u64,
}
