//! Worker thread driving the geometry engine.
//!
//! The engine scan is synchronous and non-preemptible, so it runs on its own
//! OS thread and talks to the orchestrator over a bounded channel. When the
//! output sinks fall behind, `blocking_send` parks the thread and the engine
//! is throttled along with it, keeping the number of in-flight areas capped.

use std::thread::JoinHandle;

use tokio::sync::mpsc::Sender;
use tracing::{debug, warn};

use crate::engine::{EngineSink, GeometryEngine};
use crate::error::{ErrorKind, ErrorRecord};
use crate::filter::TagFilter;
use crate::models::{Area, Candidate, CompletedArea, RawObject, StreamStats, Tags};
use crate::reconcile::ReconciliationIndex;

/// Messages flowing from the worker to the orchestrator.
#[derive(Debug)]
pub enum WorkerMessage {
    Area(Area),
    Error(ErrorRecord),
    /// The engine completed and reconciliation has run; final message of a
    /// successful run.
    Done(StreamStats),
}

/// Name derivation fallback chain: `name`, then `type`, then a configured
/// secondary tag.
pub(crate) fn derive_name(tags: &Tags, fallback_tag: &str) -> Option<String> {
    ["name", "type", fallback_tag]
        .iter()
        .find_map(|key| tags.get(*key).filter(|v| !v.is_empty()).cloned())
}

struct WorkerSink {
    filter: TagFilter,
    fallback_name_tag: String,
    index: ReconciliationIndex,
    tx: Sender<WorkerMessage>,
    area_matched: u64,
    error_total: u64,
    error_matched: u64,
    // set when the orchestrator goes away; stops further sends
    disconnected: bool,
}

impl WorkerSink {
    fn send(&mut self, msg: WorkerMessage) {
        if self.disconnected {
            return;
        }
        if self.tx.blocking_send(msg).is_err() {
            warn!("orchestrator receiver dropped, discarding further events");
            self.disconnected = true;
        }
    }

    fn send_error(&mut self, record: ErrorRecord) {
        self.error_matched += 1;
        self.send(WorkerMessage::Error(record));
    }
}

impl EngineSink for WorkerSink {
    fn on_raw(&mut self, raw: RawObject) {
        if self.filter.evaluate(&raw.tags) {
            self.index.insert_candidate(Candidate::from_raw(raw));
        }
    }

    fn on_area(&mut self, area: CompletedArea) {
        let Some(name) = derive_name(&area.tags, &self.fallback_name_tag) else {
            // dropped, but accounted for: mark the key produced so
            // reconciliation does not report it a second time
            self.error_total += 1;
            self.index.mark_produced(area.key);
            let data = serde_json::json!({
                "osm_type": area.key.osm_type,
                "id": area.key.id,
                "tags": area.tags,
            });
            self.send_error(ErrorRecord::new(
                "area is missing a name tag",
                ErrorKind::MissingName,
                data,
            ));
            return;
        };

        if !self.filter.evaluate(&area.tags) {
            return;
        }

        self.index.mark_produced(area.key);
        self.area_matched += 1;
        self.send(WorkerMessage::Area(Area {
            key: area.key,
            name,
            tags: area.tags,
            geometry: area.geometry,
        }));
    }

    fn on_geometry_error(&mut self, message: &str, raw: RawObject) {
        self.error_total += 1;

        // suppress errors for objects the filter never matched
        if !self.filter.evaluate(&raw.tags) {
            return;
        }

        // already reported here, keep reconciliation from reporting it again
        self.index.mark_produced(raw.key);

        let data = serde_json::to_value(&raw).unwrap_or(serde_json::Value::Null);
        self.send_error(ErrorRecord::new(
            format!("failed to build geometry: {}", message),
            ErrorKind::GeometryBuild,
            data,
        ));
    }
}

/// Spawn the worker on a dedicated thread.
///
/// The thread drives `engine` to completion, reconciles candidates against
/// produced areas, and finishes with a `Done` message. An engine failure is
/// returned through the join handle instead; no `Done` is sent in that case.
pub fn spawn<E>(
    mut engine: E,
    filter: TagFilter,
    fallback_name_tag: String,
    tx: Sender<WorkerMessage>,
) -> JoinHandle<anyhow::Result<()>>
where
    E: GeometryEngine + Send + 'static,
{
    std::thread::Builder::new()
        .name("geometry-engine".to_string())
        .spawn(move || {
            let mut sink = WorkerSink {
                filter,
                fallback_name_tag,
                index: ReconciliationIndex::new(),
                tx,
                area_matched: 0,
                error_total: 0,
                error_matched: 0,
                disconnected: false,
            };

            let summary = engine.run(&mut sink)?;

            debug!(
                candidates = sink.index.candidate_count(),
                produced = sink.index.produced_count(),
                "engine complete, reconciling"
            );

            // strictly after engine completion: every area/error event for
            // this run has been delivered by now
            let index = std::mem::take(&mut sink.index);
            for record in index.reconcile() {
                sink.error_total += 1;
                sink.send_error(record);
            }

            let stats = StreamStats {
                area_total: summary.area_count,
                area_matched: sink.area_matched,
                error_total: sink.error_total,
                error_matched: sink.error_matched,
                time_in_area: summary.time_in_area,
                time_in_area_handler: summary.time_in_area_handler,
                time_in_preprocess: summary.time_in_preprocess,
            };
            sink.send(WorkerMessage::Done(stats));
            Ok(())
        })
        .expect("failed to spawn geometry engine thread")
}
