//! Run orchestration.
//!
//! The orchestrator owns the run lifecycle: it spawns the worker thread,
//! consumes its message stream, routes areas and errors to the output sinks,
//! and only reports success once every sink has been flushed and closed.

use std::fmt;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::engine::{GeometryEngine, PbfEngine};
use crate::error::ExtractError;
use crate::filter::TagFilter;
use crate::models::StreamStats;
use crate::sink::{ErrorSink, LevelMultiplexer};
use crate::worker::{self, WorkerMessage};

/// Lifecycle state of a run. `Failed` is terminal and reachable from any
/// state; any output written before a failure is incomplete and must be
/// discarded by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExtractorState {
    Idle,
    Running,
    Draining,
    Complete,
    Failed,
}

impl fmt::Display for ExtractorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExtractorState::Idle => "idle",
            ExtractorState::Running => "running",
            ExtractorState::Draining => "draining",
            ExtractorState::Complete => "complete",
            ExtractorState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

fn transition(state: &mut ExtractorState, next: ExtractorState) {
    debug!(from = %state, to = %next, "state transition");
    *state = next;
}

/// Extracts administrative boundary polygons from a single input into
/// per-admin-level GeoJSON files plus an `errors.json` artifact.
///
/// One extractor instance drives exactly one run; no state is shared across
/// runs.
pub struct PolygonExtractor {
    input: PathBuf,
    output_dir: PathBuf,
    filter: TagFilter,
    fallback_name_tag: String,
    channel_capacity: usize,
}

impl PolygonExtractor {
    pub fn new(input: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output_dir: output_dir.into(),
            filter: TagFilter::administrative(),
            fallback_name_tag: "tiger:NAME".to_string(),
            channel_capacity: 64,
        }
    }

    /// Replace the default strict administrative filter.
    pub fn with_filter(mut self, filter: TagFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Secondary tag consulted by the name fallback chain after `name` and
    /// `type`.
    pub fn with_fallback_name_tag(mut self, tag: impl Into<String>) -> Self {
        self.fallback_name_tag = tag.into();
        self
    }

    /// Run the extraction against the PBF engine.
    pub async fn run(self) -> Result<StreamStats, ExtractError> {
        let engine = PbfEngine::new(&self.input, self.filter.clone());
        self.run_with_engine(engine).await
    }

    /// Run the extraction with a caller-supplied engine.
    pub async fn run_with_engine<E>(self, engine: E) -> Result<StreamStats, ExtractError>
    where
        E: GeometryEngine + Send + 'static,
    {
        let mut state = ExtractorState::Idle;

        let (tx, mut rx) = mpsc::channel::<WorkerMessage>(self.channel_capacity);
        let handle = worker::spawn(
            engine,
            self.filter.clone(),
            self.fallback_name_tag.clone(),
            tx,
        );
        transition(&mut state, ExtractorState::Running);

        let mut multiplexer = LevelMultiplexer::new(&self.output_dir);
        let mut errors = ErrorSink::new(&self.output_dir);
        let mut final_stats = None;

        while let Some(msg) = rx.recv().await {
            match msg {
                WorkerMessage::Area(area) => {
                    if let Err(e) = multiplexer.route(&area).await {
                        transition(&mut state, ExtractorState::Failed);
                        error!("output sink failure, aborting run: {}", e);
                        // closing the channel unblocks the worker; it drains
                        // on its own since the scan cannot be interrupted
                        drop(rx);
                        drop(handle);
                        return Err(ExtractError::Io(e));
                    }
                }
                WorkerMessage::Error(record) => {
                    errors.append(record);
                }
                WorkerMessage::Done(stats) => {
                    final_stats = Some(stats);
                    break;
                }
            }
        }

        let Some(stats) = final_stats else {
            // channel closed without a completion message
            transition(&mut state, ExtractorState::Failed);
            return Err(match reap_worker(handle).await {
                WorkerExit::Engine(e) => ExtractError::Engine(e),
                WorkerExit::Panicked => {
                    ExtractError::Process("worker thread panicked".to_string())
                }
                WorkerExit::Clean => {
                    ExtractError::Process("worker exited without completion signal".to_string())
                }
            });
        };

        transition(&mut state, ExtractorState::Draining);
        drop(rx);
        match reap_worker(handle).await {
            WorkerExit::Clean => {}
            WorkerExit::Engine(e) => warn!("worker reported an error after completion: {}", e),
            WorkerExit::Panicked => warn!("worker thread panicked after completion"),
        }

        let (mux_res, err_res) = tokio::join!(multiplexer.finish(), errors.finish());
        if let Err(e) = mux_res.and(err_res) {
            transition(&mut state, ExtractorState::Failed);
            error!("failed to close output sinks: {}", e);
            return Err(ExtractError::Io(e));
        }

        transition(&mut state, ExtractorState::Complete);
        info!(
            area_matched = stats.area_matched,
            area_total = stats.area_total,
            error_matched = stats.error_matched,
            error_total = stats.error_total,
            "extraction complete"
        );
        Ok(stats)
    }
}

enum WorkerExit {
    Clean,
    Engine(anyhow::Error),
    Panicked,
}

/// Join the worker thread off the async runtime.
async fn reap_worker(handle: JoinHandle<anyhow::Result<()>>) -> WorkerExit {
    let joined = tokio::task::spawn_blocking(move || handle.join()).await;
    match joined {
        Ok(Ok(Ok(()))) => WorkerExit::Clean,
        Ok(Ok(Err(e))) => WorkerExit::Engine(e),
        _ => WorkerExit::Panicked,
    }
}

/// Extract administrative boundary polygons from `input` into per-level
/// GeoJSON files under `output_dir`, returning the run's statistics.
///
/// On error, any files already written under `output_dir` are incomplete.
pub async fn extract(input: &Path, output_dir: &Path) -> Result<StreamStats, ExtractError> {
    PolygonExtractor::new(input, output_dir).run().await
}
