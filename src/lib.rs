//! Fences - administrative boundary extraction from OSM data.
//!
//! Reads an OSM PBF file, extracts administrative boundary polygons, and
//! writes one GeoJSON `FeatureCollection` per admin level plus an
//! `errors.json` artifact describing every candidate boundary that failed to
//! materialize.

pub mod engine;
pub mod error;
pub mod extractor;
pub mod filter;
pub mod models;
pub mod reconcile;
pub mod sink;
pub mod worker;

pub use error::{ErrorKind, ErrorRecord, ExtractError};
pub use extractor::{extract, PolygonExtractor};
pub use filter::{TagFilter, TagRule};
pub use models::{Area, AreaKey, Candidate, LevelKey, OsmType, StreamStats};
