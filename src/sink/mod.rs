//! Output sinks: per-level GeoJSON streams and the error artifact.

pub mod errors;
pub mod level;

pub use errors::ErrorSink;
pub use level::LevelMultiplexer;
