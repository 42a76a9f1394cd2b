//! Per-admin-level GeoJSON output streams.
//!
//! One lazily created file per partition key. Each file is an incrementally
//! serialized `FeatureCollection`: the header is written on first use, one
//! feature per routed area, and the closing bracket on `finish`. Routing is
//! single-threaded; the multiplexer is owned by exactly one run.

use std::io;
use std::path::{Path, PathBuf};

use hashbrown::hash_map::Entry;
use hashbrown::HashMap;
use serde::Serialize;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info};

use crate::models::{Area, LevelKey, Tags};

const COLLECTION_HEADER: &[u8] = b"{\"type\":\"FeatureCollection\",\"features\":[";
const COLLECTION_FOOTER: &[u8] = b"\n]}\n";

#[derive(Serialize)]
struct Feature<'a> {
    #[serde(rename = "type")]
    feature_type: &'static str,
    properties: &'a Tags,
    geometry: &'a serde_json::Value,
}

struct LevelStream {
    writer: BufWriter<File>,
    feature_count: u64,
}

/// Routes areas into one GeoJSON file per normalized admin level.
pub struct LevelMultiplexer {
    output_dir: PathBuf,
    streams: HashMap<LevelKey, LevelStream>,
}

impl LevelMultiplexer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            streams: HashMap::new(),
        }
    }

    /// Output path for a partition key.
    pub fn level_path(output_dir: &Path, level: &LevelKey) -> PathBuf {
        output_dir.join(format!("admin_level_{}.geojson", level))
    }

    /// Serialize one area into its partition's stream, creating the stream
    /// on first use.
    pub async fn route(&mut self, area: &Area) -> io::Result<()> {
        let level = LevelKey::from_tag(area.tags.get("admin_level").map(String::as_str));

        let stream = match self.streams.entry(level) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let path = Self::level_path(&self.output_dir, entry.key());
                debug!(path = %path.display(), "opening level stream");
                tokio::fs::create_dir_all(&self.output_dir).await?;
                let file = File::create(&path).await?;
                let mut writer = BufWriter::new(file);
                writer.write_all(COLLECTION_HEADER).await?;
                entry.insert(LevelStream {
                    writer,
                    feature_count: 0,
                })
            }
        };

        let feature = Feature {
            feature_type: "Feature",
            properties: &area.tags,
            geometry: &area.geometry,
        };
        let json = serde_json::to_vec(&feature)?;

        if stream.feature_count > 0 {
            stream.writer.write_all(b",").await?;
        }
        stream.writer.write_all(b"\n").await?;
        stream.writer.write_all(&json).await?;
        stream.feature_count += 1;

        Ok(())
    }

    /// Close every open stream: footer, flush, and fsync. Resolves only once
    /// the data has reached the underlying files, not just the buffers.
    pub async fn finish(&mut self) -> io::Result<()> {
        for (level, mut stream) in self.streams.drain() {
            stream.writer.write_all(COLLECTION_FOOTER).await?;
            stream.writer.flush().await?;
            let file = stream.writer.into_inner();
            file.sync_all().await?;
            info!(
                level = %level,
                features = stream.feature_count,
                "closed level stream"
            );
        }
        Ok(())
    }

    /// Number of streams opened so far.
    pub fn open_streams(&self) -> usize {
        self.streams.len()
    }
}
