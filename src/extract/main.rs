//! Boundary extraction CLI.
//!
//! Parses an OSM PBF file and writes per-admin-level GeoJSON files plus an
//! error artifact into the output directory.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use fences::{PolygonExtractor, TagFilter};

#[derive(Parser, Debug)]
#[command(name = "extract")]
#[command(about = "Extract admin boundary polygons from an OSM PBF file")]
struct Args {
    /// OSM PBF input file
    #[arg(short, long)]
    file: PathBuf,

    /// Output directory for GeoJSON and error files
    #[arg(short, long, default_value = "./output")]
    output_dir: PathBuf,

    /// Accepted boundary tag values (repeatable)
    #[arg(long, default_value = "administrative")]
    boundary: Vec<String>,

    /// Secondary tag consulted when an area has no name or type tag
    #[arg(long, default_value = "tiger:NAME")]
    fallback_name_tag: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string())),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    info!(
        "Extracting admin boundaries from {} into {}",
        args.file.display(),
        args.output_dir.display()
    );

    let stats = PolygonExtractor::new(&args.file, &args.output_dir)
        .with_filter(TagFilter::boundaries(args.boundary))
        .with_fallback_name_tag(args.fallback_name_tag)
        .run()
        .await?;

    info!(
        "Results: {} of {} areas matched, {} of {} errors reported",
        stats.area_matched, stats.area_total, stats.error_matched, stats.error_total
    );
    info!(
        "Timings (us): preprocess={} area={} handler={}",
        stats.time_in_preprocess, stats.time_in_area, stats.time_in_area_handler
    );

    Ok(())
}
