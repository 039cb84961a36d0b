use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use drone_segmenter::assemble::to_feature_collection;
use drone_segmenter::{
    compute, CancelToken, LogProgress, PlanError, ProjectConfig, RasterInputs, VectorInputs,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Plan drone search segments from a DEM and mission parameters"
)]
struct Args {
    /// Project configuration JSON
    #[arg(long)]
    config: PathBuf,

    /// DEM GeoTIFF
    #[arg(long)]
    dem: PathBuf,

    /// Optional vegetation-height GeoTIFF
    #[arg(long)]
    vegetation: Option<PathBuf>,

    /// Optional road line layer (shapefile or GeoJSON)
    #[arg(long)]
    roads: Option<PathBuf>,

    /// Optional trail line layer (shapefile or GeoJSON)
    #[arg(long)]
    trails: Option<PathBuf>,

    /// Output directory for the segments artifact
    #[arg(long)]
    out: PathBuf,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "drone_segmenter=info,segment=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(kind = err.kind().as_str(), "{err}");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

fn run(args: Args) -> Result<(), PlanError> {
    let file = File::open(&args.config).map_err(|source| PlanError::Io {
        source,
        path: args.config.clone(),
    })?;
    let config: ProjectConfig = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| PlanError::Config(format!("cannot parse {}: {e}", args.config.display())))?;
    tracing::info!(project = %config.name, "starting segmentation");

    let rasters = RasterInputs {
        dem: args.dem,
        vegetation: args.vegetation,
    };
    let vectors = VectorInputs {
        roads: args.roads,
        trails: args.trails,
    };

    let result = compute(&config, &rasters, &vectors, &LogProgress, &CancelToken::new())?;

    std::fs::create_dir_all(&args.out).map_err(|source| PlanError::Io {
        source,
        path: args.out.clone(),
    })?;
    let out_path = args.out.join("segments.geojson");
    let artifact = serde_json::to_string_pretty(&to_feature_collection(&result))
        .map_err(|e| PlanError::Internal(format!("cannot serialize artifact: {e}")))?;
    std::fs::write(&out_path, artifact).map_err(|source| PlanError::Io {
        source,
        path: out_path.clone(),
    })?;

    tracing::info!(
        segments = result.segments.len(),
        coverage = format!("{:.1}%", result.coverage_fraction * 100.0),
        epsg = result.epsg,
        artifact = %out_path.display(),
        "done"
    );
    Ok(())
}
