use std::env;
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use vegwatch::collect::stac::StacCatalog;
use vegwatch::raster::source::InMemoryRasterSource;
use vegwatch::{ChangeAnalysisOrchestrator, InMemoryJobRegistry, JobService, PipelineConfig};

/// Example: vegetation change between 2018 and 2024 over a forest patch
/// near Fontainebleau, searched on a public STAC API.
///
/// Pixel reads need the `gdal` feature; without it the job ends in a
/// `failed` state with a catalog error, which is still a useful check of
/// the search path.
fn main() -> Result<()> {
    FmtSubscriber::builder()
        .with_max_level(
            env::var("RUST_LOG")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(Level::INFO),
        )
        .with_target(true)
        .init();

    let config = PipelineConfig::from_env_or_default()?;
    info!("Using STAC API at {}", config.catalog.stac_url);

    // The blocking HTTP client must live outside the async runtime
    let catalog = StacCatalog::new(&config.catalog)?;
    let orchestrator = Arc::new(ChangeAnalysisOrchestrator::new(
        Arc::new(catalog),
        Arc::new(InMemoryRasterSource::new()),
        config,
    ));
    let registry = Arc::new(InMemoryJobRegistry::new());
    let service = JobService::new(orchestrator, registry);

    let request = r#"{
        "geometry": {
            "type": "Polygon",
            "coordinates": [[
                [2.640, 48.400], [2.660, 48.400], [2.660, 48.412],
                [2.640, 48.412], [2.640, 48.400]
            ]]
        },
        "past_year": 2018,
        "present_year": 2024
    }"#;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let view = runtime.block_on(async {
        let handle = service.submit_json(request)?;
        let job_id = handle.job_id;
        info!("Submitted job {}", job_id);
        let status = handle.wait().await?;
        info!("Job {} finished: {:?}", job_id, status);
        service.poll(&job_id)
    })?;

    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}
