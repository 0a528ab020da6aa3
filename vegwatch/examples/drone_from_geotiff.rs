use std::env;
use std::path::PathBuf;

use anyhow::{bail, Result};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use vegwatch::geometric::drone::DroneRasterProcessor;
use vegwatch::raster::gdal_source::{write_geotiff, GdalRasterSource};
use vegwatch::raster::source::RasterSource;
use vegwatch::{AreaOfInterest, PipelineConfig};

/// Example: downscale a drone orthomosaic to the satellite resolution and
/// report its vegetation cover.
///
/// Usage: drone_from_geotiff <orthomosaic.tif> <aoi.geojson> [ndvi_out.tif]
fn main() -> Result<()> {
    FmtSubscriber::builder()
        .with_max_level(
            env::var("RUST_LOG")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(Level::INFO),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        bail!("usage: {} <orthomosaic.tif> <aoi.geojson> [ndvi_out.tif]", args[0]);
    }
    let raster = PathBuf::from(&args[1]);
    let aoi = AreaOfInterest::from_geojson_str(&std::fs::read_to_string(&args[2])?)?;
    let output = args
        .get(3)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("drone_ndvi.tif"));

    let config = PipelineConfig::from_env_or_default()?;
    let source = GdalRasterSource::new();
    let info = source.describe(&raster)?;
    info!(
        "{}: {}x{} px, {} bands, {:.3} m",
        raster.display(),
        info.width,
        info.height,
        info.band_count,
        info.resolution()
    );

    let processor = DroneRasterProcessor::new(&source, config.drone.target_resolution_m);
    let analysis = processor.process(
        &raster,
        &aoi,
        config.drone.red_band,
        config.drone.nir_band,
        config.satellite.threshold,
    )?;

    println!("Drone vegetation cover");
    println!(
        "  - Resolution: {:.3} m -> {:.1} m (scale {:.4})",
        analysis.original_resolution_m,
        analysis.downscaled_resolution_m,
        analysis.scale_factor
    );
    println!("  - Grid: {}x{}", analysis.width, analysis.height);
    println!(
        "  - Vegetated area: {:.2} ha ({:.1}% of valid pixels)",
        analysis.stats.vegetation_area_ha, analysis.stats.vegetation_percentage
    );
    println!("  - Mean NDVI: {:.3}", analysis.stats.mean_index);

    write_geotiff(&analysis.ndvi, Some(&analysis.crs), &output)?;
    println!("  - NDVI raster: {}", output.display());
    Ok(())
}
