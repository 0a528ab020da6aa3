//! Drone orthomosaic NDVI, downscaled to the satellite ground sample distance.
//!
//! Steps: band check, NDVI at native resolution, bilinear downscale with a
//! rebuilt geotransform, AOI crop in the raster CRS, statistics.

use std::path::Path;

use tracing::{debug, info};

use crate::error::{AnalysisError, AnalysisResult};
use crate::geo_core::{AreaOfInterest, Crs};
use crate::geometric::vegetation::{self, AreaStatistics};
use crate::raster::source::RasterSource;
use crate::raster::{mask, resample, BandPair, GeoTransform, Grid};

/// Result of processing one drone raster
#[derive(Debug, Clone, PartialEq)]
pub struct DroneAnalysis {
    pub stats: AreaStatistics,
    pub original_resolution_m: f64,
    pub downscaled_resolution_m: f64,
    /// native / target
    pub scale_factor: f64,
    /// Dimensions of the downscaled raster, before cropping
    pub width: usize,
    pub height: usize,
    /// Downscaled NDVI cropped to the AOI
    pub ndvi: Grid<f64>,
    pub crs: Crs,
}

/// Processes drone rasters read through a [`RasterSource`]
pub struct DroneRasterProcessor<'a> {
    source: &'a dyn RasterSource,
    target_resolution_m: f64,
}

impl<'a> DroneRasterProcessor<'a> {
    pub fn new(source: &'a dyn RasterSource, target_resolution_m: f64) -> Self {
        DroneRasterProcessor {
            source,
            target_resolution_m,
        }
    }

    /// Output dimensions for a linear scale factor, rounded down
    pub fn downscaled_dims(width: usize, height: usize, scale_factor: f64) -> (usize, usize) {
        (
            (width as f64 * scale_factor).floor() as usize,
            (height as f64 * scale_factor).floor() as usize,
        )
    }

    /// NDVI statistics of the drone raster over the AOI at the target resolution
    pub fn process(
        &self,
        path: &Path,
        aoi: &AreaOfInterest,
        red_band: usize,
        nir_band: usize,
        threshold: f64,
    ) -> AnalysisResult<DroneAnalysis> {
        let info = self.source.describe(path)?;
        let required = red_band.max(nir_band) + 1;
        if info.band_count < required {
            return Err(AnalysisError::Input(format!(
                "drone raster has {} bands, band {} is required",
                info.band_count, required
            )));
        }

        let crs = info.crs.clone().ok_or_else(|| {
            AnalysisError::Georeference("drone raster has no coordinate reference system".into())
        })?;
        if !crs.is_projected()? {
            return Err(AnalysisError::Georeference(format!(
                "drone raster must use a projected CRS, found {}",
                crs
            )));
        }

        let native = info.resolution();
        let target = self.target_resolution_m;
        if !(native < target) {
            return Err(AnalysisError::ResolutionMismatch {
                native_m: native,
                target_m: target,
            });
        }

        let scale_factor = native / target;
        let (width, height) = Self::downscaled_dims(info.width, info.height, scale_factor);
        if width == 0 || height == 0 {
            return Err(AnalysisError::Input(format!(
                "drone raster {}x{} covers less than one {} m pixel",
                info.width, info.height, target
            )));
        }
        info!(
            "Drone raster {}x{} at {:.3} m, downscaling by {} to {}x{}",
            info.width, info.height, native, scale_factor, width, height
        );

        let bands = BandPair::new(
            self.source.read_band(path, nir_band)?,
            self.source.read_band(path, red_band)?,
            Some(crs.clone()),
        )?;
        let ndvi = vegetation::compute(&bands);

        let mut downscaled = resample::bilinear(&ndvi, width, height);
        let (origin_x, origin_y) = info.transform.origin();
        downscaled.transform = GeoTransform::north_up(origin_x, origin_y, target, target);

        let aoi_in_raster_crs = aoi.to_crs(&crs)?;
        let cropped = mask::crop_to_aoi(&downscaled, &aoi_in_raster_crs)?;
        debug!("Cropped drone NDVI to {}x{}", cropped.width, cropped.height);

        let stats = AreaStatistics::from_index(
            &cropped,
            threshold,
            cropped.transform.projected_pixel_area(),
        );

        Ok(DroneAnalysis {
            stats,
            original_resolution_m: native,
            downscaled_resolution_m: target,
            scale_factor,
            width,
            height,
            ndvi: cropped,
            crs,
        })
    }
}
