//! GDAL-backed raster access.

use std::path::Path;

use anyhow::{Context, Result};
use gdal::raster::Buffer;
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager};

use super::source::{RasterInfo, RasterSource};
use super::{mask_nodata, GeoTransform, Grid, NODATA};
use crate::error::{AnalysisError, AnalysisResult};
use crate::geo_core::Crs;

/// Reads drone orthomosaics and other GeoTIFFs through GDAL
#[derive(Debug, Default, Clone, Copy)]
pub struct GdalRasterSource;

impl GdalRasterSource {
    pub fn new() -> Self {
        GdalRasterSource
    }

    fn open(path: &Path) -> Result<Dataset> {
        Dataset::open(path).with_context(|| format!("Failed to open raster: {}", path.display()))
    }
}

/// CRS of a dataset, by EPSG code when GDAL knows it and the code resolves,
/// otherwise by the PROJ.4 definition GDAL exports
pub fn dataset_crs(dataset: &Dataset) -> Option<Crs> {
    let srs = dataset.spatial_ref().ok()?;
    if let Ok(code) = srs.auth_code() {
        let crs = Crs::Epsg(code as u32);
        if code > 0 && crs.is_projected().is_ok() {
            return Some(crs);
        }
    }
    srs.to_proj4()
        .ok()
        .filter(|def| !def.trim().is_empty())
        .map(Crs::Proj4)
}

impl RasterSource for GdalRasterSource {
    fn describe(&self, path: &Path) -> AnalysisResult<RasterInfo> {
        let dataset = Self::open(path)?;
        let (width, height) = dataset.raster_size();
        let transform = dataset
            .geo_transform()
            .with_context(|| format!("Raster has no geotransform: {}", path.display()))
            .map_err(|e| AnalysisError::Georeference(format!("{:#}", e)))?;

        Ok(RasterInfo {
            width,
            height,
            band_count: dataset.raster_count(),
            transform: GeoTransform(transform),
            crs: dataset_crs(&dataset),
        })
    }

    fn read_band(&self, path: &Path, band: usize) -> AnalysisResult<Grid<f64>> {
        let dataset = Self::open(path)?;
        let (width, height) = dataset.raster_size();
        let transform = dataset.geo_transform().unwrap_or([0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);

        // GDAL bands are 1-based
        let raster_band = dataset
            .rasterband(band + 1)
            .with_context(|| format!("Failed to get band {} of {}", band + 1, path.display()))?;
        let buffer = raster_band
            .read_as::<f64>((0, 0), (width, height), (width, height), None)
            .with_context(|| format!("Failed to read band {} of {}", band + 1, path.display()))?;

        let (_, mut data) = buffer.into_shape_and_vec();
        mask_nodata(&mut data, raster_band.no_data_value());
        Grid::new(width, height, GeoTransform(transform), data)
    }
}

/// Write a single-band grid as a GeoTIFF with [`NODATA`] as nodata value
pub fn write_geotiff(grid: &Grid<f64>, crs: Option<&Crs>, path: &Path) -> Result<()> {
    let driver =
        DriverManager::get_driver_by_name("GTiff").context("Failed to get GTiff driver")?;

    let mut output = driver
        .create_with_band_type::<f64, _>(path, grid.width, grid.height, 1)
        .with_context(|| format!("Failed to create GeoTIFF: {}", path.display()))?;

    output
        .set_geo_transform(&grid.transform.0)
        .context("Failed to set geotransform")?;

    if let Some(crs) = crs {
        let srs = match crs {
            Crs::Epsg(code) => SpatialRef::from_epsg(*code),
            Crs::Proj4(def) => SpatialRef::from_proj4(def),
        }
        .with_context(|| format!("Failed to build spatial reference for {}", crs))?;
        output
            .set_spatial_ref(&srs)
            .context("Failed to set spatial reference")?;
    }

    let mut band = output.rasterband(1).context("Failed to get output band")?;
    let mut buffer = Buffer::new((grid.width, grid.height), grid.data.clone());
    band.write((0, 0), (grid.width, grid.height), &mut buffer)
        .context("Failed to write raster band")?;
    band.set_no_data_value(Some(NODATA))
        .context("Failed to set no data value")?;

    Ok(())
}
