//! Raster readers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use super::{GeoTransform, Grid};
use crate::error::{AnalysisError, AnalysisResult};
use crate::geo_core::Crs;

/// Header information of a georeferenced raster file
#[derive(Debug, Clone, PartialEq)]
pub struct RasterInfo {
    pub width: usize,
    pub height: usize,
    pub band_count: usize,
    pub transform: GeoTransform,
    /// `None` when the file carries no spatial reference
    pub crs: Option<Crs>,
}

impl RasterInfo {
    /// Native ground sample distance in CRS units
    pub fn resolution(&self) -> f64 {
        self.transform.pixel_width()
    }
}

/// Reads bands from georeferenced raster files
pub trait RasterSource: Send + Sync {
    fn describe(&self, path: &Path) -> AnalysisResult<RasterInfo>;

    /// Read one band (0-based index) as a full-resolution grid
    fn read_band(&self, path: &Path, band: usize) -> AnalysisResult<Grid<f64>>;
}

/// Raster source holding rasters in memory, keyed by path
#[derive(Default)]
pub struct InMemoryRasterSource {
    rasters: RwLock<HashMap<PathBuf, (RasterInfo, Vec<Vec<f64>>)>>,
}

impl InMemoryRasterSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a raster; every band must hold `width * height` values
    pub fn insert<P: Into<PathBuf>>(
        &self,
        path: P,
        transform: GeoTransform,
        crs: Option<Crs>,
        width: usize,
        height: usize,
        bands: Vec<Vec<f64>>,
    ) -> AnalysisResult<()> {
        if let Some(bad) = bands.iter().position(|b| b.len() != width * height) {
            return Err(AnalysisError::Input(format!(
                "band {} has {} values, expected {}",
                bad,
                bands[bad].len(),
                width * height
            )));
        }
        let info = RasterInfo {
            width,
            height,
            band_count: bands.len(),
            transform,
            crs,
        };
        self.rasters.write().insert(path.into(), (info, bands));
        Ok(())
    }
}

impl RasterSource for InMemoryRasterSource {
    fn describe(&self, path: &Path) -> AnalysisResult<RasterInfo> {
        self.rasters
            .read()
            .get(path)
            .map(|(info, _)| info.clone())
            .ok_or_else(|| {
                AnalysisError::Input(format!("raster not found: {}", path.display()))
            })
    }

    fn read_band(&self, path: &Path, band: usize) -> AnalysisResult<Grid<f64>> {
        let rasters = self.rasters.read();
        let (info, bands) = rasters.get(path).ok_or_else(|| {
            AnalysisError::Input(format!("raster not found: {}", path.display()))
        })?;
        let data = bands.get(band).ok_or_else(|| {
            AnalysisError::Input(format!(
                "band {} requested but raster has {} bands",
                band + 1,
                info.band_count
            ))
        })?;
        Grid::new(info.width, info.height, info.transform, data.clone())
    }
}
