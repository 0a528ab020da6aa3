//! In-memory georeferenced rasters shared by the satellite and drone paths.

pub mod mask;
pub mod resample;
pub mod source;

#[cfg(feature = "gdal")]
pub mod gdal_source;

use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, AnalysisResult};
use crate::geo_core::Crs;

/// Nodata sentinel for index rasters; valid NDVI is bounded to [-1, 1]
pub const NODATA: f64 = -999.0;

/// Mean Earth radius (IUGG) used for geographic pixel areas
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Affine geotransform in GDAL coefficient order:
/// x = c + col·a + row·b, y = f + col·d + row·e
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform(pub [f64; 6]);

impl GeoTransform {
    /// North-up transform anchored at the top-left corner (origin_x, origin_y)
    pub fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        GeoTransform([origin_x, pixel_width, 0.0, origin_y, 0.0, -pixel_height])
    }

    pub fn origin(&self) -> (f64, f64) {
        (self.0[0], self.0[3])
    }

    pub fn pixel_width(&self) -> f64 {
        self.0[1].abs()
    }

    pub fn pixel_height(&self) -> f64 {
        self.0[5].abs()
    }

    /// World coordinates of the center of pixel (col, row)
    pub fn pixel_center(&self, col: usize, row: usize) -> (f64, f64) {
        self.apply(col as f64 + 0.5, row as f64 + 0.5)
    }

    /// World coordinates of a fractional pixel position
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        let [c, a, b, f, d, e] = self.0;
        (c + col * a + row * b, f + col * d + row * e)
    }

    /// Fractional pixel position of a world coordinate (north-up transforms only)
    pub fn invert(&self, x: f64, y: f64) -> (f64, f64) {
        let [c, a, _, f, _, e] = self.0;
        ((x - c) / a, (y - f) / e)
    }

    /// Area of one pixel in CRS units squared
    pub fn projected_pixel_area(&self) -> f64 {
        let [_, a, b, _, d, e] = self.0;
        (a * e - b * d).abs()
    }

    /// Area in m² of a pixel in the given row of a geographic (degree) grid
    pub fn geographic_pixel_area(&self, row: usize) -> f64 {
        let lat1 = (self.0[3] + row as f64 * self.0[5]).to_radians();
        let lat2 = (self.0[3] + (row + 1) as f64 * self.0[5]).to_radians();
        let dlon = self.0[1].abs().to_radians();
        EARTH_RADIUS_M * EARTH_RADIUS_M * dlon * (lat1.sin() - lat2.sin()).abs()
    }
}

/// Row-major 2-D raster with its georeference
#[derive(Debug, Clone, PartialEq)]
pub struct Grid<T> {
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    pub data: Vec<T>,
}

impl<T: Clone> Grid<T> {
    pub fn new(
        width: usize,
        height: usize,
        transform: GeoTransform,
        data: Vec<T>,
    ) -> AnalysisResult<Self> {
        if data.len() != width * height {
            return Err(AnalysisError::Input(format!(
                "raster data has {} values, expected {}x{}",
                data.len(),
                width,
                height
            )));
        }
        Ok(Grid {
            width,
            height,
            transform,
            data,
        })
    }

    pub fn filled(width: usize, height: usize, transform: GeoTransform, value: T) -> Self {
        Grid {
            width,
            height,
            transform,
            data: vec![value; width * height],
        }
    }

    pub fn get(&self, col: usize, row: usize) -> Option<&T> {
        if col < self.width && row < self.height {
            self.data.get(row * self.width + col)
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn same_shape<U>(&self, other: &Grid<U>) -> bool {
        self.width == other.width && self.height == other.height
    }

    /// Same shape and georeference, new values
    pub fn with_data<U>(&self, data: Vec<U>) -> Grid<U> {
        Grid {
            width: self.width,
            height: self.height,
            transform: self.transform,
            data,
        }
    }
}

/// Replace every occurrence of a band's declared nodata value with NaN
pub fn mask_nodata(data: &mut [f64], nodata: Option<f64>) {
    let Some(nodata) = nodata.filter(|v| !v.is_nan()) else {
        return;
    };
    for value in data.iter_mut().filter(|v| **v == nodata) {
        *value = f64::NAN;
    }
}

/// Co-registered NIR and Red bands
#[derive(Debug, Clone)]
pub struct BandPair {
    pub nir: Grid<f64>,
    pub red: Grid<f64>,
    pub crs: Option<Crs>,
}

impl BandPair {
    pub fn new(nir: Grid<f64>, red: Grid<f64>, crs: Option<Crs>) -> AnalysisResult<Self> {
        if !nir.same_shape(&red) {
            return Err(AnalysisError::Input(format!(
                "NIR band is {}x{} but Red band is {}x{}",
                nir.width, nir.height, red.width, red.height
            )));
        }
        if nir.transform != red.transform {
            return Err(AnalysisError::Input(
                "NIR and Red bands do not share a georeference".into(),
            ));
        }
        Ok(BandPair { nir, red, crs })
    }
}
