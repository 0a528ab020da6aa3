//! NDVI computation, vegetation classification and area statistics.
//!
//! NDVI = (NIR - Red) / (NIR + Red). Pixels where either band is missing
//! (NaN or the nodata sentinel) come out as [`NODATA`], never as 0, so an
//! absent observation is not confused with bare soil.

#[cfg(feature = "rayon")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::raster::{BandPair, Grid, NODATA};

/// NDVI threshold used when none is configured
pub const DEFAULT_THRESHOLD: f64 = 0.4;

/// NDVI of one pixel
#[inline]
pub fn ndvi(nir: f64, red: f64) -> f64 {
    if !nir.is_finite() || !red.is_finite() || nir == NODATA || red == NODATA {
        return NODATA;
    }
    let sum = nir + red;
    if sum == 0.0 {
        return 0.0;
    }
    ((nir - red) / sum).clamp(-1.0, 1.0)
}

/// Whether a value is a valid index (not nodata)
#[inline]
pub fn is_valid(value: f64) -> bool {
    value != NODATA && value.is_finite()
}

/// Per-pixel NDVI of a band pair, same georeference as the input
pub fn compute(bands: &BandPair) -> Grid<f64> {
    let nir = &bands.nir.data;
    let red = &bands.red.data;
    let mut index = vec![NODATA; nir.len()];

    #[cfg(feature = "rayon")]
    index
        .par_iter_mut()
        .enumerate()
        .for_each(|(i, v)| *v = ndvi(nir[i], red[i]));

    #[cfg(not(feature = "rayon"))]
    index
        .iter_mut()
        .enumerate()
        .for_each(|(i, v)| *v = ndvi(nir[i], red[i]));

    bands.nir.with_data(index)
}

/// Vegetation mask: `true` where index > threshold (strict), `false` on nodata
pub fn classify(index: &Grid<f64>, threshold: f64) -> Grid<bool> {
    let mask = index
        .data
        .iter()
        .map(|&v| is_valid(v) && v > threshold)
        .collect();
    index.with_data(mask)
}

/// Vegetation statistics over the valid pixels of an index raster
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AreaStatistics {
    pub total_area_ha: f64,
    pub vegetation_area_ha: f64,
    pub vegetation_percentage: f64,
    pub mean_index: f64,
    pub std_index: f64,
    pub valid_pixels: usize,
    pub vegetation_pixels: usize,
}

impl AreaStatistics {
    /// Statistics for an index raster whose pixels all cover `pixel_area_m2`
    pub fn from_index(index: &Grid<f64>, threshold: f64, pixel_area_m2: f64) -> Self {
        let mut valid_pixels = 0usize;
        let mut vegetation_pixels = 0usize;
        let mut sum = 0.0;
        let mut sum_sq = 0.0;

        for &v in index.data.iter().filter(|v| is_valid(**v)) {
            valid_pixels += 1;
            if v > threshold {
                vegetation_pixels += 1;
            }
            sum += v;
            sum_sq += v * v;
        }

        let (mean_index, std_index) = if valid_pixels > 0 {
            let n = valid_pixels as f64;
            let mean = sum / n;
            // Population standard deviation
            let variance = (sum_sq / n - mean * mean).max(0.0);
            (mean, variance.sqrt())
        } else {
            (0.0, 0.0)
        };

        let vegetation_percentage = if valid_pixels > 0 {
            vegetation_pixels as f64 / valid_pixels as f64 * 100.0
        } else {
            0.0
        };

        AreaStatistics {
            total_area_ha: valid_pixels as f64 * pixel_area_m2 / 10_000.0,
            vegetation_area_ha: vegetation_pixels as f64 * pixel_area_m2 / 10_000.0,
            vegetation_percentage,
            mean_index,
            std_index,
            valid_pixels,
            vegetation_pixels,
        }
    }
}

/// Fixed-bin histogram of index values over [-1, 1]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub min: f64,
    pub max: f64,
    pub counts: Vec<u64>,
}

impl Histogram {
    /// Histogram of the valid values yielded by `values`
    pub fn from_values<I: IntoIterator<Item = f64>>(values: I, bins: usize) -> Self {
        let bins = bins.max(1);
        let (min, max) = (-1.0, 1.0);
        let width = (max - min) / bins as f64;
        let mut counts = vec![0u64; bins];
        for v in values.into_iter().filter(|v| is_valid(*v)) {
            // The top edge belongs to the last bin
            let bin = (((v - min) / width).floor() as usize).min(bins - 1);
            counts[bin] += 1;
        }
        Histogram { min, max, counts }
    }

    pub fn from_index(index: &Grid<f64>, bins: usize) -> Self {
        Self::from_values(index.data.iter().copied(), bins)
    }

    pub fn bin_width(&self) -> f64 {
        (self.max - self.min) / self.counts.len() as f64
    }

    /// Lower edge of every bin
    pub fn bin_edges(&self) -> Vec<f64> {
        let width = self.bin_width();
        (0..self.counts.len())
            .map(|i| self.min + i as f64 * width)
            .collect()
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

/// Annualised change rate in percent per year
///
/// Returns 0 when `past` is not positive or `years` is not positive.
pub fn annual_rate_pct(past: f64, present: f64, years: f64) -> f64 {
    if past <= 0.0 || years <= 0.0 {
        return 0.0;
    }
    (present - past) / past / years * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::GeoTransform;

    fn grid(data: Vec<f64>) -> Grid<f64> {
        let n = data.len();
        Grid::new(n, 1, GeoTransform::north_up(0.0, 0.0, 10.0, 10.0), data).unwrap()
    }

    #[test]
    fn test_ndvi_values() {
        assert!((ndvi(0.5, 0.1) - 0.4 / 0.6).abs() < 1e-12);
        assert_eq!(ndvi(0.0, 0.0), 0.0);
        assert_eq!(ndvi(0.3, 0.3), 0.0);
        assert_eq!(ndvi(f64::NAN, 0.3), NODATA);
    }

    #[test]
    fn test_ndvi_is_clamped() {
        // Negative reflectance from sensor noise would push NDVI past 1
        assert_eq!(ndvi(0.5, -0.1), 1.0);
        assert_eq!(ndvi(-0.1, 0.5), -1.0);
    }

    #[test]
    fn test_compute_grid() {
        let nir = grid(vec![0.8, 0.0, 0.2]);
        let red = grid(vec![0.2, 0.0, 0.6]);
        let pair = BandPair::new(nir, red, None).unwrap();
        let index = compute(&pair);
        assert!((index.data[0] - 0.6).abs() < 1e-12);
        assert_eq!(index.data[1], 0.0);
        assert!((index.data[2] + 0.5).abs() < 1e-12);
        assert!(index.data.iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn test_classify_is_strict() {
        let index = grid(vec![0.4, 0.41, 0.39, NODATA]);
        let mask = classify(&index, 0.4);
        assert_eq!(mask.data, vec![false, true, false, false]);
    }

    #[test]
    fn test_statistics() {
        let index = grid(vec![0.8, 0.6, 0.2, 0.0, NODATA]);
        let stats = AreaStatistics::from_index(&index, 0.4, 100.0);
        assert_eq!(stats.valid_pixels, 4);
        assert_eq!(stats.vegetation_pixels, 2);
        assert!((stats.total_area_ha - 0.04).abs() < 1e-12);
        assert!((stats.vegetation_area_ha - 0.02).abs() < 1e-12);
        assert_eq!(stats.vegetation_percentage, 50.0);
        assert!((stats.mean_index - 0.4).abs() < 1e-12);
        // population std of [0.8, 0.6, 0.2, 0.0]
        assert!((stats.std_index - 0.1_f64.sqrt()).abs() < 1e-9);
        assert!(stats.vegetation_area_ha <= stats.total_area_ha);
    }

    #[test]
    fn test_statistics_without_valid_pixels() {
        let index = grid(vec![NODATA, NODATA]);
        let stats = AreaStatistics::from_index(&index, 0.4, 100.0);
        assert_eq!(stats.vegetation_percentage, 0.0);
        assert_eq!(stats.mean_index, 0.0);
        assert_eq!(stats.std_index, 0.0);
        assert_eq!(stats.total_area_ha, 0.0);
    }

    #[test]
    fn test_histogram() {
        let hist = Histogram::from_values(vec![-1.0, -0.5, 0.0, 0.5, 1.0, NODATA], 4);
        assert_eq!(hist.counts, vec![1, 1, 1, 2]);
        assert_eq!(hist.total(), 5);
        assert_eq!(hist.bin_edges(), vec![-1.0, -0.5, 0.0, 0.5]);
    }

    #[test]
    fn test_annual_rate() {
        let rate = annual_rate_pct(120.5, 95.2, 8.0);
        assert!((rate + 2.6245).abs() < 1e-3);
        assert_eq!(annual_rate_pct(0.0, 10.0, 8.0), 0.0);
        assert_eq!(annual_rate_pct(10.0, 5.0, 0.0), 0.0);
        assert_eq!(annual_rate_pct(-1.0, 5.0, 2.0), 0.0);
    }
}
