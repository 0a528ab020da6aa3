//! Satellite vegetation-area reduction over a cloud-filtered composite.

#[cfg(feature = "rayon")]
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::analysis::request::TimeWindow;
use crate::collect::catalog::{
    Collection, GridSpec, ImageCatalog, SceneQuery, TileDescriptor, TileLayer, TileRequest,
    VisParams,
};
use crate::config::SatelliteSettings;
use crate::error::AnalysisResult;
use crate::geo_core::{AreaOfInterest, BoundingBox, Crs};
use crate::geometric::vegetation::{self, Histogram};
use crate::raster::{mask, BandPair, GeoTransform, Grid, NODATA};

/// Metres per degree of latitude
const METERS_PER_DEGREE: f64 = 111_320.0;

/// NIR and Red samples of one scene at one pixel
const SCENE_BYTES_PER_PIXEL: u64 = 16;

/// Composite bands, NDVI, vegetation mask and AOI mask at one pixel
const COMPOSITE_BYTES_PER_PIXEL: u64 = 34;

/// Options of one reduction
#[derive(Debug, Clone, PartialEq)]
pub struct ReduceOptions {
    pub threshold: f64,
    pub max_cloud_pct: f64,
    /// Hard cap on composite pixels; the grid is coarsened when exceeded
    pub max_pixels: u64,
    /// Memory budget shared by the scene stack and the composite
    pub max_composite_bytes: u64,
    pub return_visualization: bool,
    pub return_histogram: bool,
    pub histogram_bins: usize,
}

impl ReduceOptions {
    pub fn from_settings(settings: &SatelliteSettings) -> Self {
        ReduceOptions {
            threshold: settings.threshold,
            max_cloud_pct: settings.max_cloud_pct,
            max_pixels: settings.max_pixels,
            max_composite_bytes: settings.max_composite_bytes,
            return_visualization: settings.return_visualization,
            return_histogram: settings.return_histogram,
            histogram_bins: settings.histogram_bins,
        }
    }

    /// Pixel cap for a composite of `scene_count` scenes: the configured
    /// `max_pixels`, lowered so the whole stack fits in `max_composite_bytes`
    pub fn pixel_budget(&self, scene_count: usize) -> u64 {
        let per_pixel = SCENE_BYTES_PER_PIXEL * scene_count as u64 + COMPOSITE_BYTES_PER_PIXEL;
        (self.max_composite_bytes / per_pixel)
            .min(self.max_pixels)
            .max(1)
    }
}

impl Default for ReduceOptions {
    fn default() -> Self {
        Self::from_settings(&SatelliteSettings::default())
    }
}

/// Vegetated area of one time window
#[derive(Debug, Clone, PartialEq)]
pub struct SatelliteReduction {
    pub area_m2: f64,
    pub area_ha: f64,
    pub image_count: usize,
    pub data_available: bool,
    /// Composite NDVI masked to the AOI (outside pixels are nodata)
    pub ndvi: Option<Grid<f64>>,
    pub tile: Option<TileDescriptor>,
    pub histogram: Option<Histogram>,
    pub pixel_cap_hit: bool,
    /// Ground sample distance actually used, in metres
    pub scale_m: f64,
}

impl SatelliteReduction {
    /// Result of a window where no image passed the filters
    pub fn empty() -> Self {
        SatelliteReduction {
            area_m2: 0.0,
            area_ha: 0.0,
            image_count: 0,
            data_available: false,
            ndvi: None,
            tile: None,
            histogram: None,
            pixel_cap_hit: false,
            scale_m: 0.0,
        }
    }

    /// Reduction carrying only an area, as produced by an external reducer
    pub fn from_area_m2(area_m2: f64, image_count: usize) -> Self {
        SatelliteReduction {
            area_m2,
            area_ha: area_m2 / 10_000.0,
            image_count,
            data_available: image_count > 0,
            ..Self::empty()
        }
    }
}

/// Composite grid over `bbox` in EPSG:4326 at roughly `scale_m` metres,
/// coarsened until it holds at most `max_pixels` pixels
pub fn composite_grid(
    bbox: &BoundingBox,
    scale_m: f64,
    max_pixels: u64,
) -> (GridSpec, f64, bool) {
    let lat_center = ((bbox.min_y + bbox.max_y) / 2.0).to_radians();
    let mut scale = scale_m;
    let mut cap_hit = false;

    loop {
        let dy = scale / METERS_PER_DEGREE;
        let dx = scale / (METERS_PER_DEGREE * lat_center.cos().max(1e-6));
        let width = ((bbox.width() / dx).ceil() as usize).max(1);
        let height = ((bbox.height() / dy).ceil() as usize).max(1);
        let grid = GridSpec {
            width,
            height,
            transform: GeoTransform::north_up(bbox.min_x, bbox.max_y, dx, dy),
            crs: Crs::wgs84(),
        };

        let count = grid.pixel_count();
        if count <= max_pixels || (width == 1 && height == 1) {
            return (grid, scale, cap_hit);
        }
        // Best effort: coarsen both axes by the same linear factor
        cap_hit = true;
        let factor = (count as f64 / max_pixels as f64).sqrt();
        scale *= factor.max(1.0 + 1e-9);
    }
}

/// Per-pixel median over a stack of rasters, ignoring NaN samples
pub fn median_composite(stack: &[&[f64]]) -> Vec<f64> {
    let len = stack.first().map(|s| s.len()).unwrap_or(0);
    let median_at = |i: usize| {
        let mut values: Vec<f64> = stack.iter().map(|s| s[i]).filter(|v| v.is_finite()).collect();
        if values.is_empty() {
            return f64::NAN;
        }
        values.sort_by(|a, b| a.total_cmp(b));
        let mid = values.len() / 2;
        if values.len() % 2 == 0 {
            (values[mid - 1] + values[mid]) / 2.0
        } else {
            values[mid]
        }
    };

    #[cfg(feature = "rayon")]
    let composite = (0..len).into_par_iter().map(median_at).collect();
    #[cfg(not(feature = "rayon"))]
    let composite = (0..len).map(median_at).collect();

    composite
}

/// Reduces the vegetated area of a catalog collection over an AOI
pub struct SatelliteAreaReducer<'a> {
    catalog: &'a dyn ImageCatalog,
    collection: Collection,
}

impl<'a> SatelliteAreaReducer<'a> {
    pub fn new(catalog: &'a dyn ImageCatalog, collection: Collection) -> Self {
        SatelliteAreaReducer {
            catalog,
            collection,
        }
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    /// Vegetated area (NDVI > threshold) of the median composite over `window`
    pub fn reduce(
        &self,
        aoi: &AreaOfInterest,
        window: &TimeWindow,
        options: &ReduceOptions,
    ) -> AnalysisResult<SatelliteReduction> {
        let query = SceneQuery {
            collection: self.collection,
            aoi: aoi.clone(),
            window: *window,
            max_cloud_pct: options.max_cloud_pct,
        };
        let scenes = self.catalog.search(&query)?;
        if scenes.is_empty() {
            info!(
                "No {} images for {} below {}% cloud, returning empty result",
                self.collection.id,
                window.label(),
                options.max_cloud_pct
            );
            return Ok(SatelliteReduction::empty());
        }
        info!(
            "Compositing {} {} images for {}",
            scenes.len(),
            self.collection.id,
            window.label()
        );

        let max_pixels = options.pixel_budget(scenes.len());
        let (grid, scale_m, pixel_cap_hit) =
            composite_grid(&aoi.bbox(), self.collection.resolution_m, max_pixels);
        if pixel_cap_hit {
            warn!(
                "Pixel cap {} for {} scenes exceeded, reducing at {:.1} m instead of {} m",
                max_pixels,
                scenes.len(),
                scale_m,
                self.collection.resolution_m
            );
        }
        debug!("Composite grid {}x{}", grid.width, grid.height);

        let mut nir_bands = Vec::with_capacity(scenes.len());
        let mut red_bands = Vec::with_capacity(scenes.len());
        for scene in &scenes {
            let pair = self.catalog.read_bands(&self.collection, scene, &grid)?;
            nir_bands.push(pair.nir.data);
            red_bands.push(pair.red.data);
        }

        let median = |bands: Vec<Vec<f64>>| {
            let stack: Vec<&[f64]> = bands.iter().map(Vec::as_slice).collect();
            Grid::new(grid.width, grid.height, grid.transform, median_composite(&stack))
        };
        let composite =
            BandPair::new(median(nir_bands)?, median(red_bands)?, Some(grid.crs.clone()))?;

        let mut ndvi = vegetation::compute(&composite);
        drop(composite);
        let inside =
            mask::pixel_centers_inside(grid.width, grid.height, &grid.transform, aoi.geometry());
        for (value, inside) in ndvi.data.iter_mut().zip(&inside) {
            if !inside {
                *value = NODATA;
            }
        }

        let vegetation_mask = vegetation::classify(&ndvi, options.threshold);
        let area_m2: f64 = (0..grid.height)
            .map(|row| {
                let vegetated = vegetation_mask.data[row * grid.width..][..grid.width]
                    .iter()
                    .filter(|v| **v)
                    .count();
                vegetated as f64 * grid.transform.geographic_pixel_area(row)
            })
            .sum();

        let histogram = options
            .return_histogram
            .then(|| Histogram::from_index(&ndvi, options.histogram_bins));

        let tile = if options.return_visualization {
            self.tile(aoi, window, options)
        } else {
            None
        };

        Ok(SatelliteReduction {
            area_m2,
            area_ha: area_m2 / 10_000.0,
            image_count: scenes.len(),
            data_available: true,
            ndvi: Some(ndvi),
            tile,
            histogram,
            pixel_cap_hit,
            scale_m,
        })
    }

    /// Visualization failures never affect the area result
    fn tile(
        &self,
        aoi: &AreaOfInterest,
        window: &TimeWindow,
        options: &ReduceOptions,
    ) -> Option<TileDescriptor> {
        let request = TileRequest {
            layer: TileLayer::Ndvi {
                collection: self.collection,
                window: *window,
            },
            bbox: aoi.bbox(),
            max_cloud_pct: options.max_cloud_pct,
            vis_params: VisParams::ndvi(),
        };
        match self.catalog.visualization_tile(&request) {
            Ok(tile) => tile,
            Err(e) => {
                warn!("NDVI tile for {} unavailable: {}", window.label(), e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::catalog::{InMemoryCatalog, InMemoryScene, SceneInfo};
    use crate::error::AnalysisError;
    use chrono::NaiveDate;

    const S2: &str = "COPERNICUS/S2_SR";

    fn aoi() -> AreaOfInterest {
        AreaOfInterest::from_geojson_str(
            r#"{"type":"Polygon","coordinates":[[
                [10.0,0.0],[10.01,0.0],[10.01,0.01],[10.0,0.01],[10.0,0.0]
            ]]}"#,
        )
        .unwrap()
    }

    fn vegetated_catalog() -> InMemoryCatalog {
        let catalog = InMemoryCatalog::new();
        catalog.add_scene(InMemoryScene::uniform(S2, "a", date(6, 1), 5.0, footprint(), 0.5, 0.1));
        catalog.add_scene(InMemoryScene::uniform(S2, "b", date(7, 1), 5.0, footprint(), 0.6, 0.1));
        catalog
    }

    /// Catalog whose tile renderer is down
    struct TileOutage(InMemoryCatalog);

    impl ImageCatalog for TileOutage {
        fn search(&self, query: &SceneQuery) -> AnalysisResult<Vec<SceneInfo>> {
            self.0.search(query)
        }

        fn read_bands(
            &self,
            collection: &Collection,
            scene: &SceneInfo,
            grid: &GridSpec,
        ) -> AnalysisResult<BandPair> {
            self.0.read_bands(collection, scene, grid)
        }

        fn visualization_tile(&self, _: &TileRequest) -> AnalysisResult<Option<TileDescriptor>> {
            Err(AnalysisError::Catalog("tile service returned 503".into()))
        }
    }

    fn footprint() -> BoundingBox {
        BoundingBox::new(9.9, -0.1, 10.1, 0.1)
    }

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    #[test]
    fn test_median_composite() {
        let a = [1.0, f64::NAN, 5.0];
        let b = [3.0, f64::NAN, 1.0];
        let c = [2.0, 4.0, f64::NAN];
        let out = median_composite(&[&a, &b, &c]);
        assert_eq!(out[0], 2.0);
        assert_eq!(out[1], 4.0);
        assert_eq!(out[2], 3.0);

        let none = median_composite(&[&[f64::NAN], &[f64::NAN]]);
        assert!(none[0].is_nan());
    }

    #[test]
    fn test_composite_grid_pixel_cap() {
        let bbox = BoundingBox::new(10.0, 0.0, 10.1, 0.1);
        let (grid, scale, hit) = composite_grid(&bbox, 10.0, 1_000_000_000);
        assert!(!hit);
        assert_eq!(scale, 10.0);
        assert_eq!(grid.height, 1114);

        let (capped, scale, hit) = composite_grid(&bbox, 10.0, 10_000);
        assert!(hit);
        assert!(scale > 10.0);
        assert!(capped.pixel_count() <= 10_000);
    }

    #[test]
    fn test_pixel_budget_scales_with_scene_count() {
        let options = ReduceOptions::default();
        // 2 GiB over (16 * 100 + 34) bytes per pixel
        assert_eq!(options.pixel_budget(100), 1_314_249);
        assert!(options.pixel_budget(1) < options.max_pixels);

        let loose = ReduceOptions {
            max_pixels: 1_000,
            ..ReduceOptions::default()
        };
        assert_eq!(loose.pixel_budget(100), 1_000);

        let starved = ReduceOptions {
            max_composite_bytes: 1,
            ..ReduceOptions::default()
        };
        assert_eq!(starved.pixel_budget(3), 1);
    }

    #[test]
    fn test_reduce_empty_window() {
        let catalog = InMemoryCatalog::new();
        let reducer = SatelliteAreaReducer::new(&catalog, Collection::from_id(S2).unwrap());
        let window = TimeWindow::from_year(2024).unwrap();
        let result = reducer.reduce(&aoi(), &window, &ReduceOptions::default()).unwrap();
        assert_eq!(result.area_ha, 0.0);
        assert!(!result.data_available);
        assert!(result.tile.is_none());
    }

    #[test]
    fn test_reduce_fully_vegetated() {
        let catalog = vegetated_catalog();
        // Cloud-contaminated scene is filtered out
        catalog.add_scene(InMemoryScene::uniform(S2, "c", date(8, 1), 80.0, footprint(), 0.1, 0.5));

        let reducer = SatelliteAreaReducer::new(&catalog, Collection::from_id(S2).unwrap());
        let window = TimeWindow::from_year(2024).unwrap();
        let result = reducer.reduce(&aoi(), &window, &ReduceOptions::default()).unwrap();

        assert_eq!(result.image_count, 2);
        assert!(result.data_available);
        // 0.01° x 0.01° at the equator is about 123.6 ha
        assert!((result.area_ha - 123.6).abs() < 3.0, "area {}", result.area_ha);
        let hist = result.histogram.unwrap();
        assert!(hist.total() > 0);
    }

    #[test]
    fn test_tile_failure_keeps_area() {
        let collection = Collection::from_id(S2).unwrap();
        let window = TimeWindow::from_year(2024).unwrap();
        let plain = vegetated_catalog();
        let without_tile = ReduceOptions {
            return_visualization: false,
            ..ReduceOptions::default()
        };
        let expected = SatelliteAreaReducer::new(&plain, collection)
            .reduce(&aoi(), &window, &without_tile)
            .unwrap();

        let outage = TileOutage(vegetated_catalog());
        let result = SatelliteAreaReducer::new(&outage, collection)
            .reduce(&aoi(), &window, &ReduceOptions::default())
            .unwrap();

        assert!(result.tile.is_none());
        assert!(result.data_available);
        assert_eq!(result.area_m2, expected.area_m2);
        assert_eq!(result.image_count, expected.image_count);
    }

    #[test]
    fn test_reduce_coarsens_past_pixel_cap() {
        let catalog = vegetated_catalog();
        let reducer = SatelliteAreaReducer::new(&catalog, Collection::from_id(S2).unwrap());
        let window = TimeWindow::from_year(2024).unwrap();
        let options = ReduceOptions {
            max_pixels: 1_000,
            ..ReduceOptions::default()
        };
        let result = reducer.reduce(&aoi(), &window, &options).unwrap();

        assert!(result.pixel_cap_hit);
        assert!(result.scale_m > 10.0, "scale {}", result.scale_m);
        let ndvi = result.ndvi.unwrap();
        assert!(ndvi.len() <= 1_000);
        // Coarser pixels still cover the same 0.01° square, within a pixel row
        assert!((result.area_ha - 123.6).abs() < 13.0, "area {}", result.area_ha);
    }

    #[test]
    fn test_reduce_bare_soil() {
        let catalog = InMemoryCatalog::new();
        catalog.add_scene(InMemoryScene::uniform(S2, "a", date(6, 1), 5.0, footprint(), 0.2, 0.15));
        let reducer = SatelliteAreaReducer::new(&catalog, Collection::from_id(S2).unwrap());
        let window = TimeWindow::from_year(2024).unwrap();
        let result = reducer.reduce(&aoi(), &window, &ReduceOptions::default()).unwrap();
        assert!(result.data_available);
        assert_eq!(result.area_ha, 0.0);
    }
}
