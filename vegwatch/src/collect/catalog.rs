//! Remote multi-temporal image catalog abstraction.
//!
//! The catalog filters scenes and hands back their NIR/Red pixels sampled on
//! a requested grid; compositing and region reduction happen locally.

use chrono::NaiveDate;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::analysis::request::TimeWindow;
use crate::error::{AnalysisError, AnalysisResult};
use crate::geo_core::{AreaOfInterest, BoundingBox, Crs};
use crate::raster::{BandPair, GeoTransform, Grid};

/// Band layout and metadata of a supported image collection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Collection {
    pub id: &'static str,
    pub nir_band: &'static str,
    pub red_band: &'static str,
    /// Per-image cloud fraction property, in percent
    pub cloud_property: &'static str,
    pub resolution_m: f64,
    pub stac_collection: &'static str,
    pub stac_nir_asset: &'static str,
    pub stac_red_asset: &'static str,
    /// Digital number to surface reflectance: dn * scale + offset
    pub scale: f64,
    pub offset: f64,
}

const SENTINEL2: Collection = Collection {
    id: "COPERNICUS/S2_SR",
    nir_band: "B8",
    red_band: "B4",
    cloud_property: "CLOUDY_PIXEL_PERCENTAGE",
    resolution_m: 10.0,
    stac_collection: "sentinel-2-l2a",
    stac_nir_asset: "nir",
    stac_red_asset: "red",
    scale: 0.0001,
    offset: 0.0,
};

const LANDSAT_OLI: Collection = Collection {
    id: "LANDSAT/LC08/C02/T1_L2",
    nir_band: "SR_B5",
    red_band: "SR_B4",
    cloud_property: "CLOUD_COVER",
    resolution_m: 30.0,
    stac_collection: "landsat-c2-l2",
    stac_nir_asset: "nir08",
    stac_red_asset: "red",
    scale: 0.0000275,
    offset: -0.2,
};

/// Linear transfer from stored digital numbers to surface reflectance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandScaling {
    pub scale: f64,
    pub offset: f64,
}

impl BandScaling {
    #[inline]
    pub fn apply(&self, dn: f64) -> f64 {
        dn * self.scale + self.offset
    }
}

impl Collection {
    /// Scaling used for scenes whose assets do not declare their own
    pub fn scaling(&self) -> BandScaling {
        BandScaling {
            scale: self.scale,
            offset: self.offset,
        }
    }

    /// Look up a collection by catalog identifier
    pub fn from_id(id: &str) -> AnalysisResult<Self> {
        match id {
            "COPERNICUS/S2_SR" => Ok(SENTINEL2),
            "COPERNICUS/S2_SR_HARMONIZED" => Ok(Collection {
                id: "COPERNICUS/S2_SR_HARMONIZED",
                ..SENTINEL2
            }),
            "LANDSAT/LC08/C02/T1_L2" => Ok(LANDSAT_OLI),
            "LANDSAT/LC09/C02/T1_L2" => Ok(Collection {
                id: "LANDSAT/LC09/C02/T1_L2",
                ..LANDSAT_OLI
            }),
            // Landsat 7 ETM+ numbers its bands one lower
            "LANDSAT/LE07/C02/T1_L2" => Ok(Collection {
                id: "LANDSAT/LE07/C02/T1_L2",
                nir_band: "SR_B4",
                red_band: "SR_B3",
                ..LANDSAT_OLI
            }),
            other => Err(AnalysisError::Input(format!(
                "unsupported catalog identifier '{}'",
                other
            ))),
        }
    }

    pub fn supported_ids() -> &'static [&'static str] {
        &[
            "COPERNICUS/S2_SR",
            "COPERNICUS/S2_SR_HARMONIZED",
            "LANDSAT/LC08/C02/T1_L2",
            "LANDSAT/LC09/C02/T1_L2",
            "LANDSAT/LE07/C02/T1_L2",
        ]
    }
}

/// Catalog filter: collection, AOI, time window and cloud cap
#[derive(Debug, Clone)]
pub struct SceneQuery {
    pub collection: Collection,
    pub aoi: AreaOfInterest,
    pub window: TimeWindow,
    /// Scenes must have a cloud fraction strictly below this percentage
    pub max_cloud_pct: f64,
}

/// One catalog scene that passed the filters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneInfo {
    pub id: String,
    pub date: Option<NaiveDate>,
    pub cloud_pct: f64,
    pub nir_href: Option<String>,
    pub red_href: Option<String>,
    /// Per-asset scaling declared by the catalog; collection default when absent
    #[serde(default)]
    pub nir_scaling: Option<BandScaling>,
    #[serde(default)]
    pub red_scaling: Option<BandScaling>,
}

impl SceneInfo {
    pub fn nir_scaling_for(&self, collection: &Collection) -> BandScaling {
        self.nir_scaling.unwrap_or_else(|| collection.scaling())
    }

    pub fn red_scaling_for(&self, collection: &Collection) -> BandScaling {
        self.red_scaling.unwrap_or_else(|| collection.scaling())
    }
}

/// Target grid on which scene pixels are sampled
#[derive(Debug, Clone, PartialEq)]
pub struct GridSpec {
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    pub crs: Crs,
}

impl GridSpec {
    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Colour ramp applied when rendering a layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisParams {
    pub min: f64,
    pub max: f64,
    pub palette: Vec<String>,
}

impl VisParams {
    /// NDVI: red (bare) to green (dense vegetation)
    pub fn ndvi() -> Self {
        VisParams {
            min: -0.2,
            max: 0.8,
            palette: vec!["red".into(), "yellow".into(), "green".into()],
        }
    }

    /// NDVI difference (present - past): loss in red, gain in green
    pub fn ndvi_difference() -> Self {
        VisParams {
            min: -0.5,
            max: 0.5,
            palette: ["#8e0000", "#ff4d4d", "#ffffff", "#7bed9f", "#1e8449"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }
}

/// Layer to render as map tiles
#[derive(Debug, Clone, PartialEq)]
pub enum TileLayer {
    Ndvi {
        collection: Collection,
        window: TimeWindow,
    },
    NdviDifference {
        past_collection: Collection,
        past: TimeWindow,
        present_collection: Collection,
        present: TimeWindow,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TileRequest {
    pub layer: TileLayer,
    pub bbox: BoundingBox,
    pub max_cloud_pct: f64,
    pub vis_params: VisParams,
}

/// Reference to a rendered tile layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileDescriptor {
    pub tile_url: String,
    pub vis_params: VisParams,
}

/// Remote image catalog
pub trait ImageCatalog: Send + Sync {
    /// Scenes intersecting the AOI, inside the window and below the cloud cap
    fn search(&self, query: &SceneQuery) -> AnalysisResult<Vec<SceneInfo>>;

    /// NIR and Red reflectance of one scene sampled on `grid`; pixels the
    /// scene does not cover are NaN
    fn read_bands(
        &self,
        collection: &Collection,
        scene: &SceneInfo,
        grid: &GridSpec,
    ) -> AnalysisResult<BandPair>;

    /// Tile layer for display, when the catalog can render one
    fn visualization_tile(&self, _request: &TileRequest) -> AnalysisResult<Option<TileDescriptor>> {
        Ok(None)
    }
}

/// Scene held by [`InMemoryCatalog`], with reflectance grids in EPSG:4326
#[derive(Debug, Clone)]
pub struct InMemoryScene {
    pub collection: String,
    pub info: SceneInfo,
    pub date: NaiveDate,
    pub footprint: BoundingBox,
    pub nir: Grid<f64>,
    pub red: Grid<f64>,
}

impl InMemoryScene {
    /// Scene with constant reflectance over its whole footprint
    pub fn uniform(
        collection: &str,
        id: &str,
        date: NaiveDate,
        cloud_pct: f64,
        footprint: BoundingBox,
        nir: f64,
        red: f64,
    ) -> Self {
        let transform = GeoTransform::north_up(
            footprint.min_x,
            footprint.max_y,
            footprint.width(),
            footprint.height(),
        );
        InMemoryScene {
            collection: collection.to_string(),
            info: SceneInfo {
                id: id.to_string(),
                date: Some(date),
                cloud_pct,
                nir_href: None,
                red_href: None,
                nir_scaling: None,
                red_scaling: None,
            },
            date,
            footprint,
            nir: Grid::filled(1, 1, transform, nir),
            red: Grid::filled(1, 1, transform, red),
        }
    }

    /// Nearest-neighbour sample at a WGS84 position
    fn sample(grid: &Grid<f64>, x: f64, y: f64) -> f64 {
        let (col, row) = grid.transform.invert(x, y);
        if col < 0.0 || row < 0.0 {
            return f64::NAN;
        }
        grid.get(col as usize, row as usize)
            .copied()
            .unwrap_or(f64::NAN)
    }
}

/// Catalog backed by scenes held in memory
#[derive(Default)]
pub struct InMemoryCatalog {
    scenes: RwLock<Vec<InMemoryScene>>,
    tile_template: Option<String>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render tiles as `<template>` with `{layer}` replaced by the layer name
    pub fn with_tile_template(mut self, template: &str) -> Self {
        self.tile_template = Some(template.to_string());
        self
    }

    pub fn add_scene(&self, scene: InMemoryScene) {
        self.scenes.write().push(scene);
    }

    pub fn len(&self) -> usize {
        self.scenes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.read().is_empty()
    }
}

fn intersects(a: &BoundingBox, b: &BoundingBox) -> bool {
    a.min_x <= b.max_x && b.min_x <= a.max_x && a.min_y <= b.max_y && b.min_y <= a.max_y
}

impl ImageCatalog for InMemoryCatalog {
    fn search(&self, query: &SceneQuery) -> AnalysisResult<Vec<SceneInfo>> {
        let aoi_bbox = query.aoi.bbox();
        Ok(self
            .scenes
            .read()
            .iter()
            .filter(|s| s.collection == query.collection.id)
            .filter(|s| query.window.contains(s.date))
            .filter(|s| s.info.cloud_pct < query.max_cloud_pct)
            .filter(|s| intersects(&s.footprint, &aoi_bbox))
            .map(|s| s.info.clone())
            .collect())
    }

    fn read_bands(
        &self,
        collection: &Collection,
        scene: &SceneInfo,
        grid: &GridSpec,
    ) -> AnalysisResult<BandPair> {
        let scenes = self.scenes.read();
        let stored = scenes
            .iter()
            .find(|s| s.collection == collection.id && s.info.id == scene.id)
            .ok_or_else(|| AnalysisError::Catalog(format!("unknown scene '{}'", scene.id)))?;

        let mut nir = Vec::with_capacity(grid.width * grid.height);
        let mut red = Vec::with_capacity(grid.width * grid.height);
        for row in 0..grid.height {
            for col in 0..grid.width {
                let (x, y) = grid.transform.pixel_center(col, row);
                nir.push(InMemoryScene::sample(&stored.nir, x, y));
                red.push(InMemoryScene::sample(&stored.red, x, y));
            }
        }

        BandPair::new(
            Grid::new(grid.width, grid.height, grid.transform, nir)?,
            Grid::new(grid.width, grid.height, grid.transform, red)?,
            Some(grid.crs.clone()),
        )
    }

    fn visualization_tile(&self, request: &TileRequest) -> AnalysisResult<Option<TileDescriptor>> {
        let Some(template) = &self.tile_template else {
            return Ok(None);
        };
        let layer = match &request.layer {
            TileLayer::Ndvi { window, .. } => format!("ndvi-{}", window.label()),
            TileLayer::NdviDifference { past, present, .. } => {
                format!("ndvi-diff-{}-{}", past.label(), present.label())
            }
        };
        Ok(Some(TileDescriptor {
            tile_url: template.replace("{layer}", &layer),
            vis_params: request.vis_params.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE: &str = r#"{"type":"Polygon","coordinates":[[
        [10.0,50.0],[10.01,50.0],[10.01,50.01],[10.0,50.01],[10.0,50.0]
    ]]}"#;

    fn aoi() -> AreaOfInterest {
        AreaOfInterest::from_geojson_str(SQUARE).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_collection_lookup() {
        let s2 = Collection::from_id("COPERNICUS/S2_SR").unwrap();
        assert_eq!((s2.nir_band, s2.red_band), ("B8", "B4"));
        assert_eq!(s2.cloud_property, "CLOUDY_PIXEL_PERCENTAGE");
        assert_eq!(s2.resolution_m, 10.0);

        let l7 = Collection::from_id("LANDSAT/LE07/C02/T1_L2").unwrap();
        assert_eq!((l7.nir_band, l7.red_band), ("SR_B4", "SR_B3"));
        assert_eq!(l7.resolution_m, 30.0);

        assert!(matches!(
            Collection::from_id("MODIS/006/MOD13Q1"),
            Err(AnalysisError::Input(_))
        ));
    }

    #[test]
    fn test_scene_scaling_falls_back_to_collection() {
        let landsat = Collection::from_id("LANDSAT/LC08/C02/T1_L2").unwrap();
        let mut scene = InMemoryScene::uniform(
            landsat.id,
            "lc08",
            date(2024, 6, 1),
            0.0,
            BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            0.5,
            0.1,
        )
        .info;
        assert_eq!(scene.nir_scaling_for(&landsat), landsat.scaling());
        assert!((landsat.scaling().apply(10_000.0) - 0.075).abs() < 1e-12);

        scene.red_scaling = Some(BandScaling {
            scale: 0.0001,
            offset: -0.1,
        });
        assert!((scene.red_scaling_for(&landsat).apply(2_000.0) - 0.1).abs() < 1e-12);
        assert_eq!(scene.nir_scaling_for(&landsat), landsat.scaling());
    }

    #[test]
    fn test_search_filters() {
        let catalog = InMemoryCatalog::new();
        let footprint = BoundingBox::new(9.9, 49.9, 10.1, 50.1);
        let far_away = BoundingBox::new(20.0, 40.0, 20.1, 40.1);
        let s2 = "COPERNICUS/S2_SR";
        let scenes = [
            ("ok", date(2024, 6, 1), 10.0, footprint),
            ("cloudy", date(2024, 6, 2), 40.0, footprint),
            ("old", date(2016, 6, 1), 5.0, footprint),
            ("far", date(2024, 6, 3), 5.0, far_away),
        ];
        for (id, day, cloud, bbox) in scenes {
            catalog.add_scene(InMemoryScene::uniform(s2, id, day, cloud, bbox, 0.5, 0.1));
        }
        catalog.add_scene(InMemoryScene::uniform(
            "LANDSAT/LC08/C02/T1_L2",
            "landsat",
            date(2024, 6, 4),
            5.0,
            footprint,
            0.5,
            0.1,
        ));

        let query = SceneQuery {
            collection: Collection::from_id(s2).unwrap(),
            aoi: aoi(),
            window: TimeWindow::from_year(2024).unwrap(),
            max_cloud_pct: 40.0,
        };
        let scenes = catalog.search(&query).unwrap();
        let ids: Vec<&str> = scenes.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["ok"]);
    }

    #[test]
    fn test_read_bands_outside_footprint_is_nan() {
        let catalog = InMemoryCatalog::new();
        let footprint = BoundingBox::new(10.0, 50.0, 10.005, 50.01);
        let s2 = "COPERNICUS/S2_SR";
        let scene = InMemoryScene::uniform(s2, "half", date(2024, 6, 1), 0.0, footprint, 0.5, 0.1);
        let info = scene.info.clone();
        catalog.add_scene(scene);

        let grid = GridSpec {
            width: 2,
            height: 1,
            transform: GeoTransform::north_up(10.0, 50.01, 0.005, 0.01),
            crs: Crs::wgs84(),
        };
        let collection = Collection::from_id("COPERNICUS/S2_SR").unwrap();
        let bands = catalog.read_bands(&collection, &info, &grid).unwrap();
        assert_eq!(bands.nir.data[0], 0.5);
        assert!(bands.nir.data[1].is_nan());
    }

    #[test]
    fn test_tiles() {
        let plain = InMemoryCatalog::new();
        let request = TileRequest {
            layer: TileLayer::Ndvi {
                collection: Collection::from_id("COPERNICUS/S2_SR").unwrap(),
                window: TimeWindow::from_year(2024).unwrap(),
            },
            bbox: aoi().bbox(),
            max_cloud_pct: 40.0,
            vis_params: VisParams::ndvi(),
        };
        assert_eq!(plain.visualization_tile(&request).unwrap(), None);

        let tiled =
            InMemoryCatalog::new().with_tile_template("https://tiles.test/{layer}/{z}/{x}/{y}.png");
        let tile = tiled.visualization_tile(&request).unwrap().unwrap();
        assert_eq!(tile.tile_url, "https://tiles.test/ndvi-2024/{z}/{x}/{y}.png");
        assert_eq!(tile.vis_params.palette.len(), 3);
    }
}
