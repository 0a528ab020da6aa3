//! STAC search API used as the remote image catalog.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::catalog::{BandScaling, Collection, GridSpec, ImageCatalog, SceneInfo, SceneQuery};
use crate::config::CatalogSettings;
use crate::error::{AnalysisError, AnalysisResult};
use crate::raster::BandPair;

/// Catalog client for a STAC API (`POST {base}/search`)
pub struct StacCatalog {
    client: Client,
    base_url: String,
    max_items: usize,
}

impl StacCatalog {
    pub fn new(settings: &CatalogSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(StacCatalog {
            client,
            base_url: settings.stac_url.trim_end_matches('/').to_string(),
            max_items: settings.max_items,
        })
    }

    fn search_body(&self, query: &SceneQuery) -> Value {
        let geometry = geojson::Geometry::new(query.aoi.to_geojson_value());
        json!({
            "collections": [query.collection.stac_collection],
            "intersects": serde_json::to_value(&geometry).unwrap_or(Value::Null),
            "datetime": format!(
                "{}T00:00:00Z/{}T23:59:59Z",
                query.window.start, query.window.end
            ),
            "query": { "eo:cloud_cover": { "lt": query.max_cloud_pct } },
            "limit": self.max_items.min(100),
        })
    }

    fn post_search(&self, url: &str, body: &Value) -> Result<Value> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .with_context(|| format!("Failed to query STAC API: {}", url))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().unwrap_or_default();
            anyhow::bail!("STAC API returned error {}: {}", status, text);
        }

        response
            .json::<Value>()
            .context("Failed to parse STAC search response")
    }

    /// URL and body of the `next` link, when the server paginates with POST bodies
    ///
    /// A link flagged `merge: true` only carries the keys that change, so they
    /// are laid over the body of the previous request.
    fn next_page(page: &Value, previous: &Value) -> Option<(String, Value)> {
        let link = page
            .get("links")?
            .as_array()?
            .iter()
            .find(|link| link.get("rel").and_then(Value::as_str) == Some("next"))?;
        let href = link.get("href")?.as_str()?.to_string();
        let body = link.get("body")?;
        let merge = link.get("merge").and_then(Value::as_bool).unwrap_or(false);

        match (merge, previous, body) {
            (true, Value::Object(base), Value::Object(changes)) => {
                let mut merged = base.clone();
                for (key, value) in changes {
                    merged.insert(key.clone(), value.clone());
                }
                Some((href, Value::Object(merged)))
            }
            (_, _, Value::Null) => None,
            _ => Some((href, body.clone())),
        }
    }
}

/// `raster:bands` scale and offset declared on an asset, per the STAC raster extension
fn asset_scaling(asset: &Value) -> Option<BandScaling> {
    let band = asset.get("raster:bands")?.as_array()?.first()?;
    let scale = band.get("scale").and_then(Value::as_f64);
    let offset = band.get("offset").and_then(Value::as_f64);
    if scale.is_none() && offset.is_none() {
        return None;
    }
    Some(BandScaling {
        scale: scale.unwrap_or(1.0),
        offset: offset.unwrap_or(0.0),
    })
}

/// Convert one STAC item into a scene, keeping the strict cloud filter
/// even when the server ignores the `query` extension
pub fn scene_from_item(
    item: &Value,
    collection: &Collection,
    max_cloud_pct: f64,
) -> Option<SceneInfo> {
    let id = item.get("id")?.as_str()?.to_string();
    let properties = item.get("properties")?;
    let cloud_pct = properties
        .get("eo:cloud_cover")
        .and_then(Value::as_f64)
        .unwrap_or(100.0);
    if cloud_pct >= max_cloud_pct {
        return None;
    }

    let date = properties
        .get("datetime")
        .and_then(Value::as_str)
        .and_then(|s| s.get(..10))
        .and_then(|s| chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").ok());

    let asset = |key: &str| item.get("assets").and_then(|assets| assets.get(key));
    let href = |key: &str| {
        asset(key)
            .and_then(|a| a.get("href"))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    Some(SceneInfo {
        id,
        date,
        cloud_pct,
        nir_href: href(collection.stac_nir_asset),
        red_href: href(collection.stac_red_asset),
        nir_scaling: asset(collection.stac_nir_asset).and_then(asset_scaling),
        red_scaling: asset(collection.stac_red_asset).and_then(asset_scaling),
    })
}

impl ImageCatalog for StacCatalog {
    fn search(&self, query: &SceneQuery) -> AnalysisResult<Vec<SceneInfo>> {
        let mut url = format!("{}/search", self.base_url);
        let mut body = self.search_body(query);
        let mut scenes = Vec::new();

        loop {
            let page = self
                .post_search(&url, &body)
                .map_err(|e| AnalysisError::Catalog(format!("{:#}", e)))?;

            let features = page
                .get("features")
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    AnalysisError::Catalog("STAC response has no 'features' array".into())
                })?;
            debug!("STAC page returned {} items", features.len());

            scenes.extend(features.iter().filter_map(|item| {
                scene_from_item(item, &query.collection, query.max_cloud_pct)
            }));

            if scenes.len() >= self.max_items {
                scenes.truncate(self.max_items);
                break;
            }
            match Self::next_page(&page, &body) {
                Some((next_url, next_body)) => {
                    url = next_url;
                    body = next_body;
                }
                None => break,
            }
        }

        info!(
            "STAC search {} {}: {} scenes below {}% cloud",
            query.collection.stac_collection,
            query.window.label(),
            scenes.len(),
            query.max_cloud_pct
        );
        Ok(scenes)
    }

    #[cfg(feature = "gdal")]
    fn read_bands(
        &self,
        collection: &Collection,
        scene: &SceneInfo,
        grid: &GridSpec,
    ) -> AnalysisResult<BandPair> {
        use crate::raster::Grid;

        let nir_href = scene.nir_href.as_deref().ok_or_else(|| {
            AnalysisError::Catalog(format!("scene {} has no NIR asset", scene.id))
        })?;
        let red_href = scene.red_href.as_deref().ok_or_else(|| {
            AnalysisError::Catalog(format!("scene {} has no Red asset", scene.id))
        })?;

        let nir = warp::read_asset(nir_href, grid, scene.nir_scaling_for(collection))?;
        let red = warp::read_asset(red_href, grid, scene.red_scaling_for(collection))?;
        BandPair::new(
            Grid::new(grid.width, grid.height, grid.transform, nir)?,
            Grid::new(grid.width, grid.height, grid.transform, red)?,
            Some(grid.crs.clone()),
        )
    }

    #[cfg(not(feature = "gdal"))]
    fn read_bands(
        &self,
        _collection: &Collection,
        scene: &SceneInfo,
        _grid: &GridSpec,
    ) -> AnalysisResult<BandPair> {
        Err(AnalysisError::Catalog(format!(
            "reading pixels of scene {} requires the `gdal` feature",
            scene.id
        )))
    }
}

#[cfg(feature = "gdal")]
mod warp {
    use anyhow::Context;
    use gdal::spatial_ref::SpatialRef;
    use gdal::{Dataset, DriverManager};

    use crate::collect::catalog::{BandScaling, GridSpec};
    use crate::error::AnalysisResult;
    use crate::geo_core::Crs;

    /// Warp a remote asset onto the composite grid, as reflectance with NaN nodata
    pub(super) fn read_asset(
        href: &str,
        grid: &GridSpec,
        scaling: BandScaling,
    ) -> AnalysisResult<Vec<f64>> {
        let vsi = format!("/vsicurl/{}", href);
        let src = Dataset::open(&vsi).with_context(|| format!("Failed to open asset {}", href))?;
        let src_nodata = src.rasterband(1).ok().and_then(|b| b.no_data_value());

        let driver = DriverManager::get_driver_by_name("MEM").context("Failed to get MEM driver")?;
        let mut dst = driver
            .create_with_band_type::<f64, _>("", grid.width, grid.height, 1)
            .context("Failed to create in-memory warp target")?;
        dst.set_geo_transform(&grid.transform.0)
            .context("Failed to set geotransform")?;
        let srs = match &grid.crs {
            Crs::Epsg(code) => SpatialRef::from_epsg(*code),
            Crs::Proj4(def) => SpatialRef::from_proj4(def),
        }
        .context("Failed to build grid spatial reference")?;
        dst.set_spatial_ref(&srs).context("Failed to set spatial reference")?;

        {
            let mut band = dst.rasterband(1).context("Failed to get warp band")?;
            band.set_no_data_value(Some(f64::NAN))
                .context("Failed to set no data value")?;
            band.fill(f64::NAN, None).context("Failed to initialise warp band")?;
        }

        gdal::raster::reproject(&src, &dst)
            .with_context(|| format!("Failed to warp asset {}", href))?;

        let band = dst.rasterband(1).context("Failed to get warp band")?;
        let buffer = band
            .read_as::<f64>((0, 0), (grid.width, grid.height), (grid.width, grid.height), None)
            .context("Failed to read warped asset")?;

        let (_, data) = buffer.into_shape_and_vec();
        Ok(data
            .into_iter()
            .map(|dn| match src_nodata {
                Some(nd) if dn == nd => f64::NAN,
                _ if dn.is_nan() => f64::NAN,
                _ => scaling.apply(dn),
            })
            .collect())
    }
}
