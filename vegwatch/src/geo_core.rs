use anyhow::{anyhow, Context, Result};
use geo::line_intersection::line_intersection;
use geo::{BoundingRect, Contains, Coord, Line, LineString, MapCoords, MultiPolygon, Point, Polygon};
use geojson::{GeoJson, Value};
use proj4rs::proj::Proj;
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;

/// EPSG code of the geographic CRS every area of interest is submitted in.
pub const WGS84_EPSG: u32 = 4326;

/// Coordinate reference system of a raster or geometry
/// Either a well-known EPSG code or a raw PROJ.4 definition string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Crs {
    Epsg(u32),
    Proj4(String),
}

impl Crs {
    pub fn wgs84() -> Self {
        Crs::Epsg(WGS84_EPSG)
    }

    /// True for projected (metric) systems, false for geographic or geocentric ones
    pub fn is_projected(&self) -> Result<bool, AnalysisError> {
        let proj = self.to_proj()?;
        Ok(!proj.is_latlong() && !proj.is_geocent())
    }

    /// Resolve the CRS into a projection
    /// EPSG codes are looked up in the EPSG registry bundled with proj4rs
    fn to_proj(&self) -> Result<Proj, AnalysisError> {
        match self {
            Crs::Proj4(def) => Proj::from_proj_string(def).map_err(|e| {
                AnalysisError::Georeference(format!("invalid CRS definition '{}': {:?}", def, e))
            }),
            Crs::Epsg(code) => u16::try_from(*code)
                .ok()
                .and_then(|c| Proj::from_epsg_code(c).ok())
                .ok_or_else(|| {
                    AnalysisError::Georeference(format!("EPSG:{} is not a supported CRS", code))
                }),
        }
    }
}

impl std::fmt::Display for Crs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Crs::Epsg(code) => write!(f, "EPSG:{}", code),
            Crs::Proj4(def) => write!(f, "{}", def),
        }
    }
}

/// Reusable point transformation between two CRS
/// Geographic coordinates are exchanged in degrees (lon, lat)
pub struct CoordTransformer {
    source: Proj,
    target: Proj,
}

impl CoordTransformer {
    pub fn new(from: &Crs, to: &Crs) -> Result<Self, AnalysisError> {
        Ok(CoordTransformer {
            source: from.to_proj()?,
            target: to.to_proj()?,
        })
    }

    /// Transform a single (x, y) pair
    pub fn transform(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        let mut point = if self.source.is_latlong() {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };

        proj4rs::transform::transform(&self.source, &self.target, &mut point)
            .map_err(|e| anyhow!("Failed to transform coordinates ({}, {}): {:?}", x, y, e))?;

        if self.target.is_latlong() {
            Ok((point.0.to_degrees(), point.1.to_degrees()))
        } else {
            Ok((point.0, point.1))
        }
    }
}

/// Bounding box structure
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64, // min longitude
    pub min_y: f64, // min latitude
    pub max_x: f64, // max longitude
    pub max_y: f64, // max latitude
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        BoundingBox {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Transform bounding box to another CRS
    /// The result is the envelope of the four transformed corners
    pub fn transform(&self, from: &Crs, to: &Crs) -> Result<Self> {
        let transformer = CoordTransformer::new(from, to)?;
        let corners = [
            (self.min_x, self.min_y),
            (self.min_x, self.max_y),
            (self.max_x, self.min_y),
            (self.max_x, self.max_y),
        ];

        let mut out = BoundingBox::new(f64::MAX, f64::MAX, f64::MIN, f64::MIN);
        for (x, y) in corners {
            let (tx, ty) = transformer.transform(x, y)?;
            out.min_x = out.min_x.min(tx);
            out.min_y = out.min_y.min(ty);
            out.max_x = out.max_x.max(tx);
            out.max_y = out.max_y.max(ty);
        }
        Ok(out)
    }
}

/// Polygon boundary over which vegetation statistics are computed
/// Always stored in geographic WGS84 (lon, lat); immutable once built
#[derive(Debug, Clone, PartialEq)]
pub struct AreaOfInterest {
    geometry: MultiPolygon<f64>,
}

impl AreaOfInterest {
    /// Build an AOI from already validated polygons
    pub fn new(geometry: MultiPolygon<f64>) -> Result<Self, AnalysisError> {
        if geometry.0.is_empty() {
            return Err(AnalysisError::Input("area of interest has no polygons".into()));
        }
        for polygon in &geometry.0 {
            check_ring(polygon.exterior())?;
            for interior in polygon.interiors() {
                check_ring(interior)?;
            }
        }
        Ok(AreaOfInterest { geometry })
    }

    /// Parse an AOI from a GeoJSON Geometry, Feature or FeatureCollection
    /// Only Polygon and MultiPolygon geometries are accepted; a collection
    /// contributes every polygonal feature it holds
    pub fn from_geojson(geojson: &GeoJson) -> Result<Self, AnalysisError> {
        let values: Vec<&Value> = match geojson {
            GeoJson::Geometry(g) => vec![&g.value],
            GeoJson::Feature(f) => f.geometry.iter().map(|g| &g.value).collect(),
            GeoJson::FeatureCollection(fc) => fc
                .features
                .iter()
                .filter_map(|f| f.geometry.as_ref())
                .map(|g| &g.value)
                .collect(),
        };

        let mut polygons = Vec::new();
        for value in values {
            match value {
                Value::Polygon(rings) => {
                    check_positions(rings)?;
                    polygons.push(polygon_from_value(value)?);
                }
                Value::MultiPolygon(parts) => {
                    for rings in parts {
                        check_positions(rings)?;
                    }
                    let mp = MultiPolygon::<f64>::try_from(value).map_err(|e| {
                        AnalysisError::Input(format!("invalid MultiPolygon: {}", e))
                    })?;
                    polygons.extend(mp.0);
                }
                other => {
                    return Err(AnalysisError::Input(format!(
                        "unsupported geometry type '{}', expected Polygon or MultiPolygon",
                        other.type_name()
                    )))
                }
            }
        }

        if polygons.is_empty() {
            return Err(AnalysisError::Input(
                "GeoJSON does not contain any polygon".into(),
            ));
        }
        AreaOfInterest::new(MultiPolygon::new(polygons))
    }

    /// Parse an AOI from a GeoJSON string
    pub fn from_geojson_str(s: &str) -> Result<Self, AnalysisError> {
        let geojson: GeoJson = s
            .parse()
            .map_err(|e| AnalysisError::Input(format!("invalid GeoJSON: {}", e)))?;
        Self::from_geojson(&geojson)
    }

    pub fn geometry(&self) -> &MultiPolygon<f64> {
        &self.geometry
    }

    /// Bounding box in WGS84 degrees
    pub fn bbox(&self) -> BoundingBox {
        // An AOI always holds at least one closed ring, so the rect exists
        let rect = self
            .geometry
            .bounding_rect()
            .unwrap_or_else(|| geo::Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 0.0, y: 0.0 }));
        BoundingBox::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
    }

    /// Whether a WGS84 point (lon, lat) lies inside the AOI
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        self.geometry.contains(&Point::new(lon, lat))
    }

    /// Reproject the AOI polygons into another CRS
    pub fn to_crs(&self, target: &Crs) -> Result<MultiPolygon<f64>, AnalysisError> {
        let transformer = CoordTransformer::new(&Crs::wgs84(), target)?;
        let projected = self
            .geometry
            .try_map_coords(|c| {
                transformer
                    .transform(c.x, c.y)
                    .map(|(x, y)| Coord { x, y })
            })
            .with_context(|| format!("Failed to reproject area of interest to {}", target))?;
        Ok(projected)
    }

    /// GeoJSON geometry value of the AOI, used when talking to remote catalogs
    pub fn to_geojson_value(&self) -> Value {
        if self.geometry.0.len() == 1 {
            Value::from(&self.geometry.0[0])
        } else {
            Value::from(&self.geometry)
        }
    }
}

fn polygon_from_value(value: &Value) -> Result<Polygon<f64>, AnalysisError> {
    Polygon::<f64>::try_from(value)
        .map_err(|e| AnalysisError::Input(format!("invalid Polygon: {}", e)))
}

/// Validate raw GeoJSON rings before geo closes them silently
fn check_positions(rings: &[Vec<Vec<f64>>]) -> Result<(), AnalysisError> {
    if rings.is_empty() {
        return Err(AnalysisError::Input("polygon has no rings".into()));
    }
    for ring in rings {
        if ring.len() < 4 {
            return Err(AnalysisError::Input(format!(
                "polygon ring has {} positions, at least 4 are required",
                ring.len()
            )));
        }
        if ring.first() != ring.last() {
            return Err(AnalysisError::Input("polygon ring is not closed".into()));
        }
        for position in ring {
            let (lon, lat) = match position.as_slice() {
                [lon, lat, ..] => (*lon, *lat),
                _ => return Err(AnalysisError::Input("position needs two coordinates".into())),
            };
            if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
                return Err(AnalysisError::Input(format!(
                    "position ({}, {}) is outside longitude/latitude range",
                    lon, lat
                )));
            }
        }
    }
    Ok(())
}

fn check_ring(ring: &LineString<f64>) -> Result<(), AnalysisError> {
    if ring.0.len() < 4 || !ring.is_closed() {
        return Err(AnalysisError::Input(
            "polygon ring must be closed with at least 4 positions".into(),
        ));
    }
    if ring_self_intersects(ring) {
        return Err(AnalysisError::Input("polygon ring is self-intersecting".into()));
    }
    Ok(())
}

/// O(n²) segment test; AOI rings are hand-drawn and small
fn ring_self_intersects(ring: &LineString<f64>) -> bool {
    let segments: Vec<Line<f64>> = ring.lines().collect();
    let n = segments.len();
    for i in 0..n {
        for j in (i + 1)..n {
            // Consecutive segments share an endpoint, as do the first and last
            let adjacent = j == i + 1 || (i == 0 && j == n - 1);
            if adjacent {
                continue;
            }
            if line_intersection(segments[i], segments[j]).is_some() {
                return true;
            }
        }
    }
    false
}
