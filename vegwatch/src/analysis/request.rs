//! Typed analysis requests, validated once at the boundary.

use std::path::PathBuf;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, AnalysisResult};
use crate::geo_core::AreaOfInterest;

/// Inclusive date range bounding a catalog query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TimeWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> AnalysisResult<Self> {
        if start > end {
            return Err(AnalysisError::Input(format!(
                "time window starts after it ends ({} > {})",
                start, end
            )));
        }
        Ok(TimeWindow { start, end })
    }

    /// `[year-01-01, year-12-31]`
    pub fn from_year(year: i32) -> AnalysisResult<Self> {
        let start = NaiveDate::from_ymd_opt(year, 1, 1)
            .ok_or_else(|| AnalysisError::Input(format!("invalid year {}", year)))?;
        let end = NaiveDate::from_ymd_opt(year, 12, 31)
            .ok_or_else(|| AnalysisError::Input(format!("invalid year {}", year)))?;
        Ok(TimeWindow { start, end })
    }

    /// The year when the window is exactly one calendar year
    pub fn calendar_year(&self) -> Option<i32> {
        let year = self.start.year();
        let is_full_year = self.start.month() == 1
            && self.start.day() == 1
            && self.end.year() == year
            && self.end.month() == 12
            && self.end.day() == 31;
        is_full_year.then_some(year)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn midpoint(&self) -> NaiveDate {
        self.start + (self.end - self.start) / 2
    }

    /// Year label used in reports: the calendar year, or `start/end`
    pub fn label(&self) -> String {
        match self.calendar_year() {
            Some(year) => year.to_string(),
            None => format!("{}/{}", self.start, self.end),
        }
    }

    /// Years elapsed between two windows
    /// Whole calendar years subtract directly; other windows compare midpoints
    pub fn elapsed_years(past: &TimeWindow, present: &TimeWindow) -> f64 {
        match (past.calendar_year(), present.calendar_year()) {
            (Some(p), Some(q)) => (q - p) as f64,
            _ => (present.midpoint() - past.midpoint()).num_days() as f64 / 365.25,
        }
    }
}

/// A window given either as a year or as explicit bounds
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum WindowInput {
    Year(i32),
    Range { start: NaiveDate, end: NaiveDate },
}

impl WindowInput {
    fn into_window(self) -> AnalysisResult<TimeWindow> {
        match self {
            WindowInput::Year(year) => TimeWindow::from_year(year),
            WindowInput::Range { start, end } => TimeWindow::new(start, end),
        }
    }
}

/// Where the drone orthomosaic lives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RasterRef {
    /// Direct path readable by the raster source
    Path(PathBuf),
    /// Identifier of a previously uploaded file
    FileId(String),
}

/// Optional drone corroboration input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroneInput {
    pub raster: RasterRef,
    /// 0-based band indices; configuration defaults apply when absent
    #[serde(default)]
    pub red_band: Option<usize>,
    #[serde(default)]
    pub nir_band: Option<usize>,
    /// Years between the present satellite window and the drone capture
    pub years_since_present: f64,
}

/// A complete vegetation change analysis request
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
    pub aoi: AreaOfInterest,
    pub past: TimeWindow,
    pub present: TimeWindow,
    /// Overrides the configured NDVI threshold
    pub threshold: Option<f64>,
    pub drone: Option<DroneInput>,
}

#[derive(Debug, Deserialize)]
struct RawRequest {
    #[serde(alias = "geometry")]
    aoi: serde_json::Value,
    #[serde(alias = "past_year")]
    past: WindowInput,
    #[serde(alias = "present_year")]
    present: WindowInput,
    #[serde(default)]
    threshold: Option<f64>,
    #[serde(default)]
    drone: Option<DroneInput>,
}

impl AnalysisRequest {
    pub fn new(aoi: AreaOfInterest, past: TimeWindow, present: TimeWindow) -> Self {
        AnalysisRequest {
            aoi,
            past,
            present,
            threshold: None,
            drone: None,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn with_drone(mut self, drone: DroneInput) -> Self {
        self.drone = Some(drone);
        self
    }

    /// Parse and validate a JSON request
    ///
    /// ```json
    /// {"aoi": {"type": "Polygon", ...}, "past": 2016, "present": 2024,
    ///  "drone": {"raster": {"file_id": "abc"}, "years_since_present": 1.0}}
    /// ```
    pub fn from_json(json: &str) -> AnalysisResult<Self> {
        let raw: RawRequest = serde_json::from_str(json)
            .map_err(|e| AnalysisError::Input(format!("malformed request: {}", e)))?;
        let geojson = geojson::GeoJson::from_json_value(raw.aoi)
            .map_err(|e| AnalysisError::Input(format!("invalid GeoJSON: {}", e)))?;

        let request = AnalysisRequest {
            aoi: AreaOfInterest::from_geojson(&geojson)?,
            past: raw.past.into_window()?,
            present: raw.present.into_window()?,
            threshold: raw.threshold,
            drone: raw.drone,
        };
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> AnalysisResult<()> {
        if self.present.start < self.past.start {
            return Err(AnalysisError::Input(format!(
                "present window {} starts before past window {}",
                self.present.label(),
                self.past.label()
            )));
        }
        if let Some(t) = self.threshold {
            if !(-1.0..=1.0).contains(&t) {
                return Err(AnalysisError::Input(format!("threshold {} is outside [-1, 1]", t)));
            }
        }
        if let Some(drone) = &self.drone {
            if !drone.years_since_present.is_finite() || drone.years_since_present < 0.0 {
                return Err(AnalysisError::Input(format!(
                    "years_since_present must be a non-negative number, got {}",
                    drone.years_since_present
                )));
            }
            if let (Some(r), Some(n)) = (drone.red_band, drone.nir_band) {
                if r == n {
                    return Err(AnalysisError::Input(
                        "red and NIR bands must be different".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn elapsed_years(&self) -> f64 {
        TimeWindow::elapsed_years(&self.past, &self.present)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AOI: &str = r#"{"type":"Polygon","coordinates":[[
        [10.0,50.0],[10.01,50.0],[10.01,50.01],[10.0,50.01],[10.0,50.0]
    ]]}"#;

    #[test]
    fn test_year_window() {
        let w = TimeWindow::from_year(2016).unwrap();
        assert_eq!(w.start, NaiveDate::from_ymd_opt(2016, 1, 1).unwrap());
        assert_eq!(w.end, NaiveDate::from_ymd_opt(2016, 12, 31).unwrap());
        assert_eq!(w.calendar_year(), Some(2016));
        assert_eq!(w.label(), "2016");
    }

    #[test]
    fn test_elapsed_years() {
        let past = TimeWindow::from_year(2016).unwrap();
        let present = TimeWindow::from_year(2024).unwrap();
        assert_eq!(TimeWindow::elapsed_years(&past, &present), 8.0);

        let summer = TimeWindow::new(
            NaiveDate::from_ymd_opt(2020, 6, 1).unwrap(),
            NaiveDate::from_ymd_opt(2020, 8, 31).unwrap(),
        )
        .unwrap();
        let next_summer = TimeWindow::new(
            NaiveDate::from_ymd_opt(2022, 6, 1).unwrap(),
            NaiveDate::from_ymd_opt(2022, 8, 31).unwrap(),
        )
        .unwrap();
        let years = TimeWindow::elapsed_years(&summer, &next_summer);
        assert!((years - 2.0).abs() < 0.01);
    }

    #[test]
    fn test_from_json_with_years() {
        let json = format!(r#"{{"geometry":{},"past_year":2016,"present_year":2024}}"#, AOI);
        let request = AnalysisRequest::from_json(&json).unwrap();
        assert_eq!(request.past.calendar_year(), Some(2016));
        assert_eq!(request.elapsed_years(), 8.0);
        assert!(request.drone.is_none());
    }

    #[test]
    fn test_from_json_with_ranges_and_drone() {
        let json = format!(
            r#"{{"aoi":{},"past":{{"start":"2018-05-01","end":"2018-09-30"}},
                "present":{{"start":"2023-05-01","end":"2023-09-30"}},
                "threshold":0.15,
                "drone":{{"raster":{{"file_id":"plot-7"}},"years_since_present":0.5}}}}"#,
            AOI
        );
        let request = AnalysisRequest::from_json(&json).unwrap();
        assert_eq!(request.threshold, Some(0.15));
        let drone = request.drone.unwrap();
        assert_eq!(drone.raster, RasterRef::FileId("plot-7".into()));
        assert_eq!(drone.years_since_present, 0.5);
        assert_eq!(drone.nir_band, None);
    }

    #[test]
    fn test_drone_requires_elapsed_time() {
        let json = format!(
            r#"{{"aoi":{},"past":2016,"present":2024,"drone":{{"raster":{{"path":"a.tif"}}}}}}"#,
            AOI
        );
        assert!(matches!(
            AnalysisRequest::from_json(&json),
            Err(AnalysisError::Input(_))
        ));
    }

    #[test]
    fn test_rejects_reversed_windows() {
        let json = format!(r#"{{"aoi":{},"past":2024,"present":2016}}"#, AOI);
        assert!(matches!(
            AnalysisRequest::from_json(&json),
            Err(AnalysisError::Input(_))
        ));
    }
}
