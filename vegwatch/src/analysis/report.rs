//! Combined analysis report, serialized as the job result.

use serde::{Deserialize, Serialize};

use super::request::TimeWindow;
use crate::collect::catalog::TileDescriptor;
use crate::geometric::drone::DroneAnalysis;
use crate::geometric::satellite::SatelliteReduction;
use crate::geometric::vegetation::{annual_rate_pct, Histogram};

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// A window as shown in reports: a bare year or explicit bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WindowLabel {
    Year(i32),
    Range {
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },
}

impl From<&TimeWindow> for WindowLabel {
    fn from(window: &TimeWindow) -> Self {
        match window.calendar_year() {
            Some(year) => WindowLabel::Year(year),
            None => WindowLabel::Range {
                start: window.start,
                end: window.end,
            },
        }
    }
}

/// Past versus present satellite vegetation cover
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SatelliteComparison {
    pub past_year: WindowLabel,
    pub present_year: WindowLabel,
    pub past_cover_ha: f64,
    pub present_cover_ha: f64,
    pub change_ha: f64,
    pub deforestation_rate_pct_per_year: f64,
    pub past_data_available: bool,
    pub present_data_available: bool,
    pub past_image_count: usize,
    pub present_image_count: usize,
}

impl SatelliteComparison {
    pub fn new(
        past_window: &TimeWindow,
        present_window: &TimeWindow,
        past: &SatelliteReduction,
        present: &SatelliteReduction,
        years: f64,
    ) -> Self {
        SatelliteComparison {
            past_year: past_window.into(),
            present_year: present_window.into(),
            past_cover_ha: round2(past.area_ha),
            present_cover_ha: round2(present.area_ha),
            change_ha: round2(present.area_ha - past.area_ha),
            deforestation_rate_pct_per_year: round3(annual_rate_pct(
                past.area_ha,
                present.area_ha,
                years,
            )),
            past_data_available: past.data_available,
            present_data_available: present.data_available,
            past_image_count: past.image_count,
            present_image_count: present.image_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SatelliteCrossCheck {
    pub difference_from_present_satellite_ha: f64,
    pub recent_trend_rate_pct_per_year: f64,
}

/// Drone statistics at the satellite resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroneReport {
    pub vegetation_area_ha: f64,
    pub total_area_ha: f64,
    pub vegetation_percentage: f64,
    pub mean_ndvi: f64,
    pub std_ndvi: f64,
    pub original_resolution_m: f64,
    pub downscaled_resolution_m: f64,
    pub comparison_with_satellite: SatelliteCrossCheck,
}

impl DroneReport {
    /// `years_since_present` separates the present satellite window from the drone capture
    pub fn new(analysis: &DroneAnalysis, present_cover_ha: f64, years_since_present: f64) -> Self {
        let stats = &analysis.stats;
        DroneReport {
            vegetation_area_ha: round2(stats.vegetation_area_ha),
            total_area_ha: round2(stats.total_area_ha),
            vegetation_percentage: round2(stats.vegetation_percentage),
            mean_ndvi: round3(stats.mean_index),
            std_ndvi: round3(stats.std_index),
            original_resolution_m: analysis.original_resolution_m,
            downscaled_resolution_m: analysis.downscaled_resolution_m,
            comparison_with_satellite: SatelliteCrossCheck {
                difference_from_present_satellite_ha: round2(
                    stats.vegetation_area_ha - present_cover_ha,
                ),
                recent_trend_rate_pct_per_year: round3(annual_rate_pct(
                    present_cover_ha,
                    stats.vegetation_area_ha,
                    years_since_present,
                )),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroneFailure {
    pub status: String,
    pub error: String,
}

/// Drone block: statistics, or the reason the optional drone step failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DroneSection {
    Completed(DroneReport),
    Failed(DroneFailure),
}

impl DroneSection {
    pub fn failed(error: impl Into<String>) -> Self {
        DroneSection::Failed(DroneFailure {
            status: "failed".to_string(),
            error: error.into(),
        })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, DroneSection::Failed(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NdviTiles {
    pub past: Option<TileDescriptor>,
    pub present: Option<TileDescriptor>,
    pub diff: Option<TileDescriptor>,
}

impl NdviTiles {
    pub fn is_empty(&self) -> bool {
        self.past.is_none() && self.present.is_none() && self.diff.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// past - present; positive means vegetation was lost
    pub total_loss_ha: f64,
    pub total_loss_pct: f64,
    pub time_period_years: f64,
}

impl Summary {
    pub fn new(past_cover_ha: f64, present_cover_ha: f64, years: f64) -> Self {
        let loss = past_cover_ha - present_cover_ha;
        let loss_pct = if past_cover_ha > 0.0 {
            loss / past_cover_ha * 100.0
        } else {
            0.0
        };
        Summary {
            total_loss_ha: round2(loss),
            total_loss_pct: round2(loss_pct),
            time_period_years: round2(years),
        }
    }
}

/// Result of a completed analysis job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub satellite_comparison: SatelliteComparison,
    pub drone_data: Option<DroneSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ndvi_tiles: Option<NdviTiles>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ndvi_histogram: Option<Histogram>,
    pub summary: Summary,
}

impl AnalysisReport {
    /// Canned synthetic report for front-end testing without a catalog
    ///
    /// Derived figures go through the same rounding as a real analysis.
    pub fn demo() -> Self {
        let (past_ha, present_ha, years) = (120.5, 95.2, 8.0);
        let drone_ha = 92.8;
        AnalysisReport {
            satellite_comparison: SatelliteComparison {
                past_year: WindowLabel::Year(2016),
                present_year: WindowLabel::Year(2024),
                past_cover_ha: past_ha,
                present_cover_ha: present_ha,
                change_ha: round2(present_ha - past_ha),
                deforestation_rate_pct_per_year: round3(annual_rate_pct(
                    past_ha,
                    present_ha,
                    years,
                )),
                past_data_available: true,
                present_data_available: true,
                past_image_count: 14,
                present_image_count: 11,
            },
            drone_data: Some(DroneSection::Completed(DroneReport {
                vegetation_area_ha: drone_ha,
                total_area_ha: 130.0,
                vegetation_percentage: 71.4,
                mean_ndvi: 0.62,
                std_ndvi: 0.0,
                original_resolution_m: 0.05,
                downscaled_resolution_m: 10.0,
                comparison_with_satellite: SatelliteCrossCheck {
                    difference_from_present_satellite_ha: round2(drone_ha - present_ha),
                    recent_trend_rate_pct_per_year: round3(annual_rate_pct(
                        present_ha,
                        drone_ha,
                        1.0,
                    )),
                },
            })),
            ndvi_tiles: None,
            ndvi_histogram: None,
            summary: Summary::new(past_ha, present_ha, years),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
