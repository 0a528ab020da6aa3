//! Pipeline configuration file support.
//!
//! Settings are read from a TOML file named by `VEGWATCH_CONFIG`, with a
//! few environment overrides on top. Missing keys take their defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::AnalysisError;

/// Environment variable holding the path of a TOML configuration file
pub const CONFIG_ENV: &str = "VEGWATCH_CONFIG";
pub const THRESHOLD_ENV: &str = "VEGWATCH_THRESHOLD";
pub const MAX_CLOUD_ENV: &str = "VEGWATCH_MAX_CLOUD_PCT";
pub const STAC_URL_ENV: &str = "VEGWATCH_STAC_URL";

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub satellite: SatelliteSettings,
    #[serde(default)]
    pub drone: DroneSettings,
    #[serde(default)]
    pub catalog: CatalogSettings,
    #[serde(default)]
    pub uploads: UploadSettings,
}

/// Satellite reducer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SatelliteSettings {
    /// Catalog identifier, e.g. `COPERNICUS/S2_SR`
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Collection used for the past window when it differs (e.g. Landsat before 2017)
    #[serde(default)]
    pub past_collection: Option<String>,
    /// NDVI threshold above which a pixel counts as vegetated
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_max_cloud_pct")]
    pub max_cloud_pct: f64,
    /// Hard cap on pixels processed by one region reduction
    #[serde(default = "default_max_pixels")]
    pub max_pixels: u64,
    /// Memory budget of one reduction: every scene's NIR and Red samples
    /// plus the composite, in bytes
    #[serde(default = "default_max_composite_bytes")]
    pub max_composite_bytes: u64,
    #[serde(default = "default_true")]
    pub return_visualization: bool,
    #[serde(default = "default_true")]
    pub return_histogram: bool,
    #[serde(default = "default_histogram_bins")]
    pub histogram_bins: usize,
}

/// Drone processor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroneSettings {
    /// Ground sample distance the drone NDVI is downscaled to
    #[serde(default = "default_target_resolution")]
    pub target_resolution_m: f64,
    #[serde(default)]
    pub red_band: usize,
    #[serde(default = "default_nir_band")]
    pub nir_band: usize,
}

/// Remote catalog settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogSettings {
    #[serde(default = "default_stac_url")]
    pub stac_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_items")]
    pub max_items: usize,
}

/// Upload store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadSettings {
    #[serde(default = "default_upload_dir")]
    pub dir: PathBuf,
}

fn default_collection() -> String {
    "COPERNICUS/S2_SR".to_string()
}

fn default_threshold() -> f64 {
    0.4
}

fn default_max_cloud_pct() -> f64 {
    40.0
}

fn default_max_pixels() -> u64 {
    1_000_000_000
}

fn default_max_composite_bytes() -> u64 {
    2 * 1024 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

fn default_histogram_bins() -> usize {
    20
}

fn default_target_resolution() -> f64 {
    10.0
}

fn default_nir_band() -> usize {
    3
}

fn default_stac_url() -> String {
    "https://earth-search.aws.element84.com/v1".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_items() -> usize {
    100
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("data/uploads")
}

impl Default for SatelliteSettings {
    fn default() -> Self {
        Self {
            collection: default_collection(),
            past_collection: None,
            threshold: default_threshold(),
            max_cloud_pct: default_max_cloud_pct(),
            max_pixels: default_max_pixels(),
            max_composite_bytes: default_max_composite_bytes(),
            return_visualization: true,
            return_histogram: true,
            histogram_bins: default_histogram_bins(),
        }
    }
}

impl Default for DroneSettings {
    fn default() -> Self {
        Self {
            target_resolution_m: default_target_resolution(),
            red_band: 0,
            nir_band: default_nir_band(),
        }
    }
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            stac_url: default_stac_url(),
            timeout_secs: default_timeout_secs(),
            max_items: default_max_items(),
        }
    }
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            dir: default_upload_dir(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML file; missing keys take their defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Configuration from `VEGWATCH_CONFIG` (or defaults), then environment overrides
    pub fn from_env_or_default() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.is_empty() => Self::load(path)?,
            _ => Self::default(),
        };

        if let Ok(value) = std::env::var(THRESHOLD_ENV) {
            config.satellite.threshold = value
                .parse()
                .with_context(|| format!("{} is not a number: {}", THRESHOLD_ENV, value))?;
        }
        if let Ok(value) = std::env::var(MAX_CLOUD_ENV) {
            config.satellite.max_cloud_pct = value
                .parse()
                .with_context(|| format!("{} is not a number: {}", MAX_CLOUD_ENV, value))?;
        }
        if let Ok(value) = std::env::var(STAC_URL_ENV) {
            config.catalog.stac_url = value;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), AnalysisError> {
        let s = &self.satellite;
        if !(-1.0..=1.0).contains(&s.threshold) {
            return Err(AnalysisError::Input(format!(
                "threshold {} is outside [-1, 1]",
                s.threshold
            )));
        }
        if !(s.max_cloud_pct > 0.0 && s.max_cloud_pct <= 100.0) {
            return Err(AnalysisError::Input(format!(
                "max_cloud_pct {} is outside (0, 100]",
                s.max_cloud_pct
            )));
        }
        if s.max_pixels == 0 {
            return Err(AnalysisError::Input("max_pixels must be positive".into()));
        }
        if s.max_composite_bytes == 0 {
            return Err(AnalysisError::Input(
                "max_composite_bytes must be positive".into(),
            ));
        }
        if s.histogram_bins == 0 {
            return Err(AnalysisError::Input("histogram_bins must be positive".into()));
        }
        if !(self.drone.target_resolution_m > 0.0) {
            return Err(AnalysisError::Input(format!(
                "target_resolution_m {} must be positive",
                self.drone.target_resolution_m
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.satellite.collection, "COPERNICUS/S2_SR");
        assert_eq!(config.satellite.threshold, 0.4);
        assert_eq!(config.satellite.max_cloud_pct, 40.0);
        assert_eq!(config.drone.target_resolution_m, 10.0);
        assert_eq!(config.drone.nir_band, 3);
        assert_eq!(config.satellite.max_composite_bytes, 2_147_483_648);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [satellite]
            threshold = 0.15
            past_collection = "LANDSAT/LC08/C02/T1_L2"

            [drone]
            target_resolution_m = 30.0
            "#,
        )
        .unwrap();
        assert_eq!(config.satellite.threshold, 0.15);
        assert_eq!(config.satellite.max_cloud_pct, 40.0);
        assert_eq!(
            config.satellite.past_collection.as_deref(),
            Some("LANDSAT/LC08/C02/T1_L2")
        );
        assert_eq!(config.drone.target_resolution_m, 30.0);
        assert_eq!(config.catalog.max_items, 100);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[uploads]\ndir = \"/tmp/drone\"").unwrap();
        let config = PipelineConfig::load(file.path()).unwrap();
        assert_eq!(config.uploads.dir, PathBuf::from("/tmp/drone"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = PipelineConfig::default();
        config.satellite.threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.satellite.max_cloud_pct = 0.0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.satellite.max_composite_bytes = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.drone.target_resolution_m = -10.0;
        assert!(config.validate().is_err());
    }
}
