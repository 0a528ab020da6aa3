//! End-to-end change analysis: past and present satellite reductions, the
//! optional drone corroboration, and the combined report.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};

use super::registry::{JobError, JobId, JobRegistry, JobStatus};
use super::report::{
    AnalysisReport, DroneReport, DroneSection, NdviTiles, SatelliteComparison, Summary,
};
use super::request::{AnalysisRequest, DroneInput, RasterRef};
use crate::collect::catalog::{
    Collection, ImageCatalog, TileDescriptor, TileLayer, TileRequest, VisParams,
};
use crate::collect::uploads::UploadStore;
use crate::config::PipelineConfig;
use crate::error::{AnalysisError, AnalysisResult, RegistryError};
use crate::geometric::drone::{DroneAnalysis, DroneRasterProcessor};
use crate::geometric::satellite::{ReduceOptions, SatelliteAreaReducer, SatelliteReduction};
use crate::raster::source::RasterSource;

/// Drives one analysis from request to report
pub struct ChangeAnalysisOrchestrator {
    catalog: Arc<dyn ImageCatalog>,
    rasters: Arc<dyn RasterSource>,
    uploads: UploadStore,
    config: PipelineConfig,
}

impl ChangeAnalysisOrchestrator {
    pub fn new(
        catalog: Arc<dyn ImageCatalog>,
        rasters: Arc<dyn RasterSource>,
        config: PipelineConfig,
    ) -> Self {
        let uploads = UploadStore::new(config.uploads.dir.clone());
        ChangeAnalysisOrchestrator {
            catalog,
            rasters,
            uploads,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn uploads(&self) -> &UploadStore {
        &self.uploads
    }

    /// Collections used for the past and present windows
    pub fn collections(&self) -> AnalysisResult<(Collection, Collection)> {
        let present = Collection::from_id(&self.config.satellite.collection)?;
        let past = match &self.config.satellite.past_collection {
            Some(id) => Collection::from_id(id)?,
            None => present,
        };
        Ok((past, present))
    }

    /// Filesystem path of the drone raster
    pub fn resolve_drone_path(&self, drone: &DroneInput) -> AnalysisResult<PathBuf> {
        match &drone.raster {
            RasterRef::Path(path) => Ok(path.clone()),
            RasterRef::FileId(id) => self.uploads.resolve(id),
        }
    }

    /// Run the full comparison without touching any job registry
    pub fn analyze(&self, request: &AnalysisRequest) -> AnalysisResult<AnalysisReport> {
        let (past_collection, present_collection) = self.collections()?;
        let mut options = ReduceOptions::from_settings(&self.config.satellite);
        if let Some(threshold) = request.threshold {
            options.threshold = threshold;
        }

        let past_reducer = SatelliteAreaReducer::new(self.catalog.as_ref(), past_collection);
        let present_reducer = SatelliteAreaReducer::new(self.catalog.as_ref(), present_collection);
        let reduce_past = || past_reducer.reduce(&request.aoi, &request.past, &options);
        let reduce_present = || present_reducer.reduce(&request.aoi, &request.present, &options);
        let run_drone = || {
            request
                .drone
                .as_ref()
                .map(|drone| self.process_drone(request, drone, options.threshold))
        };

        // No data dependency between the three steps; they join here
        #[cfg(feature = "rayon")]
        let ((past, present), drone) =
            rayon::join(|| rayon::join(reduce_past, reduce_present), run_drone);
        #[cfg(not(feature = "rayon"))]
        let ((past, present), drone) = ((reduce_past(), reduce_present()), run_drone());

        let past = past?;
        let present = present?;
        let years = request.elapsed_years();

        let drone_data = match drone {
            None => None,
            Some(Ok((analysis, drone_input))) => Some(DroneSection::Completed(DroneReport::new(
                &analysis,
                present.area_ha,
                drone_input.years_since_present,
            ))),
            Some(Err(e)) if e.is_drone_local() => {
                warn!("Drone step failed, continuing with satellite data only: {}", e);
                Some(DroneSection::failed(e.to_string()))
            }
            Some(Err(e)) => return Err(e),
        };

        let ndvi_tiles = if options.return_visualization {
            let tiles = NdviTiles {
                past: past.tile.clone(),
                present: present.tile.clone(),
                diff: self.difference_tile(request, &past, &present, &options),
            };
            (!tiles.is_empty()).then_some(tiles)
        } else {
            None
        };

        let satellite_comparison = SatelliteComparison::new(
            &request.past,
            &request.present,
            &past,
            &present,
            years,
        );
        info!(
            "Vegetation cover {} ha ({}) -> {} ha ({}), {} %/year",
            satellite_comparison.past_cover_ha,
            request.past.label(),
            satellite_comparison.present_cover_ha,
            request.present.label(),
            satellite_comparison.deforestation_rate_pct_per_year
        );

        Ok(AnalysisReport {
            satellite_comparison,
            drone_data,
            ndvi_tiles,
            ndvi_histogram: present.histogram.clone(),
            summary: Summary::new(past.area_ha, present.area_ha, years),
        })
    }

    fn process_drone<'r>(
        &self,
        request: &AnalysisRequest,
        drone: &'r DroneInput,
        threshold: f64,
    ) -> AnalysisResult<(DroneAnalysis, &'r DroneInput)> {
        let path = self.resolve_drone_path(drone)?;
        let processor =
            DroneRasterProcessor::new(self.rasters.as_ref(), self.config.drone.target_resolution_m);
        let analysis = processor.process(
            &path,
            &request.aoi,
            drone.red_band.unwrap_or(self.config.drone.red_band),
            drone.nir_band.unwrap_or(self.config.drone.nir_band),
            threshold,
        )?;
        Ok((analysis, drone))
    }

    fn difference_tile(
        &self,
        request: &AnalysisRequest,
        past: &SatelliteReduction,
        present: &SatelliteReduction,
        options: &ReduceOptions,
    ) -> Option<TileDescriptor> {
        if !past.data_available || !present.data_available {
            return None;
        }
        let (past_collection, present_collection) = self.collections().ok()?;
        let tile_request = TileRequest {
            layer: TileLayer::NdviDifference {
                past_collection,
                past: request.past,
                present_collection,
                present: request.present,
            },
            bbox: request.aoi.bbox(),
            max_cloud_pct: options.max_cloud_pct,
            vis_params: VisParams::ndvi_difference(),
        };
        match self.catalog.visualization_tile(&tile_request) {
            Ok(tile) => tile,
            Err(e) => {
                warn!("NDVI difference tile unavailable: {}", e);
                None
            }
        }
    }

    /// Drive a job to its terminal state
    ///
    /// Analysis errors and panics are recorded on the job; only registry
    /// misuse is returned to the caller.
    pub fn run(
        &self,
        registry: &dyn JobRegistry,
        job_id: &JobId,
        request: &AnalysisRequest,
    ) -> Result<JobStatus, RegistryError> {
        registry.set_status(job_id, JobStatus::Processing)?;
        info!("Job {} processing", job_id);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.analyze(request)));
        match outcome {
            Ok(Ok(report)) => {
                registry.set_result(job_id, report)?;
                info!("Job {} completed", job_id);
                Ok(JobStatus::Completed)
            }
            Ok(Err(e)) => {
                error!("Job {} failed: {}", job_id, e);
                registry.set_error(job_id, JobError::from(&e))?;
                Ok(JobStatus::Failed)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("Job {} panicked: {}", job_id, message);
                registry.set_error(
                    job_id,
                    JobError {
                        trace: format!("panic: {}", message),
                        message,
                    },
                )?;
                Ok(JobStatus::Failed)
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "analysis panicked".to_string()
    }
}

impl From<&AnalysisError> for JobError {
    fn from(e: &AnalysisError) -> Self {
        JobError {
            message: e.to_string(),
            trace: e.trace(),
        }
    }
}
