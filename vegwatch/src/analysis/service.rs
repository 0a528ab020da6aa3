//! Asynchronous job submission and polling.
//!
//! Each analysis runs on Tokio's blocking pool, off the request-handling path.

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::orchestrator::ChangeAnalysisOrchestrator;
use super::registry::{JobError, JobId, JobRegistry, JobStatus};
use super::report::AnalysisReport;
use super::request::{AnalysisRequest, RasterRef};
use crate::error::{AnalysisError, AnalysisResult};

/// What a caller observes when polling a job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobView {
    pub job_id: JobId,
    pub status: JobStatus,
    pub result: Option<AnalysisReport>,
    pub error: Option<JobError>,
}

/// Handle to a submitted job
pub struct JobHandle {
    pub job_id: JobId,
    task: JoinHandle<JobStatus>,
}

impl JobHandle {
    /// Wait for the job to reach its terminal state
    pub async fn wait(self) -> AnalysisResult<JobStatus> {
        self.task
            .await
            .map_err(|e| AnalysisError::Computation(anyhow::anyhow!("job task aborted: {}", e)))
    }
}

/// Submits analyses as background jobs and answers status polls
#[derive(Clone)]
pub struct JobService {
    orchestrator: Arc<ChangeAnalysisOrchestrator>,
    registry: Arc<dyn JobRegistry>,
}

impl JobService {
    pub fn new(
        orchestrator: Arc<ChangeAnalysisOrchestrator>,
        registry: Arc<dyn JobRegistry>,
    ) -> Self {
        JobService {
            orchestrator,
            registry,
        }
    }

    /// Validate a request and start it as a background job
    ///
    /// Input errors are returned before any job exists. Must be called from
    /// within a Tokio runtime.
    pub fn submit(&self, mut request: AnalysisRequest) -> AnalysisResult<JobHandle> {
        request.validate()?;
        self.orchestrator.config().validate()?;
        self.orchestrator.collections()?;

        // Pin uploads to a stable path before the job starts
        if let Some(drone) = request.drone.as_mut() {
            if let RasterRef::FileId(_) = drone.raster {
                let path = self.orchestrator.resolve_drone_path(drone)?;
                drone.raster = RasterRef::Path(path);
            }
        }

        let job_id = self.registry.create();
        info!(
            "Job {} submitted: {} -> {}",
            job_id,
            request.past.label(),
            request.present.label()
        );

        let orchestrator = Arc::clone(&self.orchestrator);
        let registry = Arc::clone(&self.registry);
        let task = tokio::task::spawn_blocking(move || {
            match orchestrator.run(registry.as_ref(), &job_id, &request) {
                Ok(status) => status,
                Err(e) => {
                    error!("Job {} could not be recorded: {}", job_id, e);
                    JobStatus::Failed
                }
            }
        });

        Ok(JobHandle { job_id, task })
    }

    /// Parse, validate and submit a JSON request
    pub fn submit_json(&self, json: &str) -> AnalysisResult<JobHandle> {
        self.submit(AnalysisRequest::from_json(json)?)
    }

    pub fn poll(&self, job_id: &JobId) -> AnalysisResult<JobView> {
        let job = self.registry.get(job_id)?;
        Ok(JobView {
            job_id: job.id,
            status: job.status,
            result: job.result,
            error: job.error,
        })
    }

    /// Poll with a textual job id, as received from a client
    pub fn poll_str(&self, job_id: &str) -> AnalysisResult<JobView> {
        self.poll(&job_id.parse()?)
    }
}
