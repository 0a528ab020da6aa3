//! Job registry for asynchronously executed analyses.
//!
//! The in-memory registry keeps every job for the lifetime of the process;
//! there is no eviction and nothing survives a restart.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::report::AnalysisReport;
use crate::error::RegistryError;

/// Opaque unique job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        JobId(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(JobId)
            .map_err(|_| RegistryError::NotFound(s.to_string()))
    }
}

/// Job status enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Failure recorded on a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub message: String,
    /// Cause chain, one cause per line
    pub trace: String,
}

/// Job metadata, result and error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub id: JobId,
    pub status: JobStatus,
    pub result: Option<AnalysisReport>,
    pub error: Option<JobError>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Storage of analysis jobs
pub trait JobRegistry: Send + Sync {
    /// Create a pending job and return its id
    fn create(&self) -> JobId;

    /// Move a job between non-terminal states
    fn set_status(&self, id: &JobId, status: JobStatus) -> Result<(), RegistryError>;

    /// Terminal write: completed with a report
    fn set_result(&self, id: &JobId, report: AnalysisReport) -> Result<(), RegistryError>;

    /// Terminal write: failed with an error
    fn set_error(&self, id: &JobId, error: JobError) -> Result<(), RegistryError>;

    fn get(&self, id: &JobId) -> Result<AnalysisJob, RegistryError>;
}

/// In-memory job registry.
#[derive(Clone, Default)]
pub struct InMemoryJobRegistry {
    jobs: Arc<RwLock<HashMap<JobId, AnalysisJob>>>,
}

impl InMemoryJobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    /// Apply `update` to a non-terminal job under the write lock
    fn update<F>(&self, id: &JobId, update: F) -> Result<(), RegistryError>
    where
        F: FnOnce(&mut AnalysisJob),
    {
        let mut jobs = self.jobs.write();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        if job.status.is_terminal() {
            return Err(RegistryError::AlreadyTerminal(id.to_string()));
        }
        update(job);
        Ok(())
    }
}

impl JobRegistry for InMemoryJobRegistry {
    fn create(&self) -> JobId {
        let id = JobId::new();
        let job = AnalysisJob {
            id,
            status: JobStatus::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.jobs.write().insert(id, job);
        id
    }

    fn set_status(&self, id: &JobId, status: JobStatus) -> Result<(), RegistryError> {
        if status.is_terminal() {
            return Err(RegistryError::TerminalStatus(id.to_string()));
        }
        self.update(id, |job| job.status = status)
    }

    fn set_result(&self, id: &JobId, report: AnalysisReport) -> Result<(), RegistryError> {
        self.update(id, |job| {
            job.status = JobStatus::Completed;
            job.result = Some(report);
            job.completed_at = Some(Utc::now());
        })
    }

    fn set_error(&self, id: &JobId, error: JobError) -> Result<(), RegistryError> {
        self.update(id, |job| {
            job.status = JobStatus::Failed;
            job.error = Some(error);
            job.completed_at = Some(Utc::now());
        })
    }

    fn get(&self, id: &JobId) -> Result<AnalysisJob, RegistryError> {
        self.jobs
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }
}
