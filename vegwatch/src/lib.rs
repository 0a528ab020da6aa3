pub mod analysis;
pub mod collect;
pub mod config;
pub mod error;
pub mod geo_core;
pub mod geometric;
pub mod raster;

pub use analysis::orchestrator::ChangeAnalysisOrchestrator;
pub use analysis::registry::{InMemoryJobRegistry, JobId, JobRegistry, JobStatus};
pub use analysis::report::AnalysisReport;
pub use analysis::request::{AnalysisRequest, DroneInput, RasterRef, TimeWindow};
pub use analysis::service::{JobHandle, JobService, JobView};
pub use config::PipelineConfig;
pub use error::{AnalysisError, AnalysisResult};
pub use geo_core::AreaOfInterest;
