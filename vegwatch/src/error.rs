//! Error types for vegetation change analysis.

use thiserror::Error;

/// Result alias used throughout the pipeline
pub type AnalysisResult<T> = std::result::Result<T, AnalysisError>;

/// Errors raised while validating or running an analysis
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// Bad geometry, missing raster bands, unknown catalog id, bad window
    #[error("invalid input: {0}")]
    Input(String),

    #[error(
        "drone raster resolution {native_m} m is not finer than the target resolution {target_m} m"
    )]
    ResolutionMismatch { native_m: f64, target_m: f64 },

    #[error("georeference error: {0}")]
    Georeference(String),

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("job registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Raster I/O or numeric failure not covered above
    #[error("computation failed: {0}")]
    Computation(#[from] anyhow::Error),
}

impl AnalysisError {
    /// Whether this error, raised inside the drone step, may degrade to a
    /// partial drone result instead of failing the whole job
    pub fn is_drone_local(&self) -> bool {
        !matches!(self, AnalysisError::Registry(_))
    }

    /// Full cause chain, one cause per line
    pub fn trace(&self) -> String {
        error_chain(self)
    }
}

/// Errors returned by job registries
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("job {0} not found")]
    NotFound(String),

    #[error("job {0} already reached a terminal state")]
    AlreadyTerminal(String),

    #[error("job {0}: terminal states are set with a result or an error")]
    TerminalStatus(String),
}

/// Render an error and every `source()` below it
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut lines = vec![err.to_string()];
    let mut current = err.source();
    while let Some(cause) = current {
        lines.push(format!("caused by: {}", cause));
        current = cause.source();
    }
    lines.join("\n")
}
