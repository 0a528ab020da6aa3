//! File-based store of uploaded drone rasters.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::error::{AnalysisError, AnalysisResult};

/// One stored upload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadEntry {
    pub file_id: String,
    pub filename: String,
    pub size_mb: f64,
}

/// Directory of uploads named `<file_id>.<ext>`
#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        UploadStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of an upload: `<id>.tif` when present, else the first `<id>.*`
    pub fn resolve(&self, file_id: &str) -> AnalysisResult<PathBuf> {
        if file_id.is_empty() || file_id.contains(['/', '\\']) || file_id.starts_with('.') {
            return Err(AnalysisError::Input(format!("invalid file id '{}'", file_id)));
        }

        let tif = self.dir.join(format!("{}.tif", file_id));
        if tif.is_file() {
            return Ok(tif);
        }

        let mut candidates: Vec<PathBuf> = fs::read_dir(&self.dir)
            .into_iter()
            .flatten()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file() && path.file_stem().and_then(|s| s.to_str()) == Some(file_id)
            })
            .collect();
        candidates.sort();

        candidates
            .into_iter()
            .next()
            .ok_or_else(|| AnalysisError::Input(format!("drone file not found: {}", file_id)))
    }

    /// Remove an upload, returning the deleted path
    pub fn delete(&self, file_id: &str) -> AnalysisResult<PathBuf> {
        let path = self.resolve(file_id)?;
        fs::remove_file(&path)
            .with_context(|| format!("Failed to delete upload: {}", path.display()))?;
        Ok(path)
    }

    /// All uploads, sorted by file name
    pub fn list(&self) -> Result<Vec<UploadEntry>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read upload directory: {}", self.dir.display()))?
        {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let metadata = entry
                .metadata()
                .with_context(|| format!("Failed to stat {}", path.display()))?;
            let file_id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            entries.push(UploadEntry {
                file_id,
                filename: entry.file_name().to_string_lossy().into_owned(),
                size_mb: (metadata.len() as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0,
            });
        }
        entries.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(entries)
    }
}
