//! Artifact scanner
//!
//! Lists the files a job left in its working directory and resolves
//! artifact paths requested over HTTP without letting them escape it.

use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;
use trk_common::{Error, Result};

use crate::models::Artifact;

/// Walks job work dirs
pub struct ArtifactScanner {
    ignore_patterns: Vec<String>,
}

impl Default for ArtifactScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl ArtifactScanner {
    /// Scanner that skips OS clutter files
    pub fn new() -> Self {
        Self {
            ignore_patterns: vec![".DS_Store".to_string(), "Thumbs.db".to_string()],
        }
    }

    /// List every regular file under `work_dir`, sorted by relative path
    ///
    /// Symlinks are not followed, so a job cannot publish files that live
    /// outside its own directory. Unreadable entries are skipped with a warning.
    pub fn scan(&self, job_id: &str, work_dir: &Path) -> Result<Vec<Artifact>> {
        if !work_dir.is_dir() {
            return Err(Error::not_found("work dir", work_dir.display()));
        }

        let mut artifacts = Vec::new();
        let walker = WalkDir::new(work_dir)
            .follow_links(false)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| !self.is_ignored(e.file_name().to_string_lossy().as_ref()));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(job_id = %job_id, "Error accessing artifact entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let rel_path = match entry.path().strip_prefix(work_dir) {
                Ok(rel) => to_slash_path(rel),
                Err(_) => continue,
            };
            let size_bytes = match entry.metadata() {
                Ok(meta) => meta.len(),
                Err(e) => {
                    tracing::warn!(job_id = %job_id, path = %rel_path, "Cannot stat artifact: {}", e);
                    continue;
                }
            };

            artifacts.push(Artifact {
                name: entry.file_name().to_string_lossy().into_owned(),
                uri: artifact_uri(job_id, &rel_path),
                rel_path,
                size_bytes,
            });
        }

        artifacts.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
        tracing::debug!(job_id = %job_id, count = artifacts.len(), "Artifacts scanned");
        Ok(artifacts)
    }

    fn is_ignored(&self, name: &str) -> bool {
        self.ignore_patterns.iter().any(|p| p == name)
    }
}

/// Where the host serves an artifact
pub fn artifact_uri(job_id: &str, rel_path: &str) -> String {
    format!("/api/jobs/{}/files/{}", job_id, rel_path)
}

fn to_slash_path(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Resolve a requested relative path to a file inside `work_dir`
///
/// Only plain path segments are accepted. The canonical result must still be
/// inside the canonical work dir, which also rules out symlinks pointing out.
pub fn resolve_artifact_path(work_dir: &Path, rel_path: &str) -> Result<PathBuf> {
    let rel = Path::new(rel_path);
    if rel_path.is_empty()
        || !rel
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(Error::InvalidInput(format!(
            "artifact path must be relative to the job dir: {}",
            rel_path
        )));
    }

    let root = work_dir.canonicalize()?;
    let candidate = root.join(rel);
    let resolved = match candidate.canonicalize() {
        Ok(path) => path,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::not_found("artifact", rel_path))
        }
        Err(e) => return Err(e.into()),
    };

    if !resolved.starts_with(&root) {
        return Err(Error::InvalidInput(format!(
            "artifact path escapes the job dir: {}",
            rel_path
        )));
    }
    if !resolved.is_file() {
        return Err(Error::not_found("artifact", rel_path));
    }
    Ok(resolved)
}
