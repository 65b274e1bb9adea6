use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use super::hasher::ComparisonId;
use super::store::{entry_state, Claim, DirClaimer, EntryState};
use crate::error::{PdfDiffError, Result};

/// One highlighted page inside a result entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultImage {
    pub page: usize,
    pub path: PathBuf,
}

/// Externally visible state of a comparison job
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    NotFound,
    Pending,
    Failed {
        error: String,
        failed_at: DateTime<Utc>,
    },
    Done {
        images: Vec<ResultImage>,
    },
}

/// Diff results keyed by comparison: `<root>/<docHash1>-<docHash2>/image-<n>.png`
#[derive(Debug, Clone)]
pub struct ResultStore {
    root: PathBuf,
    claimer: DirClaimer,
}

fn image_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^image-([0-9]+)\.png$").expect("Invalid image name regex"))
}

impl ResultStore {
    pub fn new(root: impl Into<PathBuf>, claimer: DirClaimer) -> Self {
        Self {
            root: root.into(),
            claimer,
        }
    }

    pub fn entry_dir(&self, id: &ComparisonId) -> PathBuf {
        self.root.join(id.to_string())
    }

    /// Output file for page `page` (1-based)
    pub fn image_path(dir: &Path, page: usize) -> PathBuf {
        dir.join(format!("image-{}.png", page))
    }

    /// Take ownership of the entry for `id`, or learn that it is already done
    pub async fn claim(&self, id: &ComparisonId, cancel: &CancellationToken) -> Result<Claim> {
        self.claimer.claim(&self.entry_dir(id), cancel).await
    }

    /// Report the job state without waiting on it
    pub fn status(&self, id: &ComparisonId) -> Result<JobStatus> {
        let dir = self.entry_dir(id);
        Ok(match entry_state(&dir) {
            EntryState::Missing => JobStatus::NotFound,
            EntryState::InProgress => JobStatus::Pending,
            EntryState::Abandoned(owner) => JobStatus::Failed {
                error: "interrupted before completion".to_string(),
                failed_at: owner.map(|o| o.started_at).unwrap_or_default(),
            },
            EntryState::Failed(record) => JobStatus::Failed {
                error: record.error,
                failed_at: record.failed_at,
            },
            EntryState::Ready => JobStatus::Done {
                images: Self::list_images(&dir)?,
            },
        })
    }

    /// Highlighted pages in page order
    pub fn list_images(dir: &Path) -> Result<Vec<ResultImage>> {
        let mut images = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| {
                PdfDiffError::Io(e.into_io_error().unwrap_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::Other, "directory walk failed")
                }))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            let Some(page) = image_name_regex()
                .captures(&name)
                .and_then(|caps| caps[1].parse::<usize>().ok())
            else {
                continue;
            };
            images.push(ResultImage {
                page,
                path: entry.path().to_path_buf(),
            });
        }
        images.sort_by_key(|image| image.page);
        Ok(images)
    }
}
