// src/core/engine.rs
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{PdfDiffError, Result};
use super::cache::{CachedDocument, RasterCache};
use super::differ::{DiffEngine, DimensionMismatch, HighlightColor, PageOutcome};
use super::hasher::{ComparisonId, ContentHash};
use super::pages::{PageEnumerator, PaddedIndexScan};
use super::rasterizer::{Pdftoppm, Rasterizer};
use super::results::{JobStatus, ResultStore};
use super::store::{Claim, DirClaimer};

/// Name of the results directory inside the data directory
pub const GENERATED_DIR: &str = "generated";

/// Report of a finished job, kept next to its images
pub const REPORT_FILE: &str = "report.json";

/// A page whose two renderings had different extents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageMismatch {
    pub page: usize,
    #[serde(flatten)]
    pub mismatch: DimensionMismatch,
}

/// Per-page findings of a job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageSummary {
    pub identical_pages: usize,
    /// Highlighted rows summed over all compared pages
    pub changed_rows: u64,
    pub dimension_mismatches: Vec<PageMismatch>,
}

/// Summary of one `compare` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompareReport {
    pub id: ComparisonId,
    /// The result entry already existed; nothing was recomputed
    pub already_done: bool,
    pub pages_first: usize,
    pub pages_second: usize,
    pub pages_compared: usize,
    /// Absent when an existing result has no stored report to read back
    #[serde(flatten)]
    pub summary: Option<PageSummary>,
    pub output_dir: PathBuf,
}

/// Drives comparisons: hashing, rasterizing, page pairing and diffing
pub struct Engine {
    config: Config,
    cache: RasterCache,
    results: ResultStore,
    enumerator: Arc<dyn PageEnumerator>,
    workers: usize,
}

impl Engine {
    /// Create an engine that renders with the configured external rasterizer
    pub fn new(config: Config) -> Self {
        let rasterizer = Arc::new(Pdftoppm::new(&config.rasterizer));
        Self::with_rasterizer(config, rasterizer)
    }

    pub fn with_rasterizer(config: Config, rasterizer: Arc<dyn Rasterizer>) -> Self {
        let enumerator: Arc<dyn PageEnumerator> = Arc::new(PaddedIndexScan::default());
        let claimer = DirClaimer::new(config.jobs.wait_timeout(), config.jobs.poll_interval());
        let data_dir = &config.storage.data_dir;

        let cache = RasterCache::new(
            data_dir.clone(),
            claimer.clone(),
            rasterizer,
            enumerator.clone(),
        );
        let results = ResultStore::new(data_dir.join(GENERATED_DIR), claimer);
        let workers = config.jobs.worker_count();

        debug!("Loaded configuration: {:?}", config);

        Self {
            config,
            cache,
            results,
            enumerator,
            workers,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// State of a comparison job, for pollers
    pub fn status(&self, id: &ComparisonId) -> Result<JobStatus> {
        self.results.status(id)
    }

    /// Compare `first` against `second`, writing `image-<n>.png` for every
    /// page index present in both documents.
    ///
    /// Idempotent per pair: when the result entry already exists nothing is
    /// rasterized or diffed. A job that fails is marked failed and is rerun
    /// in full by the next call, never resumed page by page.
    pub async fn compare(
        &self,
        first: &Path,
        second: &Path,
        highlight: HighlightColor,
        cancel: &CancellationToken,
    ) -> Result<CompareReport> {
        let (first_hash, second_hash) =
            tokio::try_join!(hash_document(first), hash_document(second))?;
        let id = ComparisonId::new(first_hash.clone(), second_hash.clone());

        info!("Comparing {} with {} (job {})", first.display(), second.display(), id);

        let entry = match self.results.claim(&id, cancel).await? {
            Claim::Ready => {
                info!("Job {} already done; skipping", id);
                return self.existing_report(id);
            }
            Claim::Owned(entry) => entry,
        };

        let outcome = self
            .run_job(first, second, &id, entry.dir(), highlight, cancel)
            .await;

        match outcome {
            Ok(report) => {
                entry.complete()?;
                info!("Job {} done: {} pages compared", id, report.pages_compared);
                Ok(report)
            }
            Err(PdfDiffError::Cancelled) => {
                warn!("Job {} cancelled; removing partial results", id);
                entry.abandon()?;
                Err(PdfDiffError::Cancelled)
            }
            Err(e) => {
                warn!("Job {} failed: {}", id, e);
                if let Err(mark) = entry.fail(&e.to_string()) {
                    warn!("Could not mark job {} as failed: {}", id, mark);
                }
                Err(e)
            }
        }
    }

    async fn run_job(
        &self,
        first: &Path,
        second: &Path,
        id: &ComparisonId,
        output_dir: &Path,
        highlight: HighlightColor,
        cancel: &CancellationToken,
    ) -> Result<CompareReport> {
        // Both renders run to completion so each one cleans up its own entry.
        let (first_doc, second_doc) = tokio::join!(
            self.cache.ensure_hashed(first, id.first.clone(), cancel),
            self.cache.ensure_hashed(second, id.second.clone(), cancel),
        );
        let (first_doc, second_doc) = (first_doc?, second_doc?);
        for doc in [&first_doc, &second_doc] {
            debug!(
                "{}: {} pages in {} ({})",
                doc.hash,
                doc.pages.len(),
                doc.dir.display(),
                if doc.rendered { "rendered" } else { "cached" }
            );
        }

        let pairs = first_doc.pages.len().min(second_doc.pages.len());
        if first_doc.pages.len() != second_doc.pages.len() {
            info!(
                "Page counts differ ({} vs {}); comparing the first {} pages",
                first_doc.pages.len(),
                second_doc.pages.len(),
                pairs
            );
        }

        let outcomes = self
            .diff_pages(&first_doc, &second_doc, pairs, output_dir, highlight, cancel)
            .await?;

        let pages_compared = outcomes.len();
        let mut summary = PageSummary::default();
        for (index, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                PageOutcome::Identical => summary.identical_pages += 1,
                PageOutcome::Compared {
                    changed_rows,
                    mismatch,
                } => {
                    summary.changed_rows += u64::from(changed_rows);
                    if let Some(mismatch) = mismatch {
                        summary.dimension_mismatches.push(PageMismatch {
                            page: index + 1,
                            mismatch,
                        });
                    }
                }
            }
        }

        let report = CompareReport {
            id: id.clone(),
            already_done: false,
            pages_first: first_doc.pages.len(),
            pages_second: second_doc.pages.len(),
            pages_compared,
            summary: Some(summary),
            output_dir: output_dir.to_path_buf(),
        };
        std::fs::write(
            output_dir.join(REPORT_FILE),
            serde_json::to_string_pretty(&report)?,
        )?;
        Ok(report)
    }

    /// Diff page pairs on a bounded pool of blocking workers.
    ///
    /// Outcomes come back in page order; the first real error wins over
    /// cancellations it caused in the remaining workers.
    async fn diff_pages(
        &self,
        first: &CachedDocument,
        second: &CachedDocument,
        pairs: usize,
        output_dir: &Path,
        highlight: HighlightColor,
        cancel: &CancellationToken,
    ) -> Result<Vec<PageOutcome>> {
        let differ = DiffEngine::new(highlight);
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let stop = cancel.child_token();
        let mut handles = Vec::with_capacity(pairs);

        let mut failure: Option<PdfDiffError> = None;

        for index in 0..pairs {
            let permit = tokio::select! {
                _ = stop.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(e) => {
                        failure = Some(PdfDiffError::Config(format!("worker pool closed: {}", e)));
                        stop.cancel();
                        break;
                    }
                },
            };

            let page_a = first.pages.pages[index].clone();
            let page_b = second.pages.pages[index].clone();
            let output = ResultStore::image_path(output_dir, index + 1);
            let stop = stop.clone();

            handles.push(tokio::task::spawn_blocking(move || {
                let _permit = permit;
                if stop.is_cancelled() {
                    return Err(PdfDiffError::Cancelled);
                }
                let result = differ.diff_files(&page_a, &page_b, &output);
                if result.is_err() {
                    stop.cancel();
                }
                result
            }));
        }

        // Every worker is drained before returning so none outlives the job.
        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(Ok(outcome)) => outcomes.push(outcome),
                Ok(Err(PdfDiffError::Cancelled)) => {}
                Ok(Err(e)) => {
                    failure.get_or_insert(e);
                }
                Err(e) => {
                    stop.cancel();
                    failure.get_or_insert(PdfDiffError::Task(e));
                }
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }
        if stop.is_cancelled() {
            return Err(PdfDiffError::Cancelled);
        }
        Ok(outcomes)
    }

    fn existing_report(&self, id: ComparisonId) -> Result<CompareReport> {
        let output_dir = self.results.entry_dir(&id);

        let stored = std::fs::read_to_string(output_dir.join(REPORT_FILE))
            .ok()
            .and_then(|raw| serde_json::from_str::<CompareReport>(&raw).ok());
        if let Some(mut report) = stored {
            report.already_done = true;
            report.output_dir = output_dir;
            return Ok(report);
        }

        debug!("No stored report for job {}; page details are unknown", id);
        let images = ResultStore::list_images(&output_dir)?;
        let pages_first = self
            .enumerator
            .enumerate(&self.cache.entry_dir(&id.first))
            .len();
        let pages_second = self
            .enumerator
            .enumerate(&self.cache.entry_dir(&id.second))
            .len();

        Ok(CompareReport {
            id,
            already_done: true,
            pages_first,
            pages_second,
            pages_compared: images.len(),
            summary: None,
            output_dir,
        })
    }
}

async fn hash_document(path: &Path) -> Result<ContentHash> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || ContentHash::of_file(owned)).await?
}
