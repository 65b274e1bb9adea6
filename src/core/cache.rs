use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::hasher::ContentHash;
use super::pages::{PageEnumerator, PageSet};
use super::rasterizer::Rasterizer;
use super::store::{Claim, DirClaimer};
use crate::error::{PdfDiffError, Result};

/// A document whose pages are available on disk
#[derive(Debug, Clone)]
pub struct CachedDocument {
    pub hash: ContentHash,
    pub dir: PathBuf,
    pub pages: PageSet,
    /// True when this call ran the rasterizer, false on a cache hit
    pub rendered: bool,
}

/// Content-addressed store of rendered pages: `<root>/<docHash>/<prefix>-<n>.png`
pub struct RasterCache {
    root: PathBuf,
    claimer: DirClaimer,
    rasterizer: Arc<dyn Rasterizer>,
    enumerator: Arc<dyn PageEnumerator>,
}

impl RasterCache {
    pub fn new(
        root: impl Into<PathBuf>,
        claimer: DirClaimer,
        rasterizer: Arc<dyn Rasterizer>,
        enumerator: Arc<dyn PageEnumerator>,
    ) -> Self {
        Self {
            root: root.into(),
            claimer,
            rasterizer,
            enumerator,
        }
    }

    pub fn entry_dir(&self, hash: &ContentHash) -> PathBuf {
        self.root.join(hash.as_str())
    }

    /// Render `pdf` into the entry for `hash` unless that entry already exists.
    ///
    /// `hash` must be the content hash of `pdf`; callers hash up front because
    /// the comparison id is built from both hashes before any rendering.
    ///
    /// A failed or cancelled render removes the entry so it is never mistaken
    /// for a complete one.
    pub async fn ensure_hashed(
        &self,
        pdf: &Path,
        hash: ContentHash,
        cancel: &CancellationToken,
    ) -> Result<CachedDocument> {
        let dir = self.entry_dir(&hash);

        let rendered = match self.claimer.claim(&dir, cancel).await? {
            Claim::Ready => {
                info!("Using cached pages for {} ({})", pdf.display(), hash);
                false
            }
            Claim::Owned(entry) => {
                info!(
                    "Rasterizing {} with {} into {}",
                    pdf.display(),
                    self.rasterizer.name(),
                    dir.display()
                );
                let prefix = dir.join(self.enumerator.output_prefix());
                let result = match self.rasterizer.rasterize(pdf, &prefix, cancel).await {
                    Ok(()) if self.enumerator.enumerate(&dir).is_empty() => {
                        Err(PdfDiffError::Rasterizer(format!(
                            "{} produced no pages for {}",
                            self.rasterizer.name(),
                            pdf.display()
                        )))
                    }
                    other => other,
                };

                if let Err(e) = result {
                    if let Err(cleanup) = entry.abandon() {
                        warn!("Could not remove {}: {}", dir.display(), cleanup);
                    }
                    return Err(e);
                }
                entry.complete()?;
                true
            }
        };

        let pages = self.enumerator.enumerate(&dir);
        debug!(
            "{} has {} pages (index width {})",
            hash,
            pages.len(),
            pages.pad_width
        );
        Ok(CachedDocument {
            hash,
            dir,
            pages,
            rendered,
        })
    }
}
