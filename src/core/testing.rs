//! Test doubles shared by the core unit tests.

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::pixels::PixelGrid;
use super::rasterizer::Rasterizer;
use crate::error::{PdfDiffError, Result};

/// Opaque page filled with a single grey level
pub fn solid_page(width: u32, height: u32, level: u8) -> PixelGrid {
    PixelGrid::from_image(RgbaImage::from_pixel(
        width,
        height,
        Rgba([level, level, level, 255]),
    ))
}

/// Writes preset pages with pdftoppm's naming and counts invocations
#[derive(Default)]
pub struct FakeRasterizer {
    documents: Mutex<HashMap<PathBuf, Vec<PixelGrid>>>,
    failing: Mutex<HashSet<PathBuf>>,
    delay: Option<Duration>,
    invocations: AtomicUsize,
}

impl FakeRasterizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn add(&self, pdf: &Path, pages: Vec<PixelGrid>) {
        self.documents
            .lock()
            .unwrap()
            .insert(pdf.to_path_buf(), pages);
    }

    pub fn fail_for(&self, pdf: &Path) {
        self.failing.lock().unwrap().insert(pdf.to_path_buf());
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Rasterizer for FakeRasterizer {
    async fn rasterize(
        &self,
        pdf: &Path,
        prefix: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.invocations.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::select! {
                _ = cancel.cancelled() => return Err(PdfDiffError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        if self.failing.lock().unwrap().contains(pdf) {
            return Err(PdfDiffError::Rasterizer(format!(
                "cannot render {}",
                pdf.display()
            )));
        }

        let pages = self
            .documents
            .lock()
            .unwrap()
            .get(pdf)
            .cloned()
            .ok_or_else(|| PdfDiffError::Rasterizer(format!("unknown pdf {}", pdf.display())))?;

        let width = pages.len().to_string().len();
        for (i, page) in pages.iter().enumerate() {
            let name = format!(
                "{}-{:0width$}.png",
                prefix.display(),
                i + 1,
                width = width
            );
            page.encode(name)?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "fake"
    }
}
