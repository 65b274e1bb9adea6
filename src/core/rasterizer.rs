//! External PDF rasterizer.
//!
//! The core only relies on the output naming convention: one PNG per page
//! written as `<prefix>-<padded index>.png`. Any tool that follows it can be
//! plugged in through [`Rasterizer`].

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::RasterizerConfig;
use crate::error::{PdfDiffError, Result};

#[async_trait]
pub trait Rasterizer: Send + Sync {
    /// Render every page of `pdf` to `<prefix>-<padded index>.png`
    async fn rasterize(&self, pdf: &Path, prefix: &Path, cancel: &CancellationToken)
        -> Result<()>;

    /// Name of the rasterizer for logging
    fn name(&self) -> &str;
}

/// Poppler's `pdftoppm` run as a subprocess
#[derive(Debug, Clone)]
pub struct Pdftoppm {
    program: String,
    resolution: Option<u32>,
}

impl Pdftoppm {
    pub fn new(config: &RasterizerConfig) -> Self {
        Self {
            program: config.program.clone(),
            resolution: config.resolution,
        }
    }

    fn command(&self, pdf: &Path, prefix: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-png");
        if let Some(dpi) = self.resolution {
            cmd.arg("-r").arg(dpi.to_string());
        }
        cmd.arg(pdf)
            .arg(prefix)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Rasterizer for Pdftoppm {
    async fn rasterize(
        &self,
        pdf: &Path,
        prefix: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        debug!("Running {} on {}", self.program, pdf.display());

        let child = self.command(pdf, prefix).spawn().map_err(|e| {
            PdfDiffError::Rasterizer(format!("failed to start {}: {}", self.program, e))
        })?;

        // Dropping the pending output future kills the child.
        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(PdfDiffError::Cancelled),
            output = child.wait_with_output() => output?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PdfDiffError::Rasterizer(format!(
                "{} exited with {} for {}: {}",
                self.program,
                output.status,
                pdf.display(),
                stderr.trim()
            )));
        }

        Ok(())
    }

    fn name(&self) -> &str {
        &self.program
    }
}
