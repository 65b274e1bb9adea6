use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::future::Future;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::Config;
use crate::core::{CompareReport, ComparisonId, Engine, HighlightColor, JobStatus};

#[derive(Parser)]
#[command(name = "pdf-diff")]
#[command(about = "Highlights the rows that changed between two PDF documents")]
#[command(version)]
#[command(subcommand_negates_reqs = true)]
pub struct Cli {
    /// Baseline document
    #[arg(required = true, value_name = "PDF_A")]
    pub first: Option<PathBuf>,

    /// Document to compare against the baseline
    #[arg(required = true, value_name = "PDF_B")]
    pub second: Option<PathBuf>,

    /// Highlight color as six hex digits, e.g. ff2010
    #[arg(long, value_name = "HEX")]
    pub color: Option<String>,

    /// Page diff workers (defaults to the number of CPU cores)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Data directory holding rendered pages and results
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Print machine-readable JSON instead of a summary
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the state of a comparison job
    Status {
        /// Job identifier, `<docHash1>-<docHash2>`
        id: String,
    },
}

impl Cli {
    /// Configuration file merged with command line overrides
    pub fn load_config(&self) -> Result<Config> {
        let mut config = Config::load_or_default(self.config.as_deref())
            .context("Failed to load configuration")?;

        if let Some(data_dir) = &self.data_dir {
            config.storage.data_dir = data_dir.clone();
        }
        if let Some(workers) = self.workers {
            config.jobs.workers = Some(workers);
        }
        if let Some(color) = &self.color {
            config.diff.highlight_color = color.clone();
        }
        Ok(config)
    }

    pub async fn execute(self, engine: Engine) -> Result<()> {
        match &self.command {
            Some(Commands::Status { id }) => self.status(&engine, id),
            None => self.compare(&engine).await,
        }
    }

    async fn compare(&self, engine: &Engine) -> Result<()> {
        let (Some(first), Some(second)) = (&self.first, &self.second) else {
            bail!("two PDF files are required");
        };
        let highlight: HighlightColor = engine.config().diff.highlight_color.parse()?;

        let cancel = CancellationToken::new();
        let signal = shutdown_signal().context("Failed to install signal handlers")?;
        let interrupt = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let name = signal.await;
                warn!("Received {}; cancelling comparison", name);
                cancel.cancel();
            })
        };

        let result = engine.compare(first, second, highlight, &cancel).await;
        interrupt.abort();

        let report = result.with_context(|| {
            format!("Failed to compare {} with {}", first.display(), second.display())
        })?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_report(&report);
        }
        Ok(())
    }

    fn status(&self, engine: &Engine, id: &str) -> Result<()> {
        let id: ComparisonId = id.parse()?;
        let status = engine.status(&id)?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&status)?);
        }

        match status {
            JobStatus::NotFound => bail!("Job {} has not been compared", id),
            JobStatus::Failed { error, failed_at } => {
                bail!("Job {} failed at {}: {}", id, failed_at.to_rfc3339(), error)
            }
            JobStatus::Pending => {
                if !self.json {
                    println!("⏳ Job {} is in progress", id);
                }
            }
            JobStatus::Done { images } => {
                if !self.json {
                    println!("✅ Job {} is done ({} pages)", id, images.len());
                    for image in images {
                        println!("   {}", image.path.display());
                    }
                }
            }
        }
        Ok(())
    }
}

/// Listens for interrupt and terminate signals, registered before returning.
/// The future resolves with the name of the first signal received.
#[cfg(unix)]
fn shutdown_signal() -> std::io::Result<impl Future<Output = &'static str> + Send + 'static> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    Ok(async move {
        tokio::select! {
            Ok(()) = tokio::signal::ctrl_c() => "SIGINT",
            Some(()) = terminate.recv() => "SIGTERM",
            else => std::future::pending().await,
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> std::io::Result<impl Future<Output = &'static str> + Send + 'static> {
    Ok(async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => "Ctrl-C",
            Err(_) => std::future::pending().await,
        }
    })
}

fn print_report(report: &CompareReport) {
    if report.already_done {
        println!("✅ Results for {} already exist", report.id);
    } else {
        println!("✅ Compared {} pages", report.pages_compared);
    }
    println!("   Pages: {} vs {}", report.pages_first, report.pages_second);
    if let Some(summary) = &report.summary {
        println!(
            "   Identical pages: {}, changed rows: {}",
            summary.identical_pages, summary.changed_rows
        );
        for page in &summary.dimension_mismatches {
            println!("   ⚠️  Page {}: {}", page.page, page.mismatch);
        }
    }
    println!("   Output: {}", report.output_dir.display());
}
