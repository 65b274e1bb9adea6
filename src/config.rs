use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PdfDiffError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where rendered pages and diff results are persisted
    pub storage: StorageConfig,

    /// External rasterizer invocation
    pub rasterizer: RasterizerConfig,

    /// Diff rendering settings
    pub diff: DiffConfig,

    /// Job scheduling settings
    pub jobs: JobConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root data directory (`<data_dir>/<docHash>`, `<data_dir>/generated/...`)
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RasterizerConfig {
    /// Executable invoked as `<program> -png [-r <resolution>] <pdf> <prefix>`
    pub program: String,

    /// Rendering resolution in DPI (rasterizer default when absent)
    pub resolution: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiffConfig {
    /// Hex RGB highlight color used when none is given on the command line
    pub highlight_color: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Page diff workers (defaults to available CPU cores)
    pub workers: Option<usize>,

    /// How long to wait on a cache or result entry held by another job
    pub wait_timeout_secs: u64,

    /// Poll interval while waiting on another job
    pub poll_interval_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

impl Default for RasterizerConfig {
    fn default() -> Self {
        Self {
            program: "pdftoppm".to_string(),
            resolution: None,
        }
    }
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            highlight_color: "ff2010".to_string(),
        }
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            workers: None,
            wait_timeout_secs: 300,
            poll_interval_ms: 100,
        }
    }
}

impl JobConfig {
    /// Worker count, falling back to the number of available cores
    pub fn worker_count(&self) -> usize {
        self.workers
            .filter(|&n| n > 0)
            .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
            .unwrap_or(1)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&content).map_err(|e| PdfDiffError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Load configuration with fallback to default
    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        match path {
            Some(p) => {
                if p.as_ref().exists() {
                    Self::load(p)
                } else {
                    Err(PdfDiffError::Config(format!(
                        "config file {} does not exist",
                        p.as_ref().display()
                    )))
                }
            }
            None => {
                let candidates = ["pdf-diff.toml", "PdfDiff.toml", ".pdf-diff.toml"];

                for candidate in &candidates {
                    if Path::new(candidate).exists() {
                        return Self::load(candidate);
                    }
                }

                Ok(Self::default())
            }
        }
    }
}
