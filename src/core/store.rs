use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions, TryLockError};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{PdfDiffError, Result};

/// Present inside a keyed directory while its owner is still writing it.
///
/// The owner holds an exclusive lock on this file for as long as it works on
/// the directory. The OS drops the lock when the owning process dies, so an
/// unlocked marker always belongs to a job that is gone.
pub const IN_PROGRESS_MARKER: &str = ".tmp";

/// Present inside a result directory whose job failed
pub const FAILED_MARKER: &str = ".failed";

static CLAIM_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Contents of the failed marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Contents of the in-progress marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnerRecord {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

/// Observable state of a content-keyed directory
#[derive(Debug, Clone, PartialEq)]
pub enum EntryState {
    Missing,
    InProgress,
    /// Marked in progress, but its owner stopped without cleaning up
    Abandoned(Option<OwnerRecord>),
    Failed(FailureRecord),
    Ready,
}

/// Inspect a keyed directory without taking ownership of it
pub fn entry_state(dir: &Path) -> EntryState {
    if !dir.is_dir() {
        return EntryState::Missing;
    }
    let marker = dir.join(IN_PROGRESS_MARKER);
    if marker.exists() {
        if marker_is_held(&marker) {
            return EntryState::InProgress;
        }
        let owner = std::fs::read_to_string(&marker)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok());
        return EntryState::Abandoned(owner);
    }
    let failed = dir.join(FAILED_MARKER);
    if failed.exists() {
        let record = std::fs::read_to_string(&failed)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_else(|| FailureRecord {
                error: "unknown failure".to_string(),
                failed_at: DateTime::<Utc>::default(),
            });
        return EntryState::Failed(record);
    }
    EntryState::Ready
}

/// Whether some live job holds the lock on `marker`.
///
/// Anything short of acquiring the lock counts as held, so a marker that
/// vanishes or cannot be opened is re-examined on the next poll.
fn marker_is_held(marker: &Path) -> bool {
    let Ok(file) = File::open(marker) else {
        return true;
    };
    !matches!(file.try_lock(), Ok(()))
}

/// Outcome of trying to take a keyed directory
#[derive(Debug)]
pub enum Claim {
    /// This job created the directory and must finish it
    Owned(InProgress),
    /// Another job (possibly an earlier run) already completed it
    Ready,
}

/// Exclusive handle on a directory that carries the in-progress marker.
///
/// Dropping the handle without `complete`, `fail` or `abandon` leaves the
/// marker unlocked, and the next claimer reclaims the directory.
#[derive(Debug)]
pub struct InProgress {
    dir: PathBuf,
    marker: File,
}

impl InProgress {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Drop the in-progress marker, publishing the directory as complete
    pub fn complete(self) -> Result<()> {
        std::fs::remove_file(self.dir.join(IN_PROGRESS_MARKER))?;
        Ok(())
    }

    /// Record a failure and release the directory; written files are kept
    pub fn fail(self, error: &str) -> Result<()> {
        let record = FailureRecord {
            error: error.to_string(),
            failed_at: Utc::now(),
        };
        std::fs::write(
            self.dir.join(FAILED_MARKER),
            serde_json::to_string_pretty(&record)?,
        )?;
        std::fs::remove_file(self.dir.join(IN_PROGRESS_MARKER))?;
        Ok(())
    }

    /// Remove the directory and everything written into it
    pub fn abandon(self) -> Result<()> {
        std::fs::remove_dir_all(&self.dir)?;
        Ok(())
    }

    /// Clear whatever a previous owner left behind and stamp the marker
    fn reset(&mut self) -> Result<()> {
        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| {
                PdfDiffError::Io(e.into_io_error().unwrap_or_else(|| {
                    io::Error::new(io::ErrorKind::Other, "directory walk failed")
                }))
            })?;
            if entry.file_name() == IN_PROGRESS_MARKER {
                continue;
            }
            if entry.file_type().is_dir() {
                std::fs::remove_dir_all(entry.path())?;
            } else {
                std::fs::remove_file(entry.path())?;
            }
        }
        self.stamp()
    }

    fn stamp(&mut self) -> Result<()> {
        let owner = OwnerRecord {
            pid: std::process::id(),
            started_at: Utc::now(),
        };
        self.marker.set_len(0)?;
        self.marker.write_all(serde_json::to_string(&owner)?.as_bytes())?;
        Ok(())
    }
}

/// Creates keyed directories atomically and waits on directories held by others.
///
/// A directory is created under a private staging name with the locked
/// marker already inside and then renamed into place, so no reader ever sees
/// a keyed directory that is incomplete but unmarked. Ownership is the
/// marker lock; file names only describe the state.
#[derive(Debug, Clone)]
pub struct DirClaimer {
    wait_timeout: Duration,
    poll_interval: Duration,
}

impl DirClaimer {
    pub fn new(wait_timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            wait_timeout,
            poll_interval,
        }
    }

    /// Take ownership of `dir`, or wait until whoever owns it is done
    pub async fn claim(&self, dir: &Path, cancel: &CancellationToken) -> Result<Claim> {
        let deadline = Instant::now() + self.wait_timeout;

        loop {
            if cancel.is_cancelled() {
                return Err(PdfDiffError::Cancelled);
            }

            match entry_state(dir) {
                EntryState::Ready => return Ok(Claim::Ready),
                EntryState::Missing => {
                    if let Some(owned) = try_create(dir)? {
                        debug!("Claimed {}", dir.display());
                        return Ok(Claim::Owned(owned));
                    }
                }
                EntryState::Failed(record) => {
                    if take_over_failed(dir)? {
                        info!(
                            "Rerunning failed entry {} ({}) from scratch",
                            dir.display(),
                            record.error
                        );
                        if let Some(owned) = try_reclaim(dir)? {
                            return Ok(Claim::Owned(owned));
                        }
                    }
                }
                EntryState::Abandoned(owner) => {
                    if let Some(owned) = try_reclaim(dir)? {
                        match owner {
                            Some(owner) => warn!(
                                "Reclaimed {} from process {} (started {}), which stopped before finishing",
                                dir.display(),
                                owner.pid,
                                owner.started_at.to_rfc3339()
                            ),
                            None => warn!("Reclaimed abandoned entry {}", dir.display()),
                        }
                        return Ok(Claim::Owned(owned));
                    }
                }
                EntryState::InProgress => {
                    if Instant::now() >= deadline {
                        return Err(PdfDiffError::Timeout {
                            path: dir.to_path_buf(),
                        });
                    }
                    debug!("Waiting for {} to be completed by another job", dir.display());
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(PdfDiffError::Cancelled),
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
            }
        }
    }
}

fn staging_name(dir: &Path) -> Result<PathBuf> {
    let name = dir
        .file_name()
        .ok_or_else(|| PdfDiffError::Config(format!("invalid entry path {}", dir.display())))?;
    let nonce = CLAIM_COUNTER.fetch_add(1, Ordering::Relaxed);
    Ok(dir.with_file_name(format!(
        ".{}.claim-{}-{}",
        name.to_string_lossy(),
        std::process::id(),
        nonce
    )))
}

fn lock_error(e: TryLockError) -> PdfDiffError {
    match e {
        TryLockError::Error(io) => PdfDiffError::Io(io),
        TryLockError::WouldBlock => PdfDiffError::Io(io::Error::new(
            io::ErrorKind::WouldBlock,
            "fresh marker is locked by another handle",
        )),
    }
}

/// Returns `None` when another job won the race to create `dir`
fn try_create(dir: &Path) -> Result<Option<InProgress>> {
    if let Some(parent) = dir.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let staging = staging_name(dir)?;
    std::fs::create_dir(&staging)?;
    let marker = OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(staging.join(IN_PROGRESS_MARKER))?;
    marker.try_lock().map_err(lock_error)?;

    let mut owned = InProgress {
        dir: dir.to_path_buf(),
        marker,
    };
    owned.stamp()?;

    match std::fs::rename(&staging, dir) {
        Ok(()) => Ok(Some(owned)),
        Err(e) => {
            drop(owned);
            let _ = std::fs::remove_dir_all(&staging);
            if dir.exists() {
                Ok(None)
            } else {
                Err(e.into())
            }
        }
    }
}

/// Turn a failed entry back into an in-progress one.
///
/// The failed marker is hard-linked to the in-progress name, which fails if
/// that name already exists, so a stale read of the failed state can never
/// replace the marker of a job that reclaimed the entry in the meantime.
/// Returns `false` when the entry changed hands first.
fn take_over_failed(dir: &Path) -> Result<bool> {
    match std::fs::hard_link(dir.join(FAILED_MARKER), dir.join(IN_PROGRESS_MARKER)) {
        Ok(()) => Ok(true),
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::AlreadyExists
            ) =>
        {
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

/// Lock an unowned in-progress marker and clear the directory for reuse.
///
/// Returns `None` when a live job holds the marker, or when the marker that
/// was locked is no longer the one in the directory.
fn try_reclaim(dir: &Path) -> Result<Option<InProgress>> {
    let path = dir.join(IN_PROGRESS_MARKER);
    let marker = match OpenOptions::new().read(true).write(true).open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match marker.try_lock() {
        Ok(()) => {}
        Err(TryLockError::WouldBlock) => return Ok(None),
        Err(TryLockError::Error(e)) => return Err(e.into()),
    }
    if !is_current(&marker, &path)? {
        return Ok(None);
    }

    let mut owned = InProgress {
        dir: dir.to_path_buf(),
        marker,
    };
    owned.reset()?;
    Ok(Some(owned))
}

/// Whether the open `handle` is still the file linked at `path`
#[cfg(unix)]
fn is_current(handle: &File, path: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let held = handle.metadata()?;
    match std::fs::metadata(path) {
        Ok(current) => Ok(held.dev() == current.dev() && held.ino() == current.ino()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(not(unix))]
fn is_current(_handle: &File, path: &Path) -> io::Result<bool> {
    Ok(path.exists())
}
