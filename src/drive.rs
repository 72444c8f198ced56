//! Key drive acquisition.
//!
//! A key drive is found by label. If it is already attached it is used
//! right away; otherwise the volume set is polled until a volume with a
//! matching label appears (or disappears) or the operation is cancelled.

use std::collections::HashSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use sysinfo::Disks;
use tracing::{debug, info};

use crate::context::{CancelToken, Context};
use crate::error::{Error, Result};

/// Longest single sleep while polling; bounds how late a cancel is seen.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// A mounted volume as seen at one poll tick.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DriveHandle {
    pub label: String,
    pub root: PathBuf,
    pub removable: bool,
}

/// Anything that can list the currently mounted volumes.
pub trait VolumeSource {
    fn volumes(&mut self) -> Vec<DriveHandle>;
}

/// Volumes reported by the operating system.
#[derive(Debug, Default)]
pub struct SystemVolumes;

impl VolumeSource for SystemVolumes {
    fn volumes(&mut self) -> Vec<DriveHandle> {
        let disks = Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .map(|disk| DriveHandle {
                label: volume_label(&disk.name().to_string_lossy(), disk.mount_point()),
                root: disk.mount_point().to_path_buf(),
                removable: disk.is_removable(),
            })
            .collect()
    }
}

/// The label a user would recognise: the volume name on Windows, the last
/// component of the mount point elsewhere.
fn volume_label(name: &str, mount_point: &Path) -> String {
    if cfg!(windows) {
        name.to_string()
    } else {
        mount_point
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.to_string())
    }
}

/// Match used for drives that are already attached.
pub fn label_matches_exact(volume: &str, wanted: &str) -> bool {
    volume == wanted
}

/// Match used for drives that appear or vanish while waiting.
///
/// A suffix match: `BackupUSB1` matches `USB1` as well, so two drives whose
/// labels share a tail can be confused.
pub fn label_matches_suffix(volume: &str, wanted: &str) -> bool {
    volume.ends_with(wanted)
}

/// Volumes present in only one of the two snapshots: those that appeared
/// first, then those that vanished.
pub fn changed_volumes(baseline: &[DriveHandle], current: &[DriveHandle]) -> Vec<DriveHandle> {
    let before: HashSet<&DriveHandle> = baseline.iter().collect();
    let after: HashSet<&DriveHandle> = current.iter().collect();

    let appeared = current.iter().filter(|v| !before.contains(v));
    let vanished = baseline.iter().filter(|v| !after.contains(v));
    appeared.chain(vanished).cloned().collect()
}

/// Iterator over volume snapshots taken every `interval`.
///
/// Ends as soon as the cancel token is tripped.
pub struct VolumeWatch<'a, S> {
    source: &'a mut S,
    interval: Duration,
    cancel: &'a CancelToken,
}

impl<'a, S: VolumeSource> VolumeWatch<'a, S> {
    pub fn new(source: &'a mut S, interval: Duration, cancel: &'a CancelToken) -> Self {
        Self {
            source,
            interval,
            cancel,
        }
    }
}

impl<S: VolumeSource> Iterator for VolumeWatch<'_, S> {
    type Item = Vec<DriveHandle>;

    fn next(&mut self) -> Option<Self::Item> {
        if !sleep_unless_cancelled(self.interval, self.cancel) {
            return None;
        }
        Some(self.source.volumes())
    }
}

/// Sleeps for `total` in short slices. Returns `false` if cancelled.
fn sleep_unless_cancelled(total: Duration, cancel: &CancelToken) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcquireState {
    SearchAttached,
    WaitForChange,
    Matched,
}

impl fmt::Display for AcquireState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AcquireState::SearchAttached => "search-attached",
            AcquireState::WaitForChange => "wait-for-change",
            AcquireState::Matched => "matched",
        })
    }
}

/// Resolves a drive label to a mounted volume.
pub struct DriveAcquirer<S> {
    source: S,
    interval: Duration,
    cancel: CancelToken,
}

impl<S: VolumeSource> DriveAcquirer<S> {
    pub fn new(ctx: &Context, source: S) -> Self {
        Self {
            source,
            interval: ctx.poll_interval(),
            cancel: ctx.cancel_token().clone(),
        }
    }

    /// Blocks until a volume labelled `label` is available.
    ///
    /// There is no timeout; the wait only ends through a match or the
    /// cancel token.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingOption`] if `label` is absent or empty
    /// - [`Error::Cancelled`] if the token is tripped while waiting
    pub fn acquire(&mut self, label: Option<&str>) -> Result<DriveHandle> {
        let label = label
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .ok_or(Error::MissingOption("drive label"))?;

        let mut state = AcquireState::SearchAttached;
        debug!(%state, label, "looking for key drive");

        let mut baseline = self.source.volumes();
        if let Some(drive) = baseline
            .iter()
            .find(|v| v.removable && label_matches_exact(&v.label, label))
        {
            state = AcquireState::Matched;
            info!(%state, label, root = %drive.root.display(), "key drive attached");
            return Ok(drive.clone());
        }

        state = AcquireState::WaitForChange;
        info!(%state, label, "waiting for key drive to be connected");

        let watch = VolumeWatch::new(&mut self.source, self.interval, &self.cancel);
        for current in watch {
            if current.len() != baseline.len() {
                let changed = changed_volumes(&baseline, &current);
                if let Some(drive) = changed
                    .into_iter()
                    .find(|v| label_matches_suffix(&v.label, label))
                {
                    state = AcquireState::Matched;
                    info!(%state, label, root = %drive.root.display(), "key drive detected");
                    return Ok(drive);
                }
            }
            baseline = current;
        }

        debug!(%state, label, "drive wait cancelled");
        Err(Error::Cancelled)
    }
}

/// Works out where key records live for this invocation.
///
/// With a drive label, the key directory is `key_dir` (or the configured
/// default) below the drive's root. Without one, `key_dir` is used as is.
pub fn locate_key_directory<S: VolumeSource>(
    ctx: &Context,
    source: S,
    drive: Option<&str>,
    key_dir: Option<&Path>,
) -> Result<PathBuf> {
    let drive = drive.filter(|d| !d.trim().is_empty());

    match (drive, key_dir) {
        (Some(label), key_dir) => {
            let relative = below_root(key_dir.unwrap_or(ctx.config().drive_key_dir()))?;
            let handle = DriveAcquirer::new(ctx, source).acquire(Some(label))?;
            Ok(handle.root.join(relative))
        }
        (None, Some(dir)) => Ok(dir.to_path_buf()),
        (None, None) => Err(Error::MissingOption("drive label")),
    }
}

/// `path` with any root or prefix dropped, so it joins under a drive root.
/// A `..` component could climb out of the drive and is refused.
fn below_root(path: &Path) -> Result<PathBuf> {
    if path.components().any(|c| c == Component::ParentDir) {
        return Err(Error::KeyDirectoryOutsideDrive(path.to_path_buf()));
    }
    Ok(path
        .components()
        .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
        .collect())
}
