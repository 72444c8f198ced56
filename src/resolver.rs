//! Turns user-supplied paths into cipher units.
//!
//! Resolution happens before any cipher work, so a bad path in the list
//! fails the whole invocation without touching the others.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::format::{ARCHIVE_SUFFIX, ENCRYPTED_SUFFIX};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    File,
    /// Travels as a zip archive while encrypted.
    Directory,
}

/// One file or directory to encrypt, or one container to decrypt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherUnit {
    path: PathBuf,
    kind: UnitKind,
}

impl CipherUnit {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> UnitKind {
        self.kind
    }

    /// Final path component. Resolution guarantees it exists.
    pub fn file_name(&self) -> &OsStr {
        self.path.file_name().unwrap_or_default()
    }
}

/// Resolves encrypt targets.
///
/// # Errors
///
/// - [`Error::MissingOption`] if `paths` is empty
/// - [`Error::TargetNotFound`] if a path is neither a file nor a directory
/// - [`Error::InvalidTarget`] if a path has no final component (`.`, `/`)
/// - [`Error::ZipNamedFile`] if a file's name ends in `.zip`; its container
///   would be read back as a directory archive
pub fn resolve_targets(paths: &[PathBuf]) -> Result<Vec<CipherUnit>> {
    if paths.is_empty() {
        return Err(Error::MissingOption("target"));
    }

    paths
        .iter()
        .map(|path| {
            let kind = if path.is_dir() {
                UnitKind::Directory
            } else if path.is_file() {
                UnitKind::File
            } else {
                return Err(Error::TargetNotFound(path.clone()));
            };

            let Some(name) = path.file_name() else {
                return Err(Error::InvalidTarget(path.clone()));
            };
            if kind == UnitKind::File && name.to_string_lossy().ends_with(ARCHIVE_SUFFIX) {
                return Err(Error::ZipNamedFile(path.clone()));
            }

            Ok(CipherUnit {
                path: path.clone(),
                kind,
            })
        })
        .collect()
}

/// Resolves decrypt targets. Every path must be an existing `.encrypted`
/// file; `.zip.encrypted` marks a directory.
pub fn resolve_containers(paths: &[PathBuf]) -> Result<Vec<CipherUnit>> {
    if paths.is_empty() {
        return Err(Error::MissingOption("target"));
    }

    paths
        .iter()
        .map(|path| {
            if !path.exists() {
                return Err(Error::TargetNotFound(path.clone()));
            }

            let name = path.file_name().map(OsStr::to_string_lossy);
            let Some(name) = name.filter(|n| path.is_file() && n.len() > ENCRYPTED_SUFFIX.len())
            else {
                return Err(Error::NotAContainer(path.clone()));
            };
            let Some(stem) = name.strip_suffix(ENCRYPTED_SUFFIX) else {
                return Err(Error::NotAContainer(path.clone()));
            };

            let kind = if stem.ends_with(ARCHIVE_SUFFIX) {
                UnitKind::Directory
            } else {
                UnitKind::File
            };

            Ok(CipherUnit {
                path: path.clone(),
                kind,
            })
        })
        .collect()
}

/// `path` with `suffix` appended to its final component.
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// `path` with `suffix` removed from its final component, or `None` if the
/// name does not end in it.
pub fn strip_suffix(path: &Path, suffix: &str) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(suffix).filter(|s| !s.is_empty())?;
    Some(path.with_file_name(stem))
}
