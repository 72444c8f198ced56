//! Key directory access.
//!
//! Each container's key record lives in its own INI file inside the key
//! directory, named `<label>.<original file name>.ini`.

use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Path, PathBuf};

use ini::Ini;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::format::{KEY_RECORD_EXTENSION, KeyRecord};
use crate::storage::Storage;

#[derive(Debug, Clone)]
pub struct KeyStore {
    dir: PathBuf,
}

impl KeyStore {
    /// Opens an existing key directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(Error::KeyDirectoryNotFound(dir));
        }
        Ok(Self { dir })
    }

    /// Opens the key directory, creating it first if needed.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path the record for `original_name` under `label` is stored at.
    pub fn record_path(&self, label: &str, original_name: &OsStr) -> PathBuf {
        let mut name = OsString::from(format!("{label}."));
        name.push(original_name);
        name.push(format!(".{KEY_RECORD_EXTENSION}"));
        self.dir.join(name)
    }

    /// Writes `record` to `<label>.<original_name>.ini`.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingOption`] if `label` is empty
    /// - [`Error::KeyRecordExists`] if the file is already there; an
    ///   existing record is never overwritten
    pub fn put(&self, record: &KeyRecord, label: &str, original_name: &OsStr) -> Result<PathBuf> {
        if label.trim().is_empty() {
            return Err(Error::MissingOption("key name"));
        }

        let path = self.record_path(label, original_name);
        if path.exists() {
            return Err(Error::KeyRecordExists(path));
        }

        Storage::new(path.clone()).save_with(|w| record.write_to(w))?;
        info!(path = %path.display(), prefix = record.prefix(), "stored key record");

        Ok(path)
    }

    /// Reads every key record in the directory.
    ///
    /// Only `.ini` files are considered. Files that cannot be parsed or that
    /// lack one of the required fields are skipped.
    pub fn load_all(&self) -> Result<KeyTable> {
        let mut records = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.is_file() || !has_record_extension(&path) {
                continue;
            }

            let ini = match Ini::load_from_file(&path) {
                Ok(ini) => ini,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable key file");
                    continue;
                }
            };

            match KeyRecord::from_ini(&ini) {
                Some(record) => records.push(record),
                None => debug!(path = %path.display(), "skipping file without key data"),
            }
        }

        debug!(dir = %self.dir.display(), count = records.len(), "loaded key records");
        Ok(KeyTable { records })
    }
}

fn has_record_extension(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| ext.eq_ignore_ascii_case(KEY_RECORD_EXTENSION))
}

/// The records available for one decrypt invocation.
///
/// Lookups are a linear scan, which is fine for the handful of records a
/// key drive holds.
#[derive(Debug, Default, Clone)]
pub struct KeyTable {
    records: Vec<KeyRecord>,
}

impl KeyTable {
    pub fn new(records: Vec<KeyRecord>) -> Self {
        Self { records }
    }

    pub fn find(&self, prefix: &str) -> Option<&KeyRecord> {
        self.records.iter().find(|r| r.prefix() == prefix)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyRecord> {
        self.records.iter()
    }
}
