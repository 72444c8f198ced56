//! Atomic file output.
//!
//! Containers, key records, archives and decrypted plaintext are all written
//! through [`Storage`], so a failed unit never leaves a half-written file at
//! its final path.

use getrandom::fill;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

/// An output file that is only visible once it is complete.
#[derive(Clone, Debug)]
pub struct Storage {
    path: PathBuf,
}

impl Storage {
    /// Creates a new Storage instance with the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Streams output into the target file using atomic write.
    ///
    /// `write` receives a buffered writer on a temporary file in the same
    /// directory. When it returns `Ok`, the temporary file is flushed,
    /// synced and renamed over the target, then the parent directory is
    /// synced. When it returns `Err`, the temporary file is removed and the
    /// target is left as it was.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save_with<T, E, F>(&self, write: F) -> Result<T, E>
    where
        F: FnOnce(&mut BufWriter<File>) -> Result<T, E>,
        E: From<io::Error>,
    {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = self.random_tmp_path()?;

        // securely create temp file (fail if exists)
        let tmp_file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)?;
        let mut writer = BufWriter::new(tmp_file);

        let outcome = write(&mut writer).and_then(|v| finish(writer).map(|()| v).map_err(E::from));
        let value = match outcome {
            Ok(v) => v,
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                return Err(e);
            }
        };

        if let Err(e) = self.atomic_replace(&tmp_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        self.sync_parent()?;

        Ok(value)
    }

    /// Syncs the parent directory so the rename is persisted.
    #[cfg(unix)]
    fn sync_parent(&self) -> io::Result<()> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        File::open(parent)?.sync_all()
    }

    #[cfg(not(unix))]
    fn sync_parent(&self) -> io::Result<()> {
        Ok(())
    }

    /// Generates a unique temporary file path in the same directory.
    ///
    /// Format: `.filename.tmp.<randomhex>`
    fn random_tmp_path(&self) -> io::Result<PathBuf> {
        let mut buf = [0u8; 8]; // 64 bit entropy
        fill(&mut buf).map_err(|_| io::Error::other("OS random generator unavailable"))?;

        let rand_string = buf.iter().map(|b| format!("{:02x}", b)).collect::<String>();

        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?
            .to_string_lossy();

        let tmp_name = format!(".{}.tmp.{}", file_name, rand_string);

        Ok(self.path.with_file_name(tmp_name))
    }

    /// Atomically replaces the target file with the temporary file.
    ///
    /// Uses Windows `ReplaceFileW` API with `REPLACEFILE_WRITE_THROUGH` flag
    /// when the target already exists; `ReplaceFileW` requires an existing
    /// target, so new files are renamed into place.
    #[cfg(target_os = "windows")]
    fn atomic_replace(&self, tmp_path: &Path) -> io::Result<()> {
        use std::ffi::OsStr;
        use std::os::windows::ffi::OsStrExt;
        use windows_sys::Win32::Storage::FileSystem::{REPLACEFILE_WRITE_THROUGH, ReplaceFileW};

        if !self.path.exists() {
            return fs::rename(tmp_path, &self.path);
        }

        fn to_wide(s: &OsStr) -> Vec<u16> {
            s.encode_wide().chain(std::iter::once(0)).collect()
        }

        let target_w = to_wide(self.path.as_os_str());
        let tmp_w = to_wide(tmp_path.as_os_str());

        // SAFETY:
        // - Strings are valid UTF-16 and null-terminated
        // - Pointers remain valid during the call
        // - Windows does not retain the pointers after return
        let result = unsafe {
            ReplaceFileW(
                target_w.as_ptr(),
                tmp_w.as_ptr(),
                std::ptr::null(),
                REPLACEFILE_WRITE_THROUGH,
                std::ptr::null(),
                std::ptr::null(),
            )
        };

        if result == 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }

    /// Atomically replaces the target file with the temporary file.
    ///
    /// On Unix, `rename()` is atomic when both paths are on the same filesystem.
    #[cfg(not(target_os = "windows"))]
    fn atomic_replace(&self, tmp_path: &Path) -> io::Result<()> {
        fs::rename(tmp_path, &self.path)
    }
}

fn finish(writer: BufWriter<File>) -> io::Result<()> {
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use tempfile::tempdir;

    fn save(storage: &Storage, data: &[u8]) -> io::Result<()> {
        storage.save_with(|w| w.write_all(data))
    }

    // --------------------------------------------------
    // SAVE TESTS
    // --------------------------------------------------

    #[test]
    fn save_writes_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");

        let storage = Storage::new(path.clone());
        save(&storage, b"hello world").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"hello world");
    }

    #[test]
    fn save_replaces_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");

        let storage = Storage::new(path.clone());

        save(&storage, b"first").unwrap();
        save(&storage, b"second").unwrap();

        let content = fs::read(path).unwrap();
        assert_eq!(content, b"second");
    }

    #[test]
    fn save_with_streams_and_returns_value() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");

        let storage = Storage::new(path.clone());
        let written: io::Result<usize> = storage.save_with(|w| {
            for _ in 0..4 {
                w.write_all(b"abcd")?;
            }
            Ok(16)
        });

        assert_eq!(written.unwrap(), 16);
        assert_eq!(fs::read(path).unwrap(), b"abcdabcdabcdabcd");
    }

    #[test]
    fn failed_write_leaves_no_file_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");

        let storage = Storage::new(path.clone());
        let result: io::Result<()> = storage.save_with(|w| {
            w.write_all(b"partial")?;
            Err(io::Error::other("boom"))
        });

        assert!(result.is_err());
        assert!(!path.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn failed_write_keeps_previous_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");

        let storage = Storage::new(path.clone());
        save(&storage, b"original").unwrap();

        let result: io::Result<()> = storage.save_with(|_| Err(io::Error::other("boom")));
        assert!(result.is_err());
        assert_eq!(fs::read(path).unwrap(), b"original");
    }

    // --------------------------------------------------
    // RANDOM TMP PATH TESTS
    // --------------------------------------------------

    #[test]
    fn random_tmp_path_has_same_parent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");

        let storage = Storage::new(path.clone());
        let tmp = storage.random_tmp_path().unwrap();

        assert_eq!(tmp.parent(), path.parent());
        assert_ne!(tmp, path);
    }

    #[test]
    fn tmp_names_are_unique() {
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path().join("out.bin"));

        let a = storage.random_tmp_path().unwrap();
        let b = storage.random_tmp_path().unwrap();

        assert_ne!(a, b);
    }

    #[test]
    fn tmp_file_is_removed_after_success() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");

        save(&Storage::new(path.clone()), b"data").unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0], "out.bin");
    }

    #[test]
    fn parent_directory_is_created() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b").join("out.bin");

        save(&Storage::new(nested.clone()), b"data").unwrap();

        assert!(nested.exists());
    }
}
