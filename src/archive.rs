//! Directory ↔ zip blob.

use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Component, Path};

use tracing::debug;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{Error, Result};
use crate::storage::Storage;

/// Packs every file and directory below `dir` into a deflate zip at
/// `archive`, with entry names relative to `dir`. Returns the number of
/// files packed.
///
/// The archive only appears once it is complete: if walking the tree or
/// reading a file fails, nothing is left at `archive`.
pub fn pack_directory(dir: &Path, archive: &Path) -> Result<usize> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let files = Storage::new(archive).save_with(|w| -> Result<usize> {
        let mut zip = ZipWriter::new(w);
        let mut files = 0;

        for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
            let entry = entry?;
            let name = entry_name(dir, entry.path())?;

            if entry.file_type().is_dir() {
                zip.add_directory(name, options)?;
            } else if entry.file_type().is_file() {
                zip.start_file(name, options)?;
                let mut source = File::open(entry.path())?;
                io::copy(&mut source, &mut zip)?;
                files += 1;
            } else {
                debug!(path = %entry.path().display(), "skipping non-regular file");
            }
        }

        zip.finish()?;
        Ok(files)
    })?;

    debug!(dir = %dir.display(), archive = %archive.display(), files, "packed directory");
    Ok(files)
}

/// Extracts `archive` into `dest`, creating it. Existing files are
/// overwritten. Returns the number of files written.
///
/// # Errors
///
/// Returns [`Error::UnsafeArchiveEntry`] for entries whose name is absolute
/// or climbs out of `dest`.
pub fn unpack_archive(archive: &Path, dest: &Path) -> Result<usize> {
    let mut zip = ZipArchive::new(BufReader::new(File::open(archive)?))?;
    fs::create_dir_all(dest)?;

    let mut files = 0;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let relative = entry
            .enclosed_name()
            .map(|p| p.to_path_buf())
            .ok_or_else(|| Error::UnsafeArchiveEntry(entry.name().to_string()))?;
        let target = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
        files += 1;
    }

    debug!(archive = %archive.display(), dest = %dest.display(), files, "unpacked archive");
    Ok(files)
}

/// Zip entry name for `path` below `root`, `/`-separated.
fn entry_name(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| Error::InvalidTarget(path.to_path_buf()))?;

    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    Ok(parts.join("/"))
}
