//! Cipher engine: turns units into containers plus key records and back.

use std::ffi::OsStr;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::archive;
use crate::context::Context;
use crate::crypto::{self, Algorithm, KeyMaterial};
use crate::error::{Error, Result};
use crate::format::container::{payload_reader, payload_writer};
use crate::format::{ARCHIVE_SUFFIX, ContainerHeader, ENCRYPTED_SUFFIX, KeyRecord};
use crate::keystore::{KeyStore, KeyTable};
use crate::resolver::{self, CipherUnit, UnitKind};
use crate::storage::Storage;

/// A unit that could not be processed.
///
/// `leftover` names an intermediate archive that was created for the unit
/// and is still on disk.
#[derive(Debug)]
pub struct UnitError {
    pub error: Error,
    pub leftover: Option<PathBuf>,
}

impl From<Error> for UnitError {
    fn from(error: Error) -> Self {
        Self {
            error,
            leftover: None,
        }
    }
}

impl fmt::Display for UnitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.leftover {
            Some(path) => write!(f, "{} (left behind '{}')", self.error, path.display()),
            None => write!(f, "{}", self.error),
        }
    }
}

/// Encrypts `plaintext` in memory under a fresh prefix.
///
/// Returns the complete container text and the matching key record.
pub fn seal_bytes(
    ctx: &mut Context,
    algorithm: Algorithm,
    material: &KeyMaterial,
    plaintext: &[u8],
) -> Result<(Vec<u8>, KeyRecord)> {
    let header = ContainerHeader::new(algorithm, crypto::new_prefix());
    let mut container = Vec::new();
    let n = write_container(ctx, &header, material, plaintext, &mut container)?;

    ctx.stats_mut().bytes_processed += n;
    Ok((container, KeyRecord::seal(algorithm, header.prefix(), material)))
}

/// Decrypts an in-memory container with the record whose prefix it names.
pub fn open_bytes(ctx: &mut Context, container: &[u8], table: &KeyTable) -> Result<Vec<u8>> {
    let mut reader = container;
    let header = ContainerHeader::read_from(&mut reader)?;
    let material = correlate(&header, table)?;

    let mut plaintext = Vec::new();
    let n = crypto::decrypt_stream(
        header.algorithm(),
        &material,
        ctx.chunk_size(),
        payload_reader(reader),
        &mut plaintext,
    )
    .map_err(Error::from_payload)?;

    ctx.stats_mut().bytes_processed += n;
    Ok(plaintext)
}

/// Encrypts the file at `src` into a container at `dest` under `prefix`.
///
/// The container only appears at `dest` once it is complete. Returns the
/// number of plaintext bytes read.
pub fn encrypt_file(
    ctx: &mut Context,
    algorithm: Algorithm,
    material: &KeyMaterial,
    prefix: &str,
    src: &Path,
    dest: &Path,
) -> Result<u64> {
    let header = ContainerHeader::new(algorithm, prefix);
    let source = BufReader::new(File::open(src)?);

    let n = Storage::new(dest)
        .save_with(|w| write_container(ctx, &header, material, source, w))?;

    ctx.stats_mut().bytes_processed += n;
    debug!(src = %src.display(), dest = %dest.display(), bytes = n, "sealed file");
    Ok(n)
}

/// Decrypts the container at `container` into `dest`, looking its key up in
/// `table`.
///
/// # Errors
///
/// - [`Error::NoMatchingKey`] or [`Error::AlgorithmMismatch`] when the
///   table has no usable record
/// - [`Error::MalformedContainer`] for a bad header, payload or padding
///
/// Nothing is written to `dest` on failure.
pub fn decrypt_file(
    ctx: &mut Context,
    container: &Path,
    dest: &Path,
    table: &KeyTable,
) -> Result<u64> {
    let mut reader = BufReader::new(File::open(container)?);
    let header = ContainerHeader::read_from(&mut reader)?;
    let material = correlate(&header, table)?;
    let chunk_size = ctx.chunk_size();

    let n = Storage::new(dest).save_with(|w| {
        crypto::decrypt_stream(
            header.algorithm(),
            &material,
            chunk_size,
            payload_reader(reader),
            w,
        )
        .map_err(Error::from_payload)
    })?;

    ctx.stats_mut().bytes_processed += n;
    debug!(container = %container.display(), dest = %dest.display(), bytes = n, "opened container");
    Ok(n)
}

/// Encrypts one unit, storing its key record in `store` under `label`.
///
/// The key record is written before the container. Returns the container
/// path.
pub fn encrypt_unit(
    ctx: &mut Context,
    unit: &CipherUnit,
    algorithm: Algorithm,
    material: &KeyMaterial,
    store: &KeyStore,
    label: &str,
) -> Result<PathBuf, UnitError> {
    let sealer = Sealer {
        algorithm,
        material,
        store,
        label,
    };
    let output = match unit.kind() {
        UnitKind::File => {
            let dest = resolver::with_suffix(unit.path(), ENCRYPTED_SUFFIX);
            sealer.seal(ctx, unit.file_name(), unit.path(), &dest)?;
            dest
        }
        UnitKind::Directory => {
            let zip = resolver::with_suffix(unit.path(), ARCHIVE_SUFFIX);
            if zip.exists() {
                return Err(Error::ArchiveExists(zip).into());
            }
            archive::pack_directory(unit.path(), &zip)?;

            let mut name = unit.file_name().to_os_string();
            name.push(ARCHIVE_SUFFIX);
            let dest = resolver::with_suffix(&zip, ENCRYPTED_SUFFIX);
            sealer
                .seal(ctx, &name, &zip, &dest)
                .and_then(|()| fs::remove_file(&zip).map_err(Error::from))
                .map_err(|error| UnitError {
                    error,
                    leftover: Some(zip.clone()),
                })?;
            dest
        }
    };

    ctx.stats_mut().units_encrypted += 1;
    info!(unit = %unit.path().display(), container = %output.display(), "encrypted");
    Ok(output)
}

/// Decrypts one container unit. Returns the restored file or directory.
pub fn decrypt_unit(
    ctx: &mut Context,
    unit: &CipherUnit,
    table: &KeyTable,
) -> Result<PathBuf, UnitError> {
    let plain = resolver::strip_suffix(unit.path(), ENCRYPTED_SUFFIX)
        .ok_or_else(|| Error::NotAContainer(unit.path().to_path_buf()))?;
    // The intermediate archive is removed after unpacking, so it must not
    // replace a zip the user already has there.
    if unit.kind() == UnitKind::Directory && plain.exists() {
        return Err(Error::ArchiveExists(plain).into());
    }

    decrypt_file(ctx, unit.path(), &plain, table)?;

    let output = match unit.kind() {
        UnitKind::File => plain,
        UnitKind::Directory => {
            let dir = resolver::strip_suffix(&plain, ARCHIVE_SUFFIX)
                .ok_or_else(|| Error::NotAContainer(unit.path().to_path_buf()))?;
            archive::unpack_archive(&plain, &dir)
                .and_then(|_| fs::remove_file(&plain).map_err(Error::from))
                .map_err(|error| UnitError {
                    error,
                    leftover: Some(plain.clone()),
                })?;
            dir
        }
    };

    ctx.stats_mut().units_decrypted += 1;
    info!(container = %unit.path().display(), output = %output.display(), "decrypted");
    Ok(output)
}

/// What every unit of one encrypt batch is sealed with.
struct Sealer<'a> {
    algorithm: Algorithm,
    material: &'a KeyMaterial,
    store: &'a KeyStore,
    label: &'a str,
}

impl Sealer<'_> {
    /// Writes the key record `<label>.<name>.ini`, then the container for
    /// `src`. A container that fails to materialise takes its fresh record
    /// with it.
    fn seal(&self, ctx: &mut Context, name: &OsStr, src: &Path, dest: &Path) -> Result<()> {
        let prefix = crypto::new_prefix();
        let record = KeyRecord::seal(self.algorithm, prefix.as_str(), self.material);
        let record_path = self.store.put(&record, self.label, name)?;

        if let Err(e) = encrypt_file(ctx, self.algorithm, self.material, &prefix, src, dest) {
            if let Err(rm) = fs::remove_file(&record_path) {
                warn!(path = %record_path.display(), error = %rm, "could not remove orphaned key record");
            }
            return Err(e);
        }
        Ok(())
    }
}

fn write_container<R: Read, W: Write>(
    ctx: &Context,
    header: &ContainerHeader,
    material: &KeyMaterial,
    source: R,
    mut out: W,
) -> Result<u64> {
    header.write_to(&mut out)?;

    let mut encoder = payload_writer(out);
    let n = crypto::encrypt_stream(
        header.algorithm(),
        material,
        ctx.chunk_size(),
        source,
        &mut encoder,
    )?;
    encoder.finish()?;
    Ok(n)
}

/// Finds the record for `header` and decodes its key material.
fn correlate(header: &ContainerHeader, table: &KeyTable) -> Result<KeyMaterial> {
    let record = table
        .find(header.prefix())
        .ok_or_else(|| Error::NoMatchingKey(header.prefix().to_string()))?;

    if record.algorithm().parse::<Algorithm>().ok() != Some(header.algorithm()) {
        return Err(Error::AlgorithmMismatch {
            prefix: header.prefix().to_string(),
            container: header.algorithm().tag().to_string(),
            record: record.algorithm().to_string(),
        });
    }

    record.material()
}
