mod archive;
pub mod config;
pub mod context;
pub mod crypto;
pub mod drive;
pub mod engine;
pub mod error;
pub mod format;
pub mod keystore;
pub mod resolver;
mod storage;

pub use crate::config::Config;
pub use crate::context::{CancelToken, Context, Stats};
pub use crate::crypto::Algorithm;
pub use crate::error::{Error, ErrorKind, Result};

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::crypto::KeyMaterial;
use crate::keystore::KeyStore;
use crate::resolver::CipherUnit;

/// A unit that was processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSuccess {
    pub source: PathBuf,
    pub output: PathBuf,
}

/// A unit that failed. `leftover` is an intermediate archive still on disk.
#[derive(Debug)]
pub struct UnitFailure {
    pub path: PathBuf,
    pub error: Error,
    pub leftover: Option<PathBuf>,
}

/// Outcome of one encrypt or decrypt invocation.
///
/// A cancelled batch still carries the units that ran before the stop.
#[derive(Debug, Default)]
pub struct BatchReport {
    succeeded: Vec<UnitSuccess>,
    failed: Vec<UnitFailure>,
    skipped: usize,
}

impl BatchReport {
    pub fn succeeded(&self) -> &[UnitSuccess] {
        &self.succeeded
    }

    pub fn failed(&self) -> &[UnitFailure] {
        &self.failed
    }

    /// Units never started because the batch was cancelled.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn was_cancelled(&self) -> bool {
        self.skipped > 0
    }

    /// `true` when every unit went through.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped == 0
    }

    fn record(&mut self, unit: &CipherUnit, outcome: Result<PathBuf, engine::UnitError>) {
        match outcome {
            Ok(output) => self.succeeded.push(UnitSuccess {
                source: unit.path().to_path_buf(),
                output,
            }),
            Err(e) => {
                warn!(unit = %unit.path().display(), error = %e, "unit failed");
                self.failed.push(UnitFailure {
                    path: unit.path().to_path_buf(),
                    error: e.error,
                    leftover: e.leftover,
                });
            }
        }
    }
}

/// Encrypts and decrypts batches of targets against a key directory.
pub struct Crypass {
    ctx: Context,
}

impl Crypass {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Encrypts every target, storing one key record per unit in `key_dir`
    /// under `label`.
    ///
    /// All units share one freshly generated key and IV; each gets its own
    /// prefix. Bad targets, an empty label or a missing key directory fail
    /// before anything is written. After that, a failing unit is recorded
    /// in the report and the remaining units still run.
    pub fn encrypt(
        &mut self,
        targets: &[PathBuf],
        key_dir: &Path,
        label: &str,
        algorithm: Algorithm,
    ) -> Result<BatchReport> {
        if label.trim().is_empty() {
            return Err(Error::MissingOption("key name"));
        }
        let units = resolver::resolve_targets(targets)?;
        let store = KeyStore::open(key_dir)?;
        let material = KeyMaterial::generate(algorithm)?;

        info!(units = units.len(), %algorithm, key_dir = %key_dir.display(), "encrypting");

        Ok(self.run_batch(&units, |ctx, unit| {
            engine::encrypt_unit(ctx, unit, algorithm, &material, &store, label)
        }))
    }

    /// Decrypts every container with the records found in `key_dir`.
    pub fn decrypt(&mut self, targets: &[PathBuf], key_dir: &Path) -> Result<BatchReport> {
        let units = resolver::resolve_containers(targets)?;
        let table = KeyStore::open(key_dir)?.load_all()?;

        info!(units = units.len(), records = table.len(), "decrypting");

        Ok(self.run_batch(&units, |ctx, unit| engine::decrypt_unit(ctx, unit, &table)))
    }

    /// Runs `step` on each unit in order. Cancellation is checked between
    /// units; the unit in flight finishes and the rest are counted as skipped.
    fn run_batch<F>(&mut self, units: &[CipherUnit], mut step: F) -> BatchReport
    where
        F: FnMut(&mut Context, &CipherUnit) -> Result<PathBuf, engine::UnitError>,
    {
        let mut report = BatchReport::default();
        for (done, unit) in units.iter().enumerate() {
            if self.ctx.is_cancelled() {
                report.skipped = units.len() - done;
                warn!(skipped = report.skipped, "batch cancelled");
                break;
            }
            let outcome = step(&mut self.ctx, unit);
            report.record(unit, outcome);
        }
        report
    }
}
