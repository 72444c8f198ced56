use anyhow::{Context as _, Result, bail};
use clap::{Parser, Subcommand};
mod prompt;
use crypass::drive::{self, SystemVolumes};
use crypass::keystore::KeyStore;
use crypass::resolver::{self, CipherUnit, UnitKind};
use crypass::{Algorithm, BatchReport, CancelToken, Config, Context, Crypass};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::EnvFilter;

#[derive(Debug, clap::Args)]
struct KeyArgs {
    /// File or directory to process (repeatable)
    #[arg(short, long = "target", value_name = "PATH", num_args = 1..)]
    targets: Vec<PathBuf>,

    /// Key directory; relative to the drive root when --drive is given
    #[arg(short, long, value_name = "DIR")]
    key: Option<PathBuf>,

    /// Label of the removable drive holding the keys
    #[arg(short, long, value_name = "LABEL")]
    drive: Option<String>,
}

#[derive(Debug, Parser)]
#[command(name = "crypass")]
#[command(
    version,
    about = "Encrypts files and directories with keys kept on a separate removable drive."
)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, global = true, value_name = "PATH", env = "CRYPASS_CONFIG")]
    config: Option<PathBuf>,

    /// Skip the confirmation prompt
    #[arg(short, long, global = true, default_value_t = false)]
    yes: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Encrypts targets and stores their keys
    #[command(arg_required_else_help = true)]
    Encrypt {
        #[command(flatten)]
        keys: KeyArgs,

        /// Name prefixed to every key record file
        #[arg(short, long, value_name = "NAME")]
        name: Option<String>,

        /// Cipher to use (default from config: Aes)
        #[arg(short, long, value_name = "ALGORITHM")]
        algorithm: Option<String>,
    },

    /// Decrypts .encrypted containers
    #[command(arg_required_else_help = true)]
    Decrypt {
        #[command(flatten)]
        keys: KeyArgs,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Cli::parse();

    let config = Config::load(args.config.as_deref())?;
    init_logging(&config);

    let cancel = CancelToken::new();
    let interrupts = Interrupts::new(cancel.clone());
    interrupts.install()?;

    let ctx = Context::with_cancel(config, cancel);

    let report = match args.command {
        Commands::Encrypt {
            keys,
            name,
            algorithm,
        } => {
            let name = name.unwrap_or_default();
            let algorithm: Algorithm = algorithm
                .as_deref()
                .unwrap_or(ctx.config().default_algorithm())
                .parse()?;
            let units = resolver::resolve_targets(&keys.targets)?;
            if name.trim().is_empty() {
                return Err(crypass::Error::MissingOption("key name").into());
            }

            let key_dir = key_directory(&ctx, &keys)?;
            print_plan("encrypt", &units, &key_dir);
            println!("Key name: {name}");
            println!("Algorithm: {algorithm}");
            if !interrupts.confirm(args.yes)? {
                println!("terminating");
                return Ok(());
            }

            // The default sub-directory on a fresh key drive does not exist yet.
            if keys.drive.is_some() {
                KeyStore::create(&key_dir)?;
            }

            let mut crypass = Crypass::new(ctx);
            let report = crypass.encrypt(&keys.targets, &key_dir, &name, algorithm)?;
            print_report("encrypted", &report);
            report
        }
        Commands::Decrypt { keys } => {
            let units = resolver::resolve_containers(&keys.targets)?;
            let key_dir = key_directory(&ctx, &keys)?;
            print_plan("decrypt", &units, &key_dir);
            if !interrupts.confirm(args.yes)? {
                println!("terminating");
                return Ok(());
            }

            let mut crypass = Crypass::new(ctx);
            let report = crypass.decrypt(&keys.targets, &key_dir)?;
            print_report("decrypted", &report);
            report
        }
    };

    let total = report.failed().len() + report.succeeded().len() + report.skipped();
    if report.was_cancelled() {
        bail!("cancelled; {} of {total} units were not processed", report.skipped());
    }
    if !report.is_success() {
        bail!("{} of {total} units failed", report.failed().len());
    }
    Ok(())
}

/// What a Ctrl-C does at the moment it arrives.
#[derive(Debug, PartialEq, Eq)]
enum Interrupt {
    /// Stop between units; the unit in flight finishes.
    Cancel,
    /// Leave at once with status 130.
    Exit,
}

/// Routes Ctrl-C to the cancel token, except while the confirmation prompt
/// is waiting or after a first Ctrl-C, where the process exits.
#[derive(Clone)]
struct Interrupts {
    cancel: CancelToken,
    prompting: Arc<AtomicBool>,
}

impl Interrupts {
    fn new(cancel: CancelToken) -> Self {
        Self {
            cancel,
            prompting: Arc::new(AtomicBool::new(false)),
        }
    }

    fn install(&self) -> Result<()> {
        let handler = self.clone();
        ctrlc::set_handler(move || match handler.on_interrupt() {
            Interrupt::Exit => std::process::exit(130),
            Interrupt::Cancel => {
                eprintln!("cancelling; press Ctrl-C again to abort immediately")
            }
        })
        .context("failed to install Ctrl-C handler")
    }

    fn on_interrupt(&self) -> Interrupt {
        if self.prompting.load(Ordering::SeqCst) || self.cancel.is_cancelled() {
            return Interrupt::Exit;
        }
        self.cancel.cancel();
        Interrupt::Cancel
    }

    fn confirm(&self, yes: bool) -> Result<bool> {
        if yes {
            return Ok(true);
        }
        self.prompting.store(true, Ordering::SeqCst);
        let answer = prompt::confirm("Do you want to continue?");
        self.prompting.store(false, Ordering::SeqCst);
        answer
    }
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_env("CRYPASS_LOG")
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn key_directory(ctx: &Context, keys: &KeyArgs) -> Result<PathBuf> {
    if let Some(label) = keys.drive.as_deref().filter(|l| !l.trim().is_empty()) {
        eprintln!("looking for drive '{label}'; connect it now if it is not attached");
    }
    let dir = drive::locate_key_directory(
        ctx,
        SystemVolumes,
        keys.drive.as_deref(),
        keys.key.as_deref(),
    )?;
    Ok(dir)
}

fn print_plan(operation: &str, units: &[CipherUnit], key_dir: &Path) {
    println!("Operation: {operation}");
    println!("Targets:");
    for unit in units {
        let kind = match unit.kind() {
            UnitKind::File => "file",
            UnitKind::Directory => "directory",
        };
        println!("  {} ({kind})", unit.path().display());
    }
    println!("Key directory: {}", key_dir.display());
}

fn print_report(verb: &str, report: &BatchReport) {
    for ok in report.succeeded() {
        println!("{verb} '{}' -> '{}'", ok.source.display(), ok.output.display());
    }
    for failed in report.failed() {
        eprintln!("failed '{}': {}", failed.path.display(), failed.error);
        if let Some(leftover) = &failed.leftover {
            eprintln!("  intermediate archive left at '{}'", leftover.display());
        }
    }
    if report.was_cancelled() {
        eprintln!("cancelled; {} units not started", report.skipped());
    }
    println!(
        "{} succeeded, {} failed",
        report.succeeded().len(),
        report.failed().len()
    );
}
