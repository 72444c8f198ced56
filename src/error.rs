use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Coarse classification of [`Error`], used by the batch runner and the CLI
/// to decide how a failure is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or missing input; raised before anything is written.
    UserInput,
    /// A container, key record or archive could not be parsed.
    DataIntegrity,
    /// No usable key record for a container.
    Correlation,
    Cancelled,
    Io,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("the {0} was not specified")]
    MissingOption(&'static str),

    #[error("target '{}' was not found", .0.display())]
    TargetNotFound(PathBuf),

    #[error("target '{}' is not an encrypted container", .0.display())]
    NotAContainer(PathBuf),

    #[error("target '{}' does not name a file or directory", .0.display())]
    InvalidTarget(PathBuf),

    #[error("file '{}' ends in .zip and would decrypt as a directory; rename it first", .0.display())]
    ZipNamedFile(PathBuf),

    #[error("key directory '{}' must stay below the drive root", .0.display())]
    KeyDirectoryOutsideDrive(PathBuf),

    #[error("key directory '{}' was not found", .0.display())]
    KeyDirectoryNotFound(PathBuf),

    #[error("key record '{}' already exists", .0.display())]
    KeyRecordExists(PathBuf),

    #[error("archive '{}' already exists", .0.display())]
    ArchiveExists(PathBuf),

    #[error("algorithm '{0}' is not supported (supported: Aes)")]
    UnsupportedAlgorithm(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("malformed container: {0}")]
    MalformedContainer(String),

    #[error("malformed key record for prefix '{prefix}': {reason}")]
    MalformedKeyRecord { prefix: String, reason: String },

    #[error("archive entry '{0}' escapes the destination directory")]
    UnsafeArchiveEntry(String),

    #[error("no key record matches prefix '{0}'")]
    NoMatchingKey(String),

    #[error("algorithm mismatch for prefix '{prefix}': container uses {container}, key record uses {record}")]
    AlgorithmMismatch {
        prefix: String,
        container: String,
        record: String,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MissingOption(_)
            | Error::TargetNotFound(_)
            | Error::NotAContainer(_)
            | Error::InvalidTarget(_)
            | Error::ZipNamedFile(_)
            | Error::KeyDirectoryOutsideDrive(_)
            | Error::KeyDirectoryNotFound(_)
            | Error::KeyRecordExists(_)
            | Error::ArchiveExists(_)
            | Error::UnsupportedAlgorithm(_)
            | Error::InvalidConfig(_) => ErrorKind::UserInput,
            Error::MalformedContainer(_)
            | Error::MalformedKeyRecord { .. }
            | Error::UnsafeArchiveEntry(_)
            | Error::Archive(_) => ErrorKind::DataIntegrity,
            Error::NoMatchingKey(_) | Error::AlgorithmMismatch { .. } => ErrorKind::Correlation,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Walk(_) | Error::Io(_) => ErrorKind::Io,
        }
    }

    /// Maps an I/O error raised while reading a container payload. Decoding
    /// and padding failures surface as `InvalidData`/`UnexpectedEof` and
    /// describe the container, not the disk.
    pub(crate) fn from_payload(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
                Error::MalformedContainer(err.to_string())
            }
            _ => Error::Io(err),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
