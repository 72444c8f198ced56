//! On-disk formats.
//!
//! An encrypted container is a single text line:
//!
//! ```text
//! ALGORITHM|||PREFIX|||BASE64CIPHERTEXT
//! ```
//!
//! Its key record is an INI file in the key directory:
//!
//! ```text
//! [KeyData]
//! AlgorithmType=Aes
//! Prefix=<prefix>
//! Key=<base64 key>|||<base64 iv>
//! ```

pub mod container;
pub mod key_record;

pub use container::ContainerHeader;
pub use key_record::KeyRecord;

/// Separates the fields of containers and of the `Key` value.
///
/// Never occurs inside a field: tags and UUID prefixes are alphanumeric
/// with dashes, and base64 has no `|`.
pub const DELIMITER: &str = "|||";
/// Suffix of every encrypted container.
pub const ENCRYPTED_SUFFIX: &str = ".encrypted";
/// Suffix of an archived directory.
pub const ARCHIVE_SUFFIX: &str = ".zip";
/// Extension of key record files.
pub const KEY_RECORD_EXTENSION: &str = "ini";
