//! Key records: the INI half of a container/key pair.

use std::fmt;
use std::io::{self, Write};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::Local;
use ini::Ini;
use zeroize::Zeroizing;

use super::DELIMITER;
use crate::crypto::{Algorithm, KeyMaterial};
use crate::error::{Error, Result};

pub const SECTION: &str = "KeyData";
pub const ALGORITHM_KEY: &str = "AlgorithmType";
pub const PREFIX_KEY: &str = "Prefix";
pub const MATERIAL_KEY: &str = "Key";
/// Informational; never required when reading.
pub const CREATED_KEY: &str = "Created";

/// Algorithm tag, correlation prefix and encoded key material of one
/// container.
///
/// The fields are kept as text: the tag is compared against the container
/// and the key is only decoded once a container actually asks for it.
#[derive(Clone)]
pub struct KeyRecord {
    algorithm: String,
    prefix: String,
    key: Zeroizing<String>,
    created: Option<String>,
}

impl fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRecord")
            .field("algorithm", &self.algorithm)
            .field("prefix", &self.prefix)
            .field("created", &self.created)
            .finish_non_exhaustive()
    }
}

impl KeyRecord {
    /// Builds the record for a freshly sealed container.
    pub fn seal(algorithm: Algorithm, prefix: impl Into<String>, material: &KeyMaterial) -> Self {
        let key = Zeroizing::new(format!(
            "{}{DELIMITER}{}",
            STANDARD.encode(material.key()),
            STANDARD.encode(material.iv())
        ));

        Self {
            algorithm: algorithm.tag().to_string(),
            prefix: prefix.into(),
            key,
            created: Some(Local::now().to_rfc3339()),
        }
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn created(&self) -> Option<&str> {
        self.created.as_deref()
    }

    /// Decodes the `Key` value back into key material.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedKeyRecord`] if the value does not hold
    /// exactly two base64 fields of the right lengths.
    pub fn material(&self) -> Result<KeyMaterial> {
        let malformed = |reason: String| Error::MalformedKeyRecord {
            prefix: self.prefix.clone(),
            reason,
        };

        let mut parts = self.key.split(DELIMITER);
        let (Some(key), Some(iv), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(malformed("Key must hold exactly a key and an IV".into()));
        };

        let key = Zeroizing::new(
            STANDARD
                .decode(key.trim())
                .map_err(|e| malformed(format!("key is not base64: {e}")))?,
        );
        let iv = STANDARD
            .decode(iv.trim())
            .map_err(|e| malformed(format!("iv is not base64: {e}")))?;

        KeyMaterial::from_slices(&key, &iv).map_err(malformed)
    }

    pub fn to_ini(&self) -> Ini {
        let mut ini = Ini::new();
        ini.set_to(Some(SECTION), ALGORITHM_KEY.into(), self.algorithm.clone());
        ini.set_to(Some(SECTION), PREFIX_KEY.into(), self.prefix.clone());
        ini.set_to(Some(SECTION), MATERIAL_KEY.into(), self.key.to_string());
        if let Some(created) = &self.created {
            ini.set_to(Some(SECTION), CREATED_KEY.into(), created.clone());
        }
        ini
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        self.to_ini().write_to(writer)
    }

    /// Extracts a record from parsed INI data.
    ///
    /// Returns `None` when the `KeyData` section or any of the three
    /// required keys is missing.
    pub fn from_ini(ini: &Ini) -> Option<Self> {
        let section = ini.section(Some(SECTION))?;

        Some(Self {
            algorithm: section.get(ALGORITHM_KEY)?.to_string(),
            prefix: section.get(PREFIX_KEY)?.to_string(),
            key: Zeroizing::new(section.get(MATERIAL_KEY)?.to_string()),
            created: section.get(CREATED_KEY).map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{IV_LEN, KEY_LEN};
    use std::io::Cursor;

    fn material() -> KeyMaterial {
        KeyMaterial::from_slices(&[1u8; KEY_LEN], &[2u8; IV_LEN]).unwrap()
    }

    fn parse(text: &str) -> Option<KeyRecord> {
        let ini = Ini::read_from(&mut Cursor::new(text.as_bytes())).unwrap();
        KeyRecord::from_ini(&ini)
    }

    #[test]
    fn record_roundtrip_through_ini_text() {
        let record = KeyRecord::seal(Algorithm::Aes, "prefix-1", &material());

        let mut text = Vec::new();
        record.write_to(&mut text).unwrap();
        let text = String::from_utf8(text).unwrap();

        assert!(text.contains("[KeyData]"));
        assert!(text.contains("AlgorithmType=Aes"));
        assert!(text.contains("Prefix=prefix-1"));

        let parsed = parse(&text).unwrap();
        assert_eq!(parsed.algorithm(), "Aes");
        assert_eq!(parsed.prefix(), "prefix-1");
        assert!(parsed.created().is_some());

        let restored = parsed.material().unwrap();
        assert_eq!(restored.key(), material().key());
        assert_eq!(restored.iv(), material().iv());
    }

    #[test]
    fn key_value_uses_delimiter() {
        let record = KeyRecord::seal(Algorithm::Aes, "p", &material());
        let ini = record.to_ini();
        let key = ini.section(Some(SECTION)).unwrap().get(MATERIAL_KEY).unwrap();

        let parts: Vec<&str> = key.split(DELIMITER).collect();
        assert_eq!(parts.len(), 2);
        assert_eq!(STANDARD.decode(parts[0]).unwrap(), vec![1u8; KEY_LEN]);
        assert_eq!(STANDARD.decode(parts[1]).unwrap(), vec![2u8; IV_LEN]);
    }

    #[test]
    fn record_without_created_is_accepted() {
        let key = format!(
            "{}|||{}",
            STANDARD.encode([1u8; KEY_LEN]),
            STANDARD.encode([2u8; IV_LEN])
        );
        let text = format!("[KeyData]\nAlgorithmType=Aes\nPrefix=abc\nKey={key}\n");

        let record = parse(&text).unwrap();
        assert_eq!(record.created(), None);
        assert!(record.material().is_ok());
    }

    #[test]
    fn missing_required_field_yields_none() {
        assert!(parse("[KeyData]\nAlgorithmType=Aes\nPrefix=abc\n").is_none());
        assert!(parse("[KeyData]\nPrefix=abc\nKey=x|||y\n").is_none());
        assert!(parse("[Other]\nAlgorithmType=Aes\nPrefix=abc\nKey=x|||y\n").is_none());
    }

    #[test]
    fn undecodable_key_is_malformed() {
        let record = parse("[KeyData]\nAlgorithmType=Aes\nPrefix=abc\nKey=not*base64|||AAAA\n").unwrap();
        assert!(matches!(
            record.material(),
            Err(Error::MalformedKeyRecord { prefix, .. }) if prefix == "abc"
        ));
    }

    #[test]
    fn key_without_iv_is_malformed() {
        let key = STANDARD.encode([1u8; KEY_LEN]);
        let record = parse(&format!("[KeyData]\nAlgorithmType=Aes\nPrefix=abc\nKey={key}\n")).unwrap();
        assert!(record.material().is_err());
    }

    #[test]
    fn debug_hides_key() {
        let record = KeyRecord::seal(Algorithm::Aes, "p", &material());
        let shown = format!("{record:?}");
        assert!(!shown.contains(&STANDARD.encode([1u8; KEY_LEN])));
    }
}
