//! Cryptographic primitives.
//!
//! Provides the supported algorithms, key material generation and the
//! streaming transforms used by the cipher engine.

pub mod aes;

use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;

use getrandom::fill;
use uuid::Uuid;
use zeroize::Zeroize;

use crate::error::{Error, Result};

/// Length of the encryption key (32 bytes / AES-256).
pub const KEY_LEN: usize = 32;
/// Length of the initialization vector (one AES block).
pub const IV_LEN: usize = 16;
/// Cipher block length in bytes.
pub const BLOCK_LEN: usize = 16;

/// Symmetric algorithms a container can be sealed with.
///
/// The tag written to containers and key records is [`Algorithm::tag`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    #[default]
    Aes,
}

impl Algorithm {
    pub fn tag(&self) -> &'static str {
        match self {
            Algorithm::Aes => "Aes",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("aes") {
            Ok(Algorithm::Aes)
        } else {
            // TripleDes, Des and Blowfish are recognised names without an
            // implementation; they land here too.
            Err(Error::UnsupportedAlgorithm(s.to_string()))
        }
    }
}

/// Key and IV for one invocation.
///
/// Every unit sealed in the same invocation shares one `KeyMaterial`; the
/// bytes are wiped on drop.
#[derive(Clone)]
pub struct KeyMaterial {
    key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.key.zeroize();
        self.iv.zeroize();
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial(..)")
    }
}

impl KeyMaterial {
    /// Generates fresh key material for `algorithm` from the OS RNG.
    pub fn generate(algorithm: Algorithm) -> Result<Self> {
        match algorithm {
            Algorithm::Aes => {
                let mut material = Self {
                    key: [0u8; KEY_LEN],
                    iv: [0u8; IV_LEN],
                };
                secure_random(&mut material.key)?;
                secure_random(&mut material.iv)?;
                Ok(material)
            }
        }
    }

    /// Rebuilds key material from decoded bytes, checking their lengths.
    pub fn from_slices(key: &[u8], iv: &[u8]) -> Result<Self, String> {
        let key: [u8; KEY_LEN] = key
            .try_into()
            .map_err(|_| format!("key must be {KEY_LEN} bytes, got {}", key.len()))?;
        let iv: [u8; IV_LEN] = iv
            .try_into()
            .map_err(|_| format!("iv must be {IV_LEN} bytes, got {}", iv.len()))?;
        Ok(Self { key, iv })
    }

    pub fn key(&self) -> &[u8; KEY_LEN] {
        &self.key
    }

    pub fn iv(&self) -> &[u8; IV_LEN] {
        &self.iv
    }
}

/// Fill buffer with cryptographically secure random bytes
fn secure_random(buf: &mut [u8]) -> Result<()> {
    fill(buf).map_err(|e| Error::Io(io::Error::other(format!("OS random generator unavailable: {e}"))))
}

/// Mints a fresh correlation prefix.
pub fn new_prefix() -> String {
    Uuid::new_v4().to_string()
}

/// Encrypts everything `reader` yields into `writer`, `chunk_size` bytes at
/// a time. Returns the number of plaintext bytes consumed.
pub fn encrypt_stream<R: Read, W: Write>(
    algorithm: Algorithm,
    material: &KeyMaterial,
    chunk_size: usize,
    reader: R,
    writer: W,
) -> io::Result<u64> {
    match algorithm {
        Algorithm::Aes => aes::encrypt_stream(material, chunk_size, reader, writer),
    }
}

/// Inverse of [`encrypt_stream`]. Returns the number of plaintext bytes
/// written.
pub fn decrypt_stream<R: Read, W: Write>(
    algorithm: Algorithm,
    material: &KeyMaterial,
    chunk_size: usize,
    reader: R,
    writer: W,
) -> io::Result<u64> {
    match algorithm {
        Algorithm::Aes => aes::decrypt_stream(material, chunk_size, reader, writer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn algorithm_parses_case_insensitively() {
        assert_eq!("Aes".parse::<Algorithm>().unwrap(), Algorithm::Aes);
        assert_eq!("AES".parse::<Algorithm>().unwrap(), Algorithm::Aes);
    }

    #[test]
    fn unimplemented_algorithms_are_rejected() {
        for name in ["TripleDes", "Des", "Blowfish", "rot13"] {
            match name.parse::<Algorithm>() {
                Err(Error::UnsupportedAlgorithm(n)) => assert_eq!(n, name),
                other => panic!("expected UnsupportedAlgorithm, got: {other:?}"),
            }
        }
    }

    #[test]
    fn generated_material_differs() {
        let a = KeyMaterial::generate(Algorithm::Aes).unwrap();
        let b = KeyMaterial::generate(Algorithm::Aes).unwrap();
        assert_ne!(a.key(), b.key());
        assert_ne!(a.iv(), b.iv());
    }

    #[test]
    fn from_slices_checks_lengths() {
        assert!(KeyMaterial::from_slices(&[0u8; KEY_LEN], &[0u8; IV_LEN]).is_ok());
        assert!(KeyMaterial::from_slices(&[0u8; 16], &[0u8; IV_LEN]).is_err());
        assert!(KeyMaterial::from_slices(&[0u8; KEY_LEN], &[0u8; 8]).is_err());
    }

    #[test]
    fn debug_does_not_leak_key() {
        let material = KeyMaterial::from_slices(&[7u8; KEY_LEN], &[9u8; IV_LEN]).unwrap();
        assert_eq!(format!("{material:?}"), "KeyMaterial(..)");
    }

    #[test]
    fn prefixes_do_not_collide() {
        let prefixes: HashSet<String> = (0..1000).map(|_| new_prefix()).collect();
        assert_eq!(prefixes.len(), 1000);
    }
}
