//! Encrypted container framing.
//!
//! The two header fields are read up to their delimiters; the payload is
//! then streamed through a base64 decoder, so a container is never loaded
//! whole.

use std::io::{self, BufRead, Read, Write};

use base64::engine::GeneralPurpose;
use base64::engine::general_purpose::STANDARD;
use base64::read::DecoderReader;
use base64::write::EncoderWriter;

use super::DELIMITER;
use crate::crypto::Algorithm;
use crate::error::{Error, Result};

/// Longest accepted header field, in bytes.
const MAX_FIELD_LEN: usize = 256;

/// The `ALGORITHM|||PREFIX|||` part of a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    algorithm: Algorithm,
    prefix: String,
}

impl ContainerHeader {
    pub fn new(algorithm: Algorithm, prefix: impl Into<String>) -> Self {
        Self {
            algorithm,
            prefix: prefix.into(),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Writes the header, including the delimiter that opens the payload.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write!(
            writer,
            "{}{DELIMITER}{}{DELIMITER}",
            self.algorithm.tag(),
            self.prefix
        )
    }

    /// Reads the header and leaves `reader` positioned at the payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedContainer`] if:
    /// - a field is missing its delimiter or is longer than 256 bytes
    /// - a field is not valid UTF-8
    /// - the prefix is empty
    /// - the algorithm tag is unknown
    pub fn read_from<R: BufRead>(reader: &mut R) -> Result<Self> {
        let tag = read_field(reader, "algorithm")?;
        let prefix = read_field(reader, "prefix")?;

        if prefix.is_empty() {
            return Err(Error::MalformedContainer("empty prefix field".into()));
        }

        let algorithm = tag
            .parse::<Algorithm>()
            .map_err(|_| Error::MalformedContainer(format!("unknown algorithm tag '{tag}'")))?;

        Ok(Self { algorithm, prefix })
    }
}

/// Wraps `writer` so that everything written to it is base64-encoded.
///
/// Call `finish` on the returned writer to flush the final quantum.
pub fn payload_writer<W: Write>(writer: W) -> EncoderWriter<'static, GeneralPurpose, W> {
    EncoderWriter::new(writer, &STANDARD)
}

/// Wraps the payload part of a container in a base64 decoder.
///
/// Line breaks are dropped before decoding; any other byte outside the
/// base64 alphabet (including a further `|||` field) fails the read with
/// `InvalidData`.
pub fn payload_reader<R: Read>(
    reader: R,
) -> DecoderReader<'static, GeneralPurpose, SkipLineBreaks<R>> {
    DecoderReader::new(SkipLineBreaks { inner: reader }, &STANDARD)
}

/// Reader adapter that removes `\r` and `\n`.
pub struct SkipLineBreaks<R> {
    inner: R,
}

impl<R: Read> Read for SkipLineBreaks<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let n = self.inner.read(buf)?;
            if n == 0 {
                return Ok(0);
            }

            let mut kept = 0;
            for i in 0..n {
                let b = buf[i];
                if b != b'\n' && b != b'\r' {
                    buf[kept] = b;
                    kept += 1;
                }
            }

            if kept > 0 {
                return Ok(kept);
            }
        }
    }
}

fn read_field<R: BufRead>(reader: &mut R, name: &str) -> Result<String> {
    let delim = DELIMITER.as_bytes();
    let mut bounded = reader.by_ref().take((MAX_FIELD_LEN + delim.len()) as u64);
    let mut raw = Vec::new();

    loop {
        let n = bounded
            .read_until(b'|', &mut raw)
            .map_err(Error::from_payload)?;

        if raw.ends_with(delim) {
            raw.truncate(raw.len() - delim.len());
            break;
        }
        if n == 0 {
            return Err(Error::MalformedContainer(format!(
                "missing or oversized {name} field"
            )));
        }
    }

    String::from_utf8(raw)
        .map_err(|_| Error::MalformedContainer(format!("{name} field is not valid UTF-8")))
}
