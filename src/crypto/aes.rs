//! AES-256-CBC with PKCS#7 padding, applied chunk by chunk.
//!
//! Only one chunk of plaintext (plus one held-back block when decrypting)
//! is in memory at a time. There is no authentication tag: a wrong key or a
//! flipped bit shows up as a padding failure or as garbage plaintext.

use std::io::{self, Read, Write};

use aes::Aes256;
use cbc::cipher::block_padding::{Padding, Pkcs7};
use cbc::cipher::{Block, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use zeroize::{Zeroize, Zeroizing};

use super::{BLOCK_LEN, KeyMaterial};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Encrypt plaintext from `reader` into `writer`
pub fn encrypt_stream<R: Read, W: Write>(
    material: &KeyMaterial,
    chunk_size: usize,
    mut reader: R,
    mut writer: W,
) -> io::Result<u64> {
    let mut cipher = Aes256CbcEnc::new_from_slices(material.key(), material.iv())
        .map_err(|_| io::Error::other("invalid AES key or IV length"))?;

    let chunk = chunk_len(chunk_size);
    let mut buf = Zeroizing::new(vec![0u8; chunk]);
    let mut total = 0u64;

    loop {
        let filled = fill_chunk(&mut reader, &mut buf)?;
        total += filled as u64;

        if filled < chunk {
            let full = filled - filled % BLOCK_LEN;
            encrypt_blocks(&mut cipher, &mut buf[..full]);
            writer.write_all(&buf[..full])?;

            let rem = filled - full;
            let mut tail = [0u8; BLOCK_LEN];
            tail[..rem].copy_from_slice(&buf[full..filled]);
            let last = cipher
                .encrypt_padded_mut::<Pkcs7>(&mut tail, rem)
                .map_err(|_| io::Error::other("padding failed"))?;
            writer.write_all(last)?;
            tail.zeroize();
            break;
        }

        encrypt_blocks(&mut cipher, &mut buf);
        writer.write_all(&buf)?;
    }

    writer.flush()?;
    Ok(total)
}

/// Decrypt ciphertext from `reader` into `writer`
pub fn decrypt_stream<R: Read, W: Write>(
    material: &KeyMaterial,
    chunk_size: usize,
    mut reader: R,
    mut writer: W,
) -> io::Result<u64> {
    let mut cipher = Aes256CbcDec::new_from_slices(material.key(), material.iv())
        .map_err(|_| io::Error::other("invalid AES key or IV length"))?;

    let chunk = chunk_len(chunk_size);
    let mut buf = Zeroizing::new(vec![0u8; chunk]);
    // last decrypted block; it carries the padding if the stream ends here
    let mut held = Zeroizing::new([0u8; BLOCK_LEN]);
    let mut holding = false;
    let mut total = 0u64;

    loop {
        let filled = fill_chunk(&mut reader, &mut buf)?;
        if filled % BLOCK_LEN != 0 {
            return Err(invalid_data("ciphertext is not a whole number of blocks"));
        }
        if filled == 0 {
            break;
        }

        decrypt_blocks(&mut cipher, &mut buf[..filled]);

        if holding {
            writer.write_all(&held[..])?;
            total += BLOCK_LEN as u64;
        }
        let body = filled - BLOCK_LEN;
        writer.write_all(&buf[..body])?;
        total += body as u64;
        held.copy_from_slice(&buf[body..filled]);
        holding = true;

        if filled < chunk {
            break;
        }
    }

    if !holding {
        return Err(invalid_data("ciphertext is empty"));
    }

    let plain = Pkcs7::unpad(Block::<Aes256CbcDec>::from_slice(&held[..]))
        .map_err(|_| invalid_data("invalid padding (wrong key or corrupted data)"))?;
    writer.write_all(plain)?;
    total += plain.len() as u64;

    writer.flush()?;
    Ok(total)
}

fn encrypt_blocks(cipher: &mut Aes256CbcEnc, data: &mut [u8]) {
    for block in data.chunks_exact_mut(BLOCK_LEN) {
        cipher.encrypt_block_mut(Block::<Aes256CbcEnc>::from_mut_slice(block));
    }
}

fn decrypt_blocks(cipher: &mut Aes256CbcDec, data: &mut [u8]) {
    for block in data.chunks_exact_mut(BLOCK_LEN) {
        cipher.decrypt_block_mut(Block::<Aes256CbcDec>::from_mut_slice(block));
    }
}

/// Rounds `chunk_size` down to whole blocks, at least one.
fn chunk_len(chunk_size: usize) -> usize {
    (chunk_size / BLOCK_LEN).max(1) * BLOCK_LEN
}

/// Reads until `buf` is full or the reader is exhausted.
fn fill_chunk<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn invalid_data(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}
