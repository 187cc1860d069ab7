//! Streaming authenticated encryption for artifacts.
//!
//! Layout: `DBV1` magic, 7-byte random nonce prefix, then AES-256-GCM STREAM
//! (big-endian 32-bit counter) segments of 64 KiB plaintext + 16-byte tag.
//! The final segment is sealed with the last-block flag and is always
//! shorter than a full segment, so truncation is detected on decrypt.

use super::read_full;
use crate::utils::{BackupError, Result};
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::stream::{DecryptorBE32, EncryptorBE32};
use aes_gcm::{Aes256Gcm, KeyInit};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};

const MAGIC: &[u8; 4] = b"DBV1";
const NONCE_PREFIX_LEN: usize = 7;
const SEGMENT_LEN: usize = 64 * 1024;
const TAG_LEN: usize = 16;

/// 256-bit key derived from the configured passphrase.
#[derive(Clone)]
pub struct ArtifactKey([u8; 32]);

impl ArtifactKey {
    /// SHA-256 of the passphrase as the AES-256 key.
    pub fn from_passphrase(passphrase: &str) -> Self {
        Self(Sha256::digest(passphrase.as_bytes()).into())
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.0).map_err(|e| BackupError::Crypto(e.to_string()))
    }
}

impl fmt::Debug for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ArtifactKey(..)")
    }
}

fn seal_error(_: aes_gcm::aead::Error) -> BackupError {
    BackupError::Crypto("failed to encrypt segment".into())
}

fn open_error(_: aes_gcm::aead::Error) -> BackupError {
    BackupError::Crypto("authentication failed: wrong key or corrupted artifact".into())
}

/// Encrypt `src` into `dst`. Returns bytes written, header included.
pub async fn encrypt_file(key: &ArtifactKey, src: &Path, dst: &Path) -> Result<u64> {
    let mut prefix = [0u8; NONCE_PREFIX_LEN];
    rand::thread_rng().fill_bytes(&mut prefix);
    let mut encryptor = EncryptorBE32::from_aead(key.cipher()?, GenericArray::from_slice(&prefix));

    let mut reader = BufReader::new(File::open(src).await?);
    let mut writer = BufWriter::new(File::create(dst).await?);
    writer.write_all(MAGIC).await?;
    writer.write_all(&prefix).await?;
    let mut written = (MAGIC.len() + NONCE_PREFIX_LEN) as u64;

    let mut buf = vec![0u8; SEGMENT_LEN];
    loop {
        let n = read_full(&mut reader, &mut buf).await?;
        if n == SEGMENT_LEN {
            let sealed = encryptor.encrypt_next(&buf[..n]).map_err(seal_error)?;
            writer.write_all(&sealed).await?;
            written += sealed.len() as u64;
        } else {
            let sealed = encryptor.encrypt_last(&buf[..n]).map_err(seal_error)?;
            writer.write_all(&sealed).await?;
            written += sealed.len() as u64;
            break;
        }
    }

    writer.flush().await?;
    writer.get_mut().sync_all().await?;
    Ok(written)
}

/// Decrypt an artifact produced by [`encrypt_file`]. Returns plaintext size.
pub async fn decrypt_file(key: &ArtifactKey, src: &Path, dst: &Path) -> Result<u64> {
    let mut reader = BufReader::new(File::open(src).await?);

    let mut magic = [0u8; 4];
    let mut prefix = [0u8; NONCE_PREFIX_LEN];
    if reader.read_exact(&mut magic).await.is_err() || &magic != MAGIC {
        return Err(BackupError::Crypto(format!(
            "{} is not an encrypted backup artifact",
            src.display()
        )));
    }
    reader
        .read_exact(&mut prefix)
        .await
        .map_err(|_| BackupError::Crypto("truncated artifact header".into()))?;

    let mut decryptor = DecryptorBE32::from_aead(key.cipher()?, GenericArray::from_slice(&prefix));
    let mut writer = BufWriter::new(File::create(dst).await?);
    let mut written = 0u64;

    let mut buf = vec![0u8; SEGMENT_LEN + TAG_LEN];
    loop {
        let n = read_full(&mut reader, &mut buf).await?;
        if n == buf.len() {
            let plain = decryptor.decrypt_next(&buf[..n]).map_err(open_error)?;
            writer.write_all(&plain).await?;
            written += plain.len() as u64;
        } else {
            let plain = decryptor.decrypt_last(&buf[..n]).map_err(open_error)?;
            writer.write_all(&plain).await?;
            written += plain.len() as u64;
            break;
        }
    }

    writer.flush().await?;
    writer.get_mut().sync_all().await?;
    Ok(written)
}
