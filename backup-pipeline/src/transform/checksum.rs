use super::read_full;
use crate::utils::Result;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs::File;

/// Hex SHA-256 of a file's contents.
pub async fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = read_full(&mut file, &mut buf).await?;
        hasher.update(&buf[..n]);
        if n < buf.len() {
            break;
        }
    }
    Ok(hex::encode(hasher.finalize()))
}
