use crate::utils::Result;
use async_compression::tokio::bufread::{GzipDecoder, GzipEncoder};
use async_compression::Level;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufReader};

/// gzip `src` into `dst` at `level` (0-9). Returns compressed size.
pub async fn compress_file(src: &Path, dst: &Path, level: u32) -> Result<u64> {
    let reader = BufReader::new(File::open(src).await?);
    let mut encoder = GzipEncoder::with_quality(reader, Level::Precise(level.min(9) as i32));
    let mut out = File::create(dst).await?;
    let written = tokio::io::copy(&mut encoder, &mut out).await?;
    out.flush().await?;
    out.sync_all().await?;
    Ok(written)
}

/// Inverse of [`compress_file`]. Returns decompressed size.
pub async fn decompress_file(src: &Path, dst: &Path) -> Result<u64> {
    let reader = BufReader::new(File::open(src).await?);
    let mut decoder = GzipDecoder::new(reader);
    decoder.multiple_members(true);
    let mut out = File::create(dst).await?;
    let written = tokio::io::copy(&mut decoder, &mut out).await?;
    out.flush().await?;
    out.sync_all().await?;
    Ok(written)
}
