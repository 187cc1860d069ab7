//! File-to-file transform stages applied to dump artifacts.
//!
//! Every stage reads one file and writes a new one, flushed and synced
//! before returning, so the next stage always sees a complete input.

pub mod checksum;
pub mod compress;
pub mod crypto;
pub mod table_filter;

pub use checksum::sha256_file;
pub use compress::{compress_file, decompress_file};
pub use crypto::{decrypt_file, encrypt_file, ArtifactKey};
pub use table_filter::{filter_tables, TableFilter};

use tokio::io::{AsyncRead, AsyncReadExt};

/// Fill `buf` as far as the reader allows; short only at end of input.
pub(crate) async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
