//! Line filter that narrows a mysqldump stream to selected tables.

use crate::utils::Result;
use std::collections::HashSet;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};

const TABLE_MARKERS: &[&[u8]] = &[
    b"-- Table structure for table `",
    b"-- Dumping data for table `",
    b"-- Temporary view structure for view `",
    b"-- Final view structure for view `",
];

const TRAILER_MARKERS: &[&[u8]] = &[b"-- Dumping routines for database", b"-- Dumping events for database"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Table { keep: bool },
    Trailer,
}

/// Tracks which section of a dump a line belongs to.
#[derive(Debug)]
pub struct TableFilter {
    tables: HashSet<String>,
    section: Section,
}

impl TableFilter {
    pub fn new<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tables: tables.into_iter().map(Into::into).collect(),
            section: Section::Preamble,
        }
    }

    /// Whether `line` should be passed on to the restore.
    pub fn keep(&mut self, line: &[u8]) -> bool {
        if let Some(name) = marked_table(line) {
            self.section = Section::Table {
                keep: self.tables.contains(name),
            };
        } else if TRAILER_MARKERS.iter().any(|m| line.starts_with(m)) {
            self.section = Section::Trailer;
        } else if is_session_restore(line) {
            return true;
        }

        match self.section {
            Section::Preamble | Section::Trailer => true,
            Section::Table { keep } => keep,
        }
    }
}

fn marked_table(line: &[u8]) -> Option<&str> {
    let rest = TABLE_MARKERS
        .iter()
        .find_map(|marker| line.strip_prefix(*marker))?;
    let end = rest.iter().position(|b| *b == b'`')?;
    std::str::from_utf8(&rest[..end]).ok()
}

/// `/*!40101 SET SQL_MODE=@OLD_SQL_MODE */;` style footer statements.
fn is_session_restore(line: &[u8]) -> bool {
    line.starts_with(b"/*!") && line.windows(6).any(|w| w == b"=@OLD_")
}

/// Copy `src` to `dst`, keeping only the sections of `tables`. Returns bytes kept.
pub async fn filter_tables(src: &Path, dst: &Path, tables: &[String]) -> Result<u64> {
    let mut filter = TableFilter::new(tables.iter().cloned());
    let mut reader = BufReader::new(File::open(src).await?);
    let mut writer = BufWriter::new(File::create(dst).await?);
    let mut line = Vec::new();
    let mut kept = 0u64;

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        if filter.keep(&line) {
            writer.write_all(&line).await?;
            kept += line.len() as u64;
        }
    }

    writer.flush().await?;
    writer.get_mut().sync_all().await?;
    Ok(kept)
}
