//! Artifact naming: `{id}.sql`, then `.gz` if compressed, then `.enc` if encrypted.

use std::path::{Path, PathBuf};

/// `{id}.sql`, then `.gz` and `.enc` in the order the transforms are applied.
pub fn artifact_file_name(id: &str, compressed: bool, encrypted: bool) -> String {
    let mut name = format!("{id}.sql");
    if compressed {
        name.push_str(".gz");
    }
    if encrypted {
        name.push_str(".enc");
    }
    name
}

pub fn artifact_path(root: &Path, id: &str, compressed: bool, encrypted: bool) -> PathBuf {
    root.join(artifact_file_name(id, compressed, encrypted))
}

/// Every name a backup's artifact (or a leftover intermediate) can have.
pub fn artifact_variants(id: &str) -> [String; 4] {
    [
        artifact_file_name(id, false, false),
        artifact_file_name(id, true, false),
        artifact_file_name(id, false, true),
        artifact_file_name(id, true, true),
    ]
}

/// Object key in cold storage.
pub fn remote_key(prefix: &str, file_name: &str) -> String {
    if prefix.is_empty() || prefix.ends_with('/') {
        format!("{prefix}{file_name}")
    } else {
        format!("{prefix}/{file_name}")
    }
}

/// Ids become file names; anything that could escape the storage root is refused.
pub fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}
