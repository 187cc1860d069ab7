//! Backup Pipeline Library
//!
//! Dumps a MySQL database with the external client tools, compresses,
//! encrypts and checksums the artifact, places it locally and/or in cold
//! storage, and restores it again on request.

pub mod config;
pub mod daemon;
pub mod db;
pub mod jobs;
pub mod models;
pub mod process;
pub mod service;
pub mod storage;
pub mod transform;
pub mod utils;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::BackupConfig;
pub use service::BackupService;
pub use utils::errors::{BackupError, Result};
