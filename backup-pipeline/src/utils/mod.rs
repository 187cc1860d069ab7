//! Utility modules for the backup pipeline.

pub mod clock;
pub mod errors;
pub mod format;
pub mod logger;

pub use clock::{Clock, SystemClock};
pub use errors::{BackupError, Result};
