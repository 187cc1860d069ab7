//! In-memory job records and the concurrency guard.

pub mod registry;

pub use registry::{JobRegistry, SlotGuard, MAX_JOB_HISTORY};
