//! Long-running mode: cron-driven backups plus signal-driven shutdown.

pub mod scheduler;
pub mod shutdown;

pub use scheduler::BackupScheduler;
pub use shutdown::ShutdownCoordinator;
