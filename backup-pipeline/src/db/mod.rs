//! The database as seen by the pipeline: a reachability probe and the
//! list of base tables. Everything else goes through the dump/restore tools.

pub mod mysql;

use crate::utils::Result;
use async_trait::async_trait;

#[async_trait]
pub trait DatabaseProbe: Send + Sync {
    /// Whether the server answers at all.
    async fn ping(&self) -> bool;

    /// Base tables of `database`, sorted by name.
    async fn list_tables(&self, database: &str) -> Result<Vec<String>>;
}

pub use mysql::{dump_command, restore_command, MysqlCliProbe};
