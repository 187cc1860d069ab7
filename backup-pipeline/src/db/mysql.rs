use super::DatabaseProbe;
use crate::config::DatabaseConfig;
use crate::process::{ProcessRunner, ProcessSpec};
use crate::utils::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const CHARSET: &str = "utf8mb4";

fn connection_args(spec: ProcessSpec, db: &DatabaseConfig) -> ProcessSpec {
    let spec = spec.args([
        format!("--host={}", db.host),
        format!("--port={}", db.port),
        format!("--user={}", db.user),
    ]);
    if db.password.is_empty() {
        spec
    } else {
        spec.env("MYSQL_PWD", db.password.clone())
    }
}

/// `mysqldump` invocation producing a consistent, self-contained SQL dump.
pub fn dump_command(bin: &str, db: &DatabaseConfig, database: &str, tables: &[String]) -> ProcessSpec {
    connection_args(ProcessSpec::new(bin), db)
        .args([
            "--single-transaction",
            "--routines",
            "--triggers",
            "--events",
            "--extended-insert",
            "--hex-blob",
        ])
        .arg(format!("--default-character-set={CHARSET}"))
        .arg(database)
        .args(tables.iter().cloned())
}

/// `mysql` client invocation that reads SQL from stdin into `database`.
pub fn restore_command(bin: &str, db: &DatabaseConfig, database: &str) -> ProcessSpec {
    connection_args(ProcessSpec::new(bin), db)
        .arg(format!("--default-character-set={CHARSET}"))
        .arg(database)
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

/// Talks to the server through the `mysql` command-line client.
pub struct MysqlCliProbe {
    runner: Arc<dyn ProcessRunner>,
    client_bin: String,
    config: DatabaseConfig,
}

impl MysqlCliProbe {
    /// Probe that shells out to the `mysql` client at `client_bin`.
    pub fn new(runner: Arc<dyn ProcessRunner>, client_bin: impl Into<String>, config: DatabaseConfig) -> Self {
        Self {
            runner,
            client_bin: client_bin.into(),
            config,
        }
    }

    fn query(&self, sql: &str) -> ProcessSpec {
        connection_args(ProcessSpec::new(&self.client_bin), &self.config)
            .args(["--batch", "--skip-column-names", "-e"])
            .arg(sql)
    }
}

#[async_trait]
impl DatabaseProbe for MysqlCliProbe {
    async fn ping(&self) -> bool {
        match self.runner.run_capture(&self.query("SELECT 1"), CancellationToken::new()).await {
            Ok(out) => out.trim() == "1",
            Err(e) => {
                tracing::warn!(error = %e, host = %self.config.host, "Database probe failed");
                false
            }
        }
    }

    async fn list_tables(&self, database: &str) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = {} AND table_type = 'BASE TABLE' ORDER BY table_name",
            quote_literal(database)
        );
        let out = self
            .runner
            .run_capture(&self.query(&sql), CancellationToken::new())
            .await?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }
}
