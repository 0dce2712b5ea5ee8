//! Database connectors.
//!
//! A connector translates a logical dump or restore request into
//! invocations of the engine's own tooling:
//!
//! - [postgres]: `pg_dump`/`psql`/`pg_restore`, plain-text, custom-format
//!   and PostGIS variants.
//! - [mysql]: `mysqldump`/`mysql`.
//! - [mongodb]: `mongodump`/`mongorestore` in `--archive` stream mode.
//! - [sqlite]: SQL replay through the `sqlite3` shell, or a raw file
//!   copy of the database.

pub mod command;
pub mod mongodb;
pub mod mysql;
pub mod postgres;
pub mod sqlite;

use std::collections::HashMap;
use std::io;

use clap::ValueEnum;
use derive_more::{Display, Error, From};

pub use command::{CommandError, CommandRunner, ToolCommand};
pub use mongodb::MongoDumpConnector;
pub use mysql::MysqlDumpConnector;
pub use postgres::{PgDumpBinaryConnector, PgDumpConnector, PgDumpGisConnector};
pub use sqlite::{SqliteConnector, SqliteCopyConnector};

use crate::settings::{ConnectorOverrides, DatabaseSettings};
use crate::util::spool::SpooledStream;

/// Database engine a connector speaks to.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, ValueEnum, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Engine {
    /// SQL-text dump and replay through the `sqlite3` shell.
    #[display("sqlite")]
    Sqlite,
    /// Raw byte copy of the SQLite database file.
    #[display("sqlite_copy")]
    SqliteCopy,
    #[display("mysql")]
    Mysql,
    /// Plain-text SQL dump via `pg_dump`, restore via `psql`.
    #[display("postgres")]
    Postgres,
    /// Custom-format dump via `pg_dump`, restore via `pg_restore`.
    #[display("postgres_binary")]
    PostgresBinary,
    /// [Engine::Postgres] with a PostGIS extension pre-step on restore.
    #[display("postgis")]
    Postgis,
    #[display("mongodb")]
    Mongodb,
}

/// Merged configuration one connector instance runs with.
///
/// Built once from the connection settings plus the override layer,
/// override values winning.
#[derive(Debug, Clone)]
pub struct ConnectorSettings {
    pub engine: Engine,
    pub name: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub admin_user: Option<String>,
    pub admin_password: Option<String>,
    pub exclude: Vec<String>,
    pub schemas: Vec<String>,
    pub env: Vec<(String, String)>,
    pub dump_prefix: Vec<String>,
    pub dump_suffix: Vec<String>,
    pub restore_prefix: Vec<String>,
    pub restore_suffix: Vec<String>,
    pub drop: bool,
    pub single_transaction: bool,
    pub object_check: bool,
    pub auth_source: Option<String>,
    pub continue_on_statement_error: bool,
    pub spool_threshold: usize,
}

impl ConnectorSettings {
    /// Layer `overrides` over `database`, later layer winning.
    pub fn merged(
        database: &DatabaseSettings,
        overrides: Option<&ConnectorOverrides>,
        spool_threshold: usize,
    ) -> Self {
        let ov = overrides.cloned().unwrap_or_default();

        Self {
            engine: ov.engine.unwrap_or(database.engine),
            name: ov.name.unwrap_or_else(|| database.name.clone()),
            host: ov.host.or_else(|| database.host.clone()),
            port: ov.port.or(database.port),
            user: ov.user.or_else(|| database.user.clone()),
            password: ov.password.or_else(|| database.password.clone()),
            admin_user: ov.admin_user,
            admin_password: ov.admin_password,
            exclude: ov.exclude.unwrap_or_default(),
            schemas: ov.schemas.unwrap_or_default(),
            env: ov
                .env
                .map(sorted_env)
                .unwrap_or_default(),
            dump_prefix: ov.dump_prefix.unwrap_or_default(),
            dump_suffix: ov.dump_suffix.unwrap_or_default(),
            restore_prefix: ov.restore_prefix.unwrap_or_default(),
            restore_suffix: ov.restore_suffix.unwrap_or_default(),
            drop: ov.drop.unwrap_or(true),
            single_transaction: ov.single_transaction.unwrap_or(true),
            object_check: ov.object_check.unwrap_or(true),
            auth_source: ov.auth_source,
            continue_on_statement_error: ov.continue_on_statement_error.unwrap_or(true),
            spool_threshold,
        }
    }

    /// Runner primed with this connection's secrets for redaction.
    pub fn runner(&self) -> CommandRunner {
        let mut secrets = Vec::new();
        if let Some(password) = &self.password {
            secrets.push(password.clone());
        }
        if let Some(password) = &self.admin_password {
            secrets.push(password.clone());
        }

        CommandRunner::new(self.spool_threshold, secrets)
    }
}

/// Relay tool stderr emitted on success as warnings.
pub(crate) fn relay_stderr(target: &str, stderr: &str) {
    if !stderr.is_empty() {
        log::warn!(target: target, "{}", stderr.trim_end());
    }
}

/// Deterministic ordering for env overrides read from a map.
fn sorted_env(env: HashMap<String, String>) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = env.into_iter().collect();
    pairs.sort();
    pairs
}

/// Dumping a database failed.
#[derive(Debug, Display, Error, From)]
pub enum DumpError {
    /// The dump tool failed.
    #[display("dump command failed: {_0}")]
    #[from]
    Command(CommandError),

    /// Staging the dump stream failed.
    #[display("staging the dump failed: {_0}")]
    #[from]
    Io(io::Error),

    /// Tool output could not be interpreted.
    #[display("unreadable dump tool output: {_0}")]
    MalformedToolOutput(#[error(ignore)] String),
}

/// Restoring a database failed.
#[derive(Debug, Display, Error, From)]
pub enum RestoreError {
    /// The restore tool failed.
    #[display("restore command failed: {_0}")]
    #[from]
    Command(CommandError),

    /// Feeding the dump stream failed.
    #[display("reading the dump failed: {_0}")]
    #[from]
    Io(io::Error),
}

/// A database connector: dumps to and restores from a byte stream.
pub trait Connector {
    /// Dump the database into a rewound stream.
    fn create_dump(&self) -> Result<SpooledStream, DumpError>;

    /// Restore the database from a dump stream.
    fn restore_dump(&self, dump: SpooledStream) -> Result<(), RestoreError>;

    /// File extension of dumps produced by this connector.
    fn extension(&self) -> &str;
}

/// Instantiate the connector for the engine selected in `settings`.
pub fn create_connector(settings: ConnectorSettings) -> Box<dyn Connector> {
    match settings.engine {
        Engine::Sqlite => Box::new(SqliteConnector::new(settings)),
        Engine::SqliteCopy => Box::new(SqliteCopyConnector::new(settings)),
        Engine::Mysql => Box::new(MysqlDumpConnector::new(settings)),
        Engine::Postgres => Box::new(PgDumpConnector::new(settings)),
        Engine::PostgresBinary => Box::new(PgDumpBinaryConnector::new(settings)),
        Engine::Postgis => Box::new(PgDumpGisConnector::new(settings)),
        Engine::Mongodb => Box::new(MongoDumpConnector::new(settings)),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Settings for command construction tests.
    pub fn settings(engine: Engine, name: &str) -> ConnectorSettings {
        ConnectorSettings {
            engine,
            name: name.to_string(),
            host: None,
            port: None,
            user: None,
            password: None,
            admin_user: None,
            admin_password: None,
            exclude: Vec::new(),
            schemas: Vec::new(),
            env: Vec::new(),
            dump_prefix: Vec::new(),
            dump_suffix: Vec::new(),
            restore_prefix: Vec::new(),
            restore_suffix: Vec::new(),
            drop: false,
            single_transaction: false,
            object_check: false,
            auth_source: None,
            continue_on_statement_error: true,
            spool_threshold: 1024 * 1024,
        }
    }
}
