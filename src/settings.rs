//! Static configuration of a backup run.
//!
//! The whole configuration is read once at startup from a TOML file
//! into an immutable [Settings] value and passed by reference into the
//! pipeline. Nothing reads ambient global state afterwards.

use std::collections::HashMap;

use derive_more::{Display, Error};

use crate::connectors::{ConnectorSettings, Engine};
use crate::filename;
use crate::util::spool::DEFAULT_SPOOL_THRESHOLD;

/// Default number of database backups kept by cleanup.
pub const DEFAULT_CLEANUP_KEEP: usize = 10;

/// Default number of media backups kept by cleanup.
pub const DEFAULT_CLEANUP_KEEP_MEDIA: usize = 7;

/// Top-level configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Name of the server the backups originate from, embedded into
    /// every backup name.
    pub server_name: String,

    /// Template for database backup names.
    pub filename_template: String,

    /// Template for media backup names.
    pub media_filename_template: String,

    /// strftime-style format of the datetime embedded in backup names.
    pub date_format: String,

    /// How many database backups cleanup keeps.
    pub cleanup_keep: usize,

    /// How many media backups cleanup keeps.
    pub cleanup_keep_media: usize,

    /// In-memory bytes before dump payloads spill to disk.
    pub spool_threshold: usize,

    /// Root of the media file tree backed up by media backups.
    pub media_root: Option<std::path::PathBuf>,

    /// Storage backend selection and its options.
    pub storage: StorageSettings,

    /// Encryption settings for the `gpg` transform.
    pub gpg: GpgSettings,

    /// Database connections, keyed by a caller-chosen alias.
    pub databases: HashMap<String, DatabaseSettings>,

    /// Connector overrides, keyed by the same alias. Override values
    /// take precedence over the connection values.
    pub connector_overrides: HashMap<String, ConnectorOverrides>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_name: String::new(),
            filename_template: filename::DEFAULT_FILENAME_TEMPLATE.to_string(),
            media_filename_template: filename::DEFAULT_MEDIA_FILENAME_TEMPLATE.to_string(),
            date_format: filename::DEFAULT_DATE_FORMAT.to_string(),
            cleanup_keep: DEFAULT_CLEANUP_KEEP,
            cleanup_keep_media: DEFAULT_CLEANUP_KEEP_MEDIA,
            spool_threshold: DEFAULT_SPOOL_THRESHOLD,
            media_root: None,
            storage: StorageSettings::default(),
            gpg: GpgSettings::default(),
            databases: HashMap::new(),
            connector_overrides: HashMap::new(),
        }
    }
}

/// Storage backend selection.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Backend identifier, matched case-insensitively.
    pub backend: String,

    /// Backend-specific options, keys matched case-insensitively.
    pub options: HashMap<String, String>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: "filesystem".to_string(),
            options: HashMap::new(),
        }
    }
}

/// OpenPGP transform settings.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct GpgSettings {
    /// Key the backups are encrypted to.
    pub recipient: Option<String>,

    /// Pass `--trust-model always` to gpg.
    pub always_trust: bool,
}

/// One database connection.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Database engine driving the connector choice.
    pub engine: Engine,

    /// Database name, or the database file path for SQLite engines.
    pub name: String,

    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            engine: Engine::Postgres,
            name: String::new(),
            host: None,
            port: None,
            user: None,
            password: None,
        }
    }
}

/// Connector-specific overrides layered over a [DatabaseSettings].
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ConnectorOverrides {
    pub engine: Option<Engine>,
    pub name: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,

    /// Administrative user for side-effecting pre-steps.
    pub admin_user: Option<String>,
    pub admin_password: Option<String>,

    /// Tables or collections excluded from dumps.
    pub exclude: Option<Vec<String>>,

    /// Schemas restricted to (Postgres engines).
    pub schemas: Option<Vec<String>>,

    /// Extra environment variables for the dump and restore tools.
    pub env: Option<HashMap<String, String>>,

    /// Extra arguments injected around the dump command.
    pub dump_prefix: Option<Vec<String>>,
    pub dump_suffix: Option<Vec<String>>,

    /// Extra arguments injected around the restore command.
    pub restore_prefix: Option<Vec<String>>,
    pub restore_suffix: Option<Vec<String>>,

    /// Drop existing objects before restoring.
    pub drop: Option<bool>,

    /// Run the restore in a single transaction (Postgres engines).
    pub single_transaction: Option<bool>,

    /// Validate objects while restoring (MongoDB).
    pub object_check: Option<bool>,

    /// Authentication database (MongoDB).
    pub auth_source: Option<String>,

    /// Keep replaying statements after one fails (SQLite).
    pub continue_on_statement_error: Option<bool>,
}

/// Configuration of one database is unusable.
#[derive(Debug, Display, Error)]
pub enum SettingsError {
    /// No database with the requested alias is configured.
    #[display("no database named {_0:?} is configured")]
    UnknownDatabase(#[error(ignore)] String),

    /// The merged connection has an empty database name.
    #[display("database {_0:?} has no NAME configured")]
    MissingName(#[error(ignore)] String),
}

impl Settings {
    /// Merge the connection and override layers of `alias` into the
    /// settings one connector instance runs with.
    ///
    /// Override values win over connection values.
    pub fn connector_settings(&self, alias: &str) -> Result<ConnectorSettings, SettingsError> {
        let database = self
            .databases
            .get(alias)
            .ok_or_else(|| SettingsError::UnknownDatabase(alias.to_string()))?;
        let overrides = self.connector_overrides.get(alias);

        let merged = ConnectorSettings::merged(database, overrides, self.spool_threshold);
        if merged.name.is_empty() {
            return Err(SettingsError::MissingName(alias.to_string()));
        }

        Ok(merged)
    }

    /// Aliases of all configured databases, sorted for deterministic
    /// processing order.
    pub fn database_aliases(&self) -> Vec<&str> {
        let mut aliases: Vec<&str> = self.databases.keys().map(String::as_str).collect();
        aliases.sort_unstable();
        aliases
    }
}
