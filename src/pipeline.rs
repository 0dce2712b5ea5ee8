//! End-to-end backup and restore flows.
//!
//! One flow runs one database (or the media tree) through the chain:
//! dump, optional compression, optional encryption, storage. Restore
//! walks the chain backwards. Flows only raise errors; terminating the
//! process is the caller's business.

use std::io;

use derive_more::{Display, Error, From};

use crate::artifact::BackupArtifact;
use crate::connectors::{create_connector, Connector, DumpError, RestoreError};
use crate::filename::{sanitize_database_name, ContentType};
use crate::media;
use crate::settings::{Settings, SettingsError};
use crate::storage::{BackupFilters, Storage, StorageError};
use crate::transforms::{DecryptionError, EncryptionError};
use crate::util::retention::RetentionPolicy;

/// Options of a backup flow.
#[derive(Debug, Clone, Default)]
pub struct BackupOptions {
    pub compress: bool,
    pub encrypt: bool,

    /// Apply the retention policy after a successful backup.
    pub clean: bool,
}

/// Options of a restore flow.
#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    /// Explicit stored name; the latest matching backup otherwise.
    pub filepath: Option<String>,

    pub decrypt: bool,
    pub uncompress: bool,

    /// Passphrase for decryption; gpg prompts when absent.
    pub passphrase: Option<String>,
}

/// A backup or restore flow failed.
#[derive(Debug, Display, Error, From)]
pub enum BackupError {
    #[display("{_0}")]
    #[from]
    Settings(SettingsError),

    #[display("{_0}")]
    #[from]
    Dump(DumpError),

    #[display("{_0}")]
    #[from]
    Restore(RestoreError),

    #[display("{_0}")]
    #[from]
    Storage(StorageError),

    #[display("{_0}")]
    #[from]
    Encryption(EncryptionError),

    #[display("{_0}")]
    #[from]
    Decryption(DecryptionError),

    #[display("staging the backup failed: {_0}")]
    #[from]
    Io(io::Error),

    /// Media flows need a configured media root.
    #[display("no media_root configured")]
    MissingMediaRoot,
}

/// Backup one configured database.
///
/// Returns the stored name.
pub fn backup_database(
    settings: &Settings,
    storage: &Storage,
    alias: &str,
    options: &BackupOptions,
) -> Result<String, BackupError> {
    let connector_settings = settings.connector_settings(alias)?;
    let database_name = connector_settings.name.clone();
    let connector = create_connector(connector_settings);

    backup_with_connector(settings, storage, connector.as_ref(), &database_name, options)
}

/// Backup through an already-built connector.
pub fn backup_with_connector(
    settings: &Settings,
    storage: &Storage,
    connector: &dyn Connector,
    database_name: &str,
    options: &BackupOptions,
) -> Result<String, BackupError> {
    let dump = connector.create_dump()?;
    let mut artifact = BackupArtifact::database(
        dump,
        connector.extension(),
        database_name,
        &settings.server_name,
        storage.codec(),
    );

    if options.compress {
        artifact = artifact.compress(settings.spool_threshold)?;
    }
    if options.encrypt {
        artifact = artifact.encrypt(&settings.gpg, settings.spool_threshold)?;
    }

    let size = artifact.size()?;
    log::info!(target: "pipeline", "Storing {} ({size} bytes)", artifact.name);
    storage.write_file(&mut artifact.stream, &artifact.name)?;

    if options.clean {
        let filters = database_filters(settings, Some(database_name));
        let policy = RetentionPolicy::keep_newest(storage.default_keep(Some(ContentType::Db)));
        storage.clean_old_backups(&filters, &policy)?;
    }

    Ok(artifact.name)
}

/// Restore one configured database from a stored backup.
pub fn restore_database(
    settings: &Settings,
    storage: &Storage,
    alias: &str,
    options: &RestoreOptions,
) -> Result<(), BackupError> {
    let connector_settings = settings.connector_settings(alias)?;
    let database_name = connector_settings.name.clone();
    let connector = create_connector(connector_settings);

    restore_with_connector(settings, storage, connector.as_ref(), &database_name, options)
}

/// Restore through an already-built connector.
pub fn restore_with_connector(
    settings: &Settings,
    storage: &Storage,
    connector: &dyn Connector,
    database_name: &str,
    options: &RestoreOptions,
) -> Result<(), BackupError> {
    let name = match &options.filepath {
        Some(filepath) => filepath.clone(),
        None => storage.get_latest_backup(&database_filters(settings, Some(database_name)))?,
    };

    let stream = storage.read_file(&name)?;
    let mut artifact =
        BackupArtifact::from_stored(stream, &name, &settings.server_name, storage.codec());

    // When restoring the latest backup the stored name says what was
    // done to it; explicit flags still force either stage.
    let decrypt = options.decrypt || (options.filepath.is_none() && artifact.encrypted);
    let uncompress = options.uncompress || (options.filepath.is_none() && artifact.compressed);

    if decrypt {
        artifact = artifact.decrypt(options.passphrase.as_deref(), settings.spool_threshold)?;
    }
    if uncompress {
        artifact = artifact.uncompress(settings.spool_threshold)?;
    }

    connector.restore_dump(artifact.stream)?;
    Ok(())
}

/// Archive the media tree into storage.
pub fn backup_media(
    settings: &Settings,
    storage: &Storage,
    options: &BackupOptions,
) -> Result<String, BackupError> {
    let media_root = settings
        .media_root
        .as_deref()
        .ok_or(BackupError::MissingMediaRoot)?;

    let stream = media::create_archive(media_root, settings.spool_threshold)?;
    let mut artifact = BackupArtifact::media(
        stream,
        media::MEDIA_EXTENSION,
        &settings.server_name,
        storage.codec(),
    );

    if options.compress {
        artifact = artifact.compress(settings.spool_threshold)?;
    }
    if options.encrypt {
        artifact = artifact.encrypt(&settings.gpg, settings.spool_threshold)?;
    }

    let size = artifact.size()?;
    log::info!(target: "pipeline", "Storing {} ({size} bytes)", artifact.name);
    storage.write_file(&mut artifact.stream, &artifact.name)?;

    if options.clean {
        let filters = BackupFilters {
            content_type: Some(ContentType::Media),
            server_name: server_filter(settings),
            ..Default::default()
        };
        let policy = RetentionPolicy::keep_newest(storage.default_keep(Some(ContentType::Media)));
        storage.clean_old_backups(&filters, &policy)?;
    }

    Ok(artifact.name)
}

/// Restore the media tree from a stored archive.
pub fn restore_media(
    settings: &Settings,
    storage: &Storage,
    options: &RestoreOptions,
) -> Result<(), BackupError> {
    let media_root = settings
        .media_root
        .as_deref()
        .ok_or(BackupError::MissingMediaRoot)?;

    let name = match &options.filepath {
        Some(filepath) => filepath.clone(),
        None => {
            let filters = BackupFilters {
                content_type: Some(ContentType::Media),
                server_name: server_filter(settings),
                ..Default::default()
            };
            storage.get_latest_backup(&filters)?
        }
    };

    let stream = storage.read_file(&name)?;
    let mut artifact =
        BackupArtifact::from_stored(stream, &name, &settings.server_name, storage.codec());

    let decrypt = options.decrypt || (options.filepath.is_none() && artifact.encrypted);
    let uncompress = options.uncompress || (options.filepath.is_none() && artifact.compressed);

    if decrypt {
        artifact = artifact.decrypt(options.passphrase.as_deref(), settings.spool_threshold)?;
    }
    if uncompress {
        artifact = artifact.uncompress(settings.spool_threshold)?;
    }

    media::restore_archive(artifact.stream, media_root)?;
    Ok(())
}

/// Apply the retention policy outside a backup run.
pub fn clean_backups(
    settings: &Settings,
    storage: &Storage,
    content_type: Option<ContentType>,
    keep: Option<usize>,
) -> Result<Vec<String>, BackupError> {
    let filters = BackupFilters {
        content_type,
        server_name: server_filter(settings),
        ..Default::default()
    };
    let policy = RetentionPolicy::keep_newest(keep.unwrap_or(storage.default_keep(content_type)));

    Ok(storage.clean_old_backups(&filters, &policy)?)
}

fn database_filters(settings: &Settings, database_name: Option<&str>) -> BackupFilters {
    BackupFilters {
        content_type: Some(ContentType::Db),
        database: database_name.map(|name| sanitize_database_name(name).to_string()),
        server_name: server_filter(settings),
        ..Default::default()
    }
}

fn server_filter(settings: &Settings) -> Option<String> {
    if settings.server_name.is_empty() {
        None
    } else {
        Some(settings.server_name.clone())
    }
}
