//! Uniform storage layer over pluggable backends.
//!
//! A [Storage] wraps exactly one [StorageBackend] and layers listing,
//! filtering and retention cleanup on top of its four primitive
//! operations. Backends only move bytes by name; every bit of backup
//! semantics lives here and in the filename codec.

pub mod filesystem;
pub mod memory;

use std::io;

use chrono::NaiveDateTime;
use derive_more::{Display, Error, From};

pub use filesystem::FilesystemBackend;
pub use memory::MemoryBackend;

use crate::filename::{ContentType, FilenameCodec, Template, MEDIA_MARKER};
use crate::settings::Settings;
use crate::transforms::{COMPRESS_SUFFIX, ENCRYPT_SUFFIX};
use crate::util::retention::RetentionPolicy;
use crate::util::spool::SpooledStream;

/// A storage operation failed.
#[derive(Debug, Display, Error, From)]
pub enum StorageError {
    /// No stored backup matches the query, or the named file does not
    /// exist on the backend.
    #[display("no backup file found")]
    FileNotFound,

    /// The backend itself failed (network, auth, disk).
    #[display("storage backend error: {_0}")]
    #[from]
    Backend(io::Error),

    /// The configured backend identifier is not known.
    #[display("unknown storage backend: {_0}")]
    UnknownBackend(#[error(ignore)] String),
}

/// Primitive operations a storage backend provides.
///
/// Anything that can write, read, list and delete by name can back a
/// [Storage]: a local directory, an object store bucket, an FTP/SFTP
/// account or an in-memory map in tests.
pub trait StorageBackend: Send + Sync {
    /// Persist `content` under `name`, replacing any previous file.
    fn write_file(&self, name: &str, content: &mut SpooledStream) -> Result<(), StorageError>;

    /// Fetch the file stored under `name`, rewound to offset zero.
    fn read_file(&self, name: &str) -> Result<SpooledStream, StorageError>;

    /// All stored file names, in no particular order.
    fn list_directory(&self) -> Result<Vec<String>, StorageError>;

    /// Remove the file stored under `name`.
    fn delete_file(&self, name: &str) -> Result<(), StorageError>;
}

/// Filters narrowing a backup listing.
#[derive(Debug, Clone, Default)]
pub struct BackupFilters {
    /// Only encrypted (`true`) or unencrypted (`false`) backups.
    pub encrypted: Option<bool>,

    /// Only compressed (`true`) or uncompressed (`false`) backups.
    pub compressed: Option<bool>,

    /// Only database dumps or only media archives.
    pub content_type: Option<ContentType>,

    /// Database name substring match.
    pub database: Option<String>,

    /// Server name substring match.
    pub server_name: Option<String>,
}

impl BackupFilters {
    fn matches(&self, name: &str) -> bool {
        if let Some(encrypted) = self.encrypted {
            if name.contains(ENCRYPT_SUFFIX) != encrypted {
                return false;
            }
        }
        if let Some(compressed) = self.compressed {
            if name.contains(COMPRESS_SUFFIX) != compressed {
                return false;
            }
        }
        if let Some(content_type) = self.content_type {
            let is_media = name.contains(MEDIA_MARKER);
            match content_type {
                ContentType::Media if !is_media => return false,
                ContentType::Db if is_media => return false,
                _ => {}
            }
        }
        if let Some(database) = &self.database {
            if !name.contains(database.as_str()) {
                return false;
            }
        }
        if let Some(server_name) = &self.server_name {
            if !name.contains(server_name.as_str()) {
                return false;
            }
        }

        true
    }
}

/// One storage backend plus the backup semantics layered on top.
pub struct Storage {
    backend: Box<dyn StorageBackend>,
    codec: FilenameCodec,
    keep: usize,
    keep_media: usize,
}

impl Storage {
    /// Build the configured backend and wrap it.
    pub fn from_settings(settings: &Settings) -> Result<Self, StorageError> {
        let backend = create_backend(
            &settings.storage.backend,
            &settings.storage.options,
            settings.spool_threshold,
        )?;

        Ok(Self::new(backend, settings))
    }

    /// Wrap an already-built backend.
    pub fn new(backend: Box<dyn StorageBackend>, settings: &Settings) -> Self {
        let codec = FilenameCodec::new(
            Template::Format(settings.filename_template.clone()),
            Template::Format(settings.media_filename_template.clone()),
            &settings.date_format,
        );

        Self {
            backend,
            codec,
            keep: settings.cleanup_keep,
            keep_media: settings.cleanup_keep_media,
        }
    }

    /// Swap in a caller-supplied filename template.
    pub fn with_codec(mut self, codec: FilenameCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn codec(&self) -> &FilenameCodec {
        &self.codec
    }

    pub fn write_file(
        &self,
        content: &mut SpooledStream,
        name: &str,
    ) -> Result<(), StorageError> {
        log::info!(target: "storage", "Writing {name}");
        self.backend.write_file(name, content)
    }

    pub fn read_file(&self, name: &str) -> Result<SpooledStream, StorageError> {
        log::info!(target: "storage", "Reading {name}");
        self.backend.read_file(name)
    }

    pub fn list_directory(&self) -> Result<Vec<String>, StorageError> {
        self.backend.list_directory()
    }

    pub fn delete_file(&self, name: &str) -> Result<(), StorageError> {
        log::info!(target: "storage", "Deleting {name}");
        self.backend.delete_file(name)
    }

    /// List stored backups matching `filters`.
    ///
    /// Names without a decodable datetime are not backups and never
    /// appear, whatever else is stored alongside them.
    pub fn list_backups(&self, filters: &BackupFilters) -> Result<Vec<String>, StorageError> {
        let names = self
            .backend
            .list_directory()?
            .into_iter()
            .filter(|name| self.codec.parse_date(name).is_some())
            .filter(|name| filters.matches(name))
            .collect();

        Ok(names)
    }

    /// Backups matching `filters` with their decoded dates.
    fn dated_backups(
        &self,
        filters: &BackupFilters,
    ) -> Result<Vec<(String, NaiveDateTime)>, StorageError> {
        let dated = self
            .list_backups(filters)?
            .into_iter()
            .filter_map(|name| {
                let date = self.codec.parse_date(&name)?;
                Some((name, date))
            })
            .collect();

        Ok(dated)
    }

    /// Name of the most recent matching backup.
    pub fn get_latest_backup(&self, filters: &BackupFilters) -> Result<String, StorageError> {
        self.dated_backups(filters)?
            .into_iter()
            .max_by_key(|(_, date)| *date)
            .map(|(name, _)| name)
            .ok_or(StorageError::FileNotFound)
    }

    /// Name of the oldest matching backup.
    pub fn get_older_backup(&self, filters: &BackupFilters) -> Result<String, StorageError> {
        self.dated_backups(filters)?
            .into_iter()
            .min_by_key(|(_, date)| *date)
            .map(|(name, _)| name)
            .ok_or(StorageError::FileNotFound)
    }

    /// Retention depth configured for `content_type`.
    pub fn default_keep(&self, content_type: Option<ContentType>) -> usize {
        match content_type {
            Some(ContentType::Media) => self.keep_media,
            _ => self.keep,
        }
    }

    /// Delete matching backups beyond the policy's keep window.
    ///
    /// Backups are ordered newest first; everything at index >= keep is
    /// deleted unless the policy's always-keep override claims it.
    /// Returns the deleted names.
    pub fn clean_old_backups(
        &self,
        filters: &BackupFilters,
        policy: &RetentionPolicy,
    ) -> Result<Vec<String>, StorageError> {
        let mut dated = self.dated_backups(filters)?;
        dated.sort_by(|a, b| b.1.cmp(&a.1));

        let mut deleted = Vec::new();
        for (name, date) in dated.into_iter().skip(policy.keep) {
            if policy.always_keep(&name, date) {
                log::debug!(target: "storage", "Keeping {name} (always-keep)");
                continue;
            }

            self.delete_file(&name)?;
            deleted.push(name);
        }

        if !deleted.is_empty() {
            log::info!(target: "storage", "Cleaned up {} old backup(s)", deleted.len());
        }
        Ok(deleted)
    }
}

/// Instantiate a backend from its identifier and options.
///
/// Identifiers and option keys are matched case-insensitively.
pub fn create_backend(
    identifier: &str,
    options: &std::collections::HashMap<String, String>,
    spool_threshold: usize,
) -> Result<Box<dyn StorageBackend>, StorageError> {
    let options: std::collections::HashMap<String, String> = options
        .iter()
        .map(|(key, value)| (key.to_lowercase(), value.clone()))
        .collect();

    match identifier.to_lowercase().as_str() {
        "filesystem" | "file" => {
            let location = options
                .get("location")
                .cloned()
                .unwrap_or_else(|| ".".to_string());
            Ok(Box::new(FilesystemBackend::new(location.into(), spool_threshold)))
        }
        "memory" => Ok(Box::new(MemoryBackend::new(spool_threshold))),
        other => Err(StorageError::UnknownBackend(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> Storage {
        let settings = Settings {
            server_name: "web1".to_string(),
            ..Settings::default()
        };
        Storage::new(Box::new(MemoryBackend::new(1024)), &settings)
    }

    fn store(storage: &Storage, name: &str) {
        let mut content = SpooledStream::from_bytes(b"backup", 1024).unwrap();
        storage.write_file(&mut content, name).unwrap();
    }

    fn seeded_storage() -> Storage {
        let storage = storage();
        store(&storage, "app-web1-2015-02-06-000000.psql");
        store(&storage, "app-web1-2015-02-07-000000.psql.gz");
        store(&storage, "app-web1-2015-02-08-000000.psql.gz.gpg");
        store(&storage, "web1-2015-02-07-000000-media.tar");
        store(&storage, "README.txt");
        storage
    }

    #[test]
    fn undecodable_names_are_not_backups() {
        let storage = seeded_storage();

        let names = storage.list_backups(&BackupFilters::default()).unwrap();
        assert_eq!(names.len(), 4);
        assert!(!names.iter().any(|n| n == "README.txt"));
    }

    #[test]
    fn filters_by_encryption_and_compression() {
        let storage = seeded_storage();

        let encrypted = storage
            .list_backups(&BackupFilters {
                encrypted: Some(true),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(encrypted, vec!["app-web1-2015-02-08-000000.psql.gz.gpg"]);

        let uncompressed = storage
            .list_backups(&BackupFilters {
                compressed: Some(false),
                content_type: Some(ContentType::Db),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(uncompressed, vec!["app-web1-2015-02-06-000000.psql"]);
    }

    #[test]
    fn filters_by_content_type() {
        let storage = seeded_storage();

        let media = storage
            .list_backups(&BackupFilters {
                content_type: Some(ContentType::Media),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(media, vec!["web1-2015-02-07-000000-media.tar"]);

        let db = storage
            .list_backups(&BackupFilters {
                content_type: Some(ContentType::Db),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(db.len(), 3);
    }

    #[test]
    fn listing_is_idempotent() {
        let storage = seeded_storage();
        let filters = BackupFilters {
            content_type: Some(ContentType::Db),
            ..Default::default()
        };

        let first = storage.list_backups(&filters).unwrap();
        let second = storage.list_backups(&filters).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn latest_and_oldest_reduce_by_decoded_date() {
        let storage = seeded_storage();
        let filters = BackupFilters {
            content_type: Some(ContentType::Db),
            ..Default::default()
        };

        assert_eq!(
            storage.get_latest_backup(&filters).unwrap(),
            "app-web1-2015-02-08-000000.psql.gz.gpg"
        );
        assert_eq!(
            storage.get_older_backup(&filters).unwrap(),
            "app-web1-2015-02-06-000000.psql"
        );
    }

    #[test]
    fn empty_listing_is_file_not_found() {
        let storage = storage();

        let result = storage.get_latest_backup(&BackupFilters::default());
        assert!(matches!(result, Err(StorageError::FileNotFound)));
    }

    #[test]
    fn cleanup_deletes_everything_beyond_the_keep_window() {
        let storage = seeded_storage();
        let filters = BackupFilters {
            content_type: Some(ContentType::Db),
            ..Default::default()
        };

        let deleted = storage
            .clean_old_backups(&filters, &RetentionPolicy::keep_newest(1))
            .unwrap();

        assert_eq!(
            deleted,
            vec![
                "app-web1-2015-02-07-000000.psql.gz",
                "app-web1-2015-02-06-000000.psql",
            ]
        );
        let remaining = storage.list_backups(&filters).unwrap();
        assert_eq!(remaining, vec!["app-web1-2015-02-08-000000.psql.gz.gpg"]);
    }

    #[test]
    fn always_keep_override_survives_cleanup() {
        let storage = seeded_storage();
        let filters = BackupFilters {
            content_type: Some(ContentType::Db),
            ..Default::default()
        };
        let policy = RetentionPolicy::keep_newest(1)
            .with_keep_filter(|name, _| name.contains("2015-02-06"));

        let deleted = storage.clean_old_backups(&filters, &policy).unwrap();

        assert_eq!(deleted, vec!["app-web1-2015-02-07-000000.psql.gz"]);
        let remaining = storage.list_backups(&filters).unwrap();
        assert!(remaining.contains(&"app-web1-2015-02-06-000000.psql".to_string()));
    }

    #[test]
    fn caller_supplied_codec_drives_the_listing() {
        use crate::filename::{FilenameParams, Template, DEFAULT_DATE_FORMAT};

        let codec = FilenameCodec::new(
            Template::Callable(Box::new(|params: &FilenameParams<'_>| {
                format!("snapshot_{}.{}", params.datetime, params.extension)
            })),
            Template::Format("{servername}-{datetime}-media.{extension}".to_string()),
            DEFAULT_DATE_FORMAT,
        );
        let storage = storage().with_codec(codec);

        let name = storage
            .codec()
            .generate("psql", "app", "web1", ContentType::Db);
        store(&storage, &name);

        assert_eq!(storage.list_backups(&BackupFilters::default()).unwrap(), vec![name]);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let result = create_backend("carrier-pigeon", &Default::default(), 1024);
        assert!(matches!(result, Err(StorageError::UnknownBackend(_))));
    }
}
