//! The backup artifact travelling through the pipeline.

use std::io;

use chrono::{Local, NaiveDateTime};

use crate::filename::{ContentType, FilenameCodec, MEDIA_MARKER};
use crate::settings::GpgSettings;
use crate::transforms::{
    self, DecryptionError, EncryptionError, COMPRESS_SUFFIX, ENCRYPT_SUFFIX,
};
use crate::util::spool::SpooledStream;

/// A dump stream together with the metadata encoded in its name.
///
/// An artifact is immutable once named: every transform consumes it and
/// returns a new artifact with the renamed stream, so exactly one stage
/// owns the bytes at any point of the pipeline.
#[derive(Debug)]
pub struct BackupArtifact {
    pub stream: SpooledStream,
    pub name: String,
    pub content_type: ContentType,
    pub database_name: Option<String>,
    pub server_name: String,
    pub created_at: NaiveDateTime,
    pub compressed: bool,
    pub encrypted: bool,
    pub extension: String,
}

impl BackupArtifact {
    /// Name a fresh database dump, stamped with the current time.
    pub fn database(
        stream: SpooledStream,
        extension: &str,
        database_name: &str,
        server_name: &str,
        codec: &FilenameCodec,
    ) -> Self {
        let now = Local::now();
        let name = codec.generate_at(extension, database_name, server_name, ContentType::Db, now);

        Self {
            stream,
            name,
            content_type: ContentType::Db,
            database_name: Some(database_name.to_string()),
            server_name: server_name.to_string(),
            created_at: now.naive_local(),
            compressed: false,
            encrypted: false,
            extension: extension.to_string(),
        }
    }

    /// Name a fresh media archive, stamped with the current time.
    pub fn media(
        stream: SpooledStream,
        extension: &str,
        server_name: &str,
        codec: &FilenameCodec,
    ) -> Self {
        let now = Local::now();
        let name = codec.generate_at(extension, "", server_name, ContentType::Media, now);

        Self {
            stream,
            name,
            content_type: ContentType::Media,
            database_name: None,
            server_name: server_name.to_string(),
            created_at: now.naive_local(),
            compressed: false,
            encrypted: false,
            extension: extension.to_string(),
        }
    }

    /// Rebuild the metadata of a fetched backup from its stored name.
    pub fn from_stored(
        stream: SpooledStream,
        name: &str,
        server_name: &str,
        codec: &FilenameCodec,
    ) -> Self {
        let compressed = name.contains(COMPRESS_SUFFIX);
        let encrypted = name.contains(ENCRYPT_SUFFIX);
        let content_type = if name.contains(MEDIA_MARKER) {
            ContentType::Media
        } else {
            ContentType::Db
        };

        // Transform suffixes may stack in either order.
        let base = name
            .trim_end_matches(COMPRESS_SUFFIX)
            .trim_end_matches(ENCRYPT_SUFFIX)
            .trim_end_matches(COMPRESS_SUFFIX);
        let extension = base.rsplit('.').next().unwrap_or_default().to_string();

        Self {
            stream,
            name: name.to_string(),
            content_type,
            database_name: None,
            server_name: server_name.to_string(),
            created_at: codec
                .parse_date(name)
                .unwrap_or_else(|| Local::now().naive_local()),
            compressed,
            encrypted,
            extension,
        }
    }

    /// Size of the artifact stream in bytes.
    pub fn size(&mut self) -> io::Result<u64> {
        self.stream.size()
    }

    /// Gzip the artifact.
    pub fn compress(self, spool_threshold: usize) -> io::Result<Self> {
        let mut artifact =
            self.transformed(|stream, name| transforms::compress(stream, name, spool_threshold))?;
        artifact.compressed = true;
        Ok(artifact)
    }

    /// Gunzip the artifact.
    pub fn uncompress(self, spool_threshold: usize) -> io::Result<Self> {
        let mut artifact = self
            .transformed(|stream, name| transforms::uncompress(stream, name, spool_threshold))?;
        artifact.compressed = false;
        Ok(artifact)
    }

    /// Encrypt the artifact to the configured recipient.
    pub fn encrypt(
        self,
        gpg: &GpgSettings,
        spool_threshold: usize,
    ) -> Result<Self, EncryptionError> {
        let mut artifact = self
            .transformed(|stream, name| transforms::encrypt(stream, name, gpg, spool_threshold))?;
        artifact.encrypted = true;
        Ok(artifact)
    }

    /// Decrypt the artifact.
    pub fn decrypt(
        self,
        passphrase: Option<&str>,
        spool_threshold: usize,
    ) -> Result<Self, DecryptionError> {
        let mut artifact = self.transformed(|stream, name| {
            transforms::decrypt(stream, name, passphrase, spool_threshold)
        })?;
        artifact.encrypted = false;
        Ok(artifact)
    }

    /// Run one transform stage, transferring ownership of the stream
    /// through it and carrying the remaining metadata over.
    fn transformed<E>(
        self,
        transform: impl FnOnce(SpooledStream, &str) -> Result<(SpooledStream, String), E>,
    ) -> Result<Self, E> {
        let Self {
            stream,
            name,
            content_type,
            database_name,
            server_name,
            created_at,
            compressed,
            encrypted,
            extension,
        } = self;

        let (stream, name) = transform(stream, &name)?;

        Ok(Self {
            stream,
            name,
            content_type,
            database_name,
            server_name,
            created_at,
            compressed,
            encrypted,
            extension,
        })
    }
}
