//! Command line interface of the backup tool.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use log::LevelFilter;

use crate::filename::ContentType;
use crate::storage::BackupFilters;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Verbosity of the command output.
    #[arg(long)]
    pub verbose: Option<LevelFilter>,

    /// Path to the configuration file.
    #[arg(long, short = 'c', default_value = "db_backup.toml", env = "DB_BACKUP_CONFIG")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub action: Action,
}

#[derive(Subcommand, Debug)]
pub enum Action {
    /// Backup configured databases.
    Backup(BackupArgs),
    /// Restore a database from a stored backup.
    Restore(RestoreArgs),
    /// List stored backups.
    ListBackups(ListBackupsArgs),
    /// Archive the media file tree.
    MediaBackup(MediaBackupArgs),
    /// Restore the media file tree from a stored archive.
    MediaRestore(MediaRestoreArgs),
    /// Delete old backups beyond the retention depth.
    Clean(CleanArgs),
}

#[derive(Args, Debug)]
pub struct BackupArgs {
    /// Backup only this configured database.
    #[arg(long)]
    pub database: Option<String>,

    /// Compress the dump before storing it.
    #[arg(long, short = 'z')]
    pub compress: bool,

    /// Encrypt the dump before storing it.
    #[arg(long, short = 'e')]
    pub encrypt: bool,

    /// Apply the retention policy after a successful backup.
    #[arg(long)]
    pub clean: bool,
}

#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Configured database to restore into.
    #[arg(long, default_value = "default")]
    pub database: String,

    /// Restore this stored backup instead of the latest one.
    #[arg(long, short = 'i')]
    pub filepath: Option<String>,

    /// Decrypt the backup before restoring.
    #[arg(long)]
    pub decrypt: bool,

    /// Uncompress the backup before restoring.
    #[arg(long)]
    pub uncompress: bool,

    /// Passphrase for decryption; gpg prompts interactively otherwise.
    #[arg(long, env = "DB_BACKUP_PASSPHRASE")]
    pub passphrase: Option<String>,
}

#[derive(Args, Debug)]
pub struct ListBackupsArgs {
    /// Only backups of this database.
    #[arg(long)]
    pub database: Option<String>,

    /// Only compressed backups.
    #[arg(long, conflicts_with = "not_compressed")]
    pub compressed: bool,

    /// Only uncompressed backups.
    #[arg(long)]
    pub not_compressed: bool,

    /// Only encrypted backups.
    #[arg(long, conflicts_with = "not_encrypted")]
    pub encrypted: bool,

    /// Only unencrypted backups.
    #[arg(long)]
    pub not_encrypted: bool,

    /// Only backups of this content type.
    #[arg(long)]
    pub content_type: Option<ContentType>,
}

impl ListBackupsArgs {
    /// Translate the flag pairs into listing filters.
    pub fn filters(&self) -> BackupFilters {
        let flag_pair = |yes: bool, no: bool| match (yes, no) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };

        BackupFilters {
            encrypted: flag_pair(self.encrypted, self.not_encrypted),
            compressed: flag_pair(self.compressed, self.not_compressed),
            content_type: self.content_type,
            database: self.database.clone(),
            server_name: None,
        }
    }
}

#[derive(Args, Debug)]
pub struct MediaBackupArgs {
    /// Compress the archive before storing it.
    #[arg(long, short = 'z')]
    pub compress: bool,

    /// Encrypt the archive before storing it.
    #[arg(long, short = 'e')]
    pub encrypt: bool,

    /// Apply the retention policy after a successful backup.
    #[arg(long)]
    pub clean: bool,
}

#[derive(Args, Debug)]
pub struct MediaRestoreArgs {
    /// Restore this stored archive instead of the latest one.
    #[arg(long, short = 'i')]
    pub filepath: Option<String>,

    /// Decrypt the archive before restoring.
    #[arg(long)]
    pub decrypt: bool,

    /// Uncompress the archive before restoring.
    #[arg(long)]
    pub uncompress: bool,

    /// Passphrase for decryption; gpg prompts interactively otherwise.
    #[arg(long, env = "DB_BACKUP_PASSPHRASE")]
    pub passphrase: Option<String>,
}

#[derive(Args, Debug)]
pub struct CleanArgs {
    /// Only clean backups of this content type.
    #[arg(long)]
    pub content_type: Option<ContentType>,

    /// Override the configured retention depth.
    #[arg(long)]
    pub keep: Option<usize>,
}
