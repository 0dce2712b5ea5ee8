use std::process::ExitCode;

use clap::Parser;

use db_backup_lib::cli::{Action, Cli};
use db_backup_lib::pipeline::{self, BackupOptions, RestoreOptions};
use db_backup_lib::settings::Settings;
use db_backup_lib::storage::Storage;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // init logger
    let mut env_logger = env_logger::builder();
    if let Some(level) = cli.verbose {
        env_logger.filter_level(level);
    }
    env_logger.try_init().expect("env_logger should not fail");

    let settings: Settings = match std::fs::read_to_string(&cli.config) {
        Ok(config_str) => match toml::from_str(&config_str) {
            Err(e) => {
                log::error!("Reading the config file failed: {e}");
                return ExitCode::FAILURE;
            }
            Ok(settings) => settings,
        },
        Err(e) => {
            if std::fs::exists(&cli.config).is_ok_and(|b| !b) {
                log::debug!(
                    "Writing default config to {} because it doesn't exist yet",
                    cli.config.display()
                );
                let default_settings = Settings::default();
                let config_str = toml::to_string_pretty(&default_settings)
                    .expect("default config should be serializable");
                if let Err(e) = std::fs::write(&cli.config, config_str) {
                    log::warn!(
                        "Writing default config to {} failed {e}",
                        cli.config.display(),
                    );
                }

                default_settings
            } else {
                log::error!("Reading the config file failed: {e}");
                return ExitCode::FAILURE;
            }
        }
    };

    let storage = match Storage::from_settings(&settings) {
        Ok(storage) => storage,
        Err(e) => {
            log::error!("Setting up the storage backend failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.action {
        Action::Backup(args) => {
            let options = BackupOptions {
                compress: args.compress,
                encrypt: args.encrypt,
                clean: args.clean,
            };

            let aliases: Vec<String> = match args.database {
                Some(alias) => vec![alias],
                None => settings
                    .database_aliases()
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            };
            if aliases.is_empty() {
                log::warn!("No databases configured, nothing to backup");
            }

            let mut failed = false;
            for alias in aliases {
                match pipeline::backup_database(&settings, &storage, &alias, &options) {
                    Ok(name) => {
                        log::info!(target: "pipeline", "Backup of {alias} stored as {name}")
                    }
                    Err(e) => {
                        log::error!(target: "pipeline", "Backup of {alias} failed: {e}");
                        failed = true;
                    }
                }
            }
            if failed {
                return ExitCode::FAILURE;
            }
        }

        Action::Restore(args) => {
            let options = RestoreOptions {
                filepath: args.filepath,
                decrypt: args.decrypt,
                uncompress: args.uncompress,
                passphrase: args.passphrase,
            };

            if let Err(e) =
                pipeline::restore_database(&settings, &storage, &args.database, &options)
            {
                log::error!(target: "pipeline", "Restore of {} failed: {e}", args.database);
                return ExitCode::FAILURE;
            }
        }

        Action::ListBackups(args) => match storage.list_backups(&args.filters()) {
            Ok(names) => {
                for name in names {
                    println!("{name}");
                }
            }
            Err(e) => {
                log::error!(target: "storage", "Listing backups failed: {e}");
                return ExitCode::FAILURE;
            }
        },

        Action::MediaBackup(args) => {
            let options = BackupOptions {
                compress: args.compress,
                encrypt: args.encrypt,
                clean: args.clean,
            };

            match pipeline::backup_media(&settings, &storage, &options) {
                Ok(name) => log::info!(target: "pipeline", "Media backup stored as {name}"),
                Err(e) => {
                    log::error!(target: "pipeline", "Media backup failed: {e}");
                    return ExitCode::FAILURE;
                }
            }
        }

        Action::MediaRestore(args) => {
            let options = RestoreOptions {
                filepath: args.filepath,
                decrypt: args.decrypt,
                uncompress: args.uncompress,
                passphrase: args.passphrase,
            };

            if let Err(e) = pipeline::restore_media(&settings, &storage, &options) {
                log::error!(target: "pipeline", "Media restore failed: {e}");
                return ExitCode::FAILURE;
            }
        }

        Action::Clean(args) => {
            match pipeline::clean_backups(&settings, &storage, args.content_type, args.keep) {
                Ok(deleted) => {
                    for name in deleted {
                        log::info!(target: "storage", "Deleted {name}");
                    }
                }
                Err(e) => {
                    log::error!(target: "storage", "Cleanup failed: {e}");
                    return ExitCode::FAILURE;
                }
            }
        }
    }

    ExitCode::SUCCESS
}
