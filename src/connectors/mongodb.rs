//! MongoDB connector built on `mongodump` and `mongorestore`.

use super::command::ToolCommand;
use super::{relay_stderr, Connector, ConnectorSettings, DumpError, RestoreError};
use crate::util::spool::SpooledStream;

const EXTENSION: &str = "archive";

/// Single-stream dumps via `mongodump --archive`.
///
/// The archive mode keeps the dump a plain byte stream, so it composes
/// with the compression and encryption stages like every other engine.
pub struct MongoDumpConnector {
    settings: ConnectorSettings,
}

impl MongoDumpConnector {
    pub fn new(settings: ConnectorSettings) -> Self {
        Self { settings }
    }

    fn credential_args(&self, command: ToolCommand) -> ToolCommand {
        let settings = &self.settings;
        let mut command = command;

        if let Some(host) = &settings.host {
            command = command.arg("--host").arg(host);
        }
        if let Some(port) = settings.port {
            command = command.arg("--port").arg(port.to_string());
        }
        if let Some(user) = &settings.user {
            command = command.arg("--username").arg(user);
        }
        if let Some(password) = &settings.password {
            command = command.arg("--password").arg(password);
        }
        if let Some(auth_source) = &settings.auth_source {
            command = command.arg("--authenticationDatabase").arg(auth_source);
        }

        command
    }

    /// Dump command: `mongodump --db <name> [credentials]
    /// [--excludeCollection <c>]* --archive` (archive on stdout).
    pub fn dump_command(&self) -> ToolCommand {
        let settings = &self.settings;
        let command = ToolCommand::new("mongodump")
            .args(settings.dump_prefix.iter().cloned())
            .arg("--db")
            .arg(&settings.name);
        let mut command = self.credential_args(command);

        for collection in &settings.exclude {
            command = command.arg("--excludeCollection").arg(collection);
        }

        command
            .arg("--archive")
            .args(settings.dump_suffix.iter().cloned())
            .envs(settings.env.iter().cloned())
    }

    /// Restore command: `mongorestore --archive [--drop] [--objcheck]`,
    /// archive on stdin.
    pub fn restore_command(&self) -> ToolCommand {
        let settings = &self.settings;
        let command = ToolCommand::new("mongorestore")
            .args(settings.restore_prefix.iter().cloned());
        let mut command = self.credential_args(command).arg("--archive");

        if settings.drop {
            command = command.arg("--drop");
        }
        if settings.object_check {
            command = command.arg("--objcheck");
        }

        command
            .args(settings.restore_suffix.iter().cloned())
            .envs(settings.env.iter().cloned())
    }
}

impl Connector for MongoDumpConnector {
    fn create_dump(&self) -> Result<SpooledStream, DumpError> {
        log::info!(target: "connector::mongodb", "Dumping database {}", self.settings.name);
        let output = self.settings.runner().run(&self.dump_command(), None)?;
        relay_stderr("connector::mongodb", &output.stderr);

        Ok(output.stdout)
    }

    fn restore_dump(&self, dump: SpooledStream) -> Result<(), RestoreError> {
        log::info!(target: "connector::mongodb", "Restoring database {}", self.settings.name);
        let output = self
            .settings
            .runner()
            .run(&self.restore_command(), Some(dump))?;
        relay_stderr("connector::mongodb", &output.stderr);

        Ok(())
    }

    fn extension(&self) -> &str {
        EXTENSION
    }
}
