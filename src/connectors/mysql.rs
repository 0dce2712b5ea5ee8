//! MySQL/MariaDB connector built on `mysqldump` and `mysql`.

use super::command::ToolCommand;
use super::{relay_stderr, Connector, ConnectorSettings, DumpError, RestoreError};
use crate::util::spool::SpooledStream;

const EXTENSION: &str = "mysql";

/// SQL dumps via `mysqldump`, replayed through the `mysql` client.
pub struct MysqlDumpConnector {
    settings: ConnectorSettings,
}

impl MysqlDumpConnector {
    pub fn new(settings: ConnectorSettings) -> Self {
        Self { settings }
    }

    /// Credential flags shared by dump and restore. Each flag is only
    /// present when the corresponding setting is set, so an unset
    /// password never turns into an empty `--password=` token.
    fn credential_args(&self, command: ToolCommand) -> ToolCommand {
        let settings = &self.settings;
        let mut command = command;

        if let Some(host) = &settings.host {
            command = command.arg(format!("--host={host}"));
        }
        if let Some(port) = settings.port {
            command = command.arg(format!("--port={port}"));
        }
        if let Some(user) = &settings.user {
            command = command.arg(format!("--user={user}"));
        }
        if let Some(password) = &settings.password {
            command = command.arg(format!("--password={password}"));
        }

        command
    }

    /// Dump command: `mysqldump <name> [credentials]
    /// [--ignore-table=<name>.<table>]*`.
    pub fn dump_command(&self) -> ToolCommand {
        let settings = &self.settings;
        let command = ToolCommand::new("mysqldump")
            .args(settings.dump_prefix.iter().cloned())
            .arg(&settings.name);
        let mut command = self.credential_args(command);

        for table in &settings.exclude {
            command = command.arg(format!("--ignore-table={}.{}", settings.name, table));
        }

        command
            .args(settings.dump_suffix.iter().cloned())
            .envs(settings.env.iter().cloned())
    }

    /// Restore command: `mysql <name> [credentials]`, dump on stdin.
    pub fn restore_command(&self) -> ToolCommand {
        let settings = &self.settings;
        let command = ToolCommand::new("mysql")
            .args(settings.restore_prefix.iter().cloned())
            .arg(&settings.name);

        self.credential_args(command)
            .args(settings.restore_suffix.iter().cloned())
            .envs(settings.env.iter().cloned())
    }
}

impl Connector for MysqlDumpConnector {
    fn create_dump(&self) -> Result<SpooledStream, DumpError> {
        log::info!(target: "connector::mysql", "Dumping database {}", self.settings.name);
        let output = self.settings.runner().run(&self.dump_command(), None)?;
        relay_stderr("connector::mysql", &output.stderr);

        Ok(output.stdout)
    }

    fn restore_dump(&self, dump: SpooledStream) -> Result<(), RestoreError> {
        log::info!(target: "connector::mysql", "Restoring database {}", self.settings.name);
        let output = self
            .settings
            .runner()
            .run(&self.restore_command(), Some(dump))?;
        relay_stderr("connector::mysql", &output.stderr);

        Ok(())
    }

    fn extension(&self) -> &str {
        EXTENSION
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::settings;
    use super::super::Engine;
    use super::*;

    fn mysql_settings() -> ConnectorSettings {
        let mut settings = settings(Engine::Mysql, "app");
        settings.host = Some("db.internal".to_string());
        settings.port = Some(3306);
        settings.user = Some("app".to_string());
        settings.password = Some("hunter2".to_string());
        settings
    }

    #[test]
    fn dump_command_carries_all_credentials() {
        let connector = MysqlDumpConnector::new(mysql_settings());
        let argv = connector.dump_command().argv().to_vec();

        assert_eq!(argv[0], "app");
        assert!(argv.contains(&"--host=db.internal".to_string()));
        assert!(argv.contains(&"--port=3306".to_string()));
        assert!(argv.contains(&"--user=app".to_string()));
        assert!(argv.contains(&"--password=hunter2".to_string()));
    }

    #[test]
    fn unset_credentials_emit_no_flags() {
        let connector = MysqlDumpConnector::new(settings(Engine::Mysql, "app"));
        let argv = connector.dump_command().argv().to_vec();

        assert_eq!(argv, vec!["app".to_string()]);
        assert!(!argv.iter().any(|a| a.starts_with("--password")));
    }

    #[test]
    fn excluded_tables_are_ignored_per_table() {
        let mut settings = mysql_settings();
        settings.exclude = vec!["secrets".to_string(), "cache".to_string()];

        let connector = MysqlDumpConnector::new(settings);
        let argv = connector.dump_command().argv().to_vec();

        assert!(argv.contains(&"--ignore-table=app.secrets".to_string()));
        assert!(argv.contains(&"--ignore-table=app.cache".to_string()));
    }

    #[test]
    fn restore_uses_the_plain_client() {
        let connector = MysqlDumpConnector::new(mysql_settings());
        let command = connector.restore_command();

        assert_eq!(command.program(), "mysql");
        assert_eq!(command.argv()[0], "app");
    }

    #[test]
    fn prefix_and_suffix_args_wrap_the_command() {
        let mut settings = mysql_settings();
        settings.dump_prefix = vec!["--defaults-file=/etc/my.cnf".to_string()];
        settings.dump_suffix = vec!["--single-transaction".to_string()];

        let connector = MysqlDumpConnector::new(settings);
        let argv = connector.dump_command().argv().to_vec();

        assert_eq!(argv[0], "--defaults-file=/etc/my.cnf");
        assert_eq!(argv.last().unwrap(), "--single-transaction");
    }
}
