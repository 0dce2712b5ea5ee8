//! SQLite connectors.
//!
//! [SqliteConnector] produces a plain-SQL dump by driving the `sqlite3`
//! shell: the schema comes from `sqlite_master`, row data from a
//! generated `SELECT ... quote(...)` query so the engine itself quotes
//! every value. [SqliteCopyConnector] copies the database file
//! byte-for-byte instead.

use std::fs::File;
use std::io::{self, Read, Write};

use super::command::ToolCommand;
use super::{relay_stderr, Connector, ConnectorSettings, DumpError, RestoreError};
use crate::util::spool::SpooledStream;

const EXTENSION_SQL: &str = "dump";
const EXTENSION_COPY: &str = "sqlite3";

/// Prefix of SQLite-internal tables, never dumped.
const INTERNAL_TABLE_PREFIX: &str = "sqlite_";

/// One `sqlite_master` row.
#[derive(Debug, serde::Deserialize)]
struct SchemaRow {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    sql: String,
}

/// One `PRAGMA table_info` row. Only the column name is needed.
#[derive(Debug, serde::Deserialize)]
struct ColumnRow {
    name: String,
}

/// SQL-text dump and best-effort replay through the `sqlite3` shell.
pub struct SqliteConnector {
    settings: ConnectorSettings,
    error_sink: Option<Box<dyn Fn(&str) + Send + Sync>>,
}

impl SqliteConnector {
    pub fn new(settings: ConnectorSettings) -> Self {
        Self {
            settings,
            error_sink: None,
        }
    }

    /// Collect statement errors skipped during a best-effort restore,
    /// in addition to the warning log.
    pub fn with_error_sink(mut self, sink: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.error_sink = Some(Box::new(sink));
        self
    }

    /// Run one query against the database file, returning raw stdout.
    fn query(&self, query: &str, json: bool) -> Result<SpooledStream, DumpError> {
        let mut command = ToolCommand::new("sqlite3");
        if json {
            command = command.arg("-json");
        }
        let command = command
            .arg(&self.settings.name)
            .arg(query)
            .envs(self.settings.env.iter().cloned());

        let output = self.settings.runner().run(&command, None)?;
        relay_stderr("connector::sqlite", &output.stderr);
        Ok(output.stdout)
    }

    fn query_json<T: serde::de::DeserializeOwned>(&self, query: &str) -> Result<Vec<T>, DumpError> {
        let mut stdout = self.query(query, true)?;
        let mut bytes = Vec::new();
        stdout.read_to_end(&mut bytes)?;

        parse_json_rows(&bytes)
    }

    fn schema_rows(&self) -> Result<Vec<SchemaRow>, DumpError> {
        self.query_json("SELECT name, type, sql FROM sqlite_master WHERE sql IS NOT NULL")
    }

    fn column_names(&self, table: &str) -> Result<Vec<String>, DumpError> {
        let rows: Vec<ColumnRow> =
            self.query_json(&format!("PRAGMA table_info({})", quote_identifier(table)))?;
        Ok(rows.into_iter().map(|row| row.name).collect())
    }

    /// Append all `INSERT` statements of one table to the dump.
    fn dump_rows(&self, table: &str, dump: &mut SpooledStream) -> Result<(), DumpError> {
        let columns = self.column_names(table)?;
        if columns.is_empty() {
            return Ok(());
        }

        let mut rows = self.query(&insert_select_sql(table, &columns), false)?;
        let mut statements = String::new();
        rows.read_to_string(&mut statements)
            .map_err(|_| DumpError::MalformedToolOutput(format!("row dump of {table}")))?;

        for statement in statements.lines() {
            if !statement.is_empty() {
                writeln!(dump, "{statement};")?;
            }
        }

        Ok(())
    }
}

impl Connector for SqliteConnector {
    fn create_dump(&self) -> Result<SpooledStream, DumpError> {
        log::info!(target: "connector::sqlite", "Dumping database {}", self.settings.name);
        let mut dump = SpooledStream::new(self.settings.spool_threshold);

        for row in self.schema_rows()? {
            if skip_table(&row.name, &self.settings.exclude) {
                log::trace!(target: "connector::sqlite", "Skipping {}", row.name);
                continue;
            }

            if row.kind == "table" {
                writeln!(dump, "{};", idempotent_create(&row.sql))?;
                self.dump_rows(&row.name, &mut dump)?;
            } else {
                writeln!(dump, "{};", row.sql)?;
            }
        }

        dump.rewind()?;
        Ok(dump)
    }

    fn restore_dump(&self, dump: SpooledStream) -> Result<(), RestoreError> {
        log::info!(target: "connector::sqlite", "Restoring database {}", self.settings.name);

        let mut command = ToolCommand::new("sqlite3");
        if !self.settings.continue_on_statement_error {
            command = command.arg("-bail");
        }
        let command = command
            .arg(&self.settings.name)
            .envs(self.settings.env.iter().cloned());

        let result = self.settings.runner().run(&command, Some(dump));

        if self.settings.continue_on_statement_error {
            // Best-effort replay: statement failures are reported and
            // skipped so the rest of the dump still applies.
            let stderr = match result {
                Ok(output) => output.stderr,
                Err(super::CommandError::Failed { stderr, .. }) => stderr,
                Err(error) => return Err(error.into()),
            };
            for line in stderr.lines().filter(|line| !line.is_empty()) {
                log::warn!(target: "connector::sqlite", "Statement skipped: {line}");
                if let Some(sink) = &self.error_sink {
                    sink(line);
                }
            }
            Ok(())
        } else {
            let output = result?;
            relay_stderr("connector::sqlite", &output.stderr);
            Ok(())
        }
    }

    fn extension(&self) -> &str {
        EXTENSION_SQL
    }
}

/// Raw byte copy of the SQLite database file.
///
/// Fastest dump possible, but the caller has to quiesce the database
/// around both operations.
pub struct SqliteCopyConnector {
    settings: ConnectorSettings,
}

impl SqliteCopyConnector {
    pub fn new(settings: ConnectorSettings) -> Self {
        Self { settings }
    }
}

impl Connector for SqliteCopyConnector {
    fn create_dump(&self) -> Result<SpooledStream, DumpError> {
        log::info!(target: "connector::sqlite", "Copying database file {}", self.settings.name);

        let mut file = File::open(&self.settings.name)?;
        let mut dump = SpooledStream::new(self.settings.spool_threshold);
        io::copy(&mut file, &mut dump)?;
        dump.rewind()?;

        Ok(dump)
    }

    fn restore_dump(&self, mut dump: SpooledStream) -> Result<(), RestoreError> {
        log::info!(target: "connector::sqlite", "Restoring database file {}", self.settings.name);

        dump.rewind()?;
        let mut file = File::create(&self.settings.name)?;
        io::copy(&mut dump, &mut file)?;

        Ok(())
    }

    fn extension(&self) -> &str {
        EXTENSION_COPY
    }
}

/// Whether a table stays out of the dump.
fn skip_table(name: &str, exclude: &[String]) -> bool {
    name.starts_with(INTERNAL_TABLE_PREFIX) || exclude.iter().any(|excluded| excluded == name)
}

/// Guard schema statements for replay into a non-empty database.
fn idempotent_create(sql: &str) -> String {
    if let Some(rest) = sql.strip_prefix("CREATE TABLE") {
        format!("CREATE TABLE IF NOT EXISTS{rest}")
    } else {
        sql.to_string()
    }
}

/// Double-quote an identifier, doubling embedded quotes.
fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Query generating one `INSERT` statement per row of `table`.
///
/// Value quoting is delegated to the engine's own `quote()` function
/// instead of reimplementing SQL escaping.
fn insert_select_sql(table: &str, columns: &[String]) -> String {
    let table = quote_identifier(table);
    let quoted_values = columns
        .iter()
        .map(|column| format!("'||quote({})||'", quote_identifier(column)))
        .collect::<Vec<_>>()
        .join(",");

    format!("SELECT 'INSERT INTO {table} VALUES({quoted_values})' FROM {table}")
}

/// Parse `sqlite3 -json` output; an empty result set prints nothing.
fn parse_json_rows<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<Vec<T>, DumpError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    serde_json::from_slice(bytes)
        .map_err(|error| DumpError::MalformedToolOutput(error.to_string()))
}
