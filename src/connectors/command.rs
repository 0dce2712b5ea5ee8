//! Execution of external dump and restore tools.

use std::fmt;
use std::io::{self, Read};
use std::process::{Command, Stdio};
use std::thread;

use derive_more::{Display, Error, From};

use crate::util::spool::SpooledStream;

/// Replacement for secret values in logs and error messages.
const REDACTED: &str = "******";

/// An external tool invocation: program, discrete argument tokens and
/// environment overrides.
///
/// Arguments are never joined into a shell string, so passwords, table
/// names and paths cannot break out of their token.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Append one argument token.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several argument tokens.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Overlay one environment variable. Later entries win over earlier
    /// ones and all of them win over the inherited environment.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Overlay several environment variables.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn argv(&self) -> &[String] {
        &self.args
    }

    pub fn env_vars(&self) -> &[(String, String)] {
        &self.env
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of a completed tool run.
#[derive(Debug)]
pub struct CommandOutput {
    /// Tool stdout, rewound to offset zero.
    pub stdout: SpooledStream,

    /// Tool stderr, redacted.
    pub stderr: String,
}

/// Running an external tool failed.
#[derive(Debug, Display, Error, From)]
pub enum CommandError {
    /// The tool could not be started.
    #[display("failed to start {program}: {error}")]
    Spawn {
        program: String,
        #[error(source)]
        error: io::Error,
    },

    /// The tool exited with a non-zero status. Carries captured,
    /// redacted stderr.
    #[display("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    /// Piping data to or from the tool failed.
    #[display("i/o with the subprocess failed: {_0}")]
    #[from]
    Io(io::Error),
}

/// Spawns tools with bounded output buffering and secret redaction.
///
/// stdout is staged in a [SpooledStream], so dumps never have to fit in
/// memory. stderr is drained on its own thread to avoid pipe deadlocks.
pub struct CommandRunner {
    spool_threshold: usize,
    secrets: Vec<String>,
}

impl CommandRunner {
    pub fn new(spool_threshold: usize, secrets: Vec<String>) -> Self {
        Self {
            spool_threshold,
            secrets,
        }
    }

    /// Replace every known secret in `text`.
    pub fn redact(&self, text: &str) -> String {
        let mut redacted = text.to_string();
        for secret in &self.secrets {
            if !secret.is_empty() {
                redacted = redacted.replace(secret, REDACTED);
            }
        }
        redacted
    }

    /// Run `command` to completion, optionally feeding `input` to its
    /// stdin from offset zero.
    ///
    /// Blocks until the tool exits. A non-zero exit status is an error
    /// carrying the redacted stderr.
    pub fn run(
        &self,
        command: &ToolCommand,
        input: Option<SpooledStream>,
    ) -> Result<CommandOutput, CommandError> {
        log::debug!(target: "connector::command", "Running: {}", self.redact(&command.to_string()));

        let mut child = Command::new(command.program())
            .args(command.argv())
            .envs(command.env_vars().iter().map(|(k, v)| (k, v)))
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|error| CommandError::Spawn {
                program: command.program().to_string(),
                error,
            })?;

        let writer = input.map(|mut stream| {
            let mut stdin = child.stdin.take().expect("stdin should be piped");
            thread::spawn(move || -> io::Result<u64> {
                stream.rewind()?;
                io::copy(&mut stream, &mut stdin)
            })
        });

        let mut stderr_pipe = child.stderr.take().expect("stderr should be piped");
        let stderr_reader = thread::spawn(move || -> io::Result<String> {
            let mut stderr = String::new();
            stderr_pipe.read_to_string(&mut stderr)?;
            Ok(stderr)
        });

        let mut stdout = SpooledStream::new(self.spool_threshold);
        let mut stdout_pipe = child.stdout.take().expect("stdout should be piped");
        let copy_result = io::copy(&mut stdout_pipe, &mut stdout);
        drop(stdout_pipe);

        let status = child.wait().map_err(CommandError::Io)?;
        let stderr = stderr_reader
            .join()
            .expect("stderr reader should not panic")
            .unwrap_or_default();
        let stderr = self.redact(&stderr);

        let write_result = writer
            .map(|writer| writer.join().expect("stdin writer should not panic"))
            .transpose();

        if !status.success() {
            return Err(CommandError::Failed {
                program: command.program().to_string(),
                status: status.to_string(),
                stderr,
            });
        }

        // A broken pipe only matters if the tool itself failed.
        copy_result.map_err(CommandError::Io)?;
        write_result.map_err(CommandError::Io)?;

        stdout.rewind().map_err(CommandError::Io)?;

        Ok(CommandOutput { stdout, stderr })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_stay_discrete_tokens() {
        let command = ToolCommand::new("pg_dump")
            .arg("--exclude-table-data=secrets; rm -rf /")
            .arg("app db");

        assert_eq!(
            command.argv(),
            ["--exclude-table-data=secrets; rm -rf /", "app db"]
        );
    }

    #[test]
    fn redacts_secrets_from_text() {
        let runner = CommandRunner::new(1024, vec!["hunter2".to_string()]);

        let redacted = runner.redact("connection to postgresql://app:hunter2@db failed");
        assert!(!redacted.contains("hunter2"));
        assert!(redacted.contains(REDACTED));
    }

    #[test]
    fn empty_secret_does_not_mangle_output() {
        let runner = CommandRunner::new(1024, vec![String::new()]);
        assert_eq!(runner.redact("unchanged"), "unchanged");
    }

    #[test]
    fn failed_exit_carries_redacted_stderr() {
        let runner = CommandRunner::new(1024, vec!["hunter2".to_string()]);
        // `false` exits non-zero with no output on any unix.
        let command = ToolCommand::new("false");

        match runner.run(&command, None) {
            Err(CommandError::Failed { program, .. }) => assert_eq!(program, "false"),
            other => panic!("expected failed status, got {other:?}"),
        }
    }

    #[test]
    fn captures_stdout_rewound() {
        let runner = CommandRunner::new(1024, Vec::new());
        let command = ToolCommand::new("echo").arg("dump bytes");

        let mut output = runner.run(&command, None).unwrap();
        let mut stdout = String::new();
        output.stdout.read_to_string(&mut stdout).unwrap();
        assert_eq!(stdout.trim_end(), "dump bytes");
    }

    #[test]
    fn feeds_stdin_from_offset_zero() {
        let runner = CommandRunner::new(1024, Vec::new());
        let mut input = SpooledStream::from_bytes(b"replayed", 1024).unwrap();
        // Leave the read position at the end; the runner must rewind.
        let mut drained = Vec::new();
        input.read_to_end(&mut drained).unwrap();

        let command = ToolCommand::new("cat");
        let mut output = runner.run(&command, Some(input)).unwrap();

        let mut stdout = String::new();
        output.stdout.read_to_string(&mut stdout).unwrap();
        assert_eq!(stdout, "replayed");
    }
}
