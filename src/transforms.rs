//! Stream transforms applied between dump and storage.
//!
//! Compression and encryption each consume a stream plus its name and
//! return a new stream plus the renamed name. Every stage reads its
//! input from offset zero and hands its output over rewound, so stages
//! compose in either order.

use std::io::{self, Read};

use derive_more::{Display, Error, From};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::connectors::{CommandError, CommandRunner, ToolCommand};
use crate::settings::GpgSettings;
use crate::util::spool::SpooledStream;

/// Suffix appended by [compress].
pub const COMPRESS_SUFFIX: &str = ".gz";

/// Suffix appended by [encrypt].
pub const ENCRYPT_SUFFIX: &str = ".gpg";

/// Encrypting a stream failed.
#[derive(Debug, Display, Error, From)]
pub enum EncryptionError {
    /// No recipient key is configured.
    #[display("no gpg recipient configured")]
    MissingRecipient,

    /// The gpg tool failed.
    #[display("gpg failed to encrypt: {_0}")]
    #[from]
    Command(CommandError),

    /// gpg reported success but produced no data.
    #[display("gpg produced an empty encryption result")]
    EmptyOutput,

    /// Staging the stream failed.
    #[display("staging the stream failed: {_0}")]
    #[from]
    Io(io::Error),
}

/// Decrypting a stream failed.
#[derive(Debug, Display, Error, From)]
pub enum DecryptionError {
    /// The gpg tool failed.
    #[display("gpg failed to decrypt: {_0}")]
    #[from]
    Command(CommandError),

    /// gpg reported success but produced no data.
    #[display("gpg produced an empty decryption result")]
    EmptyOutput,

    /// Staging the stream failed.
    #[display("staging the stream failed: {_0}")]
    #[from]
    Io(io::Error),
}

/// Gzip a stream, renaming it with [COMPRESS_SUFFIX].
pub fn compress(
    mut input: SpooledStream,
    name: &str,
    spool_threshold: usize,
) -> io::Result<(SpooledStream, String)> {
    input.rewind()?;

    let mut encoder = GzEncoder::new(
        SpooledStream::new(spool_threshold),
        Compression::default(),
    );
    io::copy(&mut input, &mut encoder)?;
    let mut output = encoder.finish()?;
    output.rewind()?;

    log::debug!(target: "transforms", "Compressed {name}");
    Ok((output, format!("{name}{COMPRESS_SUFFIX}")))
}

/// Gunzip a stream, stripping [COMPRESS_SUFFIX] from its name.
///
/// Works on content, so a stream whose logical name lacks the suffix
/// still decompresses.
pub fn uncompress(
    mut input: SpooledStream,
    name: &str,
    spool_threshold: usize,
) -> io::Result<(SpooledStream, String)> {
    input.rewind()?;

    let mut decoder = GzDecoder::new(input);
    let mut output = SpooledStream::new(spool_threshold);
    io::copy(&mut decoder, &mut output)?;
    output.rewind()?;

    let name = name.strip_suffix(COMPRESS_SUFFIX).unwrap_or(name);
    log::debug!(target: "transforms", "Uncompressed {name}");
    Ok((output, name.to_string()))
}

/// Encrypt a stream to the configured recipient, renaming it with
/// [ENCRYPT_SUFFIX].
pub fn encrypt(
    mut input: SpooledStream,
    name: &str,
    gpg: &GpgSettings,
    spool_threshold: usize,
) -> Result<(SpooledStream, String), EncryptionError> {
    let recipient = gpg
        .recipient
        .as_deref()
        .ok_or(EncryptionError::MissingRecipient)?;

    input.rewind()?;

    let mut command = ToolCommand::new("gpg")
        .arg("--batch")
        .arg("--yes")
        .arg("--encrypt")
        .arg("--recipient")
        .arg(recipient);
    if gpg.always_trust {
        command = command.arg("--trust-model").arg("always");
    }
    let command = command.arg("--output").arg("-");

    let runner = CommandRunner::new(spool_threshold, Vec::new());
    let mut output = runner.run(&command, Some(input))?;
    if output.stdout.size()? == 0 {
        return Err(EncryptionError::EmptyOutput);
    }

    log::debug!(target: "transforms", "Encrypted {name} for {recipient}");
    Ok((output.stdout, format!("{name}{ENCRYPT_SUFFIX}")))
}

/// Decrypt a stream, stripping [ENCRYPT_SUFFIX] from its name.
///
/// Without a passphrase gpg prompts interactively through its own
/// pinentry; with one the run is non-interactive.
pub fn decrypt(
    mut input: SpooledStream,
    name: &str,
    passphrase: Option<&str>,
    spool_threshold: usize,
) -> Result<(SpooledStream, String), DecryptionError> {
    input.rewind()?;

    let mut command = ToolCommand::new("gpg").arg("--yes");
    let mut secrets = Vec::new();
    if let Some(passphrase) = passphrase {
        command = command
            .arg("--batch")
            .arg("--pinentry-mode")
            .arg("loopback")
            .arg("--passphrase")
            .arg(passphrase);
        secrets.push(passphrase.to_string());
    }
    let command = command.arg("--decrypt").arg("--output").arg("-");

    let runner = CommandRunner::new(spool_threshold, secrets);
    let mut output = runner.run(&command, Some(input))?;
    if output.stdout.size()? == 0 {
        return Err(DecryptionError::EmptyOutput);
    }

    let name = name.strip_suffix(ENCRYPT_SUFFIX).unwrap_or(name);
    log::debug!(target: "transforms", "Decrypted {name}");
    Ok((output.stdout, name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD: usize = 1024 * 1024;

    fn stream(bytes: &[u8]) -> SpooledStream {
        SpooledStream::from_bytes(bytes, THRESHOLD).unwrap()
    }

    #[test]
    fn compress_uncompress_round_trips() {
        let (compressed, name) = compress(stream(b"dump payload"), "app.psql", THRESHOLD).unwrap();
        assert_eq!(name, "app.psql.gz");

        let (mut output, name) = uncompress(compressed, &name, THRESHOLD).unwrap();
        assert_eq!(name, "app.psql");

        let mut bytes = Vec::new();
        output.read_to_end(&mut bytes).unwrap();
        assert_eq!(bytes, b"dump payload");
    }

    #[test]
    fn stages_rewind_their_input() {
        // A stream already read to the end must still compress fully.
        let mut input = stream(b"dump payload");
        let mut drained = Vec::new();
        input.read_to_end(&mut drained).unwrap();

        let (compressed, name) = compress(input, "app.psql", THRESHOLD).unwrap();
        let (mut output, _) = uncompress(compressed, &name, THRESHOLD).unwrap();

        let mut bytes = Vec::new();
        output.read_to_end(&mut bytes).unwrap();
        assert_eq!(bytes, b"dump payload");
    }

    #[test]
    fn stage_output_is_positioned_at_offset_zero() {
        let (mut compressed, _) = compress(stream(b"dump payload"), "app.psql", THRESHOLD).unwrap();

        // Reading without a rewind must see the gzip magic first.
        let mut magic = [0u8; 2];
        compressed.read_exact(&mut magic).unwrap();
        assert_eq!(magic, [0x1f, 0x8b]);
    }

    #[test]
    fn uncompress_tolerates_a_name_without_suffix() {
        let (compressed, _) = compress(stream(b"dump payload"), "app.psql", THRESHOLD).unwrap();

        let (mut output, name) = uncompress(compressed, "app.psql", THRESHOLD).unwrap();
        assert_eq!(name, "app.psql");

        let mut bytes = Vec::new();
        output.read_to_end(&mut bytes).unwrap();
        assert_eq!(bytes, b"dump payload");
    }

    #[test]
    fn encrypt_requires_a_recipient() {
        let gpg = GpgSettings::default();

        match encrypt(stream(b"dump"), "app.psql", &gpg, THRESHOLD) {
            Err(EncryptionError::MissingRecipient) => {}
            other => panic!("expected missing recipient, got {other:?}"),
        }
    }
}
