//! Spill-to-disk staging buffer for dump payloads.

use std::io::{self, Read, Seek, SeekFrom, Write};

use tempfile::SpooledTempFile;

/// Default in-memory size before a [SpooledStream] spills to disk.
pub const DEFAULT_SPOOL_THRESHOLD: usize = 10 * 1024 * 1024;

/// Byte stream held in memory up to a threshold, then transparently
/// backed by a temporary file.
///
/// Dumps may be larger than available memory, so every stage of the
/// pipeline stages its output in one of these instead of a `Vec<u8>`.
/// The backing temporary file is removed when the stream is dropped.
pub struct SpooledStream {
    inner: SpooledTempFile,
}

impl SpooledStream {
    /// Create an empty stream spilling to disk above `threshold` bytes.
    pub fn new(threshold: usize) -> Self {
        Self {
            inner: SpooledTempFile::new(threshold),
        }
    }

    /// Create a stream pre-filled with `bytes`, rewound to offset zero.
    pub fn from_bytes(bytes: &[u8], threshold: usize) -> io::Result<Self> {
        let mut stream = Self::new(threshold);
        stream.write_all(bytes)?;
        stream.rewind()?;
        Ok(stream)
    }

    /// Reposition the stream to offset zero.
    pub fn rewind(&mut self) -> io::Result<()> {
        self.inner.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    /// Total size of the stream in bytes.
    ///
    /// The read position is left at offset zero afterwards.
    pub fn size(&mut self) -> io::Result<u64> {
        let size = self.inner.seek(SeekFrom::End(0))?;
        self.rewind()?;
        Ok(size)
    }

    /// Whether the stream spilled to a temporary file.
    pub fn is_spilled(&self) -> bool {
        self.inner.is_rolled()
    }
}

impl Read for SpooledStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for SpooledStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Seek for SpooledStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl std::fmt::Debug for SpooledStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpooledStream")
            .field("spilled", &self.is_spilled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_back_what_was_written() {
        let mut stream = SpooledStream::from_bytes(b"dump payload", 1024).unwrap();

        let mut read = String::new();
        stream.read_to_string(&mut read).unwrap();
        assert_eq!(read, "dump payload");
    }

    #[test]
    fn spills_to_disk_above_threshold() {
        let mut stream = SpooledStream::new(8);
        stream.write_all(b"larger than eight bytes").unwrap();
        assert!(stream.is_spilled());

        stream.rewind().unwrap();
        let mut read = Vec::new();
        stream.read_to_end(&mut read).unwrap();
        assert_eq!(read, b"larger than eight bytes");
    }

    #[test]
    fn size_preserves_rewound_position() {
        let mut stream = SpooledStream::from_bytes(b"0123456789", 1024).unwrap();
        assert_eq!(stream.size().unwrap(), 10);

        let mut read = Vec::new();
        stream.read_to_end(&mut read).unwrap();
        assert_eq!(read.len(), 10);
    }
}
