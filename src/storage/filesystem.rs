//! Local directory storage backend.

use std::fs::{self, File};
use std::io;
use std::path::PathBuf;

use super::{StorageBackend, StorageError};
use crate::util::spool::SpooledStream;

/// Stores backups as plain files under one root directory.
pub struct FilesystemBackend {
    root: PathBuf,
    spool_threshold: usize,
}

impl FilesystemBackend {
    pub fn new(root: PathBuf, spool_threshold: usize) -> Self {
        if root.is_relative() {
            log::warn!(target: "storage::filesystem", "Storage root is relative: {}", root.display());
        }

        Self {
            root,
            spool_threshold,
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl StorageBackend for FilesystemBackend {
    fn write_file(&self, name: &str, content: &mut SpooledStream) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root)?;

        content.rewind()?;
        let mut file = File::create(self.path(name))?;
        io::copy(content, &mut file)?;

        Ok(())
    }

    fn read_file(&self, name: &str) -> Result<SpooledStream, StorageError> {
        let path = self.path(name);
        let mut file = File::open(&path).map_err(|error| {
            if error.kind() == io::ErrorKind::NotFound {
                StorageError::FileNotFound
            } else {
                StorageError::Backend(error)
            }
        })?;

        let mut content = SpooledStream::new(self.spool_threshold);
        io::copy(&mut file, &mut content)?;
        content.rewind()?;

        Ok(content)
    }

    fn list_directory(&self) -> Result<Vec<String>, StorageError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort_unstable();

        Ok(names)
    }

    fn delete_file(&self, name: &str) -> Result<(), StorageError> {
        fs::remove_file(self.path(name)).map_err(|error| {
            if error.kind() == io::ErrorKind::NotFound {
                StorageError::FileNotFound
            } else {
                StorageError::Backend(error)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use tempfile::TempDir;

    use super::*;

    fn backend() -> (TempDir, FilesystemBackend) {
        let dir = TempDir::new().unwrap();
        let backend = FilesystemBackend::new(dir.path().join("backups"), 1024);
        (dir, backend)
    }

    #[test]
    fn write_read_round_trips() {
        let (_dir, backend) = backend();
        let mut content = SpooledStream::from_bytes(b"backup bytes", 1024).unwrap();

        backend.write_file("app.psql", &mut content).unwrap();
        let mut read = backend.read_file("app.psql").unwrap();

        let mut bytes = Vec::new();
        read.read_to_end(&mut bytes).unwrap();
        assert_eq!(bytes, b"backup bytes");
    }

    #[test]
    fn missing_file_reads_as_file_not_found() {
        let (_dir, backend) = backend();

        let result = backend.read_file("absent.psql");
        assert!(matches!(result, Err(StorageError::FileNotFound)));
    }

    #[test]
    fn listing_an_unwritten_root_is_empty() {
        let (_dir, backend) = backend();
        assert!(backend.list_directory().unwrap().is_empty());
    }

    #[test]
    fn delete_removes_the_file() {
        let (_dir, backend) = backend();
        let mut content = SpooledStream::from_bytes(b"backup", 1024).unwrap();
        backend.write_file("app.psql", &mut content).unwrap();

        backend.delete_file("app.psql").unwrap();
        assert!(backend.list_directory().unwrap().is_empty());
    }
}
