//! In-memory storage backend.
//!
//! Backs tests and dry runs; nothing survives the process.

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Mutex;

use super::{StorageBackend, StorageError};
use crate::util::spool::SpooledStream;

/// Stores backups in a process-local map.
pub struct MemoryBackend {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    spool_threshold: usize,
}

impl MemoryBackend {
    pub fn new(spool_threshold: usize) -> Self {
        Self {
            files: Mutex::new(BTreeMap::new()),
            spool_threshold,
        }
    }
}

impl StorageBackend for MemoryBackend {
    fn write_file(&self, name: &str, content: &mut SpooledStream) -> Result<(), StorageError> {
        content.rewind()?;
        let mut bytes = Vec::new();
        content.read_to_end(&mut bytes)?;

        self.files
            .lock()
            .expect("memory backend lock should not be poisoned")
            .insert(name.to_string(), bytes);

        Ok(())
    }

    fn read_file(&self, name: &str) -> Result<SpooledStream, StorageError> {
        let files = self
            .files
            .lock()
            .expect("memory backend lock should not be poisoned");
        let bytes = files.get(name).ok_or(StorageError::FileNotFound)?;

        Ok(SpooledStream::from_bytes(bytes, self.spool_threshold)?)
    }

    fn list_directory(&self) -> Result<Vec<String>, StorageError> {
        let files = self
            .files
            .lock()
            .expect("memory backend lock should not be poisoned");

        Ok(files.keys().cloned().collect())
    }

    fn delete_file(&self, name: &str) -> Result<(), StorageError> {
        let mut files = self
            .files
            .lock()
            .expect("memory backend lock should not be poisoned");

        files
            .remove(name)
            .map(|_| ())
            .ok_or(StorageError::FileNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_list_delete() {
        let backend = MemoryBackend::new(1024);
        let mut content = SpooledStream::from_bytes(b"backup", 1024).unwrap();

        backend.write_file("b.psql", &mut content).unwrap();
        let mut content = SpooledStream::from_bytes(b"backup", 1024).unwrap();
        backend.write_file("a.psql", &mut content).unwrap();

        assert_eq!(backend.list_directory().unwrap(), vec!["a.psql", "b.psql"]);

        let mut read = backend.read_file("a.psql").unwrap();
        let mut bytes = Vec::new();
        read.read_to_end(&mut bytes).unwrap();
        assert_eq!(bytes, b"backup");

        backend.delete_file("a.psql").unwrap();
        assert!(matches!(
            backend.read_file("a.psql"),
            Err(StorageError::FileNotFound)
        ));
    }
}
