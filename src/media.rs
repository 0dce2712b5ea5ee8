//! Media file-tree archives.
//!
//! Media backups capture the uploaded-files tree of a web application
//! as one tar stream, so they flow through the same transform and
//! storage chain as database dumps.

use std::io;
use std::path::Path;

use crate::util::spool::SpooledStream;

/// Extension of media archives.
pub const MEDIA_EXTENSION: &str = "tar";

/// Archive the file tree under `media_root` into a rewound stream.
pub fn create_archive(media_root: &Path, spool_threshold: usize) -> io::Result<SpooledStream> {
    log::info!(target: "media", "Archiving media tree {}", media_root.display());

    let mut builder = tar::Builder::new(SpooledStream::new(spool_threshold));
    builder.append_dir_all("", media_root)?;
    let mut stream = builder.into_inner()?;
    stream.rewind()?;

    Ok(stream)
}

/// Unpack a media archive into `target`.
pub fn restore_archive(stream: SpooledStream, target: &Path) -> io::Result<()> {
    log::info!(target: "media", "Unpacking media archive to {}", target.display());

    let mut archive = tar::Archive::new(stream);
    archive.unpack(target)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn archive_round_trips_the_file_tree() {
        let dir = TempDir::new().unwrap();
        let media_root = dir.path().join("media");
        fs::create_dir_all(media_root.join("avatars")).unwrap();
        fs::write(media_root.join("avatars/alice.png"), b"png bytes").unwrap();
        fs::write(media_root.join("upload.txt"), b"text").unwrap();

        let mut stream = create_archive(&media_root, 1024 * 1024).unwrap();
        assert!(stream.size().unwrap() > 0);

        let target = dir.path().join("restored");
        restore_archive(stream, &target).unwrap();

        assert_eq!(
            fs::read(target.join("avatars/alice.png")).unwrap(),
            b"png bytes"
        );
        assert_eq!(fs::read(target.join("upload.txt")).unwrap(), b"text");
    }
}
