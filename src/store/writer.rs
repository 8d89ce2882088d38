//! Writes attachments into the sharded upload directory.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use humansize::{format_size, BINARY};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::hash::ContentHasher;
use super::sharded_path;
use crate::error::{MailpostError, Result};
use crate::model::attachment::Attachment;

/// Where an attachment ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAttachment {
    pub digest: String,
    pub path: PathBuf,
    /// `false` when identical content was already present.
    pub written: bool,
}

/// Idempotent, content-addressed file store rooted at the upload directory.
pub struct AttachmentStore {
    root: PathBuf,
    hasher: Box<dyn ContentHasher>,
    chunk_size: usize,
}

impl AttachmentStore {
    pub fn new(root: impl Into<PathBuf>, hasher: Box<dyn ContentHasher>, chunk_size: usize) -> Self {
        Self {
            root: root.into(),
            hasher,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Hex digest naming the attachment in the store.
    pub fn content_address(&self, attachment: &Attachment) -> String {
        self.hasher.hex_digest(&attachment.filebody)
    }

    /// Store the attachment body unless a file with the same digest exists.
    ///
    /// Existing files are never rewritten. Missing intermediate directories
    /// are created; any I/O failure is returned and leaves nothing at the
    /// content address, so a retry writes the file again.
    pub fn store(&self, attachment: &Attachment) -> Result<StoredAttachment> {
        let digest = self.content_address(attachment);
        let path = sharded_path(&self.root, &digest);

        if path.exists() {
            debug!(digest = %digest, filename = %attachment.filename, "Attachment already stored");
            return Ok(StoredAttachment {
                digest,
                path,
                written: false,
            });
        }

        let parent = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent).map_err(|e| MailpostError::io(parent, e))?;

        // Only complete files ever appear at a content address
        let mut incoming = tempfile::Builder::new()
            .prefix(".incoming-")
            .tempfile_in(parent)
            .map_err(|e| MailpostError::io(parent, e))?;
        for chunk in attachment.filebody.chunks(self.chunk_size) {
            incoming
                .write_all(chunk)
                .map_err(|e| MailpostError::io(incoming.path(), e))?;
        }
        incoming
            .flush()
            .map_err(|e| MailpostError::io(incoming.path(), e))?;

        if !place(incoming, &path)? {
            debug!(digest = %digest, "Attachment stored concurrently by another delivery");
            return Ok(StoredAttachment {
                digest,
                path,
                written: false,
            });
        }

        info!(
            path = %path.display(),
            filename = %attachment.filename,
            size = %format_size(attachment.filebody.len(), BINARY),
            "Attachment stored"
        );

        Ok(StoredAttachment {
            digest,
            path,
            written: true,
        })
    }
}

/// Move a fully written temporary file to `path` without replacing an
/// existing file. Returns `false` when `path` was already taken; the
/// temporary file is removed in that case.
fn place(incoming: NamedTempFile, path: &Path) -> Result<bool> {
    match incoming.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(MailpostError::io(path, e.error)),
    }
}

impl std::fmt::Debug for AttachmentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachmentStore")
            .field("root", &self.root)
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::hash::{Md5Hasher, Sha256Hasher};
    use assert_fs::prelude::*;
    use predicates::prelude::*;

    fn attachment(name: &str, body: &[u8]) -> Attachment {
        Attachment {
            filename: name.to_string(),
            filebody: body.to_vec(),
            main_type: "application".to_string(),
            sub_type: "octet-stream".to_string(),
        }
    }

    #[test]
    fn test_store_writes_sharded_file() {
        let dir = assert_fs::TempDir::new().unwrap();
        let store = AttachmentStore::new(dir.path(), Box::new(Md5Hasher), 4096);

        let stored = store.store(&attachment("a.txt", b"a")).unwrap();
        assert!(stored.written);
        assert_eq!(stored.digest, "0cc175b9c0f1b6a831c399e269772661");

        dir.child("0cc175b9/c0f1b6a8/31c399e2/69772661")
            .assert(predicate::path::is_file())
            .assert("a");
    }

    #[test]
    fn test_store_is_idempotent() {
        let dir = assert_fs::TempDir::new().unwrap();
        let store = AttachmentStore::new(dir.path(), Box::new(Md5Hasher), 4096);
        let att = attachment("report.pdf", b"%PDF-1.4 content");

        let first = store.store(&att).unwrap();
        let second = store.store(&att).unwrap();
        assert!(first.written);
        assert!(!second.written);
        assert_eq!(first.path, second.path);
        assert_eq!(std::fs::read(&second.path).unwrap(), b"%PDF-1.4 content");
    }

    #[test]
    fn test_existing_file_is_not_overwritten() {
        let dir = assert_fs::TempDir::new().unwrap();
        let store = AttachmentStore::new(dir.path(), Box::new(Md5Hasher), 4096);
        dir.child("0cc175b9/c0f1b6a8/31c399e2/69772661")
            .write_str("already here")
            .unwrap();

        let stored = store.store(&attachment("a.txt", b"a")).unwrap();
        assert!(!stored.written);
        dir.child("0cc175b9/c0f1b6a8/31c399e2/69772661")
            .assert("already here");
    }

    #[test]
    fn test_place_keeps_file_that_appeared_meanwhile() {
        let dir = assert_fs::TempDir::new().unwrap();
        let target = dir.child("0cc175b9");
        let mut incoming = NamedTempFile::new_in(dir.path()).unwrap();
        incoming.write_all(b"a").unwrap();
        let incoming_path = incoming.path().to_path_buf();
        target.write_str("stored first").unwrap();

        assert!(!place(incoming, target.path()).unwrap());
        target.assert("stored first");
        assert!(!incoming_path.exists());
    }

    #[test]
    fn test_store_leaves_no_temporary_files() {
        let dir = assert_fs::TempDir::new().unwrap();
        let store = AttachmentStore::new(dir.path(), Box::new(Md5Hasher), 2);
        let stored = store.store(&attachment("a.txt", b"abcdef")).unwrap();

        let leaf = stored.path.parent().unwrap();
        let names: Vec<_> = std::fs::read_dir(leaf)
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![stored.path.file_name().unwrap().to_owned()]);
        assert_eq!(std::fs::read(&stored.path).unwrap(), b"abcdef");
    }

    #[test]
    fn test_small_chunks_write_whole_body() {
        let dir = assert_fs::TempDir::new().unwrap();
        let store = AttachmentStore::new(dir.path(), Box::new(Sha256Hasher), 3);
        let body: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();

        let stored = store.store(&attachment("blob.bin", &body)).unwrap();
        assert_eq!(std::fs::read(&stored.path).unwrap(), body);
        let rel = stored.path.strip_prefix(dir.path()).unwrap();
        assert_eq!(rel.components().count(), 8);
    }

    #[test]
    fn test_distinct_content_distinct_paths() {
        let dir = assert_fs::TempDir::new().unwrap();
        let store = AttachmentStore::new(dir.path(), Box::new(Md5Hasher), 4096);
        let one = store.store(&attachment("x", b"one")).unwrap();
        let two = store.store(&attachment("x", b"two")).unwrap();
        assert_ne!(one.path, two.path);
    }

    #[test]
    fn test_unwritable_root_is_io_error() {
        let dir = assert_fs::TempDir::new().unwrap();
        let blocker = dir.child("not-a-dir");
        blocker.write_str("file").unwrap();
        let store = AttachmentStore::new(blocker.path(), Box::new(Md5Hasher), 4096);

        let err = store.store(&attachment("a", b"a")).unwrap_err();
        assert!(matches!(err, MailpostError::Io { .. }));
    }
}
