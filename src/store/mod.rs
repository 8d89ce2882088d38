//! Content-addressed attachment storage.
//!
//! Every attachment is written once under a path derived from the hex
//! digest of its bytes, split into 8-character directory segments:
//! `0cc175b9c0f1b6a831c399e269772661` lands at
//! `<root>/0cc175b9/c0f1b6a8/31c399e2/69772661`.

pub mod hash;
pub mod writer;

pub use hash::{ContentHasher, HashAlgorithm, Md5Hasher, Sha256Hasher};
pub use writer::{AttachmentStore, StoredAttachment};

use std::path::{Path, PathBuf};

/// Length of one directory segment of a sharded path.
pub const SEGMENT_LEN: usize = 8;

/// Map a hex digest to its storage path under `root`.
///
/// The digest is cut into segments of [`SEGMENT_LEN`] characters, all but
/// the last becoming directories; a shorter trailing remainder is appended
/// to the final component.
pub fn sharded_path(root: &Path, hex_digest: &str) -> PathBuf {
    let mut segments: Vec<&str> = Vec::with_capacity(hex_digest.len() / SEGMENT_LEN + 1);
    let mut rest = hex_digest;
    while rest.len() >= SEGMENT_LEN {
        let (segment, tail) = rest.split_at(SEGMENT_LEN);
        segments.push(segment);
        rest = tail;
    }

    let mut path = root.to_path_buf();
    match segments.split_last() {
        Some((last, dirs)) => {
            for dir in dirs {
                path.push(dir);
            }
            path.push(format!("{last}{rest}"));
        }
        None => path.push(rest),
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sharded_path_md5() {
        let path = sharded_path(Path::new("/up"), "0cc175b9c0f1b6a831c399e269772661");
        assert_eq!(path, PathBuf::from("/up/0cc175b9/c0f1b6a8/31c399e2/69772661"));
    }

    #[test]
    fn test_sharded_path_sha256_has_eight_segments() {
        let digest = "ca978112ca1bbdcafac231b39a23dc4da786eff8147c4e72b9807785afee48bb";
        let path = sharded_path(Path::new("/up"), digest);
        let rel = path.strip_prefix("/up").unwrap();
        assert_eq!(rel.components().count(), 8);
        assert!(rel
            .components()
            .all(|c| c.as_os_str().len() == SEGMENT_LEN));
    }

    #[test]
    fn test_sharded_path_remainder_joins_last_segment() {
        let path = sharded_path(Path::new("r"), "aaaaaaaabbbbbbbbcc");
        assert_eq!(path, PathBuf::from("r/aaaaaaaa/bbbbbbbbcc"));

        let short = sharded_path(Path::new("r"), "abc");
        assert_eq!(short, PathBuf::from("r/abc"));
    }
}
