//! Digest algorithms used to address stored attachments.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Computes the lowercase hex digest that names a stored attachment.
///
/// The receiving service looks attachments up by this digest, so both
/// sides must agree on the algorithm.
pub trait ContentHasher: Send + Sync {
    fn hex_digest(&self, data: &[u8]) -> String;
}

/// MD5, the digest the receiving endpoint expects by default.
#[derive(Debug, Clone, Copy, Default)]
pub struct Md5Hasher;

impl ContentHasher for Md5Hasher {
    fn hex_digest(&self, data: &[u8]) -> String {
        let mut hasher = md5::Md5::new();
        hasher.update(data);
        format!("{:x}", hasher.finalize())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl ContentHasher for Sha256Hasher {
    fn hex_digest(&self, data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        format!("{:x}", hasher.finalize())
    }
}

/// Hash algorithm selectable from the configuration file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Md5,
    Sha256,
}

impl HashAlgorithm {
    pub fn hasher(self) -> Box<dyn ContentHasher> {
        match self {
            HashAlgorithm::Md5 => Box::new(Md5Hasher),
            HashAlgorithm::Sha256 => Box::new(Sha256Hasher),
        }
    }
}
