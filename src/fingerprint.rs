//! Prefix fingerprints that identify a file independent of its path.
//!
//! A fingerprint is the first N bytes of a file. Two handles with the same
//! leading bytes are treated as the same file, which is what lets the engine
//! follow a log across renames. Files shorter than N produce a partial
//! fingerprint that grows as the file does; a shorter fingerprint that is a
//! prefix of a longer one is considered the same file.
//!
//! Two files that share their first N bytes but diverge afterwards cannot be
//! told apart, and a file that shrinks below N bytes and regrows with other
//! content may be mistaken for a new one. Hashing the whole file would remove
//! both limitations at the cost of reading every byte on every poll.

use std::io::SeekFrom;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Default number of leading bytes used to identify a file.
pub const DEFAULT_FINGERPRINT_SIZE: usize = 1000;

/// Identity of a file derived from its leading bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    first_bytes: Vec<u8>,
}

impl Fingerprint {
    /// Reads at most `size` bytes from the start of `file`.
    ///
    /// The file cursor is left wherever the read stopped; callers must seek
    /// before their next read.
    pub async fn compute(file: &mut File, size: usize) -> std::io::Result<Self> {
        file.seek(SeekFrom::Start(0)).await?;

        let mut first_bytes = Vec::with_capacity(size);
        (&mut *file)
            .take(size as u64)
            .read_to_end(&mut first_bytes)
            .await?;

        Ok(Self { first_bytes })
    }

    /// Create a fingerprint from raw bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            first_bytes: bytes.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.first_bytes
    }

    pub fn len(&self) -> usize {
        self.first_bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first_bytes.is_empty()
    }

    /// Whether the fingerprint covers the full configured prefix. Incomplete
    /// fingerprints must be recomputed as the file grows.
    pub fn is_complete(&self, size: usize) -> bool {
        self.first_bytes.len() >= size
    }

    /// Whether both fingerprints could describe the same file: the shorter
    /// one is a prefix of the longer one. An empty fingerprint matches
    /// anything, since an empty file may grow into any content.
    pub fn matches(&self, other: &Fingerprint) -> bool {
        let shared = self.len().min(other.len());
        self.first_bytes[..shared] == other.first_bytes[..shared]
    }

    /// Like [`Fingerprint::matches`], but never true for empty fingerprints.
    /// Used for rename detection, where an empty file carries no identity.
    pub fn same_identity(&self, other: &Fingerprint) -> bool {
        !self.is_empty() && !other.is_empty() && self.matches(other)
    }

    /// Stable key for the offset store.
    pub fn key(&self) -> String {
        blake3::hash(&self.first_bytes).to_hex().to_string()
    }

    /// Key of the first `len` bytes, or `None` if the fingerprint is shorter.
    pub fn prefix_key(&self, len: usize) -> Option<String> {
        let prefix = self.first_bytes.get(..len)?;
        Some(blake3::hash(prefix).to_hex().to_string())
    }
}
