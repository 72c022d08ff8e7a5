//! Content-addressed checks for locally cached assets

use sha2::{Digest, Sha256};
use std::io;
use std::path::Path;
use tokio::io::AsyncReadExt;

const READ_CHUNK: usize = 64 * 1024;

/// Result of comparing a local file against its expected (hash, size)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalAssetStatus {
    Valid,
    Missing,
    SizeMismatch { actual: u64 },
    HashMismatch { actual: String },
}

impl LocalAssetStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, LocalAssetStatus::Valid)
    }
}

/// Stateless hashing helpers; SHA-256, hex encoded
pub struct ContentAddressedStore;

impl ContentAddressedStore {
    /// Hash a file in fixed-size chunks so memory stays flat for large media
    pub async fn hash(path: &Path) -> io::Result<String> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; READ_CHUNK];

        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }

        Ok(hex::encode(hasher.finalize()))
    }

    pub fn hash_bytes(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    /// Compare a local file with the expected digest and size. The size is
    /// checked first and a mismatch skips hashing.
    pub async fn check(
        path: &Path,
        expected_hash: &str,
        expected_size: u64,
    ) -> io::Result<LocalAssetStatus> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(LocalAssetStatus::Missing),
            Err(e) => return Err(e),
        };

        if !metadata.is_file() {
            return Ok(LocalAssetStatus::Missing);
        }
        if metadata.len() != expected_size {
            return Ok(LocalAssetStatus::SizeMismatch {
                actual: metadata.len(),
            });
        }

        let actual = Self::hash(path).await?;
        if actual.eq_ignore_ascii_case(expected_hash) {
            Ok(LocalAssetStatus::Valid)
        } else {
            Ok(LocalAssetStatus::HashMismatch { actual })
        }
    }

    pub async fn is_missing_or_stale(
        path: &Path,
        expected_hash: &str,
        expected_size: u64,
    ) -> io::Result<bool> {
        Ok(!Self::check(path, expected_hash, expected_size).await?.is_valid())
    }
}
