//! Content checksum utilities for source change detection
//!
//! The warehouse records an MD5 hex digest per source; MD5 is therefore the
//! default algorithm. SHA-256 is available for providers that publish it
//! alongside their artifacts.

use crate::error::{EdpError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Supported checksum algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    #[default]
    Md5,
    Sha256,
}

/// Compute a hex checksum of a byte slice
pub fn compute(data: &[u8], algorithm: ChecksumAlgorithm) -> String {
    match algorithm {
        ChecksumAlgorithm::Md5 => format!("{:x}", md5::compute(data)),
        ChecksumAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(data);
            hex::encode(hasher.finalize())
        },
    }
}

/// Compute the MD5 hex digest of a byte slice
pub fn compute_md5(data: &[u8]) -> String {
    compute(data, ChecksumAlgorithm::Md5)
}

/// Compute the checksum of a file on disk
pub async fn compute_file(path: &Path, algorithm: ChecksumAlgorithm) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;

    let mut buffer = Vec::new();
    file.read_to_end(&mut buffer).await?;

    Ok(compute(&buffer, algorithm))
}

/// Compute the MD5 hex digest of a file on disk
pub async fn compute_file_md5(path: &Path) -> Result<String> {
    compute_file(path, ChecksumAlgorithm::Md5).await
}

/// Verify that data matches an expected hex digest (case-insensitive)
pub fn verify(data: &[u8], expected: &str, algorithm: ChecksumAlgorithm) -> bool {
    compute(data, algorithm).eq_ignore_ascii_case(expected)
}

/// Verify a file against an expected hex digest, erroring on mismatch
pub async fn verify_file(
    path: &Path,
    expected: &str,
    algorithm: ChecksumAlgorithm,
) -> Result<()> {
    let actual = compute_file(path, algorithm).await?;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(EdpError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_md5() {
        let data = b"Hello, world!";
        let md5 = compute_md5(data);
        // MD5 of "Hello, world!"
        assert_eq!(md5, "6cd3556deb0da54bca060b4c39479839");
    }

    #[test]
    fn test_compute_sha256() {
        let data = b"hello world";
        let digest = compute(data, ChecksumAlgorithm::Sha256);
        assert_eq!(
            digest,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_verify_case_insensitive() {
        let data = b"test";
        let lowercase = "098f6bcd4621d373cade4e832627b4f6";
        let uppercase = "098F6BCD4621D373CADE4E832627B4F6";

        assert!(verify(data, lowercase, ChecksumAlgorithm::Md5));
        assert!(verify(data, uppercase, ChecksumAlgorithm::Md5));
        assert!(!verify(data, "not_a_digest", ChecksumAlgorithm::Md5));
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact.csv");
        tokio::fs::write(&path, b"Date,Value\n2024-01-01,42\n")
            .await
            .unwrap();

        let from_file = compute_file_md5(&path).await.unwrap();
        let from_bytes = compute_md5(b"Date,Value\n2024-01-01,42\n");
        assert_eq!(from_file, from_bytes);

        verify_file(&path, &from_bytes, ChecksumAlgorithm::Md5)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_verify_file_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact.csv");
        tokio::fs::write(&path, b"payload").await.unwrap();

        let err = verify_file(&path, "0000", ChecksumAlgorithm::Md5)
            .await
            .unwrap_err();
        assert!(matches!(err, EdpError::ChecksumMismatch { .. }));
    }
}
