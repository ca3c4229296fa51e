//! Content hashing for stored model artifacts
//!
//! A directory's hash is SHA-256 over the bytes of every regular file
//! beneath it, visited depth-first in file-name order. Names and metadata
//! are not hashed, only content and order.

use std::fs;
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};
use thiserror::Error;
use walkdir::WalkDir;

/// Errors raised while hashing
#[derive(Error, Debug)]
pub enum HashError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Directory traversal error
    #[error("Failed to walk directory: {0}")]
    Walk(#[from] walkdir::Error),

    /// The path is not a directory
    #[error("Not a directory: {0}")]
    NotADirectory(String),
}

/// Hex encoded SHA-256 of a byte slice
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Hex encoded SHA-256 over every file under `root`
pub fn hash_dir<P: AsRef<Path>>(root: P) -> Result<String, HashError> {
    let root = root.as_ref();
    if !root.is_dir() {
        return Err(HashError::NotADirectory(root.display().to_string()));
    }

    let mut hasher = Sha256::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file() {
            hasher.update(fs::read(entry.path())?);
        }
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(root: &Path, relative: &str, contents: &[u8]) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_hash_matches_ordered_concatenation() {
        let dir = tempdir().unwrap();
        write(dir.path(), "b.bin", b"second");
        write(dir.path(), "a/inner.bin", b"first");
        write(dir.path(), "c.bin", b"third");

        // a/ sorts before b.bin, so its file comes first
        let expected = sha256_hex(b"firstsecondthird");
        assert_eq!(hash_dir(dir.path()).unwrap(), expected);
    }

    #[test]
    fn test_hash_detects_tampering() {
        let dir = tempdir().unwrap();
        write(dir.path(), "variables/data", b"weights");
        let original = hash_dir(dir.path()).unwrap();
        assert_eq!(original, hash_dir(dir.path()).unwrap());

        write(dir.path(), "variables/data", b"weightz");
        let tampered = hash_dir(dir.path()).unwrap();
        assert_ne!(original, tampered);
        assert_eq!(tampered, hash_dir(dir.path()).unwrap());
    }

    #[test]
    fn test_hash_requires_directory() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            hash_dir(dir.path().join("missing")),
            Err(HashError::NotADirectory(_))
        ));
    }
}
