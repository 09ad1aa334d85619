//! Content hashing for completed artifacts.
//!
//! Files hash to the SHA-256 of their bytes. Directories hash to a SHA-256
//! over the sorted sequence of relative paths, each followed by that file's
//! content hash, which is reproducible across hosts regardless of readdir
//! order.

use std::fs::File;
use std::io::{BufReader, Read as _};
use std::path::Path;

use sha2::{Digest as _, Sha256};
use walkdir::WalkDir;

use crate::error::{FingerprintError, FingerprintResult};

const READ_CHUNK: usize = 64 * 1024;

/// Hash a regular file's bytes.
///
/// # Errors
///
/// Returns [`FingerprintError::Io`] when the file cannot be read.
pub fn file_hash(path: &Path) -> FingerprintResult<String> {
    let file = File::open(path).map_err(|source| FingerprintError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut chunk = vec![0_u8; READ_CHUNK];
    loop {
        let read = reader
            .read(&mut chunk)
            .map_err(|source| FingerprintError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        if read == 0 {
            break;
        }
        hasher.update(&chunk[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hash a directory tree deterministically.
///
/// # Errors
///
/// Returns [`FingerprintError::Io`] when traversal or any file read fails.
pub fn directory_hash(root: &Path) -> FingerprintResult<String> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|source| FingerprintError::Io {
            path: root.to_path_buf(),
            source: source
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("walkdir loop")),
        })?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    files.sort();

    let mut hasher = Sha256::new();
    for file in files {
        let relative = file.strip_prefix(root).unwrap_or(&file);
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update(file_hash(&file)?.as_bytes());
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hash a file or directory, dispatching on the path's kind.
///
/// # Errors
///
/// Returns [`FingerprintError::Io`] when the path does not exist or cannot
/// be read.
pub fn content_hash(path: &Path) -> FingerprintResult<String> {
    if path.is_dir() {
        directory_hash(path)
    } else if path.is_file() {
        file_hash(path)
    } else {
        Err(FingerprintError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not a file or directory"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn file_hash_matches_sha256_of_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        fs::write(&path, b"manifold").unwrap();

        let expected = hex::encode(Sha256::digest(b"manifold"));
        assert_eq!(file_hash(&path).unwrap(), expected);
    }

    #[test]
    fn directory_hash_is_order_independent_and_path_sensitive() {
        let first = tempfile::tempdir().unwrap();
        fs::create_dir(first.path().join("sub")).unwrap();
        fs::write(first.path().join("b.txt"), b"beta").unwrap();
        fs::write(first.path().join("sub/a.txt"), b"alpha").unwrap();

        let second = tempfile::tempdir().unwrap();
        fs::create_dir(second.path().join("sub")).unwrap();
        fs::write(second.path().join("sub/a.txt"), b"alpha").unwrap();
        fs::write(second.path().join("b.txt"), b"beta").unwrap();

        assert_eq!(
            directory_hash(first.path()).unwrap(),
            directory_hash(second.path()).unwrap()
        );

        // Renaming a file changes the digest even with identical content.
        let third = tempfile::tempdir().unwrap();
        fs::create_dir(third.path().join("sub")).unwrap();
        fs::write(third.path().join("sub/renamed.txt"), b"alpha").unwrap();
        fs::write(third.path().join("b.txt"), b"beta").unwrap();
        assert_ne!(
            directory_hash(first.path()).unwrap(),
            directory_hash(third.path()).unwrap()
        );
    }

    #[test]
    fn content_hash_dispatches_and_rejects_missing_paths() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a");
        fs::write(&file, b"x").unwrap();

        assert_eq!(content_hash(&file).unwrap(), file_hash(&file).unwrap());
        assert_eq!(
            content_hash(dir.path()).unwrap(),
            directory_hash(dir.path()).unwrap()
        );
        assert!(content_hash(&dir.path().join("missing")).is_err());
    }
}
