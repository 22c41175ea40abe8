//! SHA-256 digests of files and buffers.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use super::error::{ChecksumError, ChecksumResult};

/// Buffer size for reading files during checksum calculation (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Calculate the SHA-256 digest of a file.
///
/// Returns the lowercase hexadecimal digest.
///
/// # Errors
///
/// Returns [`ChecksumError::Read`] if the file cannot be opened or read.
/// Callers treat this as "must download", never as a reason to retry.
pub fn hash_file(path: &Path) -> ChecksumResult<String> {
    let file = File::open(path).map_err(|e| ChecksumError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;

    hash_reader(file).map_err(|e| ChecksumError::Read {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Calculate the SHA-256 digest of everything a reader yields.
pub fn hash_reader<R: Read>(mut reader: R) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// SHA-256 of an in-memory buffer.
pub fn hash_bytes(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Whether `path` exists and its digest equals `expected`.
///
/// Unreadable files count as not matching.
pub fn file_matches(path: &Path, expected: &str) -> bool {
    match hash_file(path) {
        Ok(actual) => actual.eq_ignore_ascii_case(expected),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const HELLO: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_hash_file() {
        let temp = TempDir::new().unwrap();
        let file_path = temp.path().join("test.txt");

        let mut file = File::create(&file_path).unwrap();
        file.write_all(b"hello world").unwrap();

        assert_eq!(hash_file(&file_path).unwrap(), HELLO);
    }

    #[test]
    fn test_hash_empty_file() {
        let temp = TempDir::new().unwrap();
        let file_path = temp.path().join("empty.txt");
        File::create(&file_path).unwrap();

        assert_eq!(
            hash_file(&file_path).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_hash_nonexistent_file() {
        let result = hash_file(Path::new("/nonexistent/file.txt"));
        assert!(matches!(result, Err(ChecksumError::Read { .. })));
    }

    #[test]
    fn test_large_file_matches_buffer_hash() {
        let temp = TempDir::new().unwrap();
        let file_path = temp.path().join("large.bin");

        // Larger than the read buffer
        let data = vec![0xABu8; 100_000];
        std::fs::write(&file_path, &data).unwrap();

        assert_eq!(hash_file(&file_path).unwrap(), hash_bytes(&data));
    }

    #[test]
    fn test_file_matches() {
        let temp = TempDir::new().unwrap();
        let file_path = temp.path().join("test.txt");
        std::fs::write(&file_path, b"hello world").unwrap();

        assert!(file_matches(&file_path, HELLO));
        assert!(file_matches(&file_path, &HELLO.to_uppercase()));
        assert!(!file_matches(&file_path, "wrong"));
        assert!(!file_matches(&temp.path().join("missing"), HELLO));
    }
}
