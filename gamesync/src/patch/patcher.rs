//! In-place patching of files on disk.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::delta::{Delta, DeltaOp};
use super::error::{PatchError, PatchResult};
use super::signature::Signature;

/// Applies a downloaded delta file to the local file it targets.
#[derive(Debug, Clone, Default)]
pub struct DeltaPatcher;

impl DeltaPatcher {
    pub fn new() -> Self {
        Self
    }

    /// Rebuild `target` from its current content and the delta in `delta_file`.
    ///
    /// The current content is signed first and must match the delta's base;
    /// an unreadable delta or a base mismatch leaves `target` untouched.
    /// The original is then moved aside and the new file written at
    /// `target`, verified against the delta's checksum. A failure from that
    /// point on removes the target.
    pub fn patch_file(&self, target: &Path, delta_file: &Path) -> PatchResult<()> {
        let encoded = std::fs::read(delta_file).map_err(|e| PatchError::io(delta_file, e))?;
        let delta = Delta::decode(&encoded)?;

        let base = File::open(target).map_err(|e| PatchError::io(target, e))?;
        let signature = Signature::build(base, delta.block_size.max(1) as usize)
            .map_err(|e| PatchError::io(target, e))?;

        if signature.checksum != delta.base_checksum {
            return Err(PatchError::BaseMismatch {
                expected: delta.base_checksum.clone(),
                actual: signature.checksum,
            });
        }

        let base_path = sidecar(target, ".patchbase");
        std::fs::rename(target, &base_path).map_err(|e| PatchError::io(target, e))?;

        let result = reconstruct(target, &base_path, &signature, &delta);

        if let Err(e) = std::fs::remove_file(&base_path) {
            warn!(path = %base_path.display(), error = %e, "Failed to remove patch base");
        }
        if result.is_err() {
            if let Err(e) = std::fs::remove_file(target) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %target.display(), error = %e, "Failed to remove bad patch output");
                }
            }
        }

        if result.is_ok() {
            debug!(
                path = %target.display(),
                ops = delta.ops.len(),
                literal_bytes = delta.literal_bytes(),
                "Patched file"
            );
        }
        result
    }
}

fn reconstruct(
    target: &Path,
    base_path: &Path,
    signature: &Signature,
    delta: &Delta,
) -> PatchResult<()> {
    let mut base = File::open(base_path).map_err(|e| PatchError::io(base_path, e))?;
    let out = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(target)
        .map_err(|e| PatchError::io(target, e))?;
    let mut writer = BufWriter::new(out);
    let mut hasher = Sha256::new();
    let mut written = 0u64;
    let mut buffer = vec![0u8; signature.block_size];

    for op in &delta.ops {
        let bytes: &[u8] = match op {
            DeltaOp::Copy { block } => {
                let Some(sig) = signature.blocks.get(*block as usize) else {
                    return Err(PatchError::InvalidBlock {
                        index: *block,
                        blocks: signature.blocks.len(),
                    });
                };
                let len = sig.len as usize;
                base.seek(SeekFrom::Start(*block as u64 * signature.block_size as u64))
                    .and_then(|_| base.read_exact(&mut buffer[..len]))
                    .map_err(|e| PatchError::io(base_path, e))?;
                &buffer[..len]
            }
            DeltaOp::Literal { bytes } => bytes,
        };

        hasher.update(bytes);
        writer
            .write_all(bytes)
            .map_err(|e| PatchError::io(target, e))?;
        written += bytes.len() as u64;
    }

    writer.flush().map_err(|e| PatchError::io(target, e))?;

    if written != delta.new_size {
        return Err(PatchError::SizeMismatch {
            expected: delta.new_size,
            actual: written,
        });
    }
    let actual = format!("{:x}", hasher.finalize());
    if actual != delta.new_checksum {
        return Err(PatchError::OutputMismatch {
            expected: delta.new_checksum.clone(),
            actual,
        });
    }
    Ok(())
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::hash_file;
    use crate::patch::DeltaComputer;
    use tempfile::TempDir;

    fn write_delta(dir: &Path, base: &[u8], new: &[u8]) -> PathBuf {
        let computer = DeltaComputer::with_block_size(64);
        let delta = computer.delta(&computer.signature(base), new);
        let path = dir.join("file.bin.delta");
        std::fs::write(&path, delta.encode().unwrap()).unwrap();
        path
    }

    #[test]
    fn test_patch_file_in_place() {
        let temp = TempDir::new().unwrap();
        let base: Vec<u8> = (0..2000u32).map(|i| (i % 97) as u8).collect();
        let mut new = base.clone();
        new.splice(500..510, b"patched!".iter().copied());

        let target = temp.path().join("file.bin");
        std::fs::write(&target, &base).unwrap();
        let delta = write_delta(temp.path(), &base, &new);

        DeltaPatcher::new().patch_file(&target, &delta).unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), new);
        assert!(!sidecar(&target, ".patchbase").exists());
        assert_eq!(
            hash_file(&target).unwrap(),
            crate::checksum::hash_bytes(&new)
        );
    }

    #[test]
    fn test_wrong_base_leaves_file_untouched() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("file.bin");
        std::fs::write(&target, b"unrelated content").unwrap();
        let delta = write_delta(temp.path(), b"expected base", b"new");

        let result = DeltaPatcher::new().patch_file(&target, &delta);

        assert!(matches!(result, Err(PatchError::BaseMismatch { .. })));
        assert_eq!(std::fs::read(&target).unwrap(), b"unrelated content");
    }

    #[test]
    fn test_corrupt_delta_removes_target() {
        let temp = TempDir::new().unwrap();
        let base = vec![1u8; 512];
        let target = temp.path().join("file.bin");
        std::fs::write(&target, &base).unwrap();

        let computer = DeltaComputer::with_block_size(64);
        let mut delta = computer.delta(&computer.signature(&base), &[2u8; 600]);
        delta.new_checksum = "0".repeat(64);
        let delta_path = temp.path().join("file.bin.delta");
        std::fs::write(&delta_path, delta.encode().unwrap()).unwrap();

        let result = DeltaPatcher::new().patch_file(&target, &delta_path);

        assert!(matches!(result, Err(PatchError::OutputMismatch { .. })));
        assert!(!target.exists());
        assert!(!sidecar(&target, ".patchbase").exists());
    }

    #[test]
    fn test_missing_delta_file() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("file.bin");
        std::fs::write(&target, b"x").unwrap();

        let result = DeltaPatcher::new().patch_file(&target, &temp.path().join("absent"));
        assert!(matches!(result, Err(PatchError::Io { .. })));
    }
}
