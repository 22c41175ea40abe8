//! Delta format and rsync-style delta computation.

use std::collections::HashMap;
use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::checksum::hash_bytes;

use super::error::{PatchError, PatchResult};
use super::signature::{strong_hash, RollingChecksum, Signature, DEFAULT_BLOCK_SIZE};

/// One reconstruction step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeltaOp {
    /// Copy block `block` of the base file.
    Copy { block: u32 },
    /// Insert bytes that do not occur in the base.
    Literal { bytes: Vec<u8> },
}

/// Instructions that turn one exact file version into another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    /// SHA-256 of the content this delta applies to.
    pub base_checksum: String,
    pub base_size: u64,
    pub block_size: u32,
    /// SHA-256 of the reconstructed file.
    pub new_checksum: String,
    pub new_size: u64,
    pub ops: Vec<DeltaOp>,
}

impl Delta {
    /// Serialize with bincode and gzip the result.
    pub fn encode(&self) -> PatchResult<Vec<u8>> {
        let raw = bincode::serialize(self).map_err(|e| PatchError::Encode(e.to_string()))?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&raw)
            .map_err(|e| PatchError::Encode(e.to_string()))?;
        encoder
            .finish()
            .map_err(|e| PatchError::Encode(e.to_string()))
    }

    /// Inverse of [`Delta::encode`].
    pub fn decode(data: &[u8]) -> PatchResult<Self> {
        let mut raw = Vec::new();
        GzDecoder::new(data)
            .read_to_end(&mut raw)
            .map_err(|e| PatchError::Decode(e.to_string()))?;
        bincode::deserialize(&raw).map_err(|e| PatchError::Decode(e.to_string()))
    }

    /// Bytes carried as literals.
    pub fn literal_bytes(&self) -> u64 {
        self.ops
            .iter()
            .map(|op| match op {
                DeltaOp::Copy { .. } => 0,
                DeltaOp::Literal { bytes } => bytes.len() as u64,
            })
            .sum()
    }
}

/// Computes deltas against a base signature.
#[derive(Debug, Clone)]
pub struct DeltaComputer {
    block_size: usize,
}

impl Default for DeltaComputer {
    fn default() -> Self {
        Self::new()
    }
}

impl DeltaComputer {
    pub fn new() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }

    pub fn with_block_size(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Signature of a base buffer using this computer's block size.
    pub fn signature(&self, base: &[u8]) -> Signature {
        Signature::from_bytes(base, self.block_size)
    }

    /// Compute the delta that turns the signed base into `new_data`.
    ///
    /// The weak checksum slides one byte at a time; candidates are confirmed
    /// with the strong hash. Only full-size base blocks are matchable.
    pub fn delta(&self, base: &Signature, new_data: &[u8]) -> Delta {
        let bs = base.block_size;
        let mut lookup: HashMap<u32, Vec<(&[u8; 32], u32)>> = HashMap::new();
        for block in base.blocks.iter().filter(|b| b.len as usize == bs) {
            lookup
                .entry(block.weak)
                .or_default()
                .push((&block.strong, block.index));
        }

        let mut ops = Vec::new();
        let mut literal_start = 0;
        let mut pos = 0;

        if new_data.len() >= bs && !lookup.is_empty() {
            let mut rolling = RollingChecksum::new(&new_data[..bs]);

            while pos + bs <= new_data.len() {
                let matched = lookup.get(&rolling.value()).and_then(|candidates| {
                    let strong = strong_hash(&new_data[pos..pos + bs]);
                    candidates
                        .iter()
                        .find(|(s, _)| **s == strong)
                        .map(|(_, index)| *index)
                });

                if let Some(index) = matched {
                    if literal_start < pos {
                        ops.push(DeltaOp::Literal {
                            bytes: new_data[literal_start..pos].to_vec(),
                        });
                    }
                    ops.push(DeltaOp::Copy { block: index });
                    pos += bs;
                    literal_start = pos;
                    if pos + bs <= new_data.len() {
                        rolling = RollingChecksum::new(&new_data[pos..pos + bs]);
                    }
                } else {
                    if pos + bs < new_data.len() {
                        rolling.roll(new_data[pos], new_data[pos + bs]);
                    }
                    pos += 1;
                }
            }
        }

        if literal_start < new_data.len() {
            ops.push(DeltaOp::Literal {
                bytes: new_data[literal_start..].to_vec(),
            });
        }

        Delta {
            base_checksum: base.checksum.clone(),
            base_size: base.file_size,
            block_size: bs as u32,
            new_checksum: hash_bytes(new_data),
            new_size: new_data.len() as u64,
            ops,
        }
    }
}

/// Apply a delta to an in-memory base, verifying base and result digests.
pub fn apply_delta(base: &[u8], delta: &Delta) -> PatchResult<Vec<u8>> {
    let actual_base = hash_bytes(base);
    if actual_base != delta.base_checksum {
        return Err(PatchError::BaseMismatch {
            expected: delta.base_checksum.clone(),
            actual: actual_base,
        });
    }

    let bs = delta.block_size.max(1) as usize;
    let blocks = base.len().div_ceil(bs);
    let mut out = Vec::with_capacity(delta.new_size as usize);

    for op in &delta.ops {
        match op {
            DeltaOp::Copy { block } => {
                let start = *block as usize * bs;
                if start >= base.len() {
                    return Err(PatchError::InvalidBlock {
                        index: *block,
                        blocks,
                    });
                }
                let end = (start + bs).min(base.len());
                out.extend_from_slice(&base[start..end]);
            }
            DeltaOp::Literal { bytes } => out.extend_from_slice(bytes),
        }
    }

    if out.len() as u64 != delta.new_size {
        return Err(PatchError::SizeMismatch {
            expected: delta.new_size,
            actual: out.len() as u64,
        });
    }
    let actual = hash_bytes(&out);
    if actual != delta.new_checksum {
        return Err(PatchError::OutputMismatch {
            expected: delta.new_checksum.clone(),
            actual,
        });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pseudo_random(len: usize, seed: u32) -> Vec<u8> {
        let mut state = seed.wrapping_mul(2_654_435_761).max(1);
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect()
    }

    #[test]
    fn test_identical_file_is_all_copies() {
        let base = pseudo_random(16 * 1024, 1);
        let computer = DeltaComputer::with_block_size(1024);
        let delta = computer.delta(&computer.signature(&base), &base);

        assert_eq!(delta.ops.len(), 16);
        assert!(delta.ops.iter().all(|op| matches!(op, DeltaOp::Copy { .. })));
        assert_eq!(apply_delta(&base, &delta).unwrap(), base);
    }

    #[test]
    fn test_insertion_realigns_with_rolling_checksum() {
        let base = pseudo_random(8 * 1024, 2);
        let mut new = base[..3000].to_vec();
        new.extend_from_slice(b"inserted bytes");
        new.extend_from_slice(&base[3000..]);

        let computer = DeltaComputer::with_block_size(512);
        let delta = computer.delta(&computer.signature(&base), &new);

        // Only the damaged block and the insertion travel as literals
        assert!(delta.literal_bytes() < 2 * 512);
        assert_eq!(apply_delta(&base, &delta).unwrap(), new);
    }

    #[test]
    fn test_encode_decode() {
        let base = pseudo_random(4096, 3);
        let new = pseudo_random(5000, 4);
        let computer = DeltaComputer::with_block_size(256);
        let delta = computer.delta(&computer.signature(&base), &new);

        let encoded = delta.encode().unwrap();
        assert_eq!(Delta::decode(&encoded).unwrap(), delta);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(matches!(
            Delta::decode(b"not a delta"),
            Err(PatchError::Decode(_))
        ));
    }

    #[test]
    fn test_wrong_base_rejected() {
        let base = pseudo_random(4096, 5);
        let computer = DeltaComputer::with_block_size(256);
        let delta = computer.delta(&computer.signature(&base), b"new");

        let result = apply_delta(b"some other base", &delta);
        assert!(matches!(result, Err(PatchError::BaseMismatch { .. })));
    }

    #[test]
    fn test_corrupt_literal_fails_verification() {
        let base = pseudo_random(4096, 6);
        let mut new = base.clone();
        new[100] ^= 0xFF;

        let computer = DeltaComputer::with_block_size(256);
        let mut delta = computer.delta(&computer.signature(&base), &new);
        for op in &mut delta.ops {
            if let DeltaOp::Literal { bytes } = op {
                bytes[0] ^= 0x01;
            }
        }

        assert!(matches!(
            apply_delta(&base, &delta),
            Err(PatchError::OutputMismatch { .. })
        ));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_delta_reconstructs_new_content(
                base in prop::collection::vec(any::<u8>(), 0..4096),
                edits in prop::collection::vec((any::<prop::sample::Index>(), any::<u8>()), 0..8),
                tail in prop::collection::vec(any::<u8>(), 0..300),
                block_size in 16usize..512,
            ) {
                let mut new = base.clone();
                for (index, byte) in &edits {
                    if !new.is_empty() {
                        let i = index.index(new.len());
                        new[i] = *byte;
                    }
                }
                new.extend_from_slice(&tail);

                let computer = DeltaComputer::with_block_size(block_size);
                let delta = computer.delta(&computer.signature(&base), &new);
                prop_assert_eq!(apply_delta(&base, &delta)?, new);
            }
        }
    }
}
