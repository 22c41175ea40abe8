//! Block signatures of local files.

use std::io::Read;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Default block size for signatures and deltas (4KB).
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// rsync-style weak checksum that can slide one byte at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollingChecksum {
    a: u32,
    b: u32,
    len: u32,
}

impl RollingChecksum {
    pub fn new(block: &[u8]) -> Self {
        let len = block.len() as u32;
        let mut a = 0u32;
        let mut b = 0u32;
        for (i, &byte) in block.iter().enumerate() {
            a = a.wrapping_add(byte as u32);
            b = b.wrapping_add((len - i as u32).wrapping_mul(byte as u32));
        }
        Self { a, b, len }
    }

    /// Slide the window: drop `out` from the front, append `inp` at the back.
    pub fn roll(&mut self, out: u8, inp: u8) {
        self.a = self.a.wrapping_sub(out as u32).wrapping_add(inp as u32);
        self.b = self
            .b
            .wrapping_sub(self.len.wrapping_mul(out as u32))
            .wrapping_add(self.a);
    }

    pub fn value(&self) -> u32 {
        (self.a & 0xffff) | ((self.b & 0xffff) << 16)
    }
}

/// Signature of one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSignature {
    pub weak: u32,
    pub strong: [u8; 32],
    pub index: u32,
    /// Bytes in the block; only the last block may be short.
    pub len: u32,
}

/// Block-level description of a file's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub block_size: usize,
    pub file_size: u64,
    /// SHA-256 of the whole file.
    pub checksum: String,
    pub blocks: Vec<BlockSignature>,
}

impl Signature {
    /// Build a signature by streaming `reader` in `block_size` blocks.
    pub fn build<R: Read>(mut reader: R, block_size: usize) -> std::io::Result<Self> {
        let block_size = block_size.max(1);
        let mut buffer = vec![0u8; block_size];
        let mut file_hasher = Sha256::new();
        let mut blocks = Vec::new();
        let mut file_size = 0u64;

        loop {
            let filled = fill(&mut reader, &mut buffer)?;
            if filled == 0 {
                break;
            }
            let block = &buffer[..filled];
            file_hasher.update(block);
            file_size += filled as u64;
            blocks.push(BlockSignature {
                weak: RollingChecksum::new(block).value(),
                strong: strong_hash(block),
                index: blocks.len() as u32,
                len: filled as u32,
            });
            if filled < block_size {
                break;
            }
        }

        Ok(Self {
            block_size,
            file_size,
            checksum: format!("{:x}", file_hasher.finalize()),
            blocks,
        })
    }

    /// Signature of an in-memory buffer.
    pub fn from_bytes(data: &[u8], block_size: usize) -> Self {
        // Reading from a slice cannot fail
        Self::build(data, block_size).unwrap_or_else(|_| Self {
            block_size,
            file_size: 0,
            checksum: String::new(),
            blocks: Vec::new(),
        })
    }
}

pub(crate) fn strong_hash(block: &[u8]) -> [u8; 32] {
    Sha256::digest(block).into()
}

/// Read until `buffer` is full or the reader is exhausted.
fn fill<R: Read>(reader: &mut R, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
