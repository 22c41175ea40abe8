//! Binary delta patching.
//!
//! A delta rebuilds a new version of a file from blocks of the old one plus
//! literal bytes. The local file is described by a [`Signature`] (rolling
//! weak checksum and SHA-256 per block); the [`DeltaPatcher`] checks that the
//! delta was computed against exactly that content, reconstructs the new
//! file in place and verifies its digest.
//!
//! Patch failures are final for the file: the original is gone, so the next
//! verification pass sees the file as missing and downloads it whole.

mod delta;
mod error;
mod patcher;
mod signature;

pub use delta::{apply_delta, Delta, DeltaComputer, DeltaOp};
pub use error::{PatchError, PatchResult};
pub use patcher::DeltaPatcher;
pub use signature::{BlockSignature, RollingChecksum, Signature, DEFAULT_BLOCK_SIZE};
