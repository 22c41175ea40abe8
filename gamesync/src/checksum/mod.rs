//! Local integrity checking.
//!
//! Hashes files already on disk and compares them against manifest entries.
//! The output of a verification pass is a [`MismatchSet`]: the entries whose
//! local copy is missing or carries the wrong digest. A mismatch is not an
//! error, it is the work-list of the next transfer batch.
//!
//! Hashing is CPU- and I/O-bound and runs on a dedicated rayon pool sized by
//! the configured concurrency. Async callers should wrap [`hash_tree`] in
//! `tokio::task::spawn_blocking`.

mod diff;
mod error;
mod hash;
mod tree;

pub use diff::{diff, digest_map, Mismatch, MismatchReason, MismatchSet, PassKind};
pub use error::{ChecksumError, ChecksumResult};
pub use hash::{file_matches, hash_bytes, hash_file, hash_reader};
pub use tree::{hash_tree, list_files, Exclusions, LocalFileChecksum};
