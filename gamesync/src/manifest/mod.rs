//! Remote manifest model.
//!
//! The manifest is the server-side description of every file a release
//! channel ships: its slash-normalized path, SHA-256 digest, final size,
//! content-set tags (optional / localized) and, for large files, the ordered
//! list of chunks it was split into for parallel transfer.
//!
//! This module is pure data: parsing, validation and subset selection. It
//! never touches the network or the filesystem.
//!
//! # Example
//!
//! ```ignore
//! use gamesync::manifest::{select_files, ContentSet, Manifest};
//!
//! let manifest = Manifest::from_json(&body)?;
//! let core = select_files(&manifest, |e| ContentSet::Core.matches(e));
//! ```

mod channel;
mod error;
mod types;

pub use channel::{user_agent, ReleaseChannel, CHANNEL_KEY_HEADER, MANIFEST_FILE_NAME};
pub use error::{ManifestError, ManifestResult};
pub use types::{
    normalize_path, select_files, ContentSet, FileChunk, Manifest, ManifestEntry, PatchSource,
};
