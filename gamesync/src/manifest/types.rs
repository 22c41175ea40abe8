//! Manifest document types.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::error::{ManifestError, ManifestResult};

/// Length of a hex-encoded SHA-256 digest.
const SHA256_HEX_LEN: usize = 64;

/// One chunk of a large file that was split for parallel download.
///
/// Concatenating all chunks of an entry in array order yields the entry's
/// final content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChunk {
    /// Relative path of the chunk, both on the server and on disk.
    pub path: String,
    /// SHA-256 of the chunk as downloaded.
    pub checksum: String,
    /// Byte length of the chunk.
    pub size: u64,
}

/// Binary delta that upgrades a known older version of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchSource {
    /// Relative path of the delta on the server.
    pub path: String,
    /// SHA-256 of the local content the delta applies to.
    pub base_checksum: String,
}

/// One logical file the client should have locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    /// Relative, slash-normalized destination path. Unique within a manifest.
    pub path: String,
    /// SHA-256 of the final, uncompressed file.
    pub checksum: String,
    /// Expected final byte length.
    pub size: u64,
    /// Whether the entry belongs to the optional content set.
    #[serde(default)]
    pub optional: bool,
    /// Localization tag; `Some` marks a language-only file.
    #[serde(default)]
    pub language: Option<String>,
    /// Ordered chunk list; empty for single-stream files.
    #[serde(default)]
    pub parts: Vec<FileChunk>,
    /// Delta upgrade path from a previous version, if the server offers one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<PatchSource>,
}

impl ManifestEntry {
    /// Create a single-stream entry.
    pub fn new(path: impl Into<String>, checksum: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            checksum: checksum.into(),
            size,
            optional: false,
            language: None,
            parts: Vec::new(),
            patch: None,
        }
    }

    /// Mark the entry as optional content.
    pub fn with_optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    /// Tag the entry with a language.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Set the chunk list.
    pub fn with_parts(mut self, parts: Vec<FileChunk>) -> Self {
        self.parts = parts;
        self
    }

    /// Set the delta upgrade source.
    pub fn with_patch(mut self, patch: PatchSource) -> Self {
        self.patch = Some(patch);
        self
    }

    /// Whether the entry is fetched as several chunks.
    pub fn is_multi_part(&self) -> bool {
        !self.parts.is_empty()
    }

    /// Bytes expected to cross the network for a full fetch of this entry.
    ///
    /// For chunked entries this is the sum of chunk sizes, which may differ
    /// slightly from `size` because of compression framing.
    pub fn transfer_size(&self) -> u64 {
        if self.parts.is_empty() {
            self.size
        } else {
            self.parts.iter().map(|p| p.size).sum()
        }
    }
}

/// The remote file list of a release channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Server-side build version, when published.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Every file the channel ships.
    pub files: Vec<ManifestEntry>,
    /// Languages offered as separate content sets.
    #[serde(default)]
    pub languages: Vec<String>,
}

impl Manifest {
    /// Parse and validate a manifest document.
    ///
    /// Paths are slash-normalized and checksums lowercased. Unsafe paths,
    /// duplicate paths and non-SHA-256 checksums are rejected.
    pub fn from_json(document: &str) -> ManifestResult<Self> {
        let manifest: Manifest = serde_json::from_str(document)?;
        manifest.validated()
    }

    /// Parse and validate a manifest from raw bytes.
    pub fn from_slice(document: &[u8]) -> ManifestResult<Self> {
        let manifest: Manifest = serde_json::from_slice(document)?;
        manifest.validated()
    }

    /// Build a manifest from already-constructed entries, applying the same
    /// validation as parsing.
    pub fn from_entries(files: Vec<ManifestEntry>) -> ManifestResult<Self> {
        Self {
            version: None,
            files,
            languages: Vec::new(),
        }
        .validated()
    }

    fn validated(mut self) -> ManifestResult<Self> {
        let mut seen = HashSet::with_capacity(self.files.len());

        for entry in &mut self.files {
            entry.path = normalize_path(&entry.path)?;
            entry.checksum = normalize_checksum(&entry.path, &entry.checksum)?;

            for part in &mut entry.parts {
                part.path = normalize_path(&part.path)?;
                part.checksum = normalize_checksum(&part.path, &part.checksum)?;
            }

            if let Some(patch) = &mut entry.patch {
                patch.path = normalize_path(&patch.path)?;
                patch.base_checksum = normalize_checksum(&entry.path, &patch.base_checksum)?;
            }

            if !seen.insert(entry.path.clone()) {
                return Err(ManifestError::DuplicatePath {
                    path: entry.path.clone(),
                });
            }
        }

        Ok(self)
    }

    /// Look up an entry by its normalized path.
    pub fn entry(&self, path: &str) -> Option<&ManifestEntry> {
        self.files.iter().find(|e| e.path == path)
    }

    /// Set of every path the manifest knows about, including chunk paths.
    pub fn known_paths(&self) -> HashSet<&str> {
        let mut paths = HashSet::with_capacity(self.files.len());
        for entry in &self.files {
            paths.insert(entry.path.as_str());
            for part in &entry.parts {
                paths.insert(part.path.as_str());
            }
        }
        paths
    }

    /// Sum of final sizes of the given entries.
    pub fn total_size<'a>(entries: impl IntoIterator<Item = &'a ManifestEntry>) -> u64 {
        entries.into_iter().map(|e| e.size).sum()
    }
}

/// Named subset of a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContentSet {
    /// Files every installation needs.
    Core,
    /// Optional content such as high-resolution assets.
    Optional,
    /// Localization files for one language.
    Language(String),
}

impl ContentSet {
    /// Whether the entry belongs to this set.
    pub fn matches(&self, entry: &ManifestEntry) -> bool {
        match self {
            Self::Core => !entry.optional && entry.language.is_none(),
            Self::Optional => entry.optional && entry.language.is_none(),
            Self::Language(tag) => entry.language.as_deref() == Some(tag.as_str()),
        }
    }

    /// Human-readable label used in logs and progress messages.
    pub fn label(&self) -> String {
        match self {
            Self::Core => "core".to_string(),
            Self::Optional => "optional".to_string(),
            Self::Language(tag) => format!("language:{}", tag),
        }
    }
}

/// Return the entries matching `predicate`, cloned into a new list.
pub fn select_files<P>(manifest: &Manifest, predicate: P) -> Vec<ManifestEntry>
where
    P: Fn(&ManifestEntry) -> bool,
{
    manifest
        .files
        .iter()
        .filter(|e| predicate(e))
        .cloned()
        .collect()
}

/// Normalize a manifest path to a relative, slash-separated form.
///
/// Backslashes become slashes, empty and `.` segments are dropped. Absolute
/// paths, drive prefixes and `..` segments are rejected.
pub fn normalize_path(raw: &str) -> ManifestResult<String> {
    let unsafe_path = || ManifestError::UnsafePath {
        path: raw.to_string(),
    };

    let replaced = raw.replace('\\', "/");
    if replaced.starts_with('/') {
        return Err(unsafe_path());
    }

    let mut segments = Vec::new();
    for segment in replaced.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(unsafe_path()),
            s => segments.push(s),
        }
    }

    match segments.first() {
        None => Err(unsafe_path()),
        Some(first) if first.contains(':') => Err(unsafe_path()),
        Some(_) => Ok(segments.join("/")),
    }
}

fn normalize_checksum(path: &str, checksum: &str) -> ManifestResult<String> {
    let normalized = checksum.trim().to_ascii_lowercase();
    if normalized.len() != SHA256_HEX_LEN || !normalized.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ManifestError::InvalidChecksum {
            path: path.to_string(),
            checksum: checksum.to_string(),
        });
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";
    const EMPTY: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    fn sample_document() -> String {
        format!(
            r#"{{
                "version": "1.2.0",
                "languages": ["de"],
                "files": [
                    {{ "path": "bin\\game.exe", "checksum": "{hello}", "size": 11 }},
                    {{ "path": "./data/hires.pak", "checksum": "{empty}", "size": 0, "optional": true }},
                    {{ "path": "loc/de.pak", "checksum": "{HELLO_UPPER}", "size": 11, "language": "de" }},
                    {{ "path": "data/big.pak", "checksum": "{hello}", "size": 11,
                       "parts": [
                         {{ "path": "data/big.pak.part0", "checksum": "{hello}", "size": 6 }},
                         {{ "path": "data/big.pak.part1", "checksum": "{empty}", "size": 5 }}
                       ] }}
                ]
            }}"#,
            hello = HELLO,
            empty = EMPTY,
            HELLO_UPPER = HELLO.to_uppercase(),
        )
    }

    #[test]
    fn test_parse_normalizes_paths_and_checksums() {
        let manifest = Manifest::from_json(&sample_document()).unwrap();

        assert_eq!(manifest.version.as_deref(), Some("1.2.0"));
        assert_eq!(manifest.files.len(), 4);
        assert_eq!(manifest.files[0].path, "bin/game.exe");
        assert_eq!(manifest.files[1].path, "data/hires.pak");
        assert_eq!(manifest.files[2].checksum, HELLO);
        assert!(manifest.files[3].is_multi_part());
        assert_eq!(manifest.files[3].transfer_size(), 11);
    }

    #[test]
    fn test_missing_required_field_is_malformed() {
        let doc = r#"{ "files": [ { "path": "a.txt", "size": 1 } ] }"#;
        let err = Manifest::from_json(doc).unwrap_err();
        assert!(matches!(err, ManifestError::Malformed { .. }));
    }

    #[test]
    fn test_missing_files_is_malformed() {
        let err = Manifest::from_json(r#"{ "languages": [] }"#).unwrap_err();
        assert!(matches!(err, ManifestError::Malformed { .. }));
    }

    #[test]
    fn test_duplicate_paths_rejected() {
        let doc = format!(
            r#"{{ "files": [
                {{ "path": "a.txt", "checksum": "{h}", "size": 1 }},
                {{ "path": "a.txt", "checksum": "{h}", "size": 1 }}
            ] }}"#,
            h = HELLO
        );
        let err = Manifest::from_json(&doc).unwrap_err();
        assert!(matches!(err, ManifestError::DuplicatePath { .. }));
    }

    #[test]
    fn test_invalid_checksum_rejected() {
        let doc = r#"{ "files": [ { "path": "a.txt", "checksum": "abc", "size": 1 } ] }"#;
        let err = Manifest::from_json(doc).unwrap_err();
        assert!(matches!(err, ManifestError::InvalidChecksum { .. }));
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("a\\b\\c.txt").unwrap(), "a/b/c.txt");
        assert_eq!(normalize_path("./a//b/./c").unwrap(), "a/b/c");
        assert!(normalize_path("../etc/passwd").is_err());
        assert!(normalize_path("a/../../b").is_err());
        assert!(normalize_path("/abs/path").is_err());
        assert!(normalize_path("C:\\Windows").is_err());
        assert!(normalize_path("").is_err());
        assert!(normalize_path("./").is_err());
    }

    #[test]
    fn test_content_sets() {
        let manifest = Manifest::from_json(&sample_document()).unwrap();

        let core = select_files(&manifest, |e| ContentSet::Core.matches(e));
        let optional = select_files(&manifest, |e| ContentSet::Optional.matches(e));
        let german = select_files(&manifest, |e| ContentSet::Language("de".into()).matches(e));
        let french = select_files(&manifest, |e| ContentSet::Language("fr".into()).matches(e));

        assert_eq!(core.len(), 2);
        assert_eq!(optional.len(), 1);
        assert_eq!(optional[0].path, "data/hires.pak");
        assert_eq!(german.len(), 1);
        assert!(french.is_empty());
    }

    #[test]
    fn test_known_paths_include_parts() {
        let manifest = Manifest::from_json(&sample_document()).unwrap();
        let known = manifest.known_paths();
        assert!(known.contains("data/big.pak"));
        assert!(known.contains("data/big.pak.part1"));
        assert!(!known.contains("saves/slot1.sav"));
    }

    #[test]
    fn test_select_files_does_not_mutate() {
        let manifest = Manifest::from_json(&sample_document()).unwrap();
        let none = select_files(&manifest, |_| false);
        assert!(none.is_empty());
        assert_eq!(manifest.files.len(), 4);
    }

    #[test]
    fn test_content_set_label() {
        assert_eq!(ContentSet::Core.label(), "core");
        assert_eq!(ContentSet::Language("fr".into()).label(), "language:fr");
    }
}
