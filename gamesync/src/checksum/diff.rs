//! Manifest-versus-disk comparison.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::manifest::ManifestEntry;

use super::tree::LocalFileChecksum;

/// Which flow a verification pass belongs to.
///
/// The comparison is identical for both; only the log label differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    Repair,
    Update,
}

impl PassKind {
    /// Label attached to log lines.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Repair => "repair",
            Self::Update => "update",
        }
    }
}

/// Why an entry ended up in the mismatch set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchReason {
    /// No local digest for the path.
    Missing,
    /// The local digest differs from the manifest checksum.
    DigestMismatch,
}

/// One manifest entry whose local copy is not valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub entry: ManifestEntry,
    pub reason: MismatchReason,
}

/// Entries whose local state does not match the manifest.
///
/// Built fresh on every pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MismatchSet {
    items: Vec<Mismatch>,
}

impl MismatchSet {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn items(&self) -> &[Mismatch] {
        &self.items
    }

    /// Paths of every mismatched entry, in manifest order.
    pub fn paths(&self) -> Vec<String> {
        self.items.iter().map(|m| m.entry.path.clone()).collect()
    }

    /// Number of entries with no local copy.
    pub fn missing(&self) -> usize {
        self.items
            .iter()
            .filter(|m| m.reason == MismatchReason::Missing)
            .count()
    }

    /// Consume into the work-list for the transfer scheduler.
    pub fn into_entries(self) -> Vec<ManifestEntry> {
        self.items.into_iter().map(|m| m.entry).collect()
    }
}

/// Build a path-to-digest lookup from a hashing pass.
pub fn digest_map(digests: Vec<LocalFileChecksum>) -> HashMap<String, String> {
    digests.into_iter().map(|d| (d.name, d.checksum)).collect()
}

/// Compare manifest entries with local digests.
///
/// An entry is mismatched when its path is absent from `local` or its digest
/// differs from the entry checksum. Matching is by exact path only.
pub fn diff(
    entries: &[ManifestEntry],
    local: &HashMap<String, String>,
    pass: PassKind,
) -> MismatchSet {
    let mut items = Vec::new();

    for entry in entries {
        let reason = match local.get(&entry.path) {
            None => MismatchReason::Missing,
            Some(digest) if !digest.eq_ignore_ascii_case(&entry.checksum) => {
                MismatchReason::DigestMismatch
            }
            Some(_) => continue,
        };

        debug!(
            pass = pass.label(),
            path = %entry.path,
            reason = ?reason,
            "Entry needs transfer"
        );

        items.push(Mismatch {
            entry: entry.clone(),
            reason,
        });
    }

    let set = MismatchSet { items };
    info!(
        pass = pass.label(),
        checked = entries.len(),
        mismatched = set.len(),
        missing = set.missing(),
        "Verification pass complete"
    );
    set
}
