//! Parallel hashing of an installation tree.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use glob::Pattern;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::manifest::Manifest;

use super::error::{ChecksumError, ChecksumResult};
use super::hash::hash_file;

/// Digest of one file already on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileChecksum {
    /// Path relative to the install root, slash-separated.
    pub name: String,
    /// Lowercase hex SHA-256.
    pub checksum: String,
}

/// Paths a verification pass must not look at.
///
/// User data (saves, screenshots, logs) is matched by glob. Optional content
/// is matched by exact path so that a core pass does not report it as
/// unknown.
#[derive(Debug, Clone, Default)]
pub struct Exclusions {
    patterns: Vec<Pattern>,
    paths: HashSet<String>,
}

impl Exclusions {
    /// Exclude nothing.
    pub fn none() -> Self {
        Self::default()
    }

    /// Exclude paths matching any of the given user-data globs.
    pub fn user_data<S: AsRef<str>>(globs: &[S]) -> ChecksumResult<Self> {
        let patterns = globs
            .iter()
            .map(|g| {
                Pattern::new(g.as_ref()).map_err(|e| ChecksumError::InvalidPattern {
                    pattern: g.as_ref().to_string(),
                    reason: e.to_string(),
                })
            })
            .collect::<ChecksumResult<Vec<_>>>()?;

        Ok(Self {
            patterns,
            paths: HashSet::new(),
        })
    }

    /// Additionally exclude every optional entry of the manifest.
    pub fn with_optional(mut self, manifest: &Manifest) -> Self {
        for entry in manifest.files.iter().filter(|e| e.optional) {
            self.paths.insert(entry.path.clone());
            for part in &entry.parts {
                self.paths.insert(part.path.clone());
            }
        }
        self
    }

    /// Additionally exclude explicit relative paths.
    pub fn with_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.paths.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Whether a relative path is excluded.
    pub fn is_excluded(&self, relative: &str) -> bool {
        self.paths.contains(relative) || self.is_user_data(relative)
    }

    /// Whether a relative path matches a user-data glob.
    pub fn is_user_data(&self, relative: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(relative))
    }
}

/// List every regular file under `root` as slash-separated relative paths.
///
/// A missing root yields an empty list. Symlinks are not followed.
pub fn list_files(root: &Path) -> ChecksumResult<Vec<String>> {
    let mut files = Vec::new();
    if !root.exists() {
        return Ok(files);
    }
    walk(root, root, &mut files)?;
    files.sort();
    Ok(files)
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) -> ChecksumResult<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| ChecksumError::Walk {
        path: dir.to_path_buf(),
        source: e,
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| ChecksumError::Walk {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        let file_type = match entry.file_type() {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to stat entry");
                continue;
            }
        };

        if file_type.is_dir() {
            walk(root, &path, out)?;
        } else if file_type.is_file() {
            if let Ok(relative) = path.strip_prefix(root) {
                let name = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                out.push(name);
            }
        }
    }

    Ok(())
}

/// Hash every non-excluded file under `root` on a pool of `concurrency`
/// workers.
///
/// `on_tick(completed, total)` is called after each file. Files that cannot
/// be read are logged and left out of the result, which makes the diff treat
/// them as missing.
pub fn hash_tree<F>(
    root: &Path,
    exclusions: &Exclusions,
    concurrency: usize,
    on_tick: F,
) -> ChecksumResult<Vec<LocalFileChecksum>>
where
    F: Fn(usize, usize) + Sync,
{
    let files: Vec<String> = list_files(root)?
        .into_iter()
        .filter(|f| !exclusions.is_excluded(f))
        .collect();

    let total = files.len();
    let completed = AtomicUsize::new(0);

    debug!(
        root = %root.display(),
        files = total,
        workers = concurrency,
        "Hashing local tree"
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(concurrency.max(1))
        .thread_name(|i| format!("gamesync-hash-{}", i))
        .build()
        .map_err(|e| ChecksumError::Pool(e.to_string()))?;

    let digests = pool.install(|| {
        files
            .par_iter()
            .filter_map(|name| {
                let result = hash_file(&root.join(name));
                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                on_tick(done, total);

                match result {
                    Ok(checksum) => Some(LocalFileChecksum {
                        name: name.clone(),
                        checksum,
                    }),
                    Err(e) => {
                        warn!(path = %name, error = %e, "Failed to hash local file");
                        None
                    }
                }
            })
            .collect::<Vec<_>>()
    });

    Ok(digests)
}
