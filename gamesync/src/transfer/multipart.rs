//! Chunked download and ordered merge of large files.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::manifest::{FileChunk, ManifestEntry};

use super::progress::{ItemHandle, ItemStatus, ProgressSink};
use super::scheduler::{local_digest, EntryOutcome, TransferShared};
use super::single::{DownloadContext, SingleFileTransfer};

/// Fetches every chunk of an entry, then concatenates them in manifest order.
///
/// Each chunk takes its own permit, so one large file may occupy several
/// slots. If any chunk fails the merge is skipped and the chunks that did
/// arrive are kept for the next pass.
pub struct MultiPartTransfer<'a> {
    shared: &'a TransferShared,
}

impl<'a> MultiPartTransfer<'a> {
    pub fn new(shared: &'a TransferShared) -> Self {
        Self { shared }
    }

    pub async fn run(&self, root: &Path, entry: &ManifestEntry) -> EntryOutcome {
        let shared = self.shared;
        let item = ItemHandle::start(&entry.path, entry.size, shared.progress.clone());

        let results = join_all(
            entry
                .parts
                .iter()
                .map(|part| self.fetch_part(root, part, &item)),
        )
        .await;

        let failed = results.iter().filter(|ok| !**ok).count();
        if failed > 0 {
            warn!(
                path = %entry.path,
                failed_parts = failed,
                parts = entry.parts.len(),
                "Skipping merge, not all parts arrived"
            );
            item.status(ItemStatus::Failed);
            return EntryOutcome::Failed;
        }

        let destination = root.join(&entry.path);
        let part_paths: Vec<PathBuf> = entry.parts.iter().map(|p| root.join(&p.path)).collect();

        let merge_result = {
            let destination = destination.clone();
            let part_paths = part_paths.clone();
            let sink = shared.progress.clone();
            let path = entry.path.clone();
            tokio::task::spawn_blocking(move || merge_parts(&destination, &part_paths, &path, &sink))
                .await
        };

        remove_parts(&part_paths).await;

        match merge_result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(path = %entry.path, error = %e, "Failed to merge parts");
                return self.fail(&entry.path, &destination, &item).await;
            }
            Err(e) => {
                warn!(path = %entry.path, error = %e, "Merge task panicked");
                return self.fail(&entry.path, &destination, &item).await;
            }
        }

        if shared.settings.verify_merged_parts {
            let actual = local_digest(destination.clone()).await;
            if actual.as_deref() != Some(entry.checksum.as_str()) {
                warn!(
                    path = %entry.path,
                    expected = %entry.checksum,
                    actual = actual.as_deref().unwrap_or("<unreadable>"),
                    "Merged file does not match manifest checksum"
                );
                return self.fail(&entry.path, &destination, &item).await;
            }
        }

        info!(path = %entry.path, parts = entry.parts.len(), "Merged multi-part file");
        item.status(ItemStatus::Completed);
        EntryOutcome::Downloaded
    }

    async fn fetch_part(&self, root: &Path, part: &FileChunk, item: &ItemHandle) -> bool {
        let shared = self.shared;
        let Ok(_permit) = shared.permits.clone().acquire_owned().await else {
            return false;
        };

        let destination = root.join(&part.path);
        if local_digest(destination.clone()).await.as_deref() == Some(part.checksum.as_str()) {
            debug!(path = %part.path, size = part.size, "Part already present");
            shared.context.stats.credit(part.size);
            item.advance(part.size);
            return true;
        }

        let target = DownloadContext {
            file_url: shared.channel.url_for(&part.path),
            final_path: destination,
            label: part.path.clone(),
        };
        SingleFileTransfer::new(shared, &shared.settings.part_retry)
            .run(&target, item)
            .await
            .is_some()
    }

    async fn fail(&self, path: &str, destination: &Path, item: &ItemHandle) -> EntryOutcome {
        self.shared.context.flag_bad_file(path);
        if let Err(e) = tokio::fs::remove_file(destination).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %destination.display(), error = %e, "Failed to remove merged file");
            }
        }
        item.status(ItemStatus::Failed);
        EntryOutcome::Failed
    }
}

/// Concatenate `parts` into `destination` in the given order.
fn merge_parts(
    destination: &Path,
    parts: &[PathBuf],
    label: &str,
    sink: &ProgressSink,
) -> std::io::Result<()> {
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::remove_file(destination) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(destination)?;
    let mut writer = BufWriter::new(file);

    for (index, part) in parts.iter().enumerate() {
        sink.item_status(
            label,
            ItemStatus::Merging {
                part: index + 1,
                of: parts.len(),
            },
        );
        let mut reader = File::open(part)?;
        std::io::copy(&mut reader, &mut writer)?;
    }

    writer.flush()?;
    Ok(())
}

async fn remove_parts(parts: &[PathBuf]) {
    for part in parts {
        if let Err(e) = tokio::fs::remove_file(part).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %part.display(), error = %e, "Failed to delete part file");
            }
        }
    }
}
