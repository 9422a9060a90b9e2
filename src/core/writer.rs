//! Pack sessions
//!
//! A pack diffs a source tree against the current index, writes every
//! changed payload through the [`ShardStore`], and persists the updated
//! index. Writes are issued one file at a time; the store's per-shard locks
//! keep them safe if several writers share a store.
//!
//! The index is persisted even when the session is cancelled: whatever
//! entries were updated before the cancellation are checkpointed, then
//! `OperationCancelled` is returned.

use crate::allocation::{plan_write, RegionMap, WriteMode};
use crate::cancel::CancellationToken;
use crate::checksum::{ChecksumProvider, Crc32};
use crate::config::{ArchiveConfig, StaleEntryPolicy};
use crate::diff::{self, ChangedFile};
use crate::entry::ArchiveEntry;
use crate::error::{ArchiveError, EntryFailure, Result};
use crate::index::ArchiveIndex;
use crate::placement::shard_for_path;
use crate::progress::{PackProgress, PackReport};
use crate::shard::ShardStore;
use crate::validation;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Writes source trees into a dataset
pub struct ArchiveWriter {
    store: Arc<ShardStore>,
    config: ArchiveConfig,
    checksum: Arc<dyn ChecksumProvider>,
}

impl ArchiveWriter {
    pub fn new(store: Arc<ShardStore>, config: ArchiveConfig) -> Self {
        ArchiveWriter {
            store,
            config,
            checksum: Arc::new(Crc32),
        }
    }

    /// Use a different content fingerprint
    pub fn with_checksum(mut self, checksum: Arc<dyn ChecksumProvider>) -> Self {
        self.checksum = checksum;
        self
    }

    pub fn store(&self) -> &ShardStore {
        &self.store
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    /// Pack `source_dir` on top of `existing`
    ///
    /// Returns the report of a complete session, or `OperationCancelled`
    /// carrying the number of committed entries once the partial index has
    /// been persisted.
    pub fn pack<F>(
        &self,
        source_dir: &Path,
        existing: ArchiveIndex,
        mut progress: F,
        cancel: &CancellationToken,
    ) -> Result<PackReport>
    where
        F: FnMut(PackProgress<'_>),
    {
        info!("Packing {:?} into {:?}", source_dir, self.store.dir());

        let mut index = existing;
        let mut regions = RegionMap::from_index(&index)?;

        let diff = match diff::diff(
            source_dir,
            Some(self.store.dir()),
            &index,
            &self.config,
            self.checksum.as_ref(),
            cancel,
        ) {
            Ok(diff) => diff,
            Err(e) if e.is_cancelled() => {
                self.persist(&index)?;
                return Err(ArchiveError::OperationCancelled { committed: 0 });
            }
            Err(e) => return Err(e),
        };

        let total = diff.changed.len();
        let mut failures = diff.failures;
        let mut committed = 0;
        let mut cancelled = false;

        for (i, changed) in diff.changed.iter().enumerate() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let logical_path = changed.source.logical_path.as_str();
            match self.write_one(changed, &mut index, &mut regions) {
                Ok(entry) => {
                    committed += 1;
                    debug!(
                        "Packed {} ({:?}) -> shard {} @ {} ({} bytes)",
                        entry.logical_path, changed.kind, entry.shard_id, entry.offset, entry.size
                    );
                }
                Err(e) if e.is_fatal() => {
                    self.persist(&index)?;
                    return Err(ArchiveError::for_entry(logical_path, e));
                }
                Err(e) => {
                    warn!("Failed to pack {}: {}", logical_path, e);
                    failures.push(EntryFailure::new(logical_path, e));
                }
            }

            progress(PackProgress {
                logical_path,
                completed: i + 1,
                total,
            });
        }

        let walk_failed = failures
            .iter()
            .any(|failure| matches!(failure.error, ArchiveError::Walk(_)));
        let mut pruned = 0;
        if !cancelled && self.config.stale_entries == StaleEntryPolicy::Prune {
            if walk_failed {
                warn!("Source tree was not fully readable, keeping stale entries");
            } else {
                pruned = index.retain(|entry| diff.seen.contains(&entry.key()));
                if pruned > 0 {
                    info!("Pruned {} stale entries", pruned);
                }
            }
        }

        self.persist(&index)?;

        if cancelled {
            warn!(
                "Pack cancelled after committing {} of {} entries",
                committed, total
            );
            return Err(ArchiveError::OperationCancelled { committed });
        }

        info!(
            "Pack complete: {} committed, {} unchanged, {} pruned, {} failed",
            committed,
            diff.unchanged,
            pruned,
            failures.len()
        );

        Ok(PackReport {
            index,
            committed,
            unchanged: diff.unchanged,
            pruned,
            failures,
        })
    }

    /// Write one changed file and record its entry
    fn write_one(
        &self,
        changed: &ChangedFile,
        index: &mut ArchiveIndex,
        regions: &mut RegionMap,
    ) -> Result<ArchiveEntry> {
        let logical_path = &changed.source.logical_path;
        let payload = std::fs::read(&changed.source.path)?;
        let size = u32::try_from(payload.len()).map_err(|_| ArchiveError::EntryTooLarge {
            path: logical_path.clone(),
            size: payload.len() as u64,
            max: u64::from(u32::MAX),
        })?;
        let checksum = self.checksum.compute(&payload);

        let previous = index.get(logical_path).cloned();
        let shard_id = previous
            .as_ref()
            .map(|entry| entry.shard_id)
            .unwrap_or_else(|| shard_for_path(logical_path));
        let mode = plan_write(previous.as_ref(), size);
        let owner = validation::fold_key(logical_path);

        let offset = {
            let mut shard = self.store.lock(shard_id)?;
            let target = match mode {
                WriteMode::Append => shard.len(),
                WriteMode::OverwriteAt(offset) => offset,
            };
            regions.check(shard_id, target, u64::from(size), &owner)?;

            let offset = shard.write(&payload, mode)?;
            if offset != target {
                return Err(ArchiveError::AllocationInvariantViolation {
                    shard_id,
                    offset,
                    size: u64::from(size),
                    conflicting: format!("planned offset {}", target),
                });
            }
            offset
        };

        let entry = ArchiveEntry::new(logical_path.clone(), shard_id, size, checksum, offset);
        regions.update(previous.as_ref(), &entry);
        index.upsert(entry.clone());
        Ok(entry)
    }

    /// Rotate and write the index file
    fn persist(&self, index: &ArchiveIndex) -> Result<()> {
        let layout = self.store.layout();
        let dir = self.store.dir();
        index.save(
            layout.index_path(dir),
            layout.backup_path(dir),
            &self.config.codec,
        )?;
        self.store.sync()
    }
}
