//! Read sessions
//!
//! An [`ArchiveReader`] maps every shard of a dataset read-only for its
//! lifetime and resolves entries to byte ranges without taking any lock.
//! That fast path assumes no write session is open on the same dataset:
//! shards mutated underneath an open reader give undefined results.

use crate::cancel::CancellationToken;
use crate::checksum::{ChecksumProvider, Crc32};
use crate::codec::BlobCodec;
use crate::config::{ArchiveConfig, OverwritePolicy, ShardLayout};
use crate::entry::ArchiveEntry;
use crate::error::{ArchiveError, EntryFailure, Result};
use crate::index::ArchiveIndex;
use crate::placement::SHARD_COUNT;
use crate::progress::{ExtractProgress, ExtractReport, VerifyReport};
use crate::shard::check_referenced_shards;
use crate::validation;
use memmap2::Mmap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Load a dataset's index, empty when no index file exists
pub fn load_index(dir: &Path, layout: &ShardLayout, codec: &dyn BlobCodec) -> Result<ArchiveIndex> {
    ArchiveIndex::load(layout.index_path(dir), codec)
}

/// Read-only view of one shard
struct MappedShard {
    map: Option<Mmap>,
}

impl MappedShard {
    fn open(path: &Path) -> Result<Option<Self>> {
        if !path.is_file() {
            return Ok(None);
        }
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Ok(Some(MappedShard { map: None }));
        }
        // SAFETY: shards are append/overwrite only and never truncated; a
        // concurrent writer session is documented as unsupported.
        let map = unsafe { Mmap::map(&file)? };
        Ok(Some(MappedShard { map: Some(map) }))
    }

    fn bytes(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }
}

/// Read session over a dataset
pub struct ArchiveReader {
    dir: PathBuf,
    config: ArchiveConfig,
    index: ArchiveIndex,
    shards: Vec<Option<MappedShard>>,
    checksum: Arc<dyn ChecksumProvider>,
}

impl ArchiveReader {
    /// Load the index and map every existing shard
    ///
    /// # Errors
    ///
    /// `ArchiveFileNotFound` if a shard referenced by the index is missing,
    /// `CorruptIndex` if the index cannot be decoded.
    pub fn open<P: AsRef<Path>>(dir: P, config: ArchiveConfig) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let index = load_index(&dir, &config.layout, &config.codec)?;
        check_referenced_shards(&dir, &config.layout, &index)?;

        let shards = (0..SHARD_COUNT as u8)
            .map(|id| MappedShard::open(&config.layout.shard_path(&dir, id)))
            .collect::<Result<Vec<_>>>()?;

        info!(
            "Opened {:?} for reading: {} entries, {} shards present",
            dir,
            index.len(),
            shards.iter().filter(|s| s.is_some()).count()
        );

        Ok(ArchiveReader {
            dir,
            config,
            index,
            shards,
            checksum: Arc::new(Crc32),
        })
    }

    /// Use a different content fingerprint for `verify`
    pub fn with_checksum(mut self, checksum: Arc<dyn ChecksumProvider>) -> Self {
        self.checksum = checksum;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn index(&self) -> &ArchiveIndex {
        &self.index
    }

    /// Every entry, in index order
    pub fn list_entries(&self) -> Vec<ArchiveEntry> {
        self.index.entries().to_vec()
    }

    pub fn get(&self, logical_path: &str) -> Option<&ArchiveEntry> {
        self.index.get(logical_path)
    }

    /// Borrow an entry's payload straight from the mapped shard
    pub fn payload(&self, entry: &ArchiveEntry) -> Result<&[u8]> {
        let shard = self
            .shards
            .get(entry.shard_id as usize)
            .ok_or(ArchiveError::InvalidShardId(entry.shard_id))?
            .as_ref()
            .ok_or_else(|| {
                ArchiveError::ArchiveFileNotFound(
                    self.config.layout.shard_path(&self.dir, entry.shard_id),
                )
            })?;

        let bytes = shard.bytes();
        let truncated = || ArchiveError::TruncatedRead {
            shard_id: entry.shard_id,
            offset: entry.offset,
            expected: u64::from(entry.size),
            available: (bytes.len() as u64).saturating_sub(entry.offset),
        };

        // Offsets come from disk; a size-0 entry can still point past EOF
        let start = usize::try_from(entry.offset).map_err(|_| truncated())?;
        let end = start.checked_add(entry.size as usize).ok_or_else(truncated)?;
        bytes.get(start..end).ok_or_else(truncated)
    }

    /// Copy an entry's payload
    pub fn read(&self, entry: &ArchiveEntry) -> Result<Vec<u8>> {
        self.payload(entry).map(<[u8]>::to_vec)
    }

    /// Read a payload by logical path
    pub fn read_path(&self, logical_path: &str) -> Result<Vec<u8>> {
        let entry = self.index.get(logical_path).ok_or_else(|| {
            ArchiveError::for_entry(
                logical_path,
                ArchiveError::InvalidPath("no such entry in the index".to_string()),
            )
        })?;
        self.read(entry)
    }

    /// Extract entries below `output_root`
    ///
    /// Cancellation is checked before each entry; already written files are
    /// kept. Per-entry failures are collected, a missing shard aborts.
    pub fn extract<F>(
        &self,
        entries: &[ArchiveEntry],
        output_root: &Path,
        overwrite: OverwritePolicy,
        mut progress: F,
        cancel: &CancellationToken,
    ) -> Result<ExtractReport>
    where
        F: FnMut(ExtractProgress),
    {
        let total = entries.len();
        let mut report = ExtractReport::default();

        for (i, entry) in entries.iter().enumerate() {
            cancel.check(report.extracted)?;

            match self.extract_one(entry, output_root, overwrite) {
                Ok(true) => report.extracted += 1,
                Ok(false) => report.skipped += 1,
                Err(e) if e.is_fatal() => return Err(ArchiveError::for_entry(&entry.logical_path, e)),
                Err(e) => {
                    warn!("Failed to extract {}: {}", entry.logical_path, e);
                    report
                        .failures
                        .push(EntryFailure::new(entry.logical_path.clone(), e));
                }
            }

            progress(ExtractProgress {
                completed: i + 1,
                total,
            });
        }

        info!(
            "Extracted {} entries to {:?} ({} skipped, {} failed)",
            report.extracted,
            output_root,
            report.skipped,
            report.failures.len()
        );
        Ok(report)
    }

    /// Returns false when the destination existed and was kept
    fn extract_one(
        &self,
        entry: &ArchiveEntry,
        output_root: &Path,
        overwrite: OverwritePolicy,
    ) -> Result<bool> {
        let destination = validation::destination_for(output_root, &entry.logical_path)?;
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if destination.exists() && overwrite == OverwritePolicy::Skip {
            debug!("Keeping existing {:?}", destination);
            return Ok(false);
        }

        let payload = self.payload(entry)?;
        std::fs::write(&destination, payload)?;
        debug!("Extracted {} -> {:?}", entry.logical_path, destination);
        Ok(true)
    }

    /// Re-read payloads and compare their checksums with the index
    pub fn verify<F>(
        &self,
        entries: &[ArchiveEntry],
        mut progress: F,
        cancel: &CancellationToken,
    ) -> Result<VerifyReport>
    where
        F: FnMut(ExtractProgress),
    {
        let total = entries.len();
        let mut report = VerifyReport::default();

        for (i, entry) in entries.iter().enumerate() {
            cancel.check(report.verified)?;

            let outcome = self.payload(entry).and_then(|payload| {
                let actual = self.checksum.compute(payload);
                if actual == entry.checksum {
                    Ok(())
                } else {
                    Err(ArchiveError::ChecksumMismatch {
                        expected: entry.checksum,
                        actual,
                    })
                }
            });

            match outcome {
                Ok(()) => report.verified += 1,
                Err(e) if e.is_fatal() => return Err(ArchiveError::for_entry(&entry.logical_path, e)),
                Err(e) => report
                    .failures
                    .push(EntryFailure::new(entry.logical_path.clone(), e)),
            }

            progress(ExtractProgress {
                completed: i + 1,
                total,
            });
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::WriteMode;
    use crate::shard::ShardStore;
    use tempfile::TempDir;

    /// Dataset with two payloads on shard 2 and one on shard 6
    fn dataset() -> (TempDir, ArchiveConfig) {
        let temp = TempDir::new().unwrap();
        let config = ArchiveConfig::default();
        let store = ShardStore::open(temp.path(), config.layout.clone()).unwrap();

        let a = store.write(2, b"alpha", WriteMode::Append).unwrap();
        let b = store.write(2, b"bravo!", WriteMode::Append).unwrap();
        let c = store.write(6, b"charlie", WriteMode::Append).unwrap();
        store.close().unwrap();

        let index = ArchiveIndex::from_entries(vec![
            ArchiveEntry::new("a.txt", 2, 5, Crc32.compute(b"alpha"), a),
            ArchiveEntry::new("dir\\b.txt", 2, 6, Crc32.compute(b"bravo!"), b),
            ArchiveEntry::new("dir\\sub\\c.txt", 6, 7, Crc32.compute(b"charlie"), c),
        ])
        .unwrap();
        index
            .save(
                config.layout.index_path(temp.path()),
                config.layout.backup_path(temp.path()),
                &config.codec,
            )
            .unwrap();

        (temp, config)
    }

    #[test]
    fn test_read_entries() {
        let (temp, config) = dataset();
        let reader = ArchiveReader::open(temp.path(), config).unwrap();

        assert_eq!(reader.list_entries().len(), 3);
        assert_eq!(reader.read_path("DIR\\B.TXT").unwrap(), b"bravo!");
        assert_eq!(reader.read_path("dir\\sub\\c.txt").unwrap(), b"charlie");
        assert!(reader.read_path("missing.txt").is_err());
    }

    #[test]
    fn test_missing_shard_fails_open() {
        let (temp, config) = dataset();
        std::fs::remove_file(temp.path().join("data6.pak")).unwrap();

        let err = ArchiveReader::open(temp.path(), config).err().unwrap();
        assert!(matches!(err, ArchiveError::ArchiveFileNotFound(ref p) if p.ends_with("data6.pak")));
    }

    #[test]
    fn test_open_without_index_is_empty() {
        let temp = TempDir::new().unwrap();
        let reader = ArchiveReader::open(temp.path(), ArchiveConfig::default()).unwrap();
        assert!(reader.list_entries().is_empty());
    }

    #[test]
    fn test_extract_and_overwrite_policy() {
        let (temp, config) = dataset();
        let reader = ArchiveReader::open(temp.path(), config).unwrap();
        let out = TempDir::new().unwrap();
        let entries = reader.list_entries();

        let mut ticks = Vec::new();
        let report = reader
            .extract(
                &entries,
                out.path(),
                OverwritePolicy::Skip,
                |p| ticks.push((p.completed, p.total)),
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(report.extracted, 3);
        assert_eq!(ticks, vec![(1, 3), (2, 3), (3, 3)]);
        assert_eq!(
            std::fs::read(out.path().join("dir").join("sub").join("c.txt")).unwrap(),
            b"charlie"
        );

        std::fs::write(out.path().join("a.txt"), b"local edit").unwrap();
        let report = reader
            .extract(&entries, out.path(), OverwritePolicy::Skip, |_| {}, &CancellationToken::new())
            .unwrap();
        assert_eq!(report.skipped, 3);
        assert_eq!(std::fs::read(out.path().join("a.txt")).unwrap(), b"local edit");

        let report = reader
            .extract(&entries, out.path(), OverwritePolicy::Replace, |_| {}, &CancellationToken::new())
            .unwrap();
        assert_eq!(report.extracted, 3);
        assert_eq!(std::fs::read(out.path().join("a.txt")).unwrap(), b"alpha");
    }

    #[test]
    fn test_truncated_entry_is_collected() {
        let (temp, config) = dataset();
        let reader = ArchiveReader::open(temp.path(), config).unwrap();
        let out = TempDir::new().unwrap();

        let mut entries = reader.list_entries();
        entries[0].size = 1000;

        let report = reader
            .extract(&entries, out.path(), OverwritePolicy::Replace, |_| {}, &CancellationToken::new())
            .unwrap();
        assert_eq!(report.extracted, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].logical_path, "a.txt");
        assert!(matches!(report.failures[0].error, ArchiveError::TruncatedRead { .. }));
    }

    #[test]
    fn test_empty_entry_past_end_of_shard_is_truncated() {
        let (temp, config) = dataset();
        let reader = ArchiveReader::open(temp.path(), config).unwrap();
        let out = TempDir::new().unwrap();

        let stale = ArchiveEntry::new("e.txt", 2, 0, Crc32.compute(b""), 50);
        assert!(matches!(
            reader.payload(&stale),
            Err(ArchiveError::TruncatedRead { offset: 50, expected: 0, available: 0, .. })
        ));

        let report = reader
            .extract(&[stale], out.path(), OverwritePolicy::Replace, |_| {}, &CancellationToken::new())
            .unwrap();
        assert_eq!(report.extracted, 0);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(report.failures[0].error, ArchiveError::TruncatedRead { .. }));
        assert!(!out.path().join("e.txt").exists());

        let at_end = ArchiveEntry::new("f.txt", 2, 0, Crc32.compute(b""), 11);
        assert!(reader.payload(&at_end).unwrap().is_empty());
    }

    #[test]
    fn test_cancelled_extract_keeps_written_files() {
        let (temp, config) = dataset();
        let reader = ArchiveReader::open(temp.path(), config).unwrap();
        let out = TempDir::new().unwrap();
        let entries = reader.list_entries();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let err = reader
            .extract(
                &entries,
                out.path(),
                OverwritePolicy::Replace,
                |p| {
                    if p.completed == 1 {
                        trigger.cancel();
                    }
                },
                &cancel,
            )
            .unwrap_err();

        assert!(matches!(err, ArchiveError::OperationCancelled { committed: 1 }));
        assert!(out.path().join("a.txt").exists());
        assert!(!out.path().join("dir").join("b.txt").exists());
    }

    #[test]
    fn test_verify_detects_corruption() {
        let (temp, config) = dataset();
        {
            let store = ShardStore::open(temp.path(), config.layout.clone()).unwrap();
            store.write(6, b"CH", WriteMode::OverwriteAt(0)).unwrap();
        }

        let reader = ArchiveReader::open(temp.path(), config).unwrap();
        let report = reader
            .verify(&reader.list_entries(), |_| {}, &CancellationToken::new())
            .unwrap();

        assert_eq!(report.verified, 2);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(report.failures[0].error, ArchiveError::ChecksumMismatch { .. }));
    }
}
