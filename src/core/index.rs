//! Archive index: every entry of a dataset, plus its on-disk codec
//!
//! **Record format** (little-endian), repeated for each entry in index order:
//!
//! ```text
//! u16   path length in UTF-16 code units
//! [u16] path, UTF-16LE
//! u8    shard id
//! u32   payload size
//! u32   payload checksum
//! u64   payload offset
//! ```
//!
//! The concatenated records are passed through a [`BlobCodec`] before they
//! are written. There is no header and no trailer; a record cut short by the
//! end of the buffer makes the whole index corrupt.
//!
//! **Write policy**: the previous backup is deleted, the current index is
//! renamed to `<index>.old`, then the new index is written. One generation
//! of rollback, and no atomicity across the rename and the write.

use crate::allocation::RegionMap;
use crate::codec::BlobCodec;
use crate::entry::ArchiveEntry;
use crate::error::{ArchiveError, Result};
use crate::placement::SHARD_COUNT;
use crate::validation;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Fixed bytes per record, excluding the path
const RECORD_FIXED_LEN: usize = 2 + 1 + 4 + 4 + 8;

/// Ordered, case-insensitively keyed collection of entries
#[derive(Debug, Clone, Default)]
pub struct ArchiveIndex {
    entries: Vec<ArchiveEntry>,
    lookup: HashMap<String, usize>,
}

impl PartialEq for ArchiveIndex {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Eq for ArchiveIndex {}

impl ArchiveIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from entries, rejecting case-insensitive duplicates
    pub fn from_entries(entries: Vec<ArchiveEntry>) -> Result<Self> {
        let mut index = ArchiveIndex::new();
        for entry in entries {
            if index.contains(&entry.logical_path) {
                return Err(ArchiveError::CorruptIndex(format!(
                    "duplicate path '{}'",
                    entry.logical_path
                )));
            }
            index.upsert(entry);
        }
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, logical_path: &str) -> Option<&ArchiveEntry> {
        self.lookup
            .get(&validation::fold_key(logical_path))
            .map(|&idx| &self.entries[idx])
    }

    pub fn contains(&self, logical_path: &str) -> bool {
        self.lookup.contains_key(&validation::fold_key(logical_path))
    }

    /// Insert a new entry at the end, or replace an existing one in place
    ///
    /// Returns the entry that was replaced.
    pub fn upsert(&mut self, entry: ArchiveEntry) -> Option<ArchiveEntry> {
        let key = entry.key();
        match self.lookup.get(&key) {
            Some(&idx) => Some(std::mem::replace(&mut self.entries[idx], entry)),
            None => {
                self.lookup.insert(key, self.entries.len());
                self.entries.push(entry);
                None
            }
        }
    }

    pub fn remove(&mut self, logical_path: &str) -> Option<ArchiveEntry> {
        let idx = self.lookup.remove(&validation::fold_key(logical_path))?;
        let removed = self.entries.remove(idx);
        self.reindex();
        Some(removed)
    }

    /// Keep only entries matching the predicate, returns how many were dropped
    pub fn retain<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&ArchiveEntry) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|entry| keep(entry));
        self.reindex();
        before - self.entries.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ArchiveEntry> {
        self.entries.iter()
    }

    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<ArchiveEntry> {
        self.entries
    }

    /// Check that no two live entries on the same shard overlap
    pub fn verify_layout(&self) -> Result<()> {
        RegionMap::from_index(self).map(|_| ())
    }

    fn reindex(&mut self) {
        self.lookup = self
            .entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| (entry.key(), idx))
            .collect();
    }

    /// Serialize to the raw record format (before compression)
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(self.entries.len() * (RECORD_FIXED_LEN + 64));

        for entry in &self.entries {
            validation::validate_logical_path(&entry.logical_path)?;
            if entry.shard_id as usize >= SHARD_COUNT {
                return Err(ArchiveError::InvalidShardId(entry.shard_id));
            }

            let units: Vec<u16> = entry.logical_path.encode_utf16().collect();
            bytes.extend_from_slice(&(units.len() as u16).to_le_bytes());
            for unit in units {
                bytes.extend_from_slice(&unit.to_le_bytes());
            }
            bytes.push(entry.shard_id);
            bytes.extend_from_slice(&entry.size.to_le_bytes());
            bytes.extend_from_slice(&entry.checksum.to_le_bytes());
            bytes.extend_from_slice(&entry.offset.to_le_bytes());
        }

        Ok(bytes)
    }

    /// Parse the raw record format (after decompression)
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let mut entries = Vec::new();

        while !cursor.is_empty() {
            let record = entries.len();
            let path_len = cursor.u16(record)? as usize;
            if path_len == 0 {
                return Err(ArchiveError::CorruptIndex(format!(
                    "record {} has an empty path",
                    record
                )));
            }

            let units = (0..path_len)
                .map(|_| cursor.u16(record))
                .collect::<Result<Vec<u16>>>()?;
            let logical_path = String::from_utf16(&units).map_err(|_| {
                ArchiveError::CorruptIndex(format!("record {} has malformed UTF-16 path", record))
            })?;

            let shard_id = cursor.u8(record)?;
            if shard_id as usize >= SHARD_COUNT {
                return Err(ArchiveError::CorruptIndex(format!(
                    "record {} ('{}') has shard id {}",
                    record, logical_path, shard_id
                )));
            }

            let size = cursor.u32(record)?;
            let checksum = cursor.u32(record)?;
            let offset = cursor.u64(record)?;
            if offset.checked_add(u64::from(size)).is_none() {
                return Err(ArchiveError::CorruptIndex(format!(
                    "record {} ('{}') extends past the addressable range",
                    record, logical_path
                )));
            }

            entries.push(ArchiveEntry {
                logical_path,
                shard_id,
                size,
                checksum,
                offset,
            });
        }

        Self::from_entries(entries)
    }

    /// Load an index file
    ///
    /// A missing or zero-length file is an empty index.
    pub fn load<P: AsRef<Path>>(path: P, codec: &dyn BlobCodec) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("No index at {:?}, starting empty", path);
            return Ok(ArchiveIndex::new());
        }

        let raw = std::fs::read(path)?;
        if raw.is_empty() {
            return Ok(ArchiveIndex::new());
        }

        let bytes = codec
            .decompress(&raw)
            .map_err(|e| ArchiveError::CorruptIndex(format!("{}: {}", path.display(), e)))?;
        if bytes.is_empty() {
            return Err(ArchiveError::CorruptIndex(format!(
                "{} decompressed to zero bytes",
                path.display()
            )));
        }

        let index = Self::decode(&bytes)?;
        info!("Loaded {} entries from {:?}", index.len(), path);
        Ok(index)
    }

    /// Rotate the previous index to `backup` and write this one to `path`
    pub fn save<P: AsRef<Path>, B: AsRef<Path>>(
        &self,
        path: P,
        backup: B,
        codec: &dyn BlobCodec,
    ) -> Result<()> {
        let path = path.as_ref();
        let backup = backup.as_ref();

        // Serialize first so a bad entry leaves the current index untouched
        let bytes = if self.is_empty() {
            Vec::new()
        } else {
            codec.compress(&self.encode()?)?
        };

        if backup.exists() {
            std::fs::remove_file(backup)?;
        }
        if path.exists() {
            std::fs::rename(path, backup)?;
        }
        std::fs::write(path, &bytes)?;

        info!(
            "Saved {} entries ({} bytes) to {:?}",
            self.len(),
            bytes.len(),
            path
        );
        Ok(())
    }
}

impl<'a> IntoIterator for &'a ArchiveIndex {
    type Item = &'a ArchiveEntry;
    type IntoIter = std::slice::Iter<'a, ArchiveEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Bounds-checked little-endian reader over the decoded index
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn take<const N: usize>(&mut self, record: usize) -> Result<[u8; N]> {
        let end = self.pos + N;
        let slice = self.bytes.get(self.pos..end).ok_or_else(|| {
            ArchiveError::CorruptIndex(format!(
                "record {} truncated at byte {} of {}",
                record,
                self.pos,
                self.bytes.len()
            ))
        })?;
        self.pos = end;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn u8(&mut self, record: usize) -> Result<u8> {
        Ok(self.take::<1>(record)?[0])
    }

    fn u16(&mut self, record: usize) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(record)?))
    }

    fn u32(&mut self, record: usize) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(record)?))
    }

    fn u64(&mut self, record: usize) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(record)?))
    }
}
