//! Shard space allocation
//!
//! The policy is deliberately minimal and must stay bit-compatible with
//! existing shard files:
//!
//! - A new path, or a payload larger than the previous one, is appended at
//!   the end of its shard. The old region (if any) becomes garbage.
//! - A payload the same size or smaller overwrites the previous region in
//!   place. The tail `old_size - new_size` bytes become garbage.
//!
//! There is no free list and no compaction: shards only grow. Reclaiming
//! space needs an offline pass that rewrites a shard and remaps its entries.
//!
//! [`RegionMap`] tracks the live regions of a session so every planned write
//! can be checked against the entries it must not touch.

use crate::entry::ArchiveEntry;
use crate::error::{ArchiveError, Result};
use crate::index::ArchiveIndex;
use crate::placement::SHARD_COUNT;
use std::collections::BTreeMap;

/// How a payload is placed in its shard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Write at the current end of the shard
    Append,
    /// Write at a fixed offset, returning it unchanged
    OverwriteAt(u64),
}

/// Decide where an updated payload goes
pub fn plan_write(previous: Option<&ArchiveEntry>, new_size: u32) -> WriteMode {
    match previous {
        Some(entry) if new_size <= entry.size => WriteMode::OverwriteAt(entry.offset),
        _ => WriteMode::Append,
    }
}

#[derive(Debug, Clone)]
struct Region {
    end: u64,
    owner: String,
}

/// Live byte ranges per shard, keyed by start offset
#[derive(Debug, Clone)]
pub struct RegionMap {
    shards: Vec<BTreeMap<u64, Region>>,
}

impl Default for RegionMap {
    fn default() -> Self {
        RegionMap {
            shards: vec![BTreeMap::new(); SHARD_COUNT],
        }
    }
}

impl RegionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from an index, failing if any two live entries overlap
    pub fn from_index(index: &ArchiveIndex) -> Result<Self> {
        let mut map = RegionMap::new();
        for entry in index {
            map.check(entry.shard_id, entry.offset, u64::from(entry.size), &entry.key())?;
            map.insert(entry);
        }
        Ok(map)
    }

    /// Fail if `[offset, offset + size)` on `shard_id` overlaps a live region
    /// owned by anything other than `owner`
    pub fn check(&self, shard_id: u8, offset: u64, size: u64, owner: &str) -> Result<()> {
        let regions = self.regions(shard_id)?;
        if size == 0 {
            return Ok(());
        }
        let end = offset.saturating_add(size);

        // Regions are disjoint, so walking backwards from `end` the region
        // ends decrease monotonically.
        for (_, region) in regions.range(..end).rev() {
            if region.end <= offset {
                break;
            }
            if region.owner != owner {
                return Err(ArchiveError::AllocationInvariantViolation {
                    shard_id,
                    offset,
                    size,
                    conflicting: region.owner.clone(),
                });
            }
        }

        Ok(())
    }

    /// Replace `previous` (if any) with `current`
    pub fn update(&mut self, previous: Option<&ArchiveEntry>, current: &ArchiveEntry) {
        if let Some(previous) = previous {
            self.remove(previous);
        }
        self.insert(current);
    }

    pub fn remove(&mut self, entry: &ArchiveEntry) {
        let Some(regions) = self.shards.get_mut(entry.shard_id as usize) else {
            return;
        };
        let owned = regions
            .get(&entry.offset)
            .is_some_and(|region| region.owner == entry.key());
        if owned {
            regions.remove(&entry.offset);
        }
    }

    /// Live bytes on a shard
    pub fn live_bytes(&self, shard_id: u8) -> u64 {
        self.shards
            .get(shard_id as usize)
            .map(|regions| {
                regions
                    .iter()
                    .map(|(start, region)| region.end - start)
                    .sum()
            })
            .unwrap_or(0)
    }

    fn insert(&mut self, entry: &ArchiveEntry) {
        if entry.size == 0 {
            return;
        }
        if let Some(regions) = self.shards.get_mut(entry.shard_id as usize) {
            regions.insert(
                entry.offset,
                Region {
                    end: entry.end(),
                    owner: entry.key(),
                },
            );
        }
    }

    fn regions(&self, shard_id: u8) -> Result<&BTreeMap<u64, Region>> {
        self.shards
            .get(shard_id as usize)
            .ok_or(ArchiveError::InvalidShardId(shard_id))
    }
}
