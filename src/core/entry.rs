//! Archive entry: placement record for one logical file

use crate::validation;
use serde::{Deserialize, Serialize};

/// Where one logical file's payload lives
///
/// Contains everything needed to locate and validate a payload:
/// - Shard and byte range inside that shard
/// - Content fingerprint for change detection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    /// Backslash-separated path inside the archive (e.g. "textures\\ui\\icon.dds")
    pub logical_path: String,

    /// Shard holding the payload, 0..=9
    pub shard_id: u8,

    /// Payload length in bytes
    pub size: u32,

    /// 32-bit content fingerprint of the payload
    pub checksum: u32,

    /// Byte offset of the payload within its shard
    pub offset: u64,
}

impl ArchiveEntry {
    pub fn new(
        logical_path: impl Into<String>,
        shard_id: u8,
        size: u32,
        checksum: u32,
        offset: u64,
    ) -> Self {
        ArchiveEntry {
            logical_path: logical_path.into(),
            shard_id,
            size,
            checksum,
            offset,
        }
    }

    /// One past the last byte of the payload, clamped at `u64::MAX`
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(u64::from(self.size))
    }

    /// Case-insensitive identity
    pub fn key(&self) -> String {
        validation::fold_key(&self.logical_path)
    }

    pub fn name(&self) -> &str {
        validation::file_name(&self.logical_path)
    }

    pub fn parent(&self) -> &str {
        validation::parent(&self.logical_path)
    }
}
