//! Dataset configuration
//!
//! Loaded from TOML or built in code. Every field has a default so an empty
//! file is a valid configuration.
//!
//! ```toml
//! excluded_extensions = ["pak", "idx", "old", "bik"]
//! parallelism = 4
//! codec = "zstd"
//! stale_entries = "prune"
//! overwrite = "replace"
//!
//! [layout]
//! shard_prefix = "data"
//! shard_extension = "pak"
//! index_file = "data.idx"
//! ```

use crate::codec::CodecKind;
use crate::error::{ArchiveError, Result};
use crate::placement::SHARD_COUNT;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use validator::Validate;

/// What to do with index entries whose source file disappeared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StaleEntryPolicy {
    /// Leave them in the index (their payload stays extractable)
    #[default]
    Keep,
    /// Drop them from the index after a complete pack
    Prune,
}

/// What extraction does when the destination file already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverwritePolicy {
    #[default]
    Skip,
    Replace,
}

/// File names of a dataset's shards and index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ShardLayout {
    #[validate(length(min = 1))]
    pub shard_prefix: String,

    #[validate(length(min = 1))]
    pub shard_extension: String,

    #[validate(length(min = 1))]
    pub index_file: String,
}

impl Default for ShardLayout {
    fn default() -> Self {
        ShardLayout {
            shard_prefix: "data".to_string(),
            shard_extension: "pak".to_string(),
            index_file: "data.idx".to_string(),
        }
    }
}

impl ShardLayout {
    /// File name of a shard, e.g. `data3.pak`
    pub fn shard_file_name(&self, shard_id: u8) -> String {
        format!("{}{}.{}", self.shard_prefix, shard_id, self.shard_extension)
    }

    pub fn shard_path(&self, dir: &Path, shard_id: u8) -> PathBuf {
        dir.join(self.shard_file_name(shard_id))
    }

    pub fn index_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.index_file)
    }

    /// Previous-generation index, e.g. `data.idx.old`
    pub fn backup_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.old", self.index_file))
    }

    /// Whether a file name belongs to the dataset itself
    pub fn owns_file_name(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        let index = self.index_file.to_lowercase();
        if name == index || name == format!("{}.old", index) {
            return true;
        }
        (0..SHARD_COUNT as u8).any(|id| name == self.shard_file_name(id).to_lowercase())
    }
}

/// Engine configuration for one dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ArchiveConfig {
    #[validate(nested)]
    pub layout: ShardLayout,

    /// Extensions (without the dot, case-insensitive) that are never packed
    pub excluded_extensions: Vec<String>,

    /// Worker count for the diff phase; `None` uses one per logical CPU
    #[validate(range(min = 1, max = 256))]
    pub parallelism: Option<usize>,

    pub codec: CodecKind,

    pub stale_entries: StaleEntryPolicy,

    pub overwrite: OverwritePolicy,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        ArchiveConfig {
            layout: ShardLayout::default(),
            excluded_extensions: vec!["pak".to_string(), "idx".to_string(), "old".to_string()],
            parallelism: None,
            codec: CodecKind::default(),
            stale_entries: StaleEntryPolicy::default(),
            overwrite: OverwritePolicy::default(),
        }
    }
}

impl ArchiveConfig {
    /// Parse and validate a TOML configuration
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: ArchiveConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ArchiveError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Worker count for the diff phase
    pub fn workers(&self) -> usize {
        self.parallelism
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
            .max(1)
    }

    /// Whether a file with this name is skipped by pack
    pub fn is_excluded(&self, file_name: &str) -> bool {
        let Some((_, extension)) = file_name.rsplit_once('.') else {
            return false;
        };
        self.excluded_extensions
            .iter()
            .any(|excluded| excluded.trim_start_matches('.').eq_ignore_ascii_case(extension))
    }
}
