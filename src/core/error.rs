use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Corrupt index: {0}")]
    CorruptIndex(String),

    #[error("Archive file not found: {}", .0.display())]
    ArchiveFileNotFound(PathBuf),

    #[error("Truncated read from shard {shard_id} at offset {offset}: expected {expected} bytes, {available} available")]
    TruncatedRead {
        shard_id: u8,
        offset: u64,
        expected: u64,
        available: u64,
    },

    #[error("Operation cancelled after committing {committed} entries")]
    OperationCancelled { committed: usize },

    #[error("Allocation invariant violated: shard {shard_id} region {offset}+{size} overlaps live entry '{conflicting}'")]
    AllocationInvariantViolation {
        shard_id: u8,
        offset: u64,
        size: u64,
        conflicting: String,
    },

    #[error("{logical_path}: {source}")]
    Entry {
        logical_path: String,
        #[source]
        source: Box<ArchiveError>,
    },

    #[error("Checksum mismatch: expected {expected:#010x}, found {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("Invalid shard ID: {0}")]
    InvalidShardId(u8),

    #[error("Invalid logical path: {0}")]
    InvalidPath(String),

    #[error("Entry too large: {path} is {size} bytes (max {max})")]
    EntryTooLarge { path: String, size: u64, max: u64 },

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Worker pool initialization failed: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Config parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Config validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

impl ArchiveError {
    /// Attribute an error to the logical path it happened on
    pub fn for_entry(logical_path: impl Into<String>, source: ArchiveError) -> Self {
        ArchiveError::Entry {
            logical_path: logical_path.into(),
            source: Box::new(source),
        }
    }

    /// Errors that make the whole dataset unusable and must abort a batch
    /// instead of being collected per file.
    pub fn is_fatal(&self) -> bool {
        match self {
            ArchiveError::CorruptIndex(_)
            | ArchiveError::ArchiveFileNotFound(_)
            | ArchiveError::OperationCancelled { .. }
            | ArchiveError::WorkerPool(_) => true,
            ArchiveError::Entry { source, .. } => source.is_fatal(),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ArchiveError::OperationCancelled { .. })
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

/// A per-file failure collected during a bulk operation
#[derive(Debug)]
pub struct EntryFailure {
    pub logical_path: String,
    pub error: ArchiveError,
}

impl EntryFailure {
    pub fn new(logical_path: impl Into<String>, error: ArchiveError) -> Self {
        EntryFailure {
            logical_path: logical_path.into(),
            error,
        }
    }
}
