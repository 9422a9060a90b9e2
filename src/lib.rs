//! # shardpack - Sharded Archive Storage
//!
//! `shardpack` packs a tree of loose files into ten shard files plus a
//! single compact index, and re-packs incrementally: only files whose size
//! or checksum changed are rewritten.
//!
//! - **Deterministic placement**: a file's shard is a hash of its path
//! - **Incremental packs**: cheap size comparison first, checksums only when needed
//! - **In-place overwrites** for payloads that did not grow
//! - **Cooperative cancellation** with a persisted checkpoint
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use shardpack::{Archive, CancellationToken, OverwritePolicy, Result};
//!
//! # fn main() -> Result<()> {
//! let archive = Archive::open("game/data")?;
//! let cancel = CancellationToken::new();
//!
//! // Pack the modified assets back in
//! let report = archive.pack("game/assets".as_ref(), |_| {}, &cancel)?;
//! println!("{} files updated", report.committed);
//!
//! // Extract everything somewhere else
//! let entries = archive.list_entries()?;
//! archive.extract(&entries, "out".as_ref(), OverwritePolicy::Replace, |_| {}, &cancel)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Custom Configuration
//!
//! ```rust,no_run
//! use shardpack::{ArchiveBuilder, CodecKind, Result, StaleEntryPolicy};
//!
//! # fn main() -> Result<()> {
//! let archive = ArchiveBuilder::new()
//!     .dir("game/data")
//!     .codec(CodecKind::Zstd)
//!     .parallelism(4)
//!     .stale_entries(StaleEntryPolicy::Prune)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

pub mod core;

// Re-export core modules internally so crate:: paths in core still work
#[allow(unused_imports)]
pub(crate) use crate::core::{
    allocation, cancel, checksum, codec, config, diff, entry, error, index, placement, progress,
    reader, shard, validation, writer,
};

pub use crate::core::{
    allocation::WriteMode,
    cancel::CancellationToken,
    checksum::{ChecksumProvider, Crc32},
    codec::{BlobCodec, CodecKind},
    config::{ArchiveConfig, OverwritePolicy, ShardLayout, StaleEntryPolicy},
    entry::ArchiveEntry,
    error::{ArchiveError, EntryFailure, Result},
    index::ArchiveIndex,
    placement::{shard_for_path, SHARD_COUNT},
    progress::{ExtractProgress, ExtractReport, PackProgress, PackReport, VerifyReport},
    reader::ArchiveReader,
    shard::ShardStore,
    writer::ArchiveWriter,
};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use validator::Validate;

/// A dataset directory: ten shard files and their index
///
/// `Archive` holds no open files. Every operation opens what it needs and
/// releases it when done, so reads and packs never overlap within one call.
///
/// # Examples
///
/// ```rust,no_run
/// use shardpack::Archive;
///
/// # fn main() -> shardpack::Result<()> {
/// let archive = Archive::open("game/data")?;
/// for entry in archive.list_entries()? {
///     println!("{} ({} bytes, shard {})", entry.logical_path, entry.size, entry.shard_id);
/// }
/// # Ok(())
/// # }
/// ```
pub struct Archive {
    dir: PathBuf,
    config: ArchiveConfig,
    checksum: Arc<dyn ChecksumProvider>,
}

impl Archive {
    /// Open a dataset directory with the default configuration
    ///
    /// The directory does not need to exist yet; the first pack creates it.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::open_with(dir, ArchiveConfig::default())
    }

    /// Open a dataset directory with an explicit configuration
    pub fn open_with<P: AsRef<Path>>(dir: P, config: ArchiveConfig) -> Result<Self> {
        config.validate()?;
        info!("Opening archive at {:?}", dir.as_ref());
        Ok(Archive {
            dir: dir.as_ref().to_path_buf(),
            config,
            checksum: Arc::new(Crc32),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    /// Load the current index
    pub fn index(&self) -> Result<ArchiveIndex> {
        reader::load_index(&self.dir, &self.config.layout, &self.config.codec)
    }

    /// Every entry in the index, in index order
    pub fn list_entries(&self) -> Result<Vec<ArchiveEntry>> {
        Ok(self.index()?.into_entries())
    }

    /// Resolve logical paths (any separator, any case) to their entries
    ///
    /// Fails on the first path that has no entry.
    pub fn select<S: AsRef<str>>(&self, logical_paths: &[S]) -> Result<Vec<ArchiveEntry>> {
        let index = self.index()?;
        logical_paths
            .iter()
            .map(|path| {
                let path = path.as_ref();
                index.get(path).cloned().ok_or_else(|| {
                    ArchiveError::for_entry(
                        path,
                        ArchiveError::InvalidPath("no such entry in the index".to_string()),
                    )
                })
            })
            .collect()
    }

    /// Start a read session
    pub fn reader(&self) -> Result<ArchiveReader> {
        let reader = ArchiveReader::open(&self.dir, self.config.clone())?;
        Ok(reader.with_checksum(Arc::clone(&self.checksum)))
    }

    /// Read one payload by logical path
    pub fn read(&self, logical_path: &str) -> Result<Vec<u8>> {
        self.reader()?.read_path(logical_path)
    }

    /// Extract `selected` entries below `destination`
    ///
    /// Relative directories are recreated. Per-entry failures are collected
    /// in the report; a missing shard or a cancellation aborts.
    pub fn extract<F>(
        &self,
        selected: &[ArchiveEntry],
        destination: &Path,
        overwrite: OverwritePolicy,
        progress: F,
        cancel: &CancellationToken,
    ) -> Result<ExtractReport>
    where
        F: FnMut(ExtractProgress),
    {
        let reader = self.reader()?;
        reader.extract(selected, destination, overwrite, progress, cancel)
    }

    /// Extract every entry, using the configured overwrite policy
    pub fn extract_all<F>(
        &self,
        destination: &Path,
        progress: F,
        cancel: &CancellationToken,
    ) -> Result<ExtractReport>
    where
        F: FnMut(ExtractProgress),
    {
        let reader = self.reader()?;
        let entries = reader.list_entries();
        reader.extract(&entries, destination, self.config.overwrite, progress, cancel)
    }

    /// Incrementally pack `source_dir` into the dataset
    ///
    /// On cancellation the entries written so far are persisted and
    /// `OperationCancelled` reports how many.
    pub fn pack<F>(
        &self,
        source_dir: &Path,
        progress: F,
        cancel: &CancellationToken,
    ) -> Result<PackReport>
    where
        F: FnMut(PackProgress<'_>),
    {
        let existing = self.index()?;
        let store = Arc::new(ShardStore::open_for_index(
            &self.dir,
            self.config.layout.clone(),
            &existing,
        )?);

        let writer = ArchiveWriter::new(Arc::clone(&store), self.config.clone())
            .with_checksum(Arc::clone(&self.checksum));
        let report = writer.pack(source_dir, existing, progress, cancel);
        drop(writer);

        // The writer held the only other handle
        let closed = match Arc::try_unwrap(store) {
            Ok(store) => store.close(),
            Err(_) => Ok(()),
        };
        settle_pack(report, closed)
    }

    /// Check every payload against its recorded checksum
    pub fn verify<F>(&self, progress: F, cancel: &CancellationToken) -> Result<VerifyReport>
    where
        F: FnMut(ExtractProgress),
    {
        let reader = self.reader()?;
        let entries = reader.list_entries();
        let report = reader.verify(&entries, progress, cancel)?;
        info!(
            "Verified {} entries, {} failed",
            report.verified,
            report.failures.len()
        );
        Ok(report)
    }
}

/// Combine a pack outcome with the result of closing its shard store
///
/// A failed pack keeps its own error (cancellation carries the committed
/// count), so a close failure after it is only logged.
fn settle_pack(report: Result<PackReport>, closed: Result<()>) -> Result<PackReport> {
    match (report, closed) {
        (Ok(report), closed) => closed.map(|()| report),
        (Err(e), Err(close_err)) => {
            warn!("Closing shards after a failed pack also failed: {}", close_err);
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
    }
}

/// Builder for opening an [`Archive`] with custom configuration
///
/// # Examples
///
/// ```rust,no_run
/// use shardpack::{ArchiveBuilder, OverwritePolicy, Result};
///
/// # fn main() -> Result<()> {
/// let archive = ArchiveBuilder::new()
///     .dir("game/data")
///     .config_file("shardpack.toml")?
///     .overwrite(OverwritePolicy::Replace)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ArchiveBuilder {
    dir: Option<PathBuf>,
    config: ArchiveConfig,
    checksum: Option<Arc<dyn ChecksumProvider>>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        ArchiveBuilder {
            dir: None,
            config: ArchiveConfig::default(),
            checksum: None,
        }
    }

    /// Set the dataset directory (required)
    pub fn dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: ArchiveConfig) -> Self {
        self.config = config;
        self
    }

    /// Load the configuration from a TOML file
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        self.config = ArchiveConfig::from_file(path)?;
        Ok(self)
    }

    pub fn layout(mut self, layout: ShardLayout) -> Self {
        self.config.layout = layout;
        self
    }

    /// Compressor for the index file
    pub fn codec(mut self, codec: CodecKind) -> Self {
        self.config.codec = codec;
        self
    }

    /// Worker count for change detection
    pub fn parallelism(mut self, workers: usize) -> Self {
        self.config.parallelism = Some(workers);
        self
    }

    pub fn stale_entries(mut self, policy: StaleEntryPolicy) -> Self {
        self.config.stale_entries = policy;
        self
    }

    pub fn overwrite(mut self, policy: OverwritePolicy) -> Self {
        self.config.overwrite = policy;
        self
    }

    /// Use a different content fingerprint than CRC-32
    pub fn checksum(mut self, checksum: Arc<dyn ChecksumProvider>) -> Self {
        self.checksum = Some(checksum);
        self
    }

    /// Validate the configuration and build the Archive
    pub fn build(self) -> Result<Archive> {
        let dir = self
            .dir
            .ok_or_else(|| ArchiveError::Config("dataset directory must be set".to_string()))?;

        let mut archive = Archive::open_with(dir, self.config)?;
        if let Some(checksum) = self.checksum {
            debug!("Using custom checksum provider");
            archive.checksum = checksum;
        }
        Ok(archive)
    }
}

impl Default for ArchiveBuilder {
    fn default() -> Self {
        Self::new()
    }
}
