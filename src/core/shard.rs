//! Shard files and per-shard write locking
//!
//! A [`ShardStore`] owns the ten shard files of one dataset and one
//! reader-writer lock per shard. The lock set lives and dies with the store:
//! open it before a write session and close (or drop) it afterwards.
//!
//! Every write holds its shard's writer lock across the seek and the write,
//! so two writers on the same shard never interleave while writers on
//! different shards proceed independently.

use crate::allocation::WriteMode;
use crate::config::ShardLayout;
use crate::error::{ArchiveError, Result};
use crate::index::ArchiveIndex;
use crate::placement::SHARD_COUNT;
use parking_lot::{RwLock, RwLockWriteGuard};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace};

/// One physical shard file
pub struct ShardFile {
    file: File,
    path: PathBuf,
    len: u64,
}

impl ShardFile {
    /// Open a shard for reading and writing, creating it if needed
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let len = file.metadata()?.len();

        Ok(ShardFile {
            file,
            path: path.as_ref().to_path_buf(),
            len,
        })
    }

    /// Current logical length
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Write a payload, returning the offset it landed at
    pub fn write(&mut self, payload: &[u8], mode: WriteMode) -> Result<u64> {
        let offset = match mode {
            WriteMode::Append => self.file.seek(SeekFrom::End(0))?,
            WriteMode::OverwriteAt(offset) => self.file.seek(SeekFrom::Start(offset))?,
        };

        self.file.write_all(payload)?;
        self.len = self.len.max(offset.saturating_add(payload.len() as u64));

        Ok(offset)
    }

    /// Read exactly `len` bytes at `offset`
    pub fn read(&mut self, shard_id: u8, offset: u64, len: u64) -> Result<Vec<u8>> {
        let available = self.len.saturating_sub(offset);
        if available < len {
            return Err(ArchiveError::TruncatedRead {
                shard_id,
                offset,
                expected: len,
                available,
            });
        }

        self.file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len as usize];
        self.file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sync all writes to disk
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// Exclusive access to one shard
///
/// Held writes are serialized against every other writer on the same shard.
pub struct ShardWriteGuard<'a> {
    shard_id: u8,
    file: RwLockWriteGuard<'a, ShardFile>,
}

impl ShardWriteGuard<'_> {
    pub fn shard_id(&self) -> u8 {
        self.shard_id
    }

    pub fn len(&self) -> u64 {
        self.file.len()
    }

    pub fn is_empty(&self) -> bool {
        self.file.is_empty()
    }

    pub fn write(&mut self, payload: &[u8], mode: WriteMode) -> Result<u64> {
        let offset = self.file.write(payload, mode)?;
        trace!(
            "Shard {}: wrote {} bytes at {} ({:?})",
            self.shard_id,
            payload.len(),
            offset,
            mode
        );
        Ok(offset)
    }
}

/// The ten shards of a dataset and their locks
pub struct ShardStore {
    dir: PathBuf,
    layout: ShardLayout,
    shards: Vec<RwLock<ShardFile>>,
}

impl ShardStore {
    /// Open (creating when missing) all shards of the dataset in `dir`
    pub fn open<P: AsRef<Path>>(dir: P, layout: ShardLayout) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let shards = (0..SHARD_COUNT as u8)
            .map(|id| ShardFile::open(layout.shard_path(&dir, id)).map(RwLock::new))
            .collect::<Result<Vec<_>>>()?;

        info!("Opened shard store at {:?}", dir);
        Ok(ShardStore {
            dir,
            layout,
            shards,
        })
    }

    /// Open for a session over `index`, failing if a shard it references is gone
    ///
    /// Missing shards that nothing references are created empty.
    pub fn open_for_index<P: AsRef<Path>>(
        dir: P,
        layout: ShardLayout,
        index: &ArchiveIndex,
    ) -> Result<Self> {
        check_referenced_shards(dir.as_ref(), &layout, index)?;
        Self::open(dir, layout)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn layout(&self) -> &ShardLayout {
        &self.layout
    }

    /// Take the writer lock of a shard
    pub fn lock(&self, shard_id: u8) -> Result<ShardWriteGuard<'_>> {
        let shard = self.shard(shard_id)?;
        Ok(ShardWriteGuard {
            shard_id,
            file: shard.write(),
        })
    }

    /// Write a payload under the shard's writer lock, returning its offset
    pub fn write(&self, shard_id: u8, payload: &[u8], mode: WriteMode) -> Result<u64> {
        self.lock(shard_id)?.write(payload, mode)
    }

    /// Read `len` bytes at `offset`
    ///
    /// Takes the writer lock: reading moves the shared file cursor.
    pub fn read(&self, shard_id: u8, offset: u64, len: u64) -> Result<Vec<u8>> {
        self.shard(shard_id)?.write().read(shard_id, offset, len)
    }

    /// Current length of a shard
    pub fn len(&self, shard_id: u8) -> Result<u64> {
        Ok(self.shard(shard_id)?.read().len())
    }

    /// Sync every shard to disk
    pub fn sync(&self) -> Result<()> {
        for shard in &self.shards {
            shard.write().sync()?;
        }
        Ok(())
    }

    /// Sync and release all shards and locks
    pub fn close(self) -> Result<()> {
        self.sync()?;
        debug!("Closed shard store at {:?}", self.dir);
        Ok(())
    }

    fn shard(&self, shard_id: u8) -> Result<&RwLock<ShardFile>> {
        self.shards
            .get(shard_id as usize)
            .ok_or(ArchiveError::InvalidShardId(shard_id))
    }
}

/// Fail with `ArchiveFileNotFound` if any shard referenced by `index` is absent
pub fn check_referenced_shards(dir: &Path, layout: &ShardLayout, index: &ArchiveIndex) -> Result<()> {
    let mut referenced = [false; SHARD_COUNT];
    for entry in index {
        if let Some(slot) = referenced.get_mut(entry.shard_id as usize) {
            *slot = true;
        }
    }

    for (id, _) in referenced.iter().enumerate().filter(|(_, used)| **used) {
        let path = layout.shard_path(dir, id as u8);
        if !path.is_file() {
            return Err(ArchiveError::ArchiveFileNotFound(path));
        }
    }

    Ok(())
}
