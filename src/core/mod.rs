//! Sharded archive engine
//!
//! Packs loose files into ten shard files plus one compact index, and
//! repacks incrementally by comparing sizes and checksums.
//!
//! - [`placement`] - Deterministic path → shard hashing
//! - [`index`] - Entry collection and its binary codec
//! - [`shard`] - Shard files and per-shard writer locks
//! - [`allocation`] - Append/overwrite policy and overlap checks
//! - [`diff`] - Source tree enumeration and change detection
//! - [`reader`] - Read sessions and extraction
//! - [`writer`] - Pack sessions
//!
//! ## Dataset Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ data0.pak … data9.pak   shard files           │
//! │  - Concatenated payloads, append-mostly       │
//! │  - Never shrink, never compacted              │
//! ├──────────────────────────────────────────────┤
//! │ data.idx                index file            │
//! │  - BlobCodec(records), one per entry          │
//! │  - path (UTF-16), shard, size, crc, offset    │
//! ├──────────────────────────────────────────────┤
//! │ data.idx.old            previous generation   │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Known Limitations
//!
//! Overwritten and abandoned regions are never reclaimed, so shards
//! accumulate garbage over repeated packs. The index backup/replace pair is
//! not crash-atomic, and a multi-file pack is not transactional.

pub mod allocation;
pub mod cancel;
pub mod checksum;
pub mod codec;
pub mod config;
pub mod diff;
pub mod entry;
pub mod error;
pub mod index;
pub mod placement;
pub mod progress;
pub mod reader;
pub mod shard;
pub mod validation;
pub mod writer;


pub use allocation::{plan_write, RegionMap, WriteMode};
pub use cancel::CancellationToken;
pub use checksum::{ChecksumProvider, Crc32};
pub use codec::{BlobCodec, CodecKind};
pub use config::{ArchiveConfig, OverwritePolicy, ShardLayout, StaleEntryPolicy};
pub use diff::{ChangeKind, ChangedFile, DiffReport, SourceFile};
pub use entry::ArchiveEntry;
pub use error::{ArchiveError, EntryFailure, Result};
pub use index::ArchiveIndex;
pub use placement::{shard_for_path, SHARD_COUNT};
pub use progress::{ExtractProgress, ExtractReport, PackProgress, PackReport, VerifyReport};
pub use reader::{load_index, ArchiveReader};
pub use shard::{ShardStore, ShardWriteGuard};
pub use writer::ArchiveWriter;
