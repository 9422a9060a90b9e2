//! Blob codec for the index file
//!
//! The serialized index is passed through a codec before it hits disk.
//! The engine treats the codec as an opaque bytes-in/bytes-out transform.
//!
//! **Formats**:
//! - `None`: stored as-is
//! - `Lz4`: lz4 block with the uncompressed size prepended (u32 LE)
//! - `Zstd`: single zstd frame, level 3

use crate::error::{ArchiveError, Result};
use serde::{Deserialize, Serialize};

/// Upper bound for a decompressed index
const MAX_DECOMPRESSED: usize = 512 * 1024 * 1024;

/// Opaque byte compressor used for the index file
pub trait BlobCodec: Send + Sync {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Built-in codecs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    /// No compression
    None,
    /// LZ4 compression (fast, moderate ratio)
    #[default]
    Lz4,
    /// Zstd compression (slower, better ratio)
    Zstd,
}

impl CodecKind {
    /// Parse from a config or CLI string
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "none" | "raw" => Some(CodecKind::None),
            "lz4" => Some(CodecKind::Lz4),
            "zstd" | "zst" => Some(CodecKind::Zstd),
            _ => None,
        }
    }
}

impl BlobCodec for CodecKind {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            CodecKind::None => Ok(data.to_vec()),
            CodecKind::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
            CodecKind::Zstd => zstd::bulk::compress(data, 3)
                .map_err(|e| ArchiveError::Codec(format!("Zstd compression failed: {}", e))),
        }
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            CodecKind::None => Ok(data.to_vec()),
            CodecKind::Lz4 => {
                if let Some(prefix) = data.get(..4) {
                    let declared = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
                    if declared as usize > MAX_DECOMPRESSED {
                        return Err(ArchiveError::Codec(format!(
                            "LZ4 size prefix {} exceeds {} bytes",
                            declared, MAX_DECOMPRESSED
                        )));
                    }
                }
                lz4_flex::decompress_size_prepended(data)
                    .map_err(|e| ArchiveError::Codec(format!("LZ4 decompression failed: {}", e)))
            }
            CodecKind::Zstd => zstd::bulk::decompress(data, MAX_DECOMPRESSED)
                .map_err(|e| ArchiveError::Codec(format!("Zstd decompression failed: {}", e))),
        }
    }
}
