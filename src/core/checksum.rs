//! Content fingerprints

use crate::error::Result;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

const READ_BUFFER: usize = 64 * 1024;

/// 32-bit content fingerprint used for change detection
pub trait ChecksumProvider: Send + Sync {
    fn compute(&self, data: &[u8]) -> u32;

    /// Fingerprint a file's contents
    fn compute_file(&self, path: &Path) -> Result<u32> {
        let mut data = Vec::new();
        BufReader::new(File::open(path)?).read_to_end(&mut data)?;
        Ok(self.compute(&data))
    }
}

/// CRC-32 (IEEE)
#[derive(Debug, Clone, Copy, Default)]
pub struct Crc32;

impl ChecksumProvider for Crc32 {
    fn compute(&self, data: &[u8]) -> u32 {
        crc32fast::hash(data)
    }

    fn compute_file(&self, path: &Path) -> Result<u32> {
        let mut reader = BufReader::with_capacity(READ_BUFFER, File::open(path)?);
        let mut hasher = crc32fast::Hasher::new();
        let mut buffer = vec![0u8; READ_BUFFER];

        loop {
            let read = reader.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }

        Ok(hasher.finalize())
    }
}
