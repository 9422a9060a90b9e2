//! Cooperative cancellation
//!
//! Long operations check the token between files, never inside one file's
//! hashing or I/O.

use crate::error::{ArchiveError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; every clone observes it
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// `OperationCancelled` if cancellation was requested
    pub fn check(&self, committed: usize) -> Result<()> {
        if self.is_cancelled() {
            Err(ArchiveError::OperationCancelled { committed })
        } else {
            Ok(())
        }
    }
}
