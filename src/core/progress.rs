//! Progress reports and batch outcomes

use crate::error::EntryFailure;
use crate::index::ArchiveIndex;

/// Reported after each file of a pack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackProgress<'a> {
    pub logical_path: &'a str,
    pub completed: usize,
    pub total: usize,
}

/// Reported after each entry of an extraction or verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractProgress {
    pub completed: usize,
    pub total: usize,
}

/// Outcome of a pack session
#[derive(Debug)]
pub struct PackReport {
    /// The index as persisted at the end of the session
    pub index: ArchiveIndex,
    /// Entries written and recorded in the index
    pub committed: usize,
    /// Files the diff found identical to their entry
    pub unchanged: usize,
    /// Stale entries dropped from the index
    pub pruned: usize,
    pub failures: Vec<EntryFailure>,
}

impl PackReport {
    pub fn succeeded(&self) -> usize {
        self.committed
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Outcome of an extraction
#[derive(Debug, Default)]
pub struct ExtractReport {
    pub extracted: usize,
    /// Destinations that existed and were left alone
    pub skipped: usize,
    pub failures: Vec<EntryFailure>,
}

impl ExtractReport {
    pub fn succeeded(&self) -> usize {
        self.extracted + self.skipped
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Outcome of a payload verification
#[derive(Debug, Default)]
pub struct VerifyReport {
    pub verified: usize,
    pub failures: Vec<EntryFailure>,
}
