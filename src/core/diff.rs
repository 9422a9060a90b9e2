//! Source tree diff
//!
//! Decides which source files must be rewritten into the shards. Each file
//! climbs a cost ladder and stops at the first rung that decides it:
//!
//! 1. Path absent from the index: new, no hashing.
//! 2. Size differs from the entry: changed, no hashing.
//! 3. Checksum differs from the entry: changed.
//!
//! Enumeration walks the tree once; the stat/hash ladder runs on a bounded
//! worker pool and checks for cancellation before every file.

use crate::cancel::CancellationToken;
use crate::checksum::ChecksumProvider;
use crate::config::ArchiveConfig;
use crate::error::{ArchiveError, EntryFailure, Result};
use crate::index::ArchiveIndex;
use crate::validation;
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Why a file needs to be written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Not in the index yet
    New,
    /// Size differs from the recorded entry
    Resized,
    /// Same size, different checksum
    Modified,
}

/// A regular file found under the source root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub logical_path: String,
    pub path: PathBuf,
    pub size: u64,
}

/// A source file that must be (re)written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFile {
    pub source: SourceFile,
    pub kind: ChangeKind,
}

/// Result of diffing a source tree against an index
#[derive(Debug, Default)]
pub struct DiffReport {
    /// Files to write, ordered by logical path
    pub changed: Vec<ChangedFile>,
    pub unchanged: usize,
    pub failures: Vec<EntryFailure>,
    /// Case-folded keys of every file found, including failed ones
    pub seen: HashSet<String>,
}

enum Outcome {
    Unchanged,
    Changed(ChangedFile),
    Failed(EntryFailure),
}

/// Classify one file against the index
///
/// Only hashes when the size ladder cannot decide.
pub fn classify(
    file: &SourceFile,
    index: &ArchiveIndex,
    checksum: &dyn ChecksumProvider,
) -> Result<Option<ChangeKind>> {
    let Some(entry) = index.get(&file.logical_path) else {
        return Ok(Some(ChangeKind::New));
    };

    if u64::from(entry.size) != file.size {
        return Ok(Some(ChangeKind::Resized));
    }

    let current = checksum.compute_file(&file.path)?;
    if current != entry.checksum {
        Ok(Some(ChangeKind::Modified))
    } else {
        Ok(None)
    }
}

/// Walk the source tree, skipping excluded extensions and the dataset's own files
///
/// `archive_dir` is the dataset directory when it may live inside the tree.
pub fn enumerate(
    source_dir: &Path,
    archive_dir: Option<&Path>,
    config: &ArchiveConfig,
    cancel: &CancellationToken,
) -> Result<(Vec<SourceFile>, Vec<EntryFailure>)> {
    if !source_dir.is_dir() {
        return Err(ArchiveError::ArchiveFileNotFound(source_dir.to_path_buf()));
    }

    let archive_dir = archive_dir.and_then(|dir| dir.canonicalize().ok());
    let mut files = Vec::new();
    let mut failures = Vec::new();

    for entry in WalkDir::new(source_dir).follow_links(false) {
        cancel.check(0)?;

        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| source_dir.display().to_string());
                warn!("Skipping unreadable path {}: {}", path, e);
                failures.push(EntryFailure::new(path, ArchiveError::Walk(e)));
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy();
        if config.is_excluded(&name) {
            continue;
        }
        if let Some(archive_dir) = &archive_dir {
            let in_archive_dir = entry
                .path()
                .parent()
                .and_then(|parent| parent.canonicalize().ok())
                .is_some_and(|parent| &parent == archive_dir);
            if in_archive_dir && config.layout.owns_file_name(&name) {
                continue;
            }
        }

        let relative = entry
            .path()
            .strip_prefix(source_dir)
            .map_err(|_| ArchiveError::InvalidPath(entry.path().display().to_string()))?;

        match logical_source(entry.path(), relative, entry.metadata()) {
            Ok(file) => files.push(file),
            Err(e) => {
                let label = relative.display().to_string();
                warn!("Skipping {}: {}", label, e);
                failures.push(EntryFailure::new(label, e));
            }
        }
    }

    files.sort_by(|a, b| a.logical_path.cmp(&b.logical_path));

    // Case-insensitive filesystems never produce these, case-sensitive ones can
    let mut keys = HashSet::with_capacity(files.len());
    let mut unique = Vec::with_capacity(files.len());
    for file in files {
        if keys.insert(validation::fold_key(&file.logical_path)) {
            unique.push(file);
        } else {
            failures.push(EntryFailure::new(
                file.logical_path.clone(),
                ArchiveError::InvalidPath(format!(
                    "{} differs from another file only by case",
                    file.logical_path
                )),
            ));
        }
    }

    debug!("Enumerated {} files under {:?}", unique.len(), source_dir);
    Ok((unique, failures))
}

fn logical_source(
    path: &Path,
    relative: &Path,
    metadata: std::result::Result<std::fs::Metadata, walkdir::Error>,
) -> Result<SourceFile> {
    let logical_path = validation::logical_path_from_relative(relative)?;
    let size = metadata?.len();
    if size > u64::from(u32::MAX) {
        return Err(ArchiveError::EntryTooLarge {
            path: logical_path,
            size,
            max: u64::from(u32::MAX),
        });
    }

    Ok(SourceFile {
        logical_path,
        path: path.to_path_buf(),
        size,
    })
}

/// Diff a source tree against an index on a bounded worker pool
pub fn diff(
    source_dir: &Path,
    archive_dir: Option<&Path>,
    index: &ArchiveIndex,
    config: &ArchiveConfig,
    checksum: &dyn ChecksumProvider,
    cancel: &CancellationToken,
) -> Result<DiffReport> {
    let (files, mut failures) = enumerate(source_dir, archive_dir, config, cancel)?;

    let mut seen: HashSet<String> = files
        .iter()
        .map(|file| validation::fold_key(&file.logical_path))
        .collect();
    seen.extend(
        failures
            .iter()
            .map(|failure| validation::fold_key(&failure.logical_path)),
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers())
        .thread_name(|i| format!("shardpack-diff-{}", i))
        .build()?;

    let outcomes = pool.install(|| {
        files
            .into_par_iter()
            .map(|file| {
                cancel.check(0)?;
                Ok(match classify(&file, index, checksum) {
                    Ok(None) => Outcome::Unchanged,
                    Ok(Some(kind)) => Outcome::Changed(ChangedFile { source: file, kind }),
                    Err(e) => Outcome::Failed(EntryFailure::new(file.logical_path, e)),
                })
            })
            .collect::<Result<Vec<_>>>()
    })?;

    let mut report = DiffReport::default();
    for outcome in outcomes {
        match outcome {
            Outcome::Unchanged => report.unchanged += 1,
            Outcome::Changed(changed) => report.changed.push(changed),
            Outcome::Failed(failure) => {
                warn!("Cannot diff {}: {}", failure.logical_path, failure.error);
                failures.push(failure);
            }
        }
    }
    report.failures = failures;
    report.seen = seen;

    info!(
        "Diff of {:?}: {} changed, {} unchanged, {} failed",
        source_dir,
        report.changed.len(),
        report.unchanged,
        report.failures.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::Crc32;
    use crate::entry::ArchiveEntry;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// CRC-32 that counts how often it was asked to hash
    #[derive(Default)]
    struct CountingChecksum {
        calls: AtomicUsize,
    }

    impl ChecksumProvider for CountingChecksum {
        fn compute(&self, data: &[u8]) -> u32 {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Crc32.compute(data)
        }
    }

    fn source_with(files: &[(&str, &[u8])]) -> TempDir {
        let temp = TempDir::new().unwrap();
        for (path, content) in files {
            let full = temp.path().join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(full, content).unwrap();
        }
        temp
    }

    fn file(temp: &TempDir, relative: &str) -> SourceFile {
        let path = temp.path().join(relative);
        SourceFile {
            logical_path: validation::logical_path_from_relative(Path::new(relative)).unwrap(),
            size: std::fs::metadata(&path).unwrap().len(),
            path,
        }
    }

    #[test]
    fn test_cost_ladder() {
        let temp = source_with(&[("a.txt", b"0123456789")]);
        let source = file(&temp, "a.txt");
        let checksum = CountingChecksum::default();

        // Identical size and content
        let same = ArchiveIndex::from_entries(vec![ArchiveEntry::new(
            "a.txt",
            0,
            10,
            Crc32.compute(b"0123456789"),
            0,
        )])
        .unwrap();
        assert_eq!(classify(&source, &same, &checksum).unwrap(), None);
        assert_eq!(checksum.calls.load(Ordering::SeqCst), 1);

        // Same size, different content
        let modified =
            ArchiveIndex::from_entries(vec![ArchiveEntry::new("a.txt", 0, 10, 0x1234, 0)]).unwrap();
        assert_eq!(
            classify(&source, &modified, &checksum).unwrap(),
            Some(ChangeKind::Modified)
        );
        assert_eq!(checksum.calls.load(Ordering::SeqCst), 2);

        // Different size: decided without hashing
        let resized =
            ArchiveIndex::from_entries(vec![ArchiveEntry::new("a.txt", 0, 11, 0x1234, 0)]).unwrap();
        assert_eq!(
            classify(&source, &resized, &checksum).unwrap(),
            Some(ChangeKind::Resized)
        );
        assert_eq!(checksum.calls.load(Ordering::SeqCst), 2);

        // Absent: decided without hashing
        assert_eq!(
            classify(&source, &ArchiveIndex::new(), &checksum).unwrap(),
            Some(ChangeKind::New)
        );
        assert_eq!(checksum.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_enumerate_skips_excluded_and_sorts() {
        let temp = source_with(&[
            ("b/x.txt", b"x"),
            ("a/one.dds", b"1"),
            ("data0.pak", b"shard"),
            ("data.idx", b"index"),
            ("z.txt", b"z"),
        ]);

        let (files, failures) = enumerate(
            temp.path(),
            None,
            &ArchiveConfig::default(),
            &CancellationToken::new(),
        )
        .unwrap();

        let paths: Vec<_> = files.iter().map(|f| f.logical_path.as_str()).collect();
        assert_eq!(paths, vec!["a\\one.dds", "b\\x.txt", "z.txt"]);
        assert!(failures.is_empty());
    }

    #[test]
    fn test_enumerate_skips_dataset_files_in_archive_dir() {
        let temp = source_with(&[("data3.pak", b"s"), ("data.idx", b"i"), ("keep.txt", b"k")]);
        let config = ArchiveConfig {
            excluded_extensions: Vec::new(),
            ..ArchiveConfig::default()
        };

        let (files, _) = enumerate(
            temp.path(),
            Some(temp.path()),
            &config,
            &CancellationToken::new(),
        )
        .unwrap();
        let paths: Vec<_> = files.iter().map(|f| f.logical_path.as_str()).collect();
        assert_eq!(paths, vec!["keep.txt"]);
    }

    #[test]
    fn test_diff_classifies_tree() {
        let temp = source_with(&[
            ("dir/same.bin", b"same"),
            ("dir/grown.bin", b"grown!"),
            ("new.bin", b"new"),
        ]);
        let index = ArchiveIndex::from_entries(vec![
            ArchiveEntry::new("dir\\same.bin", 1, 4, Crc32.compute(b"same"), 0),
            ArchiveEntry::new("DIR\\GROWN.BIN", 2, 3, 0, 0),
            ArchiveEntry::new("gone.bin", 3, 3, 0, 0),
        ])
        .unwrap();
        let config = ArchiveConfig {
            parallelism: Some(2),
            ..ArchiveConfig::default()
        };

        let report = diff(
            temp.path(),
            None,
            &index,
            &config,
            &Crc32,
            &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(report.unchanged, 1);
        let changed: Vec<_> = report
            .changed
            .iter()
            .map(|c| (c.source.logical_path.as_str(), c.kind))
            .collect();
        assert_eq!(
            changed,
            vec![
                ("dir\\grown.bin", ChangeKind::Resized),
                ("new.bin", ChangeKind::New)
            ]
        );
        assert!(report.seen.contains("dir\\same.bin"));
        assert!(!report.seen.contains("gone.bin"));
    }

    #[test]
    fn test_diff_cancelled() {
        let temp = source_with(&[("a.bin", b"a")]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = diff(
            temp.path(),
            None,
            &ArchiveIndex::new(),
            &ArchiveConfig::default(),
            &Crc32,
            &cancel,
        )
        .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_missing_source_dir() {
        let temp = TempDir::new().unwrap();
        let err = diff(
            &temp.path().join("nope"),
            None,
            &ArchiveIndex::new(),
            &ArchiveConfig::default(),
            &Crc32,
            &CancellationToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ArchiveError::ArchiveFileNotFound(_)));
    }
}
