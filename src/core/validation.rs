//! Logical path handling
//!
//! Logical paths are the archive's file identities: relative, backslash
//! separated, compared case-insensitively. This module converts between
//! filesystem paths and logical paths and guards against paths escaping
//! an output root.

use crate::error::{ArchiveError, Result};
use std::path::{Component, Path, PathBuf};

/// Separator used inside logical paths
pub const SEPARATOR: char = '\\';

/// Build a logical path from a path relative to the source root
///
/// # Errors
///
/// Returns `InvalidPath` for empty paths, non-UTF-8 names, absolute paths,
/// parent-directory components, or paths too long for the index format.
///
/// # Examples
///
/// ```
/// use shardpack::core::validation::logical_path_from_relative;
/// use std::path::Path;
///
/// let logical = logical_path_from_relative(Path::new("textures/ui/icon.dds")).unwrap();
/// assert_eq!(logical, "textures\\ui\\icon.dds");
/// ```
pub fn logical_path_from_relative(relative: &Path) -> Result<String> {
    let mut parts = Vec::new();

    for component in relative.components() {
        match component {
            Component::Normal(name) => {
                let name = name.to_str().ok_or_else(|| {
                    ArchiveError::InvalidPath(format!(
                        "{} is not valid UTF-8",
                        relative.display()
                    ))
                })?;
                parts.push(name);
            }
            Component::CurDir => {}
            _ => {
                return Err(ArchiveError::InvalidPath(format!(
                    "{} must be relative and stay inside the source tree",
                    relative.display()
                )))
            }
        }
    }

    let logical = parts.join("\\");
    validate_logical_path(&logical)?;
    Ok(logical)
}

/// Check a logical path can be stored in the index
pub fn validate_logical_path(logical_path: &str) -> Result<()> {
    if logical_path.is_empty() {
        return Err(ArchiveError::InvalidPath("path cannot be empty".to_string()));
    }

    let units = logical_path.encode_utf16().count();
    if units > u16::MAX as usize {
        return Err(ArchiveError::InvalidPath(format!(
            "path is {} UTF-16 units long (max {})",
            units,
            u16::MAX
        )));
    }

    Ok(())
}

/// Case-insensitive identity key for a logical path
pub fn fold_key(logical_path: &str) -> String {
    logical_path.replace('/', "\\").to_lowercase()
}

/// Map a logical path onto an output tree
///
/// Refuses any component that would leave `root`.
pub fn destination_for(root: &Path, logical_path: &str) -> Result<PathBuf> {
    let mut destination = root.to_path_buf();

    for part in logical_path.split(['\\', '/']) {
        match part {
            "" | "." => continue,
            ".." => {
                return Err(ArchiveError::InvalidPath(format!(
                    "{} escapes the output directory",
                    logical_path
                )))
            }
            part if Path::new(part).components().count() != 1
                || Path::new(part).has_root() =>
            {
                return Err(ArchiveError::InvalidPath(format!(
                    "{} has an unsupported component '{}'",
                    logical_path, part
                )))
            }
            part => destination.push(part),
        }
    }

    if destination == root {
        return Err(ArchiveError::InvalidPath(format!(
            "{} does not name a file",
            logical_path
        )));
    }

    Ok(destination)
}

/// Last component of a logical path
pub fn file_name(logical_path: &str) -> &str {
    logical_path
        .rsplit(SEPARATOR)
        .next()
        .unwrap_or(logical_path)
}

/// Parent of a logical path, empty for root-level entries
pub fn parent(logical_path: &str) -> &str {
    match logical_path.rfind(SEPARATOR) {
        Some(idx) => &logical_path[..idx],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_to_logical() {
        let logical = logical_path_from_relative(Path::new("dir/sub/x.bin")).unwrap();
        assert_eq!(logical, "dir\\sub\\x.bin");

        let logical = logical_path_from_relative(Path::new("./top.txt")).unwrap();
        assert_eq!(logical, "top.txt");
    }

    #[test]
    fn test_rejects_escaping_paths() {
        assert!(matches!(
            logical_path_from_relative(Path::new("../x.bin")),
            Err(ArchiveError::InvalidPath(_))
        ));
        assert!(matches!(
            logical_path_from_relative(Path::new("")),
            Err(ArchiveError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_fold_key() {
        assert_eq!(fold_key("Dir\\X.BIN"), "dir\\x.bin");
        assert_eq!(fold_key("dir/x.bin"), "dir\\x.bin");
        assert_eq!(fold_key("ÄRGER.txt"), "ärger.txt");
    }

    #[test]
    fn test_destination_for() {
        let root = Path::new("/out");
        let dest = destination_for(root, "dir\\x.bin").unwrap();
        assert_eq!(dest, Path::new("/out").join("dir").join("x.bin"));

        assert!(destination_for(root, "..\\evil.txt").is_err());
        assert!(destination_for(root, "dir\\..\\..\\evil.txt").is_err());
        assert!(destination_for(root, "\\").is_err());
    }

    #[test]
    fn test_name_and_parent() {
        assert_eq!(file_name("a\\b\\c.txt"), "c.txt");
        assert_eq!(parent("a\\b\\c.txt"), "a\\b");
        assert_eq!(file_name("c.txt"), "c.txt");
        assert_eq!(parent("c.txt"), "");
    }

    #[test]
    fn test_overlong_path_rejected() {
        let long = "a".repeat(u16::MAX as usize + 1);
        assert!(validate_logical_path(&long).is_err());
    }
}
