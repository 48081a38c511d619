//! File system utilities

use anyhow::{anyhow, Result};
use std::fs;
use std::path::Path;

/// Ensure directory exists
pub fn ensure_dir_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .map_err(|e| anyhow!("Failed to create directory {}: {}", path.display(), e))?;
    }
    Ok(())
}

/// Ensure the directory exists and accepts new files, proving it with a
/// throwaway marker file. An unwritable destination fails here, once,
/// instead of once per task.
pub fn ensure_dir_writable(path: &Path) -> Result<()> {
    ensure_dir_exists(path)?;
    let marker = path.join(format!(".write-check-{}", uuid::Uuid::new_v4()));
    fs::write(&marker, b"")
        .map_err(|e| anyhow!("directory {} is not writable: {}", path.display(), e))?;
    let _ = fs::remove_file(&marker);
    Ok(())
}

/// Sanitize a name for use as a file or directory name. Playlist titles
/// come straight from remote metadata and may contain anything.
pub fn sanitize_filename(filename: &str) -> String {
    let mapped: String = filename
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '|' | '?' | '*' => '_',
            '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = mapped.trim().trim_end_matches('.').trim();
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_reserved_characters() {
        assert_eq!(
            sanitize_filename("My Mix: Best of 2024?"),
            "My Mix_ Best of 2024_"
        );
        assert_eq!(sanitize_filename("a/b\\c"), "a_b_c");
    }

    #[test]
    fn sanitize_trims_trailing_dots_and_spaces() {
        assert_eq!(sanitize_filename("  trailing dots... "), "trailing dots");
    }

    #[test]
    fn sanitize_never_returns_empty() {
        assert_eq!(sanitize_filename(""), "untitled");
        assert_eq!(sanitize_filename("   "), "untitled");
    }

    #[test]
    fn ensure_dir_exists_creates_nested() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a").join("b");
        ensure_dir_exists(&nested).unwrap();
        assert!(nested.is_dir());
        // second call is a no-op
        ensure_dir_exists(&nested).unwrap();
    }

    #[test]
    fn writable_check_leaves_no_marker_behind() {
        let tmp = tempfile::tempdir().unwrap();
        ensure_dir_writable(tmp.path()).unwrap();
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }
}
