//! Per-operation scratch directories

use crate::error::{Result, SyncError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Scratch tree owned by one push or pull.
///
/// The root is `{base}/{operation id}` and is only created when the first
/// directory is requested. `dispose` removes the whole tree; dropping an
/// undisposed area removes it too, logging instead of failing.
#[derive(Debug)]
pub struct StagingArea {
    root: PathBuf,
    created: bool,
    disposed: bool,
}

impl StagingArea {
    pub fn new(base: impl AsRef<Path>, operation_id: &str) -> Self {
        Self {
            root: base.as_ref().join(sanitize(operation_id)),
            created: false,
            disposed: false,
        }
    }

    /// Staging area named after a fresh random operation id
    pub fn for_operation(base: impl AsRef<Path>) -> Self {
        Self::new(base, &uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates (or reuses) `{root}/{sanitized suffix}`.
    pub fn temp_dir(&mut self, suffix: &str) -> Result<PathBuf> {
        self.ensure_root()?;
        let dir = self.root.join(sanitize(suffix));
        fs::create_dir_all(&dir).map_err(|e| SyncError::local_io(dir.display(), e))?;
        Ok(dir)
    }

    fn ensure_root(&mut self) -> Result<()> {
        if !self.created {
            fs::create_dir_all(&self.root).map_err(|e| SyncError::local_io(self.root.display(), e))?;
            debug!(root = %self.root.display(), "staging area created");
            self.created = true;
        }
        Ok(())
    }

    /// Recursively removes the staging root.
    pub fn dispose(mut self) -> Result<()> {
        self.disposed = true;
        remove_tree(&self.root)
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        if !self.disposed && self.created {
            if let Err(e) = remove_tree(&self.root) {
                warn!(root = %self.root.display(), error = %e, "failed to clean up staging area");
            }
        }
    }
}

fn remove_tree(root: &Path) -> Result<()> {
    match fs::remove_dir_all(root) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SyncError::local_io(root.display(), e)),
    }
}

/// Replaces characters that are unsafe in a single path component.
pub fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".repeat(cleaned.len().max(1)),
        _ => cleaned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_image_references() {
        assert_eq!(sanitize("myrepo/app:1.0"), "myrepo_app_1.0");
        assert_eq!(sanitize(".."), "__");
        assert_eq!(sanitize(""), "_");
    }

    #[test]
    fn root_is_created_lazily_and_disposed() {
        let base = tempfile::tempdir().unwrap();
        let mut area = StagingArea::new(base.path(), "op-1");
        assert!(!area.root().exists());

        let dir = area.temp_dir("push_app:1").unwrap();
        assert_eq!(dir, base.path().join("op-1").join("push_app_1"));
        assert!(dir.is_dir());

        let root = area.root().to_path_buf();
        area.dispose().unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn drop_cleans_up_undisposed_area() {
        let base = tempfile::tempdir().unwrap();
        let root = {
            let mut area = StagingArea::for_operation(base.path());
            area.temp_dir("pull").unwrap();
            area.root().to_path_buf()
        };
        assert!(!root.exists());
    }
}
