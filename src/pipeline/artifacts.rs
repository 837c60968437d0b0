use std::path::{Path, PathBuf};

use serde::Serialize;

/// Output files of one run, in the order they were discovered. Duplicates are
/// kept; packaging copies in this order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ArtifactTracker {
    paths: Vec<PathBuf>,
}

impl ArtifactTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, path: impl Into<PathBuf>) {
        self.paths.push(path.into());
    }

    /// Adds `path` only if it is a regular file. Returns whether it was added.
    pub fn add_verified(&mut self, path: &Path) -> bool {
        if !path.is_file() {
            return false;
        }
        self.add(path);
        true
    }

    pub fn all(&self) -> &[PathBuf] {
        self.paths.as_slice()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn keeps_insertion_order_and_duplicates() {
        let mut tracker = ArtifactTracker::new();
        tracker.add("/out/b.nc");
        tracker.add("/out/a.nc");
        tracker.add("/out/b.nc");
        assert_eq!(
            tracker.all(),
            &[
                PathBuf::from("/out/b.nc"),
                PathBuf::from("/out/a.nc"),
                PathBuf::from("/out/b.nc")
            ]
        );
        assert_eq!(tracker.len(), 3);
    }

    #[test]
    fn verified_add_skips_missing_files() {
        let mut tracker = ArtifactTracker::new();
        assert!(!tracker.add_verified(Path::new("/definitely/not/here.nc")));
        assert!(tracker.is_empty());
    }
}
