//! Output directories for one site run and the policy for directories that already exist.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("output directory already exists: {path}")]
    DirectoryConflict { path: PathBuf },
    #[error("run aborted: output directory '{path}' already exists")]
    Aborted { path: PathBuf },
    #[error("failed to {action} '{path}': {source}")]
    Filesystem {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    pub(crate) fn filesystem(action: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Filesystem {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    Abort,
    Overwrite,
}

/// Decides what happens to an output directory left over from an earlier run.
pub trait ConflictResolver {
    fn resolve(&self, path: &Path) -> Result<ConflictResolution, StorageError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    Abort,
    Overwrite,
    FailFast,
}

impl ConflictPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "abort" => Some(Self::Abort),
            "overwrite" => Some(Self::Overwrite),
            "fail" | "fail-fast" => Some(Self::FailFast),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Abort => "abort",
            Self::Overwrite => "overwrite",
            Self::FailFast => "fail",
        }
    }
}

impl ConflictResolver for ConflictPolicy {
    fn resolve(&self, path: &Path) -> Result<ConflictResolution, StorageError> {
        match self {
            Self::Abort => Ok(ConflictResolution::Abort),
            Self::Overwrite => Ok(ConflictResolution::Overwrite),
            Self::FailFast => Err(StorageError::DirectoryConflict {
                path: path.to_path_buf(),
            }),
        }
    }
}

/// Directory layout of one `(site_code, version)` run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteOutputLayout {
    pub run_dir: PathBuf,
    pub tar_dir: PathBuf,
}

impl SiteOutputLayout {
    pub fn new(local_output: &Path, tar_output_dir: &Path, run_dir_name: &str) -> Self {
        Self {
            run_dir: local_output.join(run_dir_name),
            tar_dir: tar_output_dir.join(run_dir_name),
        }
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.tar_dir.join("inputdata")
    }

    pub fn archive_path(&self, version: &str, site_code: &str) -> PathBuf {
        self.tar_dir
            .join(format!("inputdata_version{version}_{site_code}.tar"))
    }

    pub fn summary_path(&self) -> PathBuf {
        self.tar_dir.join("forcing_summary.json")
    }
}

/// Creates `path` and any missing parents. Returns `Ok(true)` when the
/// directory was created; an existing path is a conflict, never reused.
pub fn ensure_output_dir(path: &Path) -> Result<bool, StorageError> {
    if path.exists() {
        return Err(StorageError::DirectoryConflict {
            path: path.to_path_buf(),
        });
    }
    fs::create_dir_all(path).map_err(|e| StorageError::filesystem("create directory", path, e))?;
    info!(path = %path.display(), "created output directory");
    Ok(true)
}

/// Settles every conflict before touching the filesystem, so an abort leaves
/// all of `paths` exactly as they were.
pub fn prepare_output_dirs(
    paths: &[&Path],
    resolver: &dyn ConflictResolver,
) -> Result<(), StorageError> {
    let mut unique: Vec<&Path> = Vec::with_capacity(paths.len());
    for path in paths {
        if !unique.contains(path) {
            unique.push(*path);
        }
    }

    let mut overwrite = Vec::new();
    for path in unique.iter() {
        if !path.exists() {
            continue;
        }
        match resolver.resolve(path)? {
            ConflictResolution::Abort => {
                return Err(StorageError::Aborted {
                    path: path.to_path_buf(),
                });
            }
            ConflictResolution::Overwrite => overwrite.push(*path),
        }
    }

    for path in overwrite {
        warn!(path = %path.display(), "removing existing output directory");
        remove_existing(path)?;
    }
    for path in unique {
        ensure_output_dir(path)?;
    }
    Ok(())
}

/// Idempotent creation of a sub-step directory inside a freshly prepared run.
pub fn ensure_stage_dir(path: &Path) -> Result<(), StorageError> {
    if path.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(path).map_err(|e| StorageError::filesystem("create directory", path, e))
}

fn remove_existing(path: &Path) -> Result<(), StorageError> {
    let meta =
        fs::symlink_metadata(path).map_err(|e| StorageError::filesystem("inspect", path, e))?;
    if meta.is_dir() {
        fs::remove_dir_all(path).map_err(|e| StorageError::filesystem("remove directory", path, e))
    } else {
        fs::remove_file(path).map_err(|e| StorageError::filesystem("remove file", path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_root() -> PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time should be monotonic")
            .as_nanos();
        std::env::temp_dir().join(format!("site_forcing_storage_{stamp}"))
    }

    struct RecordingResolver {
        answer: ConflictResolution,
        seen: RefCell<Vec<PathBuf>>,
    }

    impl ConflictResolver for RecordingResolver {
        fn resolve(&self, path: &Path) -> Result<ConflictResolution, StorageError> {
            self.seen.borrow_mut().push(path.to_path_buf());
            Ok(self.answer)
        }
    }

    #[test]
    fn ensure_twice_creates_then_reports_conflict() {
        let root = temp_root();
        let target = root.join("a").join("b");

        assert!(ensure_output_dir(target.as_path()).expect("first call creates"));
        assert!(target.is_dir());
        let err = ensure_output_dir(target.as_path()).expect_err("second call conflicts");
        assert!(matches!(err, StorageError::DirectoryConflict { .. }));

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn create_under_regular_file_is_filesystem_error() {
        let root = temp_root();
        fs::create_dir_all(root.as_path()).expect("root");
        let blocker = root.join("not_a_dir");
        fs::write(blocker.as_path(), "x").expect("blocker file");
        let target = blocker.join("ALP1_v1");

        let err = ensure_output_dir(target.as_path()).expect_err("parent is a file");
        match err {
            StorageError::Filesystem { action, path, .. } => {
                assert_eq!(action, "create directory");
                assert_eq!(path, target);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(blocker.is_file());

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn abort_leaves_every_directory_untouched() {
        let root = temp_root();
        let existing = root.join("ALP1_v1");
        let fresh = root.join("tar").join("ALP1_v1");
        fs::create_dir_all(existing.as_path()).expect("existing dir");
        fs::write(existing.join("keep.nc"), "x").expect("marker file");

        let resolver = RecordingResolver {
            answer: ConflictResolution::Abort,
            seen: RefCell::new(Vec::new()),
        };
        let err = prepare_output_dirs(&[fresh.as_path(), existing.as_path()], &resolver)
            .expect_err("abort should fail");

        assert!(matches!(err, StorageError::Aborted { .. }));
        assert_eq!(resolver.seen.borrow().as_slice(), &[existing.clone()]);
        assert!(existing.join("keep.nc").is_file());
        assert!(!fresh.exists());

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn overwrite_recreates_directory_empty() {
        let root = temp_root();
        let existing = root.join("ALP1_v1");
        fs::create_dir_all(existing.join("share")).expect("existing dir");

        prepare_output_dirs(&[existing.as_path()], &ConflictPolicy::Overwrite)
            .expect("overwrite should succeed");

        assert!(existing.is_dir());
        assert_eq!(
            fs::read_dir(existing.as_path()).expect("read dir").count(),
            0
        );

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn fail_fast_policy_surfaces_conflict() {
        let root = temp_root();
        fs::create_dir_all(root.as_path()).expect("root");
        let err = prepare_output_dirs(&[root.as_path()], &ConflictPolicy::FailFast)
            .expect_err("conflict should surface");
        assert!(matches!(err, StorageError::DirectoryConflict { .. }));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn layout_matches_site_version_naming() {
        let layout = SiteOutputLayout::new(Path::new("/out"), Path::new("/tar"), "ALP1_v1");
        assert_eq!(layout.run_dir, PathBuf::from("/out/ALP1_v1"));
        assert_eq!(layout.staging_dir(), PathBuf::from("/tar/ALP1_v1/inputdata"));
        assert_eq!(
            layout.archive_path("v1", "ALP1"),
            PathBuf::from("/tar/ALP1_v1/inputdata_versionv1_ALP1.tar")
        );
    }

    #[test]
    fn conflict_policy_parses_cli_spellings() {
        assert_eq!(ConflictPolicy::parse("Abort"), Some(ConflictPolicy::Abort));
        assert_eq!(ConflictPolicy::parse("fail"), Some(ConflictPolicy::FailFast));
        assert_eq!(ConflictPolicy::parse("prompt"), None);
    }
}
