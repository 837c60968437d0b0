use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use glob::Pattern;
use thiserror::Error;
use tracing::{debug, info};

use crate::storage::SiteOutputLayout;

#[derive(Debug, Error)]
pub enum PackagingError {
    #[error("tracked artifact is missing at staging time: {path}")]
    MissingArtifact { path: PathBuf },
    #[error("tracked artifact '{path}' is outside the run directory '{root}'")]
    OutsideRunDir { path: PathBuf, root: PathBuf },
    #[error("invalid packaging exclude pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
    #[error("packaging failed to {action} '{path}': {source}")]
    Filesystem {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl PackagingError {
    fn filesystem(action: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Filesystem {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagingOutcome {
    pub archive_path: PathBuf,
    /// Archive-relative paths, in artifact order.
    pub staged: Vec<PathBuf>,
    pub excluded: Vec<PathBuf>,
}

pub fn compile_exclude_patterns(patterns: &[String]) -> Result<Vec<Pattern>, PackagingError> {
    patterns
        .iter()
        .map(|raw| {
            Pattern::new(raw.as_str()).map_err(|source| PackagingError::Pattern {
                pattern: raw.clone(),
                source,
            })
        })
        .collect()
}

/// Mirrors every tracked artifact under `<tar_dir>/inputdata`, writes
/// `inputdata_version<v>_<site>.tar` from it and removes the staging tree.
/// Every artifact is checked before anything is copied.
pub fn package_artifacts(
    artifacts: &[PathBuf],
    run_dir: &Path,
    layout: &SiteOutputLayout,
    version: &str,
    site_code: &str,
    exclude: &[Pattern],
) -> Result<PackagingOutcome, PackagingError> {
    let mut relative = Vec::with_capacity(artifacts.len());
    for path in artifacts {
        if !path.is_file() {
            return Err(PackagingError::MissingArtifact { path: path.clone() });
        }
        let rel = path
            .strip_prefix(run_dir)
            .map_err(|_| PackagingError::OutsideRunDir {
                path: path.clone(),
                root: run_dir.to_path_buf(),
            })?;
        relative.push((path.as_path(), rel.to_path_buf()));
    }

    let staging = layout.staging_dir();
    fs::create_dir_all(staging.as_path())
        .map_err(|e| PackagingError::filesystem("create staging directory", staging.as_path(), e))?;

    let mut staged = Vec::new();
    let mut excluded = Vec::new();
    for (source, rel) in relative {
        if exclude.iter().any(|pattern| pattern.matches_path(rel.as_path())) {
            debug!(artifact = %rel.display(), "excluded from archive");
            excluded.push(rel);
            continue;
        }
        let target = staging.join(rel.as_path());
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| PackagingError::filesystem("create directory", parent, e))?;
        }
        fs::copy(source, target.as_path())
            .map_err(|e| PackagingError::filesystem("copy artifact", source, e))?;
        staged.push(rel);
    }

    let archive_path = layout.archive_path(version, site_code);
    write_archive(archive_path.as_path(), staging.as_path())?;
    fs::remove_dir_all(staging.as_path())
        .map_err(|e| PackagingError::filesystem("remove staging directory", staging.as_path(), e))?;

    info!(
        archive = %archive_path.display(),
        staged = staged.len(),
        excluded = excluded.len(),
        "packaged forcing data"
    );
    Ok(PackagingOutcome {
        archive_path,
        staged,
        excluded,
    })
}

fn write_archive(archive_path: &Path, staging: &Path) -> Result<(), PackagingError> {
    let file = File::create(archive_path)
        .map_err(|e| PackagingError::filesystem("create archive", archive_path, e))?;
    let mut builder = tar::Builder::new(file);
    builder
        .append_dir_all("inputdata", staging)
        .map_err(|e| PackagingError::filesystem("append to archive", staging, e))?;
    builder
        .into_inner()
        .map_err(|e| PackagingError::filesystem("finish archive", archive_path, e))?;
    Ok(())
}
