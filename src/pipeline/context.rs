use std::path::{Path, PathBuf};

use crate::pipeline::runtime::PipelineError;

/// Paths produced by earlier sub-steps that later ones read. Owned and
/// mutated only by the pipeline controller.
///
/// `mapping_file` is the ocean-masked site map `gen_domain` reads;
/// `mapping_dir` holds the global-to-site maps `mksurfdata` reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageContext {
    grid_file: Option<PathBuf>,
    mapping_file: Option<PathBuf>,
    mapping_dir: Option<PathBuf>,
    domain_file: Option<PathBuf>,
}

impl StageContext {
    pub fn grid_file(&self) -> Option<&Path> {
        self.grid_file.as_deref()
    }

    pub fn mapping_file(&self) -> Option<&Path> {
        self.mapping_file.as_deref()
    }

    pub fn mapping_dir(&self) -> Option<&Path> {
        self.mapping_dir.as_deref()
    }

    pub fn domain_file(&self) -> Option<&Path> {
        self.domain_file.as_deref()
    }

    pub(crate) fn set_grid_file(&mut self, path: PathBuf) {
        self.grid_file = Some(path);
    }

    pub(crate) fn set_mapping_file(&mut self, path: PathBuf) {
        self.mapping_file = Some(path);
    }

    pub(crate) fn set_mapping_dir(&mut self, path: PathBuf) {
        self.mapping_dir = Some(path);
    }

    pub(crate) fn set_domain_file(&mut self, path: PathBuf) {
        self.domain_file = Some(path);
    }

    pub fn require_grid_file(&self, consumer: &'static str) -> Result<&Path, PipelineError> {
        require(self.grid_file.as_deref(), consumer, "grid file")
    }

    pub fn require_mapping_file(&self, consumer: &'static str) -> Result<&Path, PipelineError> {
        require(self.mapping_file.as_deref(), consumer, "mapping file")
    }

    pub fn require_mapping_dir(&self, consumer: &'static str) -> Result<&Path, PipelineError> {
        require(self.mapping_dir.as_deref(), consumer, "mapping directory")
    }

    pub fn require_domain_file(&self, consumer: &'static str) -> Result<&Path, PipelineError> {
        require(self.domain_file.as_deref(), consumer, "domain file")
    }
}

fn require<'a>(
    path: Option<&'a Path>,
    consumer: &'static str,
    input: &'static str,
) -> Result<&'a Path, PipelineError> {
    path.ok_or(PipelineError::MissingStageInput { consumer, input })
}
