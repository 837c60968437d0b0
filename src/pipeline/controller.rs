use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use glob::Pattern;
use tracing::{error, info};

use crate::machine::{MachineProfile, ToolCategory};
use crate::pipeline::artifacts::ArtifactTracker;
use crate::pipeline::context::StageContext;
use crate::pipeline::invoker::ExternalToolInvoker;
use crate::pipeline::naming::{discover_matching, site_extract_file_name, RunStamp};
use crate::pipeline::ncl::NclInvocation;
use crate::pipeline::packaging::{compile_exclude_patterns, package_artifacts};
use crate::pipeline::runlog::{write_pretty_json_with_newline, ForcingRunSummary};
use crate::pipeline::runtime::{CommandSpec, PipelineError, SharedToolCommandRunner};
use crate::pipeline::settings_layer::ForcingSettings;
use crate::pipeline::{ForcingStage, StagePlan, SubStep};
use crate::recipe::{ComponentSource, ExtractionSource, Recipe, RecipeError, SurfaceSource};
use crate::storage::{ensure_stage_dir, prepare_output_dirs, ConflictResolver, SiteOutputLayout};

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    pub ncl_script_dir: PathBuf,
    pub dx: f64,
    pub dy: f64,
    pub exclude_patterns: Vec<String>,
    pub run_stamp: RunStamp,
}

impl PipelineOptions {
    pub fn from_settings(settings: &ForcingSettings, run_stamp: RunStamp) -> Self {
        Self {
            ncl_script_dir: settings.ncl_script_dir.clone(),
            dx: settings.dx,
            dy: settings.dy,
            exclude_patterns: settings.exclude.clone(),
            run_stamp,
        }
    }
}

/// Runs every stage of one recipe, in order, and packages what they produce.
///
/// Construction validates the machine profile against the plan and prepares
/// the output directories. Nothing else touches the filesystem until
/// [`SiteForcingPipeline::run`].
pub struct SiteForcingPipeline {
    pub(super) recipe: Recipe,
    pub(super) machine: Arc<MachineProfile>,
    pub(super) options: PipelineOptions,
    pub(super) layout: SiteOutputLayout,
    pub(super) context: StageContext,
    invoker: ExternalToolInvoker,
    exclude: Vec<Pattern>,
    plan: StagePlan,
    artifacts: ArtifactTracker,
    executed: Vec<SubStep>,
    invocations: usize,
}

impl SiteForcingPipeline {
    pub fn new(
        recipe: Recipe,
        machine: Arc<MachineProfile>,
        runner: SharedToolCommandRunner,
        resolver: &dyn ConflictResolver,
        options: PipelineOptions,
    ) -> Result<Self, PipelineError> {
        let plan = StagePlan::for_recipe(&recipe);
        for category in required_tool_categories(&recipe, &plan) {
            machine.module_for(category)?;
        }
        let supplied_map_dir = supplied_mapping_dir(&recipe, &plan)?;
        let exclude = compile_exclude_patterns(options.exclude_patterns.as_slice())?;

        let layout = SiteOutputLayout::new(
            recipe.output.local_output.as_path(),
            recipe.output.tar_output_dir.as_path(),
            recipe.run_dir_name().as_str(),
        );
        prepare_output_dirs(&[layout.run_dir.as_path(), layout.tar_dir.as_path()], resolver)?;

        let mut context = StageContext::default();
        let share = &recipe.nc_input_paths.share;
        if let ComponentSource::Existing(path) = share.grid.source("SCRIP")? {
            info!(path = %path.display(), "using pre-existing SCRIP grid");
            context.set_grid_file(path);
        }
        if let ComponentSource::Existing(path) = share.mapping.source("mapping")? {
            info!(path = %path.display(), "using pre-existing mapping file");
            context.set_mapping_file(path);
        }
        if let Some(dir) = supplied_map_dir {
            context.set_mapping_dir(dir);
        }
        if let ComponentSource::Existing(path) = share.domain.source("domain")? {
            info!(path = %path.display(), "using pre-existing domain file");
            context.set_domain_file(path);
        }

        Ok(Self {
            recipe,
            machine,
            options,
            layout,
            context,
            invoker: ExternalToolInvoker::new(runner),
            exclude,
            plan,
            artifacts: ArtifactTracker::new(),
            executed: Vec::new(),
            invocations: 0,
        })
    }

    pub fn plan(&self) -> &StagePlan {
        &self.plan
    }

    pub fn layout(&self) -> &SiteOutputLayout {
        &self.layout
    }

    pub fn context(&self) -> &StageContext {
        &self.context
    }

    pub fn artifacts(&self) -> &ArtifactTracker {
        &self.artifacts
    }

    pub fn executed_steps(&self) -> &[SubStep] {
        self.executed.as_slice()
    }

    pub fn tool_invocations(&self) -> usize {
        self.invocations
    }

    /// Executes the stages in production order, packages the artifacts and
    /// writes the run summary. The first failure ends the run.
    pub fn run(&mut self) -> Result<ForcingRunSummary, PipelineError> {
        info!(
            site = %self.recipe.site_code,
            version = %self.recipe.version,
            machine = %self.machine.name(),
            steps = self.plan.steps.len(),
            "starting site forcing run"
        );
        for stage in ForcingStage::PRODUCTION_ORDER {
            if let Err(err) = self.run_stage(stage) {
                error!(stage = stage.as_str(), error = %err, "aborting run");
                return Err(err);
            }
        }

        let outcome = package_artifacts(
            self.artifacts.all(),
            self.layout.run_dir.as_path(),
            &self.layout,
            self.recipe.version.as_str(),
            self.recipe.site_code.as_str(),
            self.exclude.as_slice(),
        )?;

        let summary = ForcingRunSummary {
            site_code: self.recipe.site_code.clone(),
            site_name: self.recipe.site_name.clone(),
            version: self.recipe.version.clone(),
            machine: self.machine.name().to_string(),
            run_date: self.options.run_stamp.iso(),
            executed_steps: self
                .executed
                .iter()
                .map(|step| step.as_str().to_string())
                .collect(),
            tool_invocations: self.invocations,
            artifacts: self.artifacts.all().to_vec(),
            excluded: outcome.excluded,
            archive_path: outcome.archive_path,
        };
        write_pretty_json_with_newline(self.layout.summary_path().as_path(), &summary)?;
        info!(
            site = %summary.site_code,
            archive = %summary.archive_path.display(),
            artifacts = summary.artifacts.len(),
            "site forcing run complete"
        );
        Ok(summary)
    }

    fn run_stage(&mut self, stage: ForcingStage) -> Result<(), PipelineError> {
        let steps: Vec<SubStep> = self.plan.steps_for(stage).collect();
        if steps.is_empty() {
            info!(stage = stage.as_str(), "nothing to do");
            return Ok(());
        }
        if stage != ForcingStage::Share {
            self.context.require_domain_file(stage.as_str())?;
        }
        info!(stage = stage.as_str(), steps = steps.len(), "starting stage");
        for step in steps {
            info!(step = step.as_str(), "running sub-step");
            self.run_step(step)?;
            self.executed.push(step);
        }
        Ok(())
    }

    fn run_step(&mut self, step: SubStep) -> Result<(), PipelineError> {
        match step {
            SubStep::Grid => self.create_grid(),
            SubStep::Mapping => self.create_mapping(),
            SubStep::Domain => self.create_domain(),
            SubStep::Surface => self.create_surface(),
            SubStep::Urban => self.create_urban(),
            SubStep::Fire => self.create_fire(),
            SubStep::Snicar => self.copy_snicar(),
            SubStep::RiverTracing => self.copy_river_tracing(),
            SubStep::ParameterFiles => self.copy_parameter_files(),
            SubStep::Climate => self.create_climate(),
            SubStep::Topography => self.create_topography(),
            SubStep::Lightning => self.create_lightning(),
            SubStep::AerosolDeposition => self.create_aerosol_deposition(),
        }
    }

    pub(super) fn site_code(&self) -> &str {
        self.recipe.site_code.as_str()
    }

    /// Command for a tool that runs inside the machine's module environment.
    pub(super) fn tool_spec(
        &self,
        program: &Path,
        cwd: &Path,
        category: ToolCategory,
    ) -> Result<CommandSpec, PipelineError> {
        let module = self.machine.module_for(category)?;
        Ok(CommandSpec::new(program.display().to_string(), cwd)
            .module(module)
            .envs(self.machine.environment()))
    }

    pub(super) fn invoke(&mut self, spec: &CommandSpec) -> Result<String, PipelineError> {
        self.invocations += 1;
        Ok(self.invoker.run(spec)?)
    }

    /// `<run_dir>/<relative>`, created on demand.
    pub(super) fn stage_dir(&self, relative: &str) -> Result<PathBuf, PipelineError> {
        let dir = self.layout.run_dir.join(relative);
        ensure_stage_dir(dir.as_path())?;
        Ok(dir)
    }

    pub(super) fn track_expected(
        &mut self,
        step: SubStep,
        path: &Path,
    ) -> Result<(), PipelineError> {
        if !self.artifacts.add_verified(path) {
            return Err(PipelineError::MissingOutput {
                step: step.as_str(),
                path: path.to_path_buf(),
            });
        }
        Ok(())
    }

    pub(super) fn track_matching(
        &mut self,
        step: SubStep,
        dir: &Path,
        pattern: &str,
    ) -> Result<Vec<PathBuf>, PipelineError> {
        let found = discover_matching(dir, pattern)?;
        if found.is_empty() {
            return Err(PipelineError::NoOutputs {
                step: step.as_str(),
                pattern: pattern.to_string(),
            });
        }
        for path in &found {
            self.artifacts.add(path.as_path());
        }
        Ok(found)
    }

    /// Copies a finished input file into `dir` under its own name and tracks it.
    pub(super) fn copy_into(
        &mut self,
        step: SubStep,
        source: &Path,
        dir: &Path,
    ) -> Result<PathBuf, PipelineError> {
        let file_name = source.file_name().ok_or_else(|| PipelineError::Filesystem {
            step: step.as_str(),
            action: "copy",
            path: source.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"),
        })?;
        let target = dir.join(file_name);
        fs::copy(source, target.as_path()).map_err(|source_err| PipelineError::Filesystem {
            step: step.as_str(),
            action: "copy",
            path: source.to_path_buf(),
            source: source_err,
        })?;
        info!(step = step.as_str(), from = %source.display(), to = %target.display(), "copied input file");
        self.track_expected(step, target.as_path())?;
        Ok(target)
    }

    /// The uniform extraction sub-step: one NCL script cuts a raw dataset down
    /// to the site's domain and writes `<stem>_<site>.nc` into `out_dir`.
    /// A pre-existing file is copied instead.
    pub(super) fn run_ncl_extraction(
        &mut self,
        step: SubStep,
        script_name: &str,
        source: &ExtractionSource,
        out_relative: &str,
        extra: impl FnOnce(NclInvocation) -> NclInvocation,
    ) -> Result<(), PipelineError> {
        let input = match source {
            ExtractionSource::Existing { path } => {
                let dir = self.stage_dir(out_relative)?;
                self.copy_into(step, path.as_path(), dir.as_path())?;
                return Ok(());
            }
            ExtractionSource::Extract { input } => input.as_str(),
        };

        let domain = self.context.require_domain_file(step.as_str())?.to_path_buf();
        let dir = self.stage_dir(out_relative)?;
        let invocation = extra(
            NclInvocation::new(self.options.ncl_script_dir.join(script_name))
                .text("plot_name", self.site_code())
                .text(
                    "nc_in_file_path",
                    self.recipe
                        .nc_input_paths
                        .root_path
                        .join(input)
                        .display()
                        .to_string(),
                )
                .output_dir(dir.as_path())
                .text("domain_file_path", domain.display().to_string()),
        );

        let module = self.machine.module_for(ToolCategory::Ncl)?;
        let spec = invocation
            .into_command(dir.as_path())
            .module(module)
            .envs(self.machine.environment());
        self.invoke(&spec)?;

        let output = dir.join(site_extract_file_name(input, self.site_code()));
        self.track_expected(step, output.as_path())
    }
}

/// Maps directory for `mksurfdata.pl` when the mapping file is supplied: the
/// file's own directory. Generating surface data needs one.
fn supplied_mapping_dir(
    recipe: &Recipe,
    plan: &StagePlan,
) -> Result<Option<PathBuf>, PipelineError> {
    let ComponentSource::Existing(path) = recipe.nc_input_paths.share.mapping.source("mapping")?
    else {
        return Ok(None);
    };
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf);
    let generates_surface = plan.steps.contains(&SubStep::Surface)
        && matches!(
            recipe.nc_input_paths.land.surface,
            Some(SurfaceSource::Generate { .. })
        );
    if dir.is_none() && generates_surface {
        return Err(RecipeError::SharedPathWithoutDirectory {
            component: "mapping",
            path,
        }
        .into());
    }
    Ok(dir)
}

/// Every tool category the plan will need a module for.
pub fn required_tool_categories(recipe: &Recipe, plan: &StagePlan) -> BTreeSet<ToolCategory> {
    let land = &recipe.nc_input_paths.land;
    let atm = &recipe.nc_input_paths.atmosphere;
    let extracts = |source: &Option<ExtractionSource>| {
        matches!(source, Some(ExtractionSource::Extract { .. }))
    };

    plan.steps
        .iter()
        .filter_map(|step| match step {
            SubStep::Grid => Some(ToolCategory::Ncl),
            SubStep::Mapping => Some(ToolCategory::Mapping),
            SubStep::Domain => Some(ToolCategory::Domain),
            SubStep::Surface => matches!(land.surface, Some(SurfaceSource::Generate { .. }))
                .then_some(ToolCategory::Surface),
            SubStep::Urban => extracts(&land.urban).then_some(ToolCategory::Ncl),
            SubStep::Fire => extracts(&land.fire).then_some(ToolCategory::Ncl),
            SubStep::Climate => Some(ToolCategory::Ncl),
            SubStep::Topography => extracts(&atm.topography).then_some(ToolCategory::Ncl),
            SubStep::Lightning => extracts(&atm.lightning).then_some(ToolCategory::Ncl),
            SubStep::AerosolDeposition => {
                extracts(&atm.aerosol_deposition).then_some(ToolCategory::Ncl)
            }
            SubStep::Snicar | SubStep::RiverTracing | SubStep::ParameterFiles => None,
        })
        .collect()
}
