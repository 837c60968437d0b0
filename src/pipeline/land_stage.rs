//! Land sub-steps. All run after the domain file exists and are independent
//! of each other.

use crate::machine::ToolCategory;
use crate::pipeline::controller::SiteForcingPipeline;
use crate::pipeline::naming::{grid_name, surface_outputs_pattern};
use crate::pipeline::runtime::PipelineError;
use crate::pipeline::SubStep;
use crate::recipe::SurfaceSource;

pub const SURFACE_TOOL: &str = "tools/mksurfdata_map/mksurfdata.pl";
pub const URBAN_SCRIPT: &str = "urbandata_site_clm5.ncl";
pub const FIRE_SCRIPT: &str = "popden_site_clm5.ncl";

impl SiteForcingPipeline {
    pub(super) fn create_surface(&mut self) -> Result<(), PipelineError> {
        let step = SubStep::Surface;
        let site = self.site_code().to_string();
        let dir = self.stage_dir(format!("lnd/clm2/surfdata_map/{site}").as_str())?;

        let years = match self.recipe.nc_input_paths.land.surface.clone() {
            Some(SurfaceSource::Generate { years }) => years,
            Some(SurfaceSource::Existing { path }) => {
                self.copy_into(step, path.as_path(), dir.as_path())?;
                return Ok(());
            }
            None => return Ok(()),
        };

        let map_dir = self.context.require_mapping_dir(step.as_str())?.to_path_buf();

        let spec = self
            .tool_spec(
                self.recipe.ctsm_path.join(SURFACE_TOOL).as_path(),
                dir.as_path(),
                ToolCategory::Surface,
            )?
            .args(["-no-crop", "-res", "usrspec", "-usr_gname"])
            .arg(grid_name(&site))
            .arg("-usr_gdate")
            .arg(self.options.run_stamp.ctsm())
            .arg("-usr_mapdir")
            .arg(map_dir.display().to_string())
            .arg("-dinlc")
            .arg(self.recipe.nc_input_paths.root_path.display().to_string())
            .args(["-hirespft", "-years"])
            .arg(years)
            .arg("-allownofile");
        self.invoke(&spec)?;

        self.track_matching(step, dir.as_path(), surface_outputs_pattern(&site).as_str())?;
        Ok(())
    }

    pub(super) fn create_urban(&mut self) -> Result<(), PipelineError> {
        let Some(source) = self.recipe.nc_input_paths.land.urban.clone() else {
            return Ok(());
        };
        self.run_ncl_extraction(
            SubStep::Urban,
            URBAN_SCRIPT,
            &source,
            "lnd/clm2/urbandata",
            |invocation| invocation,
        )
    }

    pub(super) fn create_fire(&mut self) -> Result<(), PipelineError> {
        let Some(source) = self.recipe.nc_input_paths.land.fire.clone() else {
            return Ok(());
        };
        self.run_ncl_extraction(
            SubStep::Fire,
            FIRE_SCRIPT,
            &source,
            "lnd/clm2/firedata",
            |invocation| invocation,
        )
    }

    pub(super) fn copy_snicar(&mut self) -> Result<(), PipelineError> {
        let files: Vec<String> = self
            .recipe
            .nc_input_paths
            .land
            .snicar
            .values()
            .cloned()
            .collect();
        self.copy_inputs(SubStep::Snicar, files, "lnd/clm2/snicardata")
    }

    pub(super) fn copy_river_tracing(&mut self) -> Result<(), PipelineError> {
        let files: Vec<String> = self
            .recipe
            .nc_input_paths
            .land
            .dominant_river_tracing
            .iter()
            .cloned()
            .collect();
        self.copy_inputs(SubStep::RiverTracing, files, "lnd/clm2/rtmdata")
    }

    pub(super) fn copy_parameter_files(&mut self) -> Result<(), PipelineError> {
        let files: Vec<String> = self
            .recipe
            .nc_input_paths
            .land
            .parameter_files
            .values()
            .cloned()
            .collect();
        self.copy_inputs(SubStep::ParameterFiles, files, "lnd/clm2/paramdata")
    }

    /// Files are named relative to the raw input root.
    fn copy_inputs(
        &mut self,
        step: SubStep,
        files: Vec<String>,
        out_relative: &str,
    ) -> Result<(), PipelineError> {
        let dir = self.stage_dir(out_relative)?;
        for file in files {
            let source = self.recipe.nc_input_paths.root_path.join(file);
            self.copy_into(step, source.as_path(), dir.as_path())?;
        }
        Ok(())
    }
}
