//! Atmosphere sub-steps, run after the land stage.

use crate::machine::ToolCategory;
use crate::pipeline::controller::SiteForcingPipeline;
use crate::pipeline::naming::climate_file_names;
use crate::pipeline::ncl::NclInvocation;
use crate::pipeline::runtime::PipelineError;
use crate::pipeline::SubStep;

pub const CLIMATE_SCRIPT: &str = "climate_site_clm5.ncl";
pub const TOPOGRAPHY_SCRIPT: &str = "topo_site_clm5.ncl";
pub const LIGHTNING_SCRIPT: &str = "lightning_site_clm5.ncl";
pub const AEROSOL_SCRIPT: &str = "aerdep_site_clm5.ncl";

impl SiteForcingPipeline {
    /// One script call covers the whole year range and writes one file per
    /// stream and month.
    pub(super) fn create_climate(&mut self) -> Result<(), PipelineError> {
        let step = SubStep::Climate;
        let Some(climate) = self.recipe.nc_input_paths.atmosphere.climate.clone() else {
            return Ok(());
        };
        let site = self.site_code().to_string();
        let domain = self.context.require_domain_file(step.as_str())?.to_path_buf();
        let dir = self.stage_dir(format!("atm/datm7/GSWP3v1/{site}").as_str())?;

        let module = self.machine.module_for(ToolCategory::Ncl)?;
        let spec = NclInvocation::new(self.options.ncl_script_dir.join(CLIMATE_SCRIPT))
            .text("plot_name", site.as_str())
            .text(
                "nc_in_file_path",
                self.recipe
                    .nc_input_paths
                    .root_path
                    .join(climate.input.as_str())
                    .display()
                    .to_string(),
            )
            .output_dir(dir.as_path())
            .text("domain_file_path", domain.display().to_string())
            .integer("start_year", i64::from(climate.start_year))
            .integer("end_year", i64::from(climate.end_year))
            .into_command(dir.as_path())
            .module(module)
            .envs(self.machine.environment());
        self.invoke(&spec)?;

        for name in climate_file_names(
            &site,
            climate.streams.as_slice(),
            climate.start_year,
            climate.end_year,
        ) {
            self.track_expected(step, dir.join(name).as_path())?;
        }
        Ok(())
    }

    pub(super) fn create_topography(&mut self) -> Result<(), PipelineError> {
        let Some(source) = self.recipe.nc_input_paths.atmosphere.topography.clone() else {
            return Ok(());
        };
        let elevation = self.recipe.elevation;
        self.run_ncl_extraction(
            SubStep::Topography,
            TOPOGRAPHY_SCRIPT,
            &source,
            "atm/datm7/topo_forcing",
            |invocation| invocation.float("plot_height", elevation),
        )
    }

    pub(super) fn create_lightning(&mut self) -> Result<(), PipelineError> {
        let Some(source) = self.recipe.nc_input_paths.atmosphere.lightning.clone() else {
            return Ok(());
        };
        self.run_ncl_extraction(
            SubStep::Lightning,
            LIGHTNING_SCRIPT,
            &source,
            "atm/datm7/NASA_LIS",
            |invocation| invocation,
        )
    }

    pub(super) fn create_aerosol_deposition(&mut self) -> Result<(), PipelineError> {
        let Some(source) = self
            .recipe
            .nc_input_paths
            .atmosphere
            .aerosol_deposition
            .clone()
        else {
            return Ok(());
        };
        self.run_ncl_extraction(
            SubStep::AerosolDeposition,
            AEROSOL_SCRIPT,
            &source,
            "atm/cam/chem/trop_mozart_aero/aero",
            |invocation| invocation,
        )
    }
}
