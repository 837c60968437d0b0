//! Shared grid sub-steps: SCRIP grid, mapping files and the domain file.

use std::fs;

use tracing::info;

use crate::machine::ToolCategory;
use crate::pipeline::controller::SiteForcingPipeline;
use crate::pipeline::naming::{
    domain_file_name, domain_outputs_pattern, grid_file_name, grid_name, grid_outputs_pattern,
    mapping_outputs_pattern, noocean_map_file_name, raw_domain_file_name,
};
use crate::pipeline::runtime::PipelineError;
use crate::pipeline::SubStep;

pub const GRID_TOOL: &str = "tools/mkmapdata/mknoocnmap.pl";
pub const MAPPING_TOOL: &str = "tools/mkmapdata/regridbatch.sh";
pub const DOMAIN_TOOL: &str = "cime/tools/mapping/gen_domain_files/gen_domain";

impl SiteForcingPipeline {
    pub(super) fn grid_dir_relative(&self) -> String {
        format!("share/scripgrids/{}", self.site_code())
    }

    pub(super) fn mapping_dir_relative(&self) -> String {
        format!("lnd/clm2/mappingdata/maps/{}", self.site_code())
    }

    /// `mknoocnmap.pl` writes the SCRIP grid and the ocean-masked site map
    /// side by side; the map is what `gen_domain` later reads.
    pub(super) fn create_grid(&mut self) -> Result<(), PipelineError> {
        let step = SubStep::Grid;
        let site = self.site_code().to_string();
        let dir = self.stage_dir(self.grid_dir_relative().as_str())?;
        let coordinates = self.recipe.coordinates;

        let spec = self
            .tool_spec(
                self.recipe.ctsm_path.join(GRID_TOOL).as_path(),
                dir.as_path(),
                ToolCategory::Ncl,
            )?
            .arg("-centerpoint")
            .arg(format!("{},{}", coordinates.lat, coordinates.lon))
            .args(["-name", site.as_str()])
            .arg("-dx")
            .arg(self.options.dx.to_string())
            .arg("-dy")
            .arg(self.options.dy.to_string());
        self.invoke(&spec)?;

        self.track_matching(step, dir.as_path(), grid_outputs_pattern(&site).as_str())?;
        let grid = dir.join(grid_file_name(&site, &self.options.run_stamp));
        let noocean_map = dir.join(noocean_map_file_name(&site, &self.options.run_stamp));
        for path in [&grid, &noocean_map] {
            if !path.is_file() {
                return Err(PipelineError::MissingOutput {
                    step: step.as_str(),
                    path: path.clone(),
                });
            }
        }
        info!(grid = %grid.display(), map = %noocean_map.display(), "SCRIP grid ready");
        self.context.set_grid_file(grid);
        // A pre-supplied mapping file takes precedence.
        if self.context.mapping_file().is_none() {
            self.context.set_mapping_file(noocean_map);
        }
        Ok(())
    }

    /// `regridbatch.sh` maps every global raw-data grid onto the site grid.
    /// The maps land in one directory that `mksurfdata.pl` reads as a whole.
    pub(super) fn create_mapping(&mut self) -> Result<(), PipelineError> {
        let step = SubStep::Mapping;
        let site = self.site_code().to_string();
        let grid = self.context.require_grid_file(step.as_str())?.to_path_buf();
        let dir = self.stage_dir(self.mapping_dir_relative().as_str())?;

        let spec = self
            .tool_spec(
                self.recipe.ctsm_path.join(MAPPING_TOOL).as_path(),
                dir.as_path(),
                ToolCategory::Mapping,
            )?
            .arg(grid_name(&site))
            .arg(grid.display().to_string());
        self.invoke(&spec)?;

        let maps = self.track_matching(step, dir.as_path(), mapping_outputs_pattern())?;
        info!(dir = %dir.display(), maps = maps.len(), "mapping files ready");
        self.context.set_mapping_dir(dir);
        Ok(())
    }

    /// `gen_domain` names its land output after both `-o` and `-l`; the
    /// canonical name keeps the site code once.
    pub(super) fn create_domain(&mut self) -> Result<(), PipelineError> {
        let step = SubStep::Domain;
        let site = self.site_code().to_string();
        let mapping = self.context.require_mapping_file(step.as_str())?.to_path_buf();
        let dir = self.stage_dir(format!("share/domains/{site}").as_str())?;

        let spec = self
            .tool_spec(
                self.recipe.ctsm_path.join(DOMAIN_TOOL).as_path(),
                dir.as_path(),
                ToolCategory::Domain,
            )?
            .arg("-m")
            .arg(mapping.display().to_string())
            .args(["-o", site.as_str(), "-l", site.as_str()]);
        self.invoke(&spec)?;

        let raw = dir.join(raw_domain_file_name(&site, &self.options.run_stamp));
        let domain = dir.join(domain_file_name(&site, &self.options.run_stamp));
        if !raw.is_file() {
            return Err(PipelineError::MissingOutput {
                step: step.as_str(),
                path: raw,
            });
        }
        fs::rename(raw.as_path(), domain.as_path()).map_err(|source| {
            PipelineError::Filesystem {
                step: step.as_str(),
                action: "rename",
                path: raw.clone(),
                source,
            }
        })?;

        self.track_matching(step, dir.as_path(), domain_outputs_pattern(&site).as_str())?;
        info!(domain = %domain.display(), "domain file ready");
        self.context.set_domain_file(domain);
        Ok(())
    }
}
