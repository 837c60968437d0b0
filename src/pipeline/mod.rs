pub mod artifacts;
pub mod atmosphere_stage;
pub mod context;
pub mod controller;
pub mod invoker;
pub mod land_stage;
pub mod naming;
pub mod ncl;
pub mod packaging;
pub mod runlog;
pub mod runtime;
pub mod settings_layer;
pub mod share_stage;

use crate::recipe::{ComponentSource, Recipe};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ForcingStage {
    Share,
    Land,
    Atmosphere,
}

impl ForcingStage {
    pub const PRODUCTION_ORDER: [Self; 3] = [Self::Share, Self::Land, Self::Atmosphere];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Share => "share",
            Self::Land => "land",
            Self::Atmosphere => "atmosphere",
        }
    }
}

/// One artifact-producing unit of work. Declaration order is execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubStep {
    Grid,
    Mapping,
    Domain,
    Surface,
    Urban,
    Fire,
    Snicar,
    RiverTracing,
    ParameterFiles,
    Climate,
    Topography,
    Lightning,
    AerosolDeposition,
}

impl SubStep {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Grid => "grid",
            Self::Mapping => "mapping",
            Self::Domain => "domain",
            Self::Surface => "surface",
            Self::Urban => "urban",
            Self::Fire => "fire",
            Self::Snicar => "snicar",
            Self::RiverTracing => "dominant_river_tracing",
            Self::ParameterFiles => "parameter_files",
            Self::Climate => "climate",
            Self::Topography => "topography",
            Self::Lightning => "lightning",
            Self::AerosolDeposition => "aerosol_deposition",
        }
    }

    pub fn stage(self) -> ForcingStage {
        match self {
            Self::Grid | Self::Mapping | Self::Domain => ForcingStage::Share,
            Self::Surface
            | Self::Urban
            | Self::Fire
            | Self::Snicar
            | Self::RiverTracing
            | Self::ParameterFiles => ForcingStage::Land,
            Self::Climate | Self::Topography | Self::Lightning | Self::AerosolDeposition => {
                ForcingStage::Atmosphere
            }
        }
    }
}

/// The sub-steps a recipe asks for, grouped by stage in production order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePlan {
    pub steps: Vec<SubStep>,
}

impl StagePlan {
    pub fn for_recipe(recipe: &Recipe) -> Self {
        let share = &recipe.nc_input_paths.share;
        let land = &recipe.nc_input_paths.land;
        let atm = &recipe.nc_input_paths.atmosphere;
        let generates = |component: &crate::recipe::SharedComponent, name: &'static str| {
            matches!(component.source(name), Ok(ComponentSource::Generate))
        };

        let candidates = [
            (SubStep::Grid, generates(&share.grid, "SCRIP")),
            (SubStep::Mapping, generates(&share.mapping, "mapping")),
            (SubStep::Domain, generates(&share.domain, "domain")),
            (SubStep::Surface, land.surface.is_some()),
            (SubStep::Urban, land.urban.is_some()),
            (SubStep::Fire, land.fire.is_some()),
            (SubStep::Snicar, !land.snicar.is_empty()),
            (SubStep::RiverTracing, land.dominant_river_tracing.is_some()),
            (SubStep::ParameterFiles, !land.parameter_files.is_empty()),
            (SubStep::Climate, atm.climate.is_some()),
            (SubStep::Topography, atm.topography.is_some()),
            (SubStep::Lightning, atm.lightning.is_some()),
            (SubStep::AerosolDeposition, atm.aerosol_deposition.is_some()),
        ];
        Self {
            steps: candidates
                .into_iter()
                .filter_map(|(step, wanted)| wanted.then_some(step))
                .collect(),
        }
    }

    pub fn steps_for(&self, stage: ForcingStage) -> impl Iterator<Item = SubStep> + '_ {
        self.steps
            .iter()
            .copied()
            .filter(move |step| step.stage() == stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::parse_recipe_str;
    use pretty_assertions::assert_eq;

    const RECIPE: &str = r#"
version: v1
site_code: ALP1
site_name: Alpine one
coordinates: {lat: 61.0, lon: 8.1}
elevation: 1200
output: {local_output: /tmp/out, tar_output_dir: /tmp/tar}
ctsm_path: /opt/ctsm
nc_input_paths:
  root_path: /data
  share:
    SCRIP: {create_new: true}
    mapping: {create_new: true}
    domain: {create_new: true}
"#;

    #[test]
    fn stage_order_is_share_land_atmosphere() {
        assert_eq!(
            ForcingStage::PRODUCTION_ORDER,
            [
                ForcingStage::Share,
                ForcingStage::Land,
                ForcingStage::Atmosphere
            ]
        );
    }

    #[test]
    fn plan_without_land_or_atmosphere_only_runs_share_steps() {
        let recipe = parse_recipe_str(RECIPE, "inline").expect("recipe");
        let plan = StagePlan::for_recipe(&recipe);
        assert_eq!(
            plan.steps,
            vec![SubStep::Grid, SubStep::Mapping, SubStep::Domain]
        );
        assert_eq!(plan.steps_for(ForcingStage::Land).count(), 0);
    }

    #[test]
    fn plan_orders_land_before_atmosphere() {
        let raw = format!(
            "{RECIPE}  atmosphere:\n    lightning: atm/lis.nc\n  land:\n    urban: lnd/urban.nc\n"
        );
        let recipe = parse_recipe_str(raw.as_str(), "inline").expect("recipe");
        let plan = StagePlan::for_recipe(&recipe);
        assert_eq!(
            plan.steps,
            vec![
                SubStep::Grid,
                SubStep::Mapping,
                SubStep::Domain,
                SubStep::Urban,
                SubStep::Lightning
            ]
        );
    }
}
