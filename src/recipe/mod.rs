//! Typed site recipes: the per-site declarative configuration driving one run.

pub mod validation;

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_yaml::Value;
use thiserror::Error;

pub use validation::{missing_required_fields, validate_required_fields, REQUIRED_FIELDS};

#[derive(Debug, Error)]
pub enum RecipeError {
    #[error("recipe file not found: {0}")]
    FileNotFound(PathBuf),
    #[error("'{0}' is not a yaml file")]
    NotYaml(PathBuf),
    #[error("recipe directory not found: {0}")]
    DirectoryNotFound(PathBuf),
    #[error("no yaml recipes found in '{0}'")]
    NoRecipesFound(PathBuf),
    #[error("failed to read recipe '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse recipe YAML '{origin}': {source}")]
    Parse {
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error(
        "missing required recipe field(s): {}. Please supply at least the following inputs: {}",
        .missing.join(", "),
        .required.join(", ")
    )]
    MissingRequired {
        missing: Vec<String>,
        required: Vec<String>,
    },
    #[error("invalid site code '{0}': use letters, digits, '-' or '_'")]
    InvalidSiteCode(String),
    #[error("shared component '{component}' has create_new: false but no path")]
    MissingSharedPath { component: &'static str },
    #[error("pre-existing {component} file not found: {path}")]
    SharedPathNotFound {
        component: &'static str,
        path: PathBuf,
    },
    #[error("pre-existing {component} file '{path}' has no parent directory")]
    SharedPathWithoutDirectory {
        component: &'static str,
        path: PathBuf,
    },
    #[error("climate year range is inverted: start_year {start} > end_year {end}")]
    InvalidYearRange { start: i32, end: i32 },
    #[error("climate entry lists no streams")]
    EmptyClimateStreams,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Recipe {
    #[serde(deserialize_with = "scalar_string")]
    pub version: String,
    #[serde(deserialize_with = "scalar_string")]
    pub site_code: String,
    #[serde(deserialize_with = "scalar_string")]
    pub site_name: String,
    pub coordinates: Coordinates,
    pub elevation: f64,
    pub output: OutputRoots,
    #[serde(deserialize_with = "home_path")]
    pub ctsm_path: PathBuf,
    pub nc_input_paths: InputPaths,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OutputRoots {
    #[serde(deserialize_with = "home_path")]
    pub local_output: PathBuf,
    #[serde(deserialize_with = "home_path")]
    pub tar_output_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InputPaths {
    #[serde(deserialize_with = "home_path")]
    pub root_path: PathBuf,
    pub share: SharedInputs,
    #[serde(default, deserialize_with = "null_as_default")]
    pub land: LandInputs,
    #[serde(default, deserialize_with = "null_as_default")]
    pub atmosphere: AtmosphereInputs,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SharedInputs {
    #[serde(rename = "SCRIP")]
    pub grid: SharedComponent,
    pub mapping: SharedComponent,
    pub domain: SharedComponent,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SharedComponent {
    #[serde(deserialize_with = "flag")]
    pub create_new: bool,
    #[serde(default)]
    pub path: Option<String>,
}

/// Where a shared component comes from once the recipe has been checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentSource {
    Generate,
    Existing(PathBuf),
}

impl SharedComponent {
    pub fn source(&self, component: &'static str) -> Result<ComponentSource, RecipeError> {
        if self.create_new {
            return Ok(ComponentSource::Generate);
        }
        let raw = self
            .path
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(RecipeError::MissingSharedPath { component })?;
        Ok(ComponentSource::Existing(expand_home(raw)))
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct LandInputs {
    #[serde(default)]
    pub surface: Option<SurfaceSource>,
    #[serde(default)]
    pub urban: Option<ExtractionSource>,
    #[serde(default)]
    pub fire: Option<ExtractionSource>,
    #[serde(default, deserialize_with = "optional_file_map")]
    pub snicar: BTreeMap<String, String>,
    #[serde(default)]
    pub dominant_river_tracing: Option<String>,
    #[serde(default, deserialize_with = "optional_file_map")]
    pub parameter_files: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct AtmosphereInputs {
    #[serde(default)]
    pub climate: Option<ClimateEntry>,
    #[serde(default)]
    pub topography: Option<ExtractionSource>,
    #[serde(default)]
    pub lightning: Option<ExtractionSource>,
    #[serde(default)]
    pub aerosol_deposition: Option<ExtractionSource>,
}

/// Input for one extraction sub-step: either a raw dataset under the input
/// root that the extraction script cuts down to the site, or a finished file
/// that is copied into place as-is.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawSourceEntry")]
pub enum ExtractionSource {
    Extract { input: String },
    Existing { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawSourceEntry")]
pub enum SurfaceSource {
    Generate { years: String },
    Existing { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClimateEntry {
    pub input: String,
    pub start_year: i32,
    pub end_year: i32,
    #[serde(default = "default_climate_streams")]
    pub streams: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSourceEntry {
    Input(String),
    Table {
        #[serde(default = "default_true", deserialize_with = "flag")]
        create_new: bool,
        #[serde(default)]
        input: Option<String>,
        #[serde(default)]
        path: Option<String>,
        #[serde(default, deserialize_with = "optional_scalar_string")]
        years: Option<String>,
    },
}

impl TryFrom<RawSourceEntry> for ExtractionSource {
    type Error = String;

    fn try_from(raw: RawSourceEntry) -> Result<Self, Self::Error> {
        match raw {
            RawSourceEntry::Input(input) => Ok(Self::Extract { input }),
            RawSourceEntry::Table {
                create_new: true,
                input,
                ..
            } => input
                .filter(|v| !v.trim().is_empty())
                .map(|input| Self::Extract { input })
                .ok_or_else(|| String::from("create_new: true requires an 'input' file")),
            RawSourceEntry::Table {
                create_new: false,
                path,
                ..
            } => existing_path(path).map(|path| Self::Existing { path }),
        }
    }
}

impl TryFrom<RawSourceEntry> for SurfaceSource {
    type Error = String;

    fn try_from(raw: RawSourceEntry) -> Result<Self, Self::Error> {
        match raw {
            RawSourceEntry::Input(years) => Ok(Self::Generate { years }),
            RawSourceEntry::Table {
                create_new: true,
                years,
                ..
            } => Ok(Self::Generate {
                years: years.unwrap_or_else(|| String::from(DEFAULT_SURFACE_YEARS)),
            }),
            RawSourceEntry::Table {
                create_new: false,
                path,
                ..
            } => existing_path(path).map(|path| Self::Existing { path }),
        }
    }
}

pub const DEFAULT_SURFACE_YEARS: &str = "2005";

fn existing_path(path: Option<String>) -> Result<PathBuf, String> {
    path.filter(|v| !v.trim().is_empty())
        .map(|v| expand_home(v.trim()))
        .ok_or_else(|| String::from("create_new: false requires a 'path'"))
}

fn default_true() -> bool {
    true
}

fn default_climate_streams() -> Vec<String> {
    ["Solr", "Prec", "TPQWL"].map(String::from).to_vec()
}

impl Recipe {
    /// Directory name shared by the local output and the archive staging area.
    pub fn run_dir_name(&self) -> String {
        format!("{}_{}", self.site_code, self.version)
    }

    /// Semantic checks that the schema alone cannot express.
    pub fn check(&self) -> Result<(), RecipeError> {
        let code = self.site_code.trim();
        if code.is_empty()
            || !code
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
        {
            return Err(RecipeError::InvalidSiteCode(self.site_code.clone()));
        }

        let share = &self.nc_input_paths.share;
        for (component, entry) in [
            ("SCRIP", &share.grid),
            ("mapping", &share.mapping),
            ("domain", &share.domain),
        ] {
            if let ComponentSource::Existing(path) = entry.source(component)? {
                if !path.is_file() {
                    return Err(RecipeError::SharedPathNotFound { component, path });
                }
            }
        }

        if let Some(climate) = self.nc_input_paths.atmosphere.climate.as_ref() {
            if climate.start_year > climate.end_year {
                return Err(RecipeError::InvalidYearRange {
                    start: climate.start_year,
                    end: climate.end_year,
                });
            }
            if climate.streams.is_empty() {
                return Err(RecipeError::EmptyClimateStreams);
            }
        }
        Ok(())
    }
}

pub fn parse_recipe_str(raw: &str, origin: &str) -> Result<Recipe, RecipeError> {
    let document: Value = serde_yaml::from_str(raw).map_err(|source| RecipeError::Parse {
        origin: origin.to_string(),
        source,
    })?;
    validate_required_fields(&document)?;
    let recipe: Recipe =
        serde_yaml::from_value(document).map_err(|source| RecipeError::Parse {
            origin: origin.to_string(),
            source,
        })?;
    recipe.check()?;
    Ok(recipe)
}

pub fn load_recipe_file(path: &Path) -> Result<Recipe, RecipeError> {
    if !path.is_file() {
        return Err(RecipeError::FileNotFound(path.to_path_buf()));
    }
    if !is_yaml_path(path) {
        return Err(RecipeError::NotYaml(path.to_path_buf()));
    }
    let raw = fs::read_to_string(path).map_err(|source| RecipeError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_recipe_str(raw.as_str(), path.display().to_string().as_str())
}

/// Every `*.yml`/`*.yaml` file directly inside `dir`, sorted by file name.
pub fn discover_recipe_files(dir: &Path) -> Result<Vec<PathBuf>, RecipeError> {
    if !dir.is_dir() {
        return Err(RecipeError::DirectoryNotFound(dir.to_path_buf()));
    }
    let entries = fs::read_dir(dir).map_err(|source| RecipeError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| RecipeError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_file() && is_yaml_path(path.as_path()) {
            files.push(path);
        }
    }
    if files.is_empty() {
        return Err(RecipeError::NoRecipesFound(dir.to_path_buf()));
    }
    files.sort();
    Ok(files)
}

fn is_yaml_path(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|v| v.to_str()),
        Some("yml") | Some("yaml")
    )
}

pub fn expand_home(raw: &str) -> PathBuf {
    if raw == "~" || raw.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let rest = raw.trim_start_matches('~').trim_start_matches('/');
            let home = PathBuf::from(home);
            return if rest.is_empty() { home } else { home.join(rest) };
        }
    }
    PathBuf::from(raw)
}

fn value_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(v) => Some(v),
        Value::Number(v) => Some(v.to_string()),
        Value::Bool(v) => Some(v.to_string()),
        _ => None,
    }
}

fn scalar_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    value_to_string(value).ok_or_else(|| de::Error::custom("expected a string or number"))
}

fn optional_scalar_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        other => value_to_string(other)
            .map(Some)
            .ok_or_else(|| de::Error::custom("expected a string or number")),
    }
}

fn home_path<'de, D>(deserializer: D) -> Result<PathBuf, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = scalar_string(deserializer)?;
    Ok(expand_home(raw.trim()))
}

/// Accepts YAML 1.2 booleans as well as the `yes`/`no` spelling older recipes use.
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Bool(v) => Ok(v),
        Value::String(v) => match v.trim().to_ascii_lowercase().as_str() {
            "yes" | "y" | "true" | "on" => Ok(true),
            "no" | "n" | "false" | "off" => Ok(false),
            other => Err(de::Error::custom(format!("invalid flag value '{other}'"))),
        },
        _ => Err(de::Error::custom("expected a boolean or yes/no")),
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn optional_file_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, Option<String>>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(name, file)| file.map(|file| (name, file)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn minimal(share: &str, extra: &str) -> String {
        format!(
            r#"
version: 1
site_code: ALP1
site_name: Alpine one
coordinates: {{lat: 61.0, lon: 8.1}}
elevation: 1200
output: {{local_output: /tmp/out, tar_output_dir: /tmp/tar}}
ctsm_path: /opt/ctsm
nc_input_paths:
  root_path: /data
  share:
{share}
{extra}
"#
        )
    }

    const ALL_NEW: &str = "    SCRIP: {create_new: yes}\n    mapping: {create_new: true}\n    domain: {create_new: y}";

    #[test]
    fn parses_minimal_recipe_with_numeric_version_and_yes_flags() {
        let recipe = parse_recipe_str(minimal(ALL_NEW, "").as_str(), "inline")
            .expect("recipe should parse");
        assert_eq!(recipe.version, "1");
        assert_eq!(recipe.run_dir_name(), "ALP1_1");
        assert!(recipe.nc_input_paths.share.grid.create_new);
        assert!(recipe.nc_input_paths.share.domain.create_new);
        assert_eq!(recipe.nc_input_paths.land, LandInputs::default());
        assert_eq!(recipe.nc_input_paths.atmosphere, AtmosphereInputs::default());
    }

    #[test]
    fn parses_land_and_atmosphere_entries() {
        let extra = r#"  land:
    surface: {create_new: true, years: 2000}
    urban: lnd/urban_raw.nc
    fire: {create_new: false, path: /data/fire_ALP1.nc}
    snicar: {optics: lnd/snicar_optics.nc, aging: null}
    parameter_files: {clm: lnd/clm5_params.nc, fates: lnd/fates_params.nc}
  atmosphere:
    climate: {input: atm/GSWP3, start_year: 2000, end_year: 2001}
    topography: {create_new: true, input: atm/topo.nc}
    lightning: null"#;
        let recipe = parse_recipe_str(minimal(ALL_NEW, extra).as_str(), "inline")
            .expect("recipe should parse");
        let land = &recipe.nc_input_paths.land;
        assert_eq!(
            land.surface,
            Some(SurfaceSource::Generate {
                years: String::from("2000")
            })
        );
        assert_eq!(
            land.urban,
            Some(ExtractionSource::Extract {
                input: String::from("lnd/urban_raw.nc")
            })
        );
        assert_eq!(
            land.fire,
            Some(ExtractionSource::Existing {
                path: PathBuf::from("/data/fire_ALP1.nc")
            })
        );
        assert_eq!(land.snicar.len(), 1);
        assert_eq!(land.parameter_files.len(), 2);
        let atm = &recipe.nc_input_paths.atmosphere;
        assert_eq!(
            atm.climate.as_ref().map(|c| c.streams.clone()),
            Some(default_climate_streams())
        );
        assert!(atm.lightning.is_none());
        assert!(atm.aerosol_deposition.is_none());
    }

    #[test]
    fn extraction_entry_with_create_new_but_no_input_is_rejected() {
        let extra = "  land:\n    urban: {create_new: true}";
        let err = parse_recipe_str(minimal(ALL_NEW, extra).as_str(), "inline")
            .expect_err("should fail");
        assert!(matches!(err, RecipeError::Parse { .. }));
    }

    #[test]
    fn missing_required_field_fails_before_typed_parse() {
        let raw = minimal(ALL_NEW, "").replace("elevation: 1200\n", "elevation: ~\n");
        let err = parse_recipe_str(raw.as_str(), "inline").expect_err("should fail");
        match err {
            RecipeError::MissingRequired { missing, .. } => {
                assert_eq!(missing, vec![String::from("elevation")]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn pre_existing_shared_component_requires_path() {
        let share = "    SCRIP: {create_new: no}\n    mapping: {create_new: true}\n    domain: {create_new: true}";
        let err = parse_recipe_str(minimal(share, "").as_str(), "inline").expect_err("should fail");
        assert!(matches!(
            err,
            RecipeError::MissingSharedPath { component: "SCRIP" }
        ));
    }

    #[test]
    fn pre_existing_shared_component_must_exist() {
        let share = "    SCRIP: {create_new: true}\n    mapping: {create_new: true}\n    domain: {create_new: false, path: /definitely/not/here.nc}";
        let err = parse_recipe_str(minimal(share, "").as_str(), "inline").expect_err("should fail");
        assert!(matches!(
            err,
            RecipeError::SharedPathNotFound {
                component: "domain",
                ..
            }
        ));
    }

    #[test]
    fn rejects_site_code_with_path_separators() {
        let raw = minimal(ALL_NEW, "").replace("site_code: ALP1", "site_code: ../ALP1");
        let err = parse_recipe_str(raw.as_str(), "inline").expect_err("should fail");
        assert!(matches!(err, RecipeError::InvalidSiteCode(_)));
    }

    #[test]
    fn rejects_inverted_climate_years() {
        let extra =
            "  atmosphere:\n    climate: {input: atm/GSWP3, start_year: 2010, end_year: 2000}";
        let err = parse_recipe_str(minimal(ALL_NEW, extra).as_str(), "inline")
            .expect_err("should fail");
        assert!(matches!(
            err,
            RecipeError::InvalidYearRange {
                start: 2010,
                end: 2000
            }
        ));
    }

    #[test]
    fn rejects_climate_without_streams() {
        let extra = "  atmosphere:\n    climate: {input: atm/GSWP3, start_year: 2000, end_year: 2000, streams: []}";
        let err = parse_recipe_str(minimal(ALL_NEW, extra).as_str(), "inline")
            .expect_err("empty streams should fail");
        assert!(matches!(err, RecipeError::EmptyClimateStreams));
    }

    #[test]
    fn expand_home_only_touches_leading_tilde() {
        assert_eq!(expand_home("/abs/~x"), PathBuf::from("/abs/~x"));
        assert_eq!(expand_home("rel/path"), PathBuf::from("rel/path"));
    }

    #[test]
    fn discovers_yaml_files_sorted_and_rejects_empty_dir() {
        let root = std::env::temp_dir().join(format!(
            "site_forcing_recipes_{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be monotonic")
                .as_nanos()
        ));
        fs::create_dir_all(root.as_path()).expect("temp dir");
        let err = discover_recipe_files(root.as_path()).expect_err("empty dir should fail");
        assert!(matches!(err, RecipeError::NoRecipesFound(_)));

        fs::write(root.join("b.yaml"), "x: 1").expect("write b");
        fs::write(root.join("a.yml"), "x: 1").expect("write a");
        fs::write(root.join("notes.txt"), "x").expect("write txt");
        let files = discover_recipe_files(root.as_path()).expect("should discover");
        assert_eq!(files, vec![root.join("a.yml"), root.join("b.yaml")]);

        let _ = fs::remove_dir_all(root);
    }
}
