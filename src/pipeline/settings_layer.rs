use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_SETTINGS_PATH: &str = "config/forcing.settings.toml";
pub const DEFAULT_MACHINE_PROFILES_PATH: &str = "config/machine_properties.yaml";
pub const DEFAULT_NCL_SCRIPT_DIR: &str = "external_scripts/ncl";
pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_GRID_SPACING: f64 = 0.01;
pub const DEFAULT_EXCLUDE_PATTERNS: [&str; 3] =
    ["share/scripgrids/**", "lnd/clm2/mappingdata/**", "**/*.log"];

/// Values present in a settings file. Absent keys fall back to defaults.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ForcingSettingsOverlay {
    pub machine_profiles: Option<String>,
    pub ncl_script_dir: Option<String>,
    pub log_dir: Option<String>,
    pub dx: Option<f64>,
    pub dy: Option<f64>,
    pub exclude: Option<Vec<String>>,
}

/// Fully resolved application settings with absolute paths.
#[derive(Debug, Clone, PartialEq)]
pub struct ForcingSettings {
    pub machine_profiles: PathBuf,
    pub ncl_script_dir: PathBuf,
    pub log_dir: PathBuf,
    pub dx: f64,
    pub dy: f64,
    pub exclude: Vec<String>,
}

impl ForcingSettings {
    pub fn defaults(app_root: &Path) -> Self {
        Self::resolve(app_root, &ForcingSettingsOverlay::default())
    }

    pub fn resolve(app_root: &Path, overlay: &ForcingSettingsOverlay) -> Self {
        let path = |value: Option<&str>, fallback: &str| {
            let candidate = PathBuf::from(value.unwrap_or(fallback));
            if candidate.is_absolute() {
                candidate
            } else {
                app_root.join(candidate)
            }
        };
        Self {
            machine_profiles: path(
                overlay.machine_profiles.as_deref(),
                DEFAULT_MACHINE_PROFILES_PATH,
            ),
            ncl_script_dir: path(overlay.ncl_script_dir.as_deref(), DEFAULT_NCL_SCRIPT_DIR),
            log_dir: path(overlay.log_dir.as_deref(), DEFAULT_LOG_DIR),
            dx: overlay.dx.unwrap_or(DEFAULT_GRID_SPACING),
            dy: overlay.dy.unwrap_or(DEFAULT_GRID_SPACING),
            exclude: overlay.exclude.clone().unwrap_or_else(|| {
                DEFAULT_EXCLUDE_PATTERNS
                    .iter()
                    .map(|v| v.to_string())
                    .collect()
            }),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsLayerError {
    #[error("failed to read forcing settings '{path}': {message}")]
    ReadFile { path: String, message: String },
    #[error("failed to parse forcing settings TOML '{path}': {message}")]
    ParseToml { path: String, message: String },
    #[error("forcing settings file not found: {path}")]
    NotFound { path: String },
    #[error("forcing settings field '{field}' has invalid type")]
    InvalidFieldType { field: String },
    #[error("forcing settings field '{field}' must be a positive number")]
    NotPositive { field: String },
}

/// Reads `explicit_path` when given (it must exist), otherwise the optional
/// default file under `app_root`.
pub fn load_forcing_settings(
    app_root: &Path,
    explicit_path: Option<&str>,
) -> Result<ForcingSettings, SettingsLayerError> {
    if let Some(path) = explicit_path
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .map(|p| if p.is_absolute() { p } else { app_root.join(p) })
    {
        if !path.exists() {
            return Err(SettingsLayerError::NotFound {
                path: path.display().to_string(),
            });
        }
        let overlay = load_optional_overlay_from_toml_path(path.as_path())?;
        return Ok(ForcingSettings::resolve(app_root, &overlay));
    }

    let overlay =
        load_optional_overlay_from_toml_path(app_root.join(DEFAULT_SETTINGS_PATH).as_path())?;
    Ok(ForcingSettings::resolve(app_root, &overlay))
}

pub fn parse_forcing_settings_overlay(
    value: &Value,
) -> Result<ForcingSettingsOverlay, SettingsLayerError> {
    let root = value
        .as_object()
        .ok_or_else(|| SettingsLayerError::InvalidFieldType {
            field: String::from("<root>"),
        })?;

    let mut out = ForcingSettingsOverlay::default();
    if let Some(paths) = section(root.get("paths"), "paths")? {
        if let Some(v) = paths.get("machine_profiles") {
            out.machine_profiles = Some(parse_string(v, "paths.machine_profiles")?);
        }
        if let Some(v) = paths.get("ncl_script_dir") {
            out.ncl_script_dir = Some(parse_string(v, "paths.ncl_script_dir")?);
        }
        if let Some(v) = paths.get("log_dir") {
            out.log_dir = Some(parse_string(v, "paths.log_dir")?);
        }
    }
    if let Some(grid) = section(root.get("grid"), "grid")? {
        if let Some(v) = grid.get("dx") {
            out.dx = Some(parse_positive(v, "grid.dx")?);
        }
        if let Some(v) = grid.get("dy") {
            out.dy = Some(parse_positive(v, "grid.dy")?);
        }
    }
    if let Some(packaging) = section(root.get("packaging"), "packaging")? {
        if let Some(v) = packaging.get("exclude") {
            out.exclude = Some(parse_string_array(v, "packaging.exclude")?);
        }
    }
    Ok(out)
}

fn load_optional_overlay_from_toml_path(
    path: &Path,
) -> Result<ForcingSettingsOverlay, SettingsLayerError> {
    if !path.exists() {
        return Ok(ForcingSettingsOverlay::default());
    }
    let raw = fs::read_to_string(path).map_err(|error| SettingsLayerError::ReadFile {
        path: path.display().to_string(),
        message: error.to_string(),
    })?;
    let parsed = toml::from_str::<toml::Value>(raw.as_str()).map_err(|error| {
        SettingsLayerError::ParseToml {
            path: path.display().to_string(),
            message: error.to_string(),
        }
    })?;
    let json_value =
        serde_json::to_value(parsed).map_err(|error| SettingsLayerError::ParseToml {
            path: path.display().to_string(),
            message: error.to_string(),
        })?;
    parse_forcing_settings_overlay(&json_value)
}

fn section<'a>(
    value: Option<&'a Value>,
    field: &str,
) -> Result<Option<&'a serde_json::Map<String, Value>>, SettingsLayerError> {
    value
        .map(|v| {
            v.as_object()
                .ok_or_else(|| SettingsLayerError::InvalidFieldType {
                    field: field.to_string(),
                })
        })
        .transpose()
}

fn parse_string(value: &Value, field: &str) -> Result<String, SettingsLayerError> {
    let parsed = value
        .as_str()
        .map(str::trim)
        .ok_or_else(|| SettingsLayerError::InvalidFieldType {
            field: field.to_string(),
        })?;
    if parsed.is_empty() {
        return Err(SettingsLayerError::InvalidFieldType {
            field: field.to_string(),
        });
    }
    Ok(parsed.to_string())
}

fn parse_positive(value: &Value, field: &str) -> Result<f64, SettingsLayerError> {
    let parsed = value
        .as_f64()
        .ok_or_else(|| SettingsLayerError::InvalidFieldType {
            field: field.to_string(),
        })?;
    if !(parsed.is_finite() && parsed > 0.0) {
        return Err(SettingsLayerError::NotPositive {
            field: field.to_string(),
        });
    }
    Ok(parsed)
}

fn parse_string_array(value: &Value, field: &str) -> Result<Vec<String>, SettingsLayerError> {
    let arr = value
        .as_array()
        .ok_or_else(|| SettingsLayerError::InvalidFieldType {
            field: field.to_string(),
        })?;
    let mut out = Vec::with_capacity(arr.len());
    for item in arr {
        out.push(parse_string(item, field)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_root() -> PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time should be monotonic")
            .as_nanos();
        std::env::temp_dir().join(format!("site_forcing_settings_{stamp}"))
    }

    #[test]
    fn parses_all_sections() {
        let overlay = parse_forcing_settings_overlay(&serde_json::json!({
            "paths": {
                "machine_profiles": "/etc/site-forcing/machines.yaml",
                "ncl_script_dir": "scripts/ncl",
                "log_dir": "var/log"
            },
            "grid": {"dx": 0.05, "dy": 0.025},
            "packaging": {"exclude": ["**/*.log"]}
        }))
        .expect("overlay should parse");

        assert_eq!(
            overlay.machine_profiles.as_deref(),
            Some("/etc/site-forcing/machines.yaml")
        );
        assert_eq!(overlay.dx, Some(0.05));
        assert_eq!(overlay.dy, Some(0.025));
        assert_eq!(overlay.exclude, Some(vec![String::from("**/*.log")]));
    }

    #[test]
    fn rejects_non_positive_grid_spacing() {
        let err = parse_forcing_settings_overlay(&serde_json::json!({"grid": {"dx": 0}}))
            .expect_err("zero spacing should fail");
        assert_eq!(
            err,
            SettingsLayerError::NotPositive {
                field: String::from("grid.dx")
            }
        );
    }

    #[test]
    fn rejects_wrong_section_type() {
        let err = parse_forcing_settings_overlay(&serde_json::json!({"paths": "x"}))
            .expect_err("paths must be a table");
        assert_eq!(
            err,
            SettingsLayerError::InvalidFieldType {
                field: String::from("paths")
            }
        );
    }

    #[test]
    fn missing_default_file_yields_defaults_relative_to_app_root() {
        let root = temp_root();
        let settings = load_forcing_settings(root.as_path(), None).expect("defaults");
        assert_eq!(settings, ForcingSettings::defaults(root.as_path()));
        assert_eq!(
            settings.machine_profiles,
            root.join("config/machine_properties.yaml")
        );
        assert_eq!(settings.dx, 0.01);
        assert_eq!(settings.exclude.len(), 3);
    }

    #[test]
    fn loads_default_toml_and_resolves_relative_paths() {
        let root = temp_root();
        fs::create_dir_all(root.join("config")).expect("config dir");
        fs::write(
            root.join(DEFAULT_SETTINGS_PATH),
            r#"[paths]
ncl_script_dir = "ncl"
log_dir = "/var/log/site-forcing"

[grid]
dx = 0.02
"#,
        )
        .expect("settings write");

        let settings = load_forcing_settings(root.as_path(), None).expect("settings load");
        assert_eq!(settings.ncl_script_dir, root.join("ncl"));
        assert_eq!(settings.log_dir, PathBuf::from("/var/log/site-forcing"));
        assert_eq!(settings.dx, 0.02);
        assert_eq!(settings.dy, DEFAULT_GRID_SPACING);

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn explicit_settings_path_must_exist() {
        let root = temp_root();
        let err = load_forcing_settings(root.as_path(), Some("missing.toml"))
            .expect_err("explicit path is required to exist");
        assert!(matches!(err, SettingsLayerError::NotFound { .. }));
    }
}
