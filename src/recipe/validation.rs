use serde_yaml::Value;

use super::RecipeError;

/// Dotted paths that every recipe must carry with a non-null value.
///
/// Fields are matched by their full path, so a key that is optional at one
/// nesting level never satisfies (or trips) a required key elsewhere.
pub const REQUIRED_FIELDS: &[&str] = &[
    "version",
    "site_code",
    "site_name",
    "coordinates.lat",
    "coordinates.lon",
    "elevation",
    "output.local_output",
    "output.tar_output_dir",
    "ctsm_path",
    "nc_input_paths.root_path",
    "nc_input_paths.share.SCRIP",
    "nc_input_paths.share.mapping",
    "nc_input_paths.share.domain",
];

pub fn missing_required_fields(document: &Value) -> Vec<String> {
    REQUIRED_FIELDS
        .iter()
        .filter(|field| !is_present(document, field))
        .map(|field| field.to_string())
        .collect()
}

pub fn validate_required_fields(document: &Value) -> Result<(), RecipeError> {
    let missing = missing_required_fields(document);
    if missing.is_empty() {
        return Ok(());
    }
    Err(RecipeError::MissingRequired {
        missing,
        required: REQUIRED_FIELDS.iter().map(|f| f.to_string()).collect(),
    })
}

fn is_present(document: &Value, dotted: &str) -> bool {
    let mut current = document;
    for key in dotted.split('.') {
        match current.get(key) {
            Some(next) => current = next,
            None => return false,
        }
    }
    !current.is_null()
}
