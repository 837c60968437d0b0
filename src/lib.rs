pub mod machine;
pub mod pipeline;
pub mod recipe;
pub mod storage;

use std::path::PathBuf;

pub const APP_ROOT_ENV: &str = "SITE_FORCING_ROOT";

/// Directory holding `config/` and `external_scripts/`: `$SITE_FORCING_ROOT`
/// when set, otherwise the working directory.
pub fn default_app_root() -> PathBuf {
    std::env::var_os(APP_ROOT_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}
