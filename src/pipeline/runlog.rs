use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

pub const SUMMARY_MARKER_PREFIX: &str = "SITE_FORCING_SUMMARY_JSON: ";

/// What one successful site run produced, written next to its archive.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ForcingRunSummary {
    pub site_code: String,
    pub site_name: String,
    pub version: String,
    pub machine: String,
    pub run_date: String,
    pub executed_steps: Vec<String>,
    pub tool_invocations: usize,
    pub artifacts: Vec<PathBuf>,
    pub excluded: Vec<PathBuf>,
    pub archive_path: PathBuf,
}

/// The single line printed on stdout after each recipe.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ForcingSummaryMarkerPayload {
    pub site_code: String,
    pub version: String,
    pub summary_path: String,
    pub archive_path: String,
    pub artifacts: usize,
}

#[derive(Debug, Error)]
pub enum RunLogError {
    #[error("failed to create summary parent directory '{path}': {message}")]
    CreateParent { path: String, message: String },
    #[error("failed to serialize run summary JSON: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to write run summary '{path}': {message}")]
    WriteFile { path: String, message: String },
}

pub fn write_pretty_json_with_newline<T>(path: &Path, value: &T) -> Result<(), RunLogError>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|error| RunLogError::CreateParent {
            path: parent.display().to_string(),
            message: error.to_string(),
        })?;
    }

    let mut bytes = serde_json::to_vec_pretty(value).map_err(RunLogError::Serialize)?;
    bytes.push(b'\n');
    fs::write(path, bytes).map_err(|error| RunLogError::WriteFile {
        path: path.display().to_string(),
        message: error.to_string(),
    })?;
    Ok(())
}

pub fn format_summary_marker(payload: &ForcingSummaryMarkerPayload) -> Result<String, RunLogError> {
    let json = serde_json::to_string(payload).map_err(RunLogError::Serialize)?;
    Ok(format!("{SUMMARY_MARKER_PREFIX}{json}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_file_path() -> PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time should be monotonic")
            .as_nanos();
        std::env::temp_dir()
            .join(format!("site_forcing_runlog_{stamp}"))
            .join("ALP1_v1/forcing_summary.json")
    }

    #[test]
    fn writes_pretty_json_with_trailing_newline() {
        let path = temp_file_path();
        write_pretty_json_with_newline(path.as_path(), &json!({"ok": true}))
            .expect("summary should write");

        let raw = fs::read_to_string(path.as_path()).expect("summary should be readable");
        assert!(raw.ends_with('\n'));
        assert!(raw.contains("\"ok\": true"));

        let _ = fs::remove_dir_all(
            path.parent()
                .and_then(Path::parent)
                .unwrap_or_else(|| Path::new("/tmp")),
        );
    }

    #[test]
    fn formats_summary_marker_line() {
        let line = format_summary_marker(&ForcingSummaryMarkerPayload {
            site_code: String::from("ALP1"),
            version: String::from("v1"),
            summary_path: String::from("/tar/ALP1_v1/forcing_summary.json"),
            archive_path: String::from("/tar/ALP1_v1/inputdata_versionv1_ALP1.tar"),
            artifacts: 4,
        })
        .expect("marker should format");

        assert!(line.starts_with("SITE_FORCING_SUMMARY_JSON: "));
        assert!(line.contains("\"site_code\":\"ALP1\""));
        assert!(!line.contains('\n'));
    }
}
