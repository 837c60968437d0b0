//! File-name conventions of the CTSM toolchain and the site extraction scripts.
//!
//! The tools do not report what they wrote, so every sub-step derives its
//! outputs from these transforms and then checks that the files exist.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("invalid output pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
    #[error("failed to inspect '{path}': {source}")]
    Inspect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The date a run was started, as the toolchain stamps it into file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStamp(NaiveDate);

impl RunStamp {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn today() -> Self {
        Self(chrono::Local::now().date_naive())
    }

    /// `yymmdd`, the `-usr_gdate`/`c<date>` form.
    pub fn ctsm(&self) -> String {
        self.0.format("%y%m%d").to_string()
    }

    pub fn iso(&self) -> String {
        self.0.format("%Y-%m-%d").to_string()
    }
}

pub fn grid_name(site_code: &str) -> String {
    format!("1x1_{site_code}")
}

pub fn grid_file_name(site_code: &str, stamp: &RunStamp) -> String {
    format!("SCRIPgrid_{site_code}_nomask_c{}.nc", stamp.ctsm())
}

/// Ocean-masked site map written by `mknoocnmap.pl` next to the SCRIP grid.
pub fn noocean_map_file_name(site_code: &str, stamp: &RunStamp) -> String {
    format!(
        "map_{site_code}_noocean_to_{site_code}_nomask_aave_da_{}.nc",
        stamp.ctsm()
    )
}

/// What `gen_domain -o S -l S` writes before it is renamed.
pub fn raw_domain_file_name(site_code: &str, stamp: &RunStamp) -> String {
    format!("domain.lnd.{site_code}_{site_code}.{}.nc", stamp.ctsm())
}

pub fn domain_file_name(site_code: &str, stamp: &RunStamp) -> String {
    format!("domain.lnd.{site_code}.{}.nc", stamp.ctsm())
}

/// `<stem>_S.nc` for an extraction script fed `input`. Only the file name of
/// `input` counts; a single trailing `.nc` is dropped.
pub fn site_extract_file_name(input: &str, site_code: &str) -> String {
    let file_name = input
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or(input);
    let stem = file_name.strip_suffix(".nc").unwrap_or(file_name);
    format!("{stem}_{site_code}.nc")
}

/// One file per stream and month over the inclusive year range.
pub fn climate_file_names(
    site_code: &str,
    streams: &[String],
    start_year: i32,
    end_year: i32,
) -> Vec<String> {
    let mut names = Vec::new();
    for stream in streams {
        for year in start_year..=end_year {
            for month in 1..=12 {
                names.push(format!(
                    "clmforc.GSWP3.c2011.0.5x0.5.{stream}.{site_code}.{year:04}-{month:02}.nc"
                ));
            }
        }
    }
    names
}

pub fn grid_outputs_pattern(site_code: &str) -> String {
    format!("*{}*.nc", glob::Pattern::escape(site_code))
}

pub fn mapping_outputs_pattern() -> &'static str {
    "map_*.nc"
}

pub fn domain_outputs_pattern(site_code: &str) -> String {
    format!("domain*{}*.nc", glob::Pattern::escape(site_code))
}

pub fn surface_outputs_pattern(site_code: &str) -> String {
    format!("surfdata_1x1_{}_*.nc", glob::Pattern::escape(site_code))
}

/// Regular files directly inside `dir` whose name matches `pattern`, sorted.
pub fn discover_matching(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>, DiscoveryError> {
    let full = format!(
        "{}/{}",
        glob::Pattern::escape(dir.to_string_lossy().as_ref()),
        pattern
    );
    let entries = glob::glob(full.as_str()).map_err(|source| DiscoveryError::Pattern {
        pattern: full.clone(),
        source,
    })?;

    let mut found = Vec::new();
    for entry in entries {
        let path = entry.map_err(|err| DiscoveryError::Inspect {
            path: err.path().to_path_buf(),
            source: err.into_error(),
        })?;
        if path.is_file() {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn stamp() -> RunStamp {
        RunStamp::new(NaiveDate::from_ymd_opt(2024, 3, 7).expect("valid date"))
    }

    #[test]
    fn run_stamp_formats() {
        assert_eq!(stamp().ctsm(), "240307");
        assert_eq!(stamp().iso(), "2024-03-07");
    }

    #[test]
    fn shared_grid_names() {
        assert_eq!(grid_name("ALP1"), "1x1_ALP1");
        assert_eq!(
            grid_file_name("ALP1", &stamp()),
            "SCRIPgrid_ALP1_nomask_c240307.nc"
        );
        assert_eq!(
            noocean_map_file_name("ALP1", &stamp()),
            "map_ALP1_noocean_to_ALP1_nomask_aave_da_240307.nc"
        );
    }

    #[test]
    fn domain_rename_drops_duplicated_site_code() {
        assert_eq!(
            raw_domain_file_name("ALP1", &stamp()),
            "domain.lnd.ALP1_ALP1.240307.nc"
        );
        assert_eq!(
            domain_file_name("ALP1", &stamp()),
            "domain.lnd.ALP1.240307.nc"
        );
    }

    #[test]
    fn extraction_output_uses_input_file_stem() {
        assert_eq!(
            site_extract_file_name("lnd/clm2/urbandata/CLM50_tbuildmax_Oleson_2016_0.9x1.25.nc", "ALP1"),
            "CLM50_tbuildmax_Oleson_2016_0.9x1.25_ALP1.nc"
        );
        assert_eq!(site_extract_file_name("popden.nc", "ALP1"), "popden_ALP1.nc");
        assert_eq!(site_extract_file_name("topo/", "ALP1"), "topo_ALP1.nc");
    }

    #[test]
    fn extraction_output_keeps_inner_nc_substrings() {
        assert_eq!(
            site_extract_file_name("atm/lis.ncdata.nc", "ALP1"),
            "lis.ncdata_ALP1.nc"
        );
    }

    #[test]
    fn climate_names_cover_every_month_per_stream() {
        let names = climate_file_names("ALP1", &[String::from("Prec")], 2000, 2001);
        assert_eq!(names.len(), 24);
        assert_eq!(names[0], "clmforc.GSWP3.c2011.0.5x0.5.Prec.ALP1.2000-01.nc");
        assert_eq!(names[23], "clmforc.GSWP3.c2011.0.5x0.5.Prec.ALP1.2001-12.nc");
    }

    #[test]
    fn discover_matches_only_files_sorted() {
        let dir = std::env::temp_dir().join(format!(
            "site_forcing_naming_[x]_{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be monotonic")
                .as_nanos()
        ));
        fs::create_dir_all(dir.join("map_dir.nc")).expect("dir");
        fs::write(dir.join("map_b.nc"), "").expect("write");
        fs::write(dir.join("map_a.nc"), "").expect("write");
        fs::write(dir.join("other.nc"), "").expect("write");

        let found = discover_matching(dir.as_path(), mapping_outputs_pattern()).expect("discover");
        assert_eq!(found, vec![dir.join("map_a.nc"), dir.join("map_b.nc")]);

        let _ = fs::remove_dir_all(dir);
    }
}
