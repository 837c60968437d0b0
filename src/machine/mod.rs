//! Named execution hosts and the environment modules each tool category needs.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_MACHINE: &str = "saga";

const PURGE_COMMAND: &str = "module purge;";

/// Tool category → environment module to load before running that tool.
pub type ModuleMap = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ToolCategory {
    Ncl,
    Mapping,
    Domain,
    Surface,
}

impl ToolCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ncl => "ncl",
            Self::Mapping => "mapping",
            Self::Domain => "domain",
            Self::Surface => "surface",
        }
    }
}

#[derive(Debug, Error)]
pub enum MachineProfileError {
    #[error("failed to read machine profiles '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse machine profiles YAML '{origin}': {source}")]
    Parse {
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("unknown machine '{name}' (known: {})", .known.join(", "))]
    UnknownMachine { name: String, known: Vec<String> },
    #[error("machine '{machine}' defines no module for tool category '{category}'")]
    UnknownToolCategory {
        machine: String,
        category: &'static str,
    },
}

#[derive(Debug, Deserialize)]
struct MachineProfileDocument {
    #[serde(default)]
    machines: BTreeMap<String, MachineEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct MachineEntry {
    #[serde(default)]
    module_names: ModuleMap,
    #[serde(default)]
    environment: BTreeMap<String, String>,
}

/// Every machine profile defined in the profile document.
#[derive(Debug, Clone, Default)]
pub struct MachineProfileStore {
    machines: BTreeMap<String, MachineEntry>,
}

impl MachineProfileStore {
    pub fn load(path: &Path) -> Result<Self, MachineProfileError> {
        let raw = fs::read_to_string(path).map_err(|source| MachineProfileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(raw.as_str(), path.display().to_string().as_str())
    }

    pub fn from_yaml_str(raw: &str, origin: &str) -> Result<Self, MachineProfileError> {
        let document: MachineProfileDocument =
            serde_yaml::from_str(raw).map_err(|source| MachineProfileError::Parse {
                origin: origin.to_string(),
                source,
            })?;
        Ok(Self {
            machines: document.machines,
        })
    }

    pub fn names(&self) -> Vec<String> {
        self.machines.keys().cloned().collect()
    }

    pub fn resolve(&self, name: &str) -> Result<MachineProfile, MachineProfileError> {
        let entry =
            self.machines
                .get(name)
                .ok_or_else(|| MachineProfileError::UnknownMachine {
                    name: name.to_string(),
                    known: self.names(),
                })?;
        Ok(MachineProfile {
            name: name.to_string(),
            modules: entry.module_names.clone(),
            environment: entry.environment.clone(),
        })
    }
}

/// A resolved machine. Immutable once built and shared read-only across runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineProfile {
    name: String,
    modules: ModuleMap,
    environment: BTreeMap<String, String>,
}

impl MachineProfile {
    pub fn new(name: impl Into<String>, modules: ModuleMap) -> Self {
        Self {
            name: name.into(),
            modules,
            environment: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Variables exported to every tool launched on this machine.
    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    pub fn module_for(&self, category: ToolCategory) -> Result<&str, MachineProfileError> {
        self.modules
            .get(category.as_str())
            .map(String::as_str)
            .ok_or_else(|| MachineProfileError::UnknownToolCategory {
                machine: self.name.clone(),
                category: category.as_str(),
            })
    }

    pub fn generate_load_command(
        &self,
        category: ToolCategory,
    ) -> Result<String, MachineProfileError> {
        Ok(format!("module load {};", self.module_for(category)?))
    }

    pub fn purge_command() -> &'static str {
        PURGE_COMMAND
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PROFILES: &str = r#"
machines:
  saga:
    module_names:
      ncl: NCL/6.6.2-intel-2019b
      domain: netCDF-Fortran/4.5.2-iimpi-2019b
    environment:
      NCARG_ROOT: /cluster/software/NCL/6.6.2
  laptop:
    module_names: {}
"#;

    #[test]
    fn resolves_named_machine_and_renders_load_command() {
        let store = MachineProfileStore::from_yaml_str(PROFILES, "inline").expect("parse");
        let saga = store.resolve("saga").expect("saga should resolve");

        assert_eq!(saga.name(), "saga");
        assert_eq!(
            saga.generate_load_command(ToolCategory::Ncl)
                .expect("ncl module"),
            "module load NCL/6.6.2-intel-2019b;"
        );
        assert_eq!(
            saga.environment().get("NCARG_ROOT").map(String::as_str),
            Some("/cluster/software/NCL/6.6.2")
        );
        assert_eq!(MachineProfile::purge_command(), "module purge;");
    }

    #[test]
    fn unknown_machine_lists_known_names() {
        let store = MachineProfileStore::from_yaml_str(PROFILES, "inline").expect("parse");
        let err = store.resolve("fram").expect_err("fram is not defined");
        match err {
            MachineProfileError::UnknownMachine { name, known } => {
                assert_eq!(name, "fram");
                assert_eq!(known, vec![String::from("laptop"), String::from("saga")]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_tool_category_is_a_configuration_error() {
        let store = MachineProfileStore::from_yaml_str(PROFILES, "inline").expect("parse");
        let laptop = store.resolve("laptop").expect("laptop should resolve");
        let err = laptop
            .generate_load_command(ToolCategory::Surface)
            .expect_err("surface is not configured");
        assert!(matches!(
            err,
            MachineProfileError::UnknownToolCategory {
                category: "surface",
                ..
            }
        ));
    }

    #[test]
    fn malformed_document_fails_to_parse() {
        let err = MachineProfileStore::from_yaml_str("machines: [1, 2]", "inline")
            .expect_err("sequence is not a machine map");
        assert!(matches!(err, MachineProfileError::Parse { .. }));
    }
}
