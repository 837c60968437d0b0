use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

use thiserror::Error;

use crate::machine::{MachineProfile, MachineProfileError};
use crate::pipeline::invoker::ExternalToolError;
use crate::pipeline::naming::DiscoveryError;
use crate::pipeline::packaging::PackagingError;
use crate::pipeline::runlog::RunLogError;
use crate::pipeline::settings_layer::SettingsLayerError;
use crate::recipe::RecipeError;
use crate::storage::StorageError;

/// Purges the environment, loads `$1` modules named by the following
/// arguments, runs the remaining arguments as the tool, then purges again and
/// exits with the tool's status. Values only ever arrive as positional
/// parameters.
const MODULE_WRAPPER_SCRIPT: &str = r#"count="$1"
shift
module purge
while [ "$count" -gt 0 ]; do
  module load "$1" || exit 97
  shift
  count=$((count - 1))
done
"$@"
status=$?
module purge
exit "$status"
"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
    pub modules: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: BTreeMap::new(),
            modules: Vec::new(),
        }
    }

    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn args<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(values.into_iter().map(Into::into));
        self
    }

    pub fn module(mut self, name: impl Into<String>) -> Self {
        self.modules.push(name.into());
        self
    }

    pub fn envs(mut self, vars: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Shell-equivalent rendering, for logs only. Never executed.
    pub fn display_line(&self) -> String {
        let mut parts = Vec::new();
        if !self.modules.is_empty() {
            parts.push(MachineProfile::purge_command().to_string());
            for module in &self.modules {
                parts.push(format!("module load {};", quote_for_display(module)));
            }
        }
        let mut invocation = vec![quote_for_display(self.program.as_str())];
        invocation.extend(self.args.iter().map(|a| quote_for_display(a)));
        parts.push(format!("{};", invocation.join(" ")));
        if !self.modules.is_empty() {
            parts.push(MachineProfile::purge_command().to_string());
        }
        parts.join(" ")
    }
}

fn quote_for_display(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || "-_./=,:+@%".contains(ch));
    if plain {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r#"'\''"#))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status_code: i32,
    pub stdout: String,
    pub stderr: String,
}

pub trait ToolCommandRunner: Send + Sync + 'static {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExternalToolError>;
}

pub type SharedToolCommandRunner = Arc<dyn ToolCommandRunner>;

#[derive(Debug, Default, Clone)]
pub struct StdToolCommandRunner;

impl StdToolCommandRunner {
    fn command_for(spec: &CommandSpec) -> Command {
        if spec.modules.is_empty() {
            let mut command = Command::new(spec.program.as_str());
            command.args(spec.args.iter().map(String::as_str));
            return command;
        }
        let mut command = Command::new("bash");
        command
            .arg("-lc")
            .arg(MODULE_WRAPPER_SCRIPT)
            .arg("site-forcing")
            .arg(spec.modules.len().to_string())
            .args(spec.modules.iter().map(String::as_str))
            .arg(spec.program.as_str())
            .args(spec.args.iter().map(String::as_str));
        command
    }
}

impl ToolCommandRunner for StdToolCommandRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExternalToolError> {
        let output = Self::command_for(spec)
            .current_dir(spec.cwd.as_path())
            .envs(spec.env.iter())
            .output()
            .map_err(|source| ExternalToolError::Launch {
                program: spec.program.clone(),
                source,
            })?;

        Ok(CommandOutput {
            status_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(output.stdout.as_slice()).to_string(),
            stderr: String::from_utf8_lossy(output.stderr.as_slice()).to_string(),
        })
    }
}

/// Bad or missing recipe fields, unknown machines or tool categories, and
/// unreadable settings. Always reported before any external tool runs.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error(transparent)]
    Recipe(#[from] RecipeError),
    #[error(transparent)]
    Machine(#[from] MachineProfileError),
    #[error(transparent)]
    Settings(#[from] SettingsLayerError),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    ExternalTool(#[from] ExternalToolError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("{step}: failed to {action} '{path}': {source}")]
    Filesystem {
        step: &'static str,
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{consumer} needs the {input} from an earlier stage, but it has not been produced")]
    MissingStageInput {
        consumer: &'static str,
        input: &'static str,
    },
    #[error("{step}: expected output '{path}' was not produced")]
    MissingOutput { step: &'static str, path: PathBuf },
    #[error("{step}: no files matching '{pattern}' were produced")]
    NoOutputs {
        step: &'static str,
        pattern: String,
    },
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Packaging(#[from] PackagingError),
    #[error(transparent)]
    RunLog(#[from] RunLogError),
}

impl From<RecipeError> for PipelineError {
    fn from(value: RecipeError) -> Self {
        Self::Configuration(value.into())
    }
}

impl From<MachineProfileError> for PipelineError {
    fn from(value: MachineProfileError) -> Self {
        Self::Configuration(value.into())
    }
}

impl From<SettingsLayerError> for PipelineError {
    fn from(value: SettingsLayerError) -> Self {
        Self::Configuration(value.into())
    }
}
