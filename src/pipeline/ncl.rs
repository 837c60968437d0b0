use std::path::{Path, PathBuf};

use crate::pipeline::runtime::CommandSpec;

pub const NCL_PROGRAM: &str = "ncl";

#[derive(Debug, Clone, PartialEq)]
pub enum NclValue {
    Text(String),
    Integer(i64),
    Float(f64),
}

impl NclValue {
    /// NCL reads `name="text"` as a string and a bare literal as a number.
    fn render(&self, key: &str) -> String {
        match self {
            Self::Text(value) => format!("{key}=\"{value}\""),
            Self::Integer(value) => format!("{key}={value}"),
            Self::Float(value) => format!("{key}={value}"),
        }
    }
}

/// One run of a site extraction script with its command-line assignments.
#[derive(Debug, Clone, PartialEq)]
pub struct NclInvocation {
    script: PathBuf,
    assignments: Vec<(String, NclValue)>,
}

impl NclInvocation {
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
            assignments: Vec::new(),
        }
    }

    pub fn text(mut self, key: &str, value: impl Into<String>) -> Self {
        self.assignments
            .push((key.to_string(), NclValue::Text(value.into())));
        self
    }

    pub fn integer(mut self, key: &str, value: i64) -> Self {
        self.assignments
            .push((key.to_string(), NclValue::Integer(value)));
        self
    }

    pub fn float(mut self, key: &str, value: f64) -> Self {
        self.assignments.push((key.to_string(), NclValue::Float(value)));
        self
    }

    /// The extraction scripts concatenate file names onto `out_file_path`,
    /// so it always ends with a separator.
    pub fn output_dir(self, dir: &Path) -> Self {
        let mut rendered = dir.display().to_string();
        if !rendered.ends_with('/') {
            rendered.push('/');
        }
        self.text("out_file_path", rendered)
    }

    /// Assignments in insertion order, then the script path.
    pub fn arguments(&self) -> Vec<String> {
        let mut args: Vec<String> = self
            .assignments
            .iter()
            .map(|(key, value)| value.render(key))
            .collect();
        args.push(self.script.display().to_string());
        args
    }

    pub fn into_command(self, cwd: &Path) -> CommandSpec {
        CommandSpec::new(NCL_PROGRAM, cwd).args(self.arguments())
    }
}
