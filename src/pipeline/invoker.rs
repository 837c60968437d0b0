use std::io;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::pipeline::runtime::{CommandSpec, SharedToolCommandRunner};

#[derive(Debug, Error)]
pub enum ExternalToolError {
    #[error("failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("'{program}' exited with status {status_code}: {stderr}\n  command: {command_line}")]
    NonZeroExit {
        program: String,
        status_code: i32,
        stderr: String,
        command_line: String,
    },
}

/// Runs one tool to completion and turns a nonzero exit into an error.
#[derive(Clone)]
pub struct ExternalToolInvoker {
    runner: SharedToolCommandRunner,
}

impl ExternalToolInvoker {
    pub fn new(runner: SharedToolCommandRunner) -> Self {
        Self { runner }
    }

    /// Blocks until the tool exits and returns its standard output.
    pub fn run(&self, spec: &CommandSpec) -> Result<String, ExternalToolError> {
        let command_line = spec.display_line();
        info!(program = %spec.program, cwd = %spec.cwd.display(), "running external tool");
        debug!(command = %command_line, "rendered command");

        let output = self.runner.run(spec)?;
        let stderr = output.stderr.trim();
        if output.status_code != 0 {
            warn!(
                program = %spec.program,
                status_code = output.status_code,
                "external tool failed"
            );
            return Err(ExternalToolError::NonZeroExit {
                program: spec.program.clone(),
                status_code: output.status_code,
                stderr: stderr.to_string(),
                command_line,
            });
        }

        // Several toolchain scripts report progress on stderr.
        if !stderr.is_empty() {
            info!(program = %spec.program, stderr = %stderr, "tool diagnostics");
        }
        if !output.stdout.trim().is_empty() {
            debug!(program = %spec.program, stdout = %output.stdout.trim(), "tool output");
        }
        Ok(output.stdout)
    }
}
