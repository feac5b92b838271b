//! Out-of-process collaborators
//!
//! Raster processing, classifier training and vector conversion all run as
//! external programs (Orfeo Toolbox, GDAL, helper scripts). Every invocation
//! goes through a [`CommandRunner`] so it can be recorded in tests.

mod classifier;
mod raster;

pub use classifier::{
    create_classifier, Classifier, ClassifierKind, ClassifierMethod, OtbClassifier, PredictJob,
    ScikitClassifier, ScikitSettings, TrainJob,
};
pub use raster::{
    band_count, samples_per_class, HelperTools, OtbRasterEngine, RasterEngine, RasterJob,
    RasterOp, SamplingStrategy,
};

use crate::error::{AlcdError, Result};
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

/// A program plus its argument list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn arg_path(self, path: &Path) -> Self {
        self.arg(path.display().to_string())
    }

    /// Append a `-flag value` pair
    pub fn flag(self, flag: &str, value: impl Into<String>) -> Self {
        self.arg(flag).arg(value)
    }

    /// Append a `-flag path` pair
    pub fn flag_path(self, flag: &str, path: &Path) -> Self {
        self.arg(flag).arg_path(path)
    }

    /// Shell-like rendering for logs
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                line.push_str(&format!("\"{}\"", arg));
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

/// Captured output of a successful command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Executes external commands
pub trait CommandRunner {
    /// Run to completion. Non-zero exit becomes [`AlcdError::ExternalTool`].
    fn run(&self, command: &ToolCommand) -> Result<ToolOutput>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, command: &ToolCommand) -> Result<ToolOutput> {
        (**self).run(command)
    }
}

/// Runs commands as child processes of this one
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, command: &ToolCommand) -> Result<ToolOutput> {
        debug!(command = %command.display(), "Running external tool");

        let output = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| AlcdError::ExternalTool {
                tool: command.program.clone(),
                status: format!("failed to spawn: {}", e),
                output: String::new(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(AlcdError::ExternalTool {
                tool: command.program.clone(),
                status: output.status.to_string(),
                output: format!("{}{}", stdout, stderr),
            });
        }

        Ok(ToolOutput { stdout, stderr })
    }
}
