//! Command building and execution utilities.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use deskrelay_core::{CaptureError, EffectorError};
use thiserror::Error;
use tokio::process::Command;

use crate::shell::resolve_executable_path;

/// Placeholder replaced by the output path in a [`CommandTemplate`].
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// Command error.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Command template cannot be parsed: {0}")]
    InvalidTemplate(String),
    #[error("Command is empty after parsing")]
    EmptyCommand,
    #[error("Executable not found: {0}")]
    NotFound(String),
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CommandError> for EffectorError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::NotFound(program) => Self::ExecutableNotFound(program),
            CommandError::Failed {
                program,
                status,
                stderr,
            } => Self::CommandFailed {
                program,
                status,
                stderr,
            },
            CommandError::Io(e) => Self::Io(e),
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<CommandError> for CaptureError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::Io(e) => Self::Io(e),
            other => Self::Command(other.to_string()),
        }
    }
}

/// Parsed command parts (program + args).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandParts {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandParts {
    /// Create new command parts.
    #[must_use]
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Resolve the program to an absolute path.
    ///
    /// # Errors
    /// Returns error if executable not found.
    pub async fn into_resolved(self) -> Result<(PathBuf, Vec<String>), CommandError> {
        let Self { program, args } = self;
        let executable = resolve_executable_path(&program)
            .await
            .ok_or(CommandError::NotFound(program))?;
        Ok((executable, args))
    }

    /// Run to completion and fail on a non-zero exit status.
    ///
    /// # Errors
    /// Returns error if the program is missing, cannot start, or fails.
    pub async fn run(self) -> Result<(), CommandError> {
        let program = self.program.clone();
        let (executable, args) = self.into_resolved().await?;
        tracing::debug!(%program, ?args, "Running command");

        let output = Command::new(executable)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        if output.status.success() {
            Ok(())
        } else {
            Err(CommandError::Failed {
                program,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    /// Start the program and leave it running.
    ///
    /// # Errors
    /// Returns error if the program is missing or cannot start.
    pub async fn spawn_detached(self) -> Result<(), CommandError> {
        let program = self.program.clone();
        let (executable, args) = self.into_resolved().await?;
        tracing::debug!(%program, ?args, "Spawning detached command");

        Command::new(executable)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        Ok(())
    }
}

/// Shell-style command line with an `{output}` placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    base: String,
}

impl CommandTemplate {
    #[must_use]
    pub fn new<S: Into<String>>(base: S) -> Self {
        Self { base: base.into() }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.base
    }

    /// Program named by the template, if it parses.
    #[must_use]
    pub fn program(&self) -> Option<String> {
        shlex::split(&self.base).and_then(|parts| parts.into_iter().next())
    }

    /// Build the command, substituting `output` for the placeholder.
    ///
    /// # Errors
    /// Returns error if the template cannot be parsed or is empty.
    pub fn render(&self, output: &Path) -> Result<CommandParts, CommandError> {
        let output = output.to_string_lossy();
        let mut parts: Vec<String> = shlex::split(&self.base)
            .ok_or_else(|| CommandError::InvalidTemplate(self.base.clone()))?
            .into_iter()
            .map(|part| part.replace(OUTPUT_PLACEHOLDER, &output))
            .collect();

        if parts.is_empty() {
            return Err(CommandError::EmptyCommand);
        }

        let program = parts.remove(0);
        Ok(CommandParts::new(program, parts))
    }
}
