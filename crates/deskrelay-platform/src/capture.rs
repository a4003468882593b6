//! Screen capture through a screenshot command writing to a temp file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use deskrelay_core::{CaptureError, ScreenSource};

use crate::{command::CommandTemplate, shell::Platform, shell::resolve_executable_path};

const MACOS_CAPTURE: &str = "screencapture -x -t png {output}";

const LINUX_CAPTURE: [&str; 3] = [
    "grim {output}",
    "gnome-screenshot -f {output}",
    "import -window root {output}",
];

/// Screen source running a capture command per frame.
///
/// Each capture writes into its own scratch directory, removed when the
/// capture finishes or is dropped mid-run.
#[derive(Debug, Clone)]
pub struct CommandScreenSource {
    template: Option<CommandTemplate>,
    scratch_dir: PathBuf,
}

impl CommandScreenSource {
    /// Use an explicit capture command; `{output}` is replaced by the file path.
    #[must_use]
    pub fn new(template: CommandTemplate) -> Self {
        Self::from_template(Some(template))
    }

    fn from_template(template: Option<CommandTemplate>) -> Self {
        Self {
            template,
            scratch_dir: std::env::temp_dir(),
        }
    }

    /// Create scratch directories under `dir` instead of the system temp dir.
    #[must_use]
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    /// Pick the first capture command installed on this machine.
    ///
    /// Without one, every capture fails with [`CaptureError::Unavailable`].
    pub async fn detect() -> Self {
        let candidates: &[&str] = match Platform::current() {
            Platform::MacOs => &[MACOS_CAPTURE],
            Platform::Linux => &LINUX_CAPTURE,
            Platform::Windows => &[],
        };

        for candidate in candidates {
            let template = CommandTemplate::new(*candidate);
            let Some(program) = template.program() else {
                continue;
            };
            if resolve_executable_path(&program).await.is_some() {
                tracing::info!(command = %candidate, "Screen capture command selected");
                return Self::new(template);
            }
        }

        tracing::warn!("No screen capture command found, frames will not be sent");
        Self::from_template(None)
    }

    #[must_use]
    pub const fn template(&self) -> Option<&CommandTemplate> {
        self.template.as_ref()
    }
}

#[async_trait]
impl ScreenSource for CommandScreenSource {
    async fn capture(&self) -> Result<Vec<u8>, CaptureError> {
        let template = self.template.as_ref().ok_or(CaptureError::Unavailable)?;
        let scratch = tempfile::Builder::new()
            .prefix("deskrelay-")
            .tempdir_in(&self.scratch_dir)?;

        capture_to(template, &scratch.path().join("frame.png")).await
    }
}

async fn capture_to(template: &CommandTemplate, output: &Path) -> Result<Vec<u8>, CaptureError> {
    template.render(output)?.run().await?;
    Ok(tokio::fs::read(output).await?)
}
