use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::cli::run_to_file;
use super::{ConversionError, PrimaryConverter};

/// `markmap-cli` wrapper.
#[derive(Debug, Clone)]
pub struct MarkmapCli {
    cli_path: PathBuf,
    timeout: Duration,
}

impl MarkmapCli {
    pub fn new(cli_path: PathBuf, timeout: Duration) -> Self {
        Self { cli_path, timeout }
    }
}

#[async_trait]
impl PrimaryConverter for MarkmapCli {
    async fn convert(&self, source: &Path, output: &Path) -> Result<(), ConversionError> {
        let mut command = Command::new(&self.cli_path);
        command
            .arg(source)
            .arg("--no-open")
            .arg("--output")
            .arg(output);

        run_to_file(
            command,
            &self.cli_path,
            self.timeout,
            output,
            "application::render::markmap",
        )
        .await
    }
}
