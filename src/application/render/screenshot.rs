use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::cli::run_to_file;
use super::{ScreenshotError, SecondaryRenderer};

/// Captures a PNG of the mind map with a headless Chromium-family browser.
///
/// `settle` is handed to the browser as its virtual time budget, which lets
/// the page's scripts lay out the map before the capture.
#[derive(Debug, Clone)]
pub struct HeadlessScreenshot {
    browser_path: PathBuf,
    timeout: Duration,
    width: u32,
    height: u32,
    settle: Duration,
}

impl HeadlessScreenshot {
    pub fn new(
        browser_path: PathBuf,
        timeout: Duration,
        width: u32,
        height: u32,
        settle: Duration,
    ) -> Self {
        Self {
            browser_path,
            timeout,
            width,
            height,
            settle,
        }
    }
}

#[async_trait]
impl SecondaryRenderer for HeadlessScreenshot {
    async fn render(&self, html: &Path, output: &Path) -> Result<(), ScreenshotError> {
        let html = std::path::absolute(html).unwrap_or_else(|_| html.to_path_buf());
        let mut command = Command::new(&self.browser_path);
        command
            .arg("--headless")
            .arg("--disable-gpu")
            .arg("--hide-scrollbars")
            .arg(format!("--window-size={},{}", self.width, self.height))
            .arg(format!("--virtual-time-budget={}", self.settle.as_millis()))
            .arg(format!("--screenshot={}", output.display()))
            .arg(format!("file://{}", html.display()));

        run_to_file(
            command,
            &self.browser_path,
            self.timeout,
            output,
            "application::render::screenshot",
        )
        .await
    }
}
