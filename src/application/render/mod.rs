//! External renderers used by the pipeline.
//!
//! The pipeline only sees the two traits below. The concrete
//! implementations shell out to a CLI each.

mod cli;
mod markmap;
mod screenshot;

use std::path::Path;

use async_trait::async_trait;

pub use cli::CliError;
pub use markmap::MarkmapCli;
pub use screenshot::HeadlessScreenshot;

/// Failure of the primary (Markdown to HTML) conversion.
pub type ConversionError = CliError;
/// Failure of the secondary (HTML to PNG) rendering.
pub type ScreenshotError = CliError;

/// Synchronous Markdown to mind-map conversion.
#[async_trait]
pub trait PrimaryConverter: Send + Sync {
    /// Convert `source` and write the result to `output`.
    async fn convert(&self, source: &Path, output: &Path) -> Result<(), ConversionError>;
}

/// Rasterizes a converted mind map.
#[async_trait]
pub trait SecondaryRenderer: Send + Sync {
    /// Render `html` and write the image to `output`. Waiting for the page to
    /// settle is up to the implementation.
    async fn render(&self, html: &Path, output: &Path) -> Result<(), ScreenshotError>;
}
