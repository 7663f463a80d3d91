#![allow(dead_code)]

use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use markmap_api_types::TaskView;
use markmap_service::application::links::LinkBuilder;
use markmap_service::application::pipeline::RenderPipeline;
use markmap_service::application::render::{ConversionError, PrimaryConverter};
use markmap_service::application::tasks::TaskRegistry;
use markmap_service::application::workers::WorkerPool;
use markmap_service::cache::{CacheConfig, ContentCache};
use markmap_service::infra::storage::ArtifactStore;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

pub const PUBLIC_URL: &str = "http://maps.test:5003";

/// Writes `<html>` wrapping the source and counts invocations next to itself.
pub const FAKE_MARKMAP: &str = r#"echo run >> "$(dirname "$0")/markmap.calls"
src="$1"
out=""
while [ "$#" -gt 0 ]; do
  case "$1" in
    --output) shift; out="$1" ;;
  esac
  shift
done
printf '<html>%s</html>' "$(cat "$src")" > "$out"
"#;

pub const FAILING_MARKMAP: &str = r#"echo run >> "$(dirname "$0")/markmap.calls"
echo "markmap: unexpected heading level" >&2
exit 2
"#;

pub const FAKE_BROWSER: &str = r#"out=""
for arg in "$@"; do
  case "$arg" in
    --screenshot=*) out="${arg#--screenshot=}" ;;
  esac
done
printf 'PNG' > "$out"
"#;

pub const FAILING_BROWSER: &str = r#"out=""
for arg in "$@"; do
  case "$arg" in
    --screenshot=*) out="${arg#--screenshot=}" ;;
  esac
done
printf 'partial' > "$out"
echo "chromium: page crashed" >&2
exit 1
"#;

#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\nset -eu\n{body}")).expect("write script");
    let mut perms = fs::metadata(&path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("set perms");
    path
}

/// In-process converter for tests that do not need a real executable.
pub struct EchoConverter;

#[async_trait]
impl PrimaryConverter for EchoConverter {
    async fn convert(&self, source: &Path, output: &Path) -> Result<(), ConversionError> {
        let markdown = tokio::fs::read_to_string(source)
            .await
            .expect("read source");
        tokio::fs::write(output, format!("<html>{markdown}</html>"))
            .await
            .expect("write html");
        Ok(())
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub pipeline: RenderPipeline,
    pub shutdown: CancellationToken,
}

impl Harness {
    pub fn store(&self) -> &ArtifactStore {
        self.pipeline.store()
    }

    /// Number of times the fake converter script ran.
    pub fn converter_calls(&self) -> usize {
        fs::read_to_string(self.dir.path().join("bin").join("markmap.calls"))
            .map(|text| text.lines().count())
            .unwrap_or(0)
    }
}

pub fn pipeline_with(
    dir: &TempDir,
    converter: Arc<dyn PrimaryConverter>,
    shutdown: &CancellationToken,
) -> RenderPipeline {
    let store = ArtifactStore::new(dir.path().join("data")).expect("store");
    let workers = WorkerPool::start(
        NonZeroUsize::new(2).expect("size"),
        NonZeroUsize::new(8).expect("capacity"),
        shutdown.clone(),
    );
    let links = LinkBuilder::new(&Url::parse(PUBLIC_URL).expect("url"));

    RenderPipeline::new(
        store,
        ContentCache::new(&CacheConfig::default()),
        TaskRegistry::new(),
        workers,
        links,
        converter,
    )
}

/// Pipeline wired to fake CLI collaborators. A `browser` of `None` disables
/// snapshots.
#[cfg(unix)]
pub fn script_harness(markmap: &str, browser: Option<&str>) -> Harness {
    use markmap_service::application::render::{HeadlessScreenshot, MarkmapCli};

    let dir = TempDir::new().expect("temp dir");
    let bin = dir.path().join("bin");
    fs::create_dir_all(&bin).expect("bin dir");

    let markmap = write_script(&bin, "markmap", markmap);
    let shutdown = CancellationToken::new();
    let mut pipeline = pipeline_with(
        &dir,
        Arc::new(MarkmapCli::new(markmap, Duration::from_secs(10))),
        &shutdown,
    );
    if let Some(body) = browser {
        let browser = write_script(&bin, "chromium", body);
        pipeline = pipeline.with_screenshot(Arc::new(HeadlessScreenshot::new(
            browser,
            Duration::from_secs(10),
            800,
            600,
            Duration::from_millis(10),
        )));
    }

    Harness {
        dir,
        pipeline,
        shutdown,
    }
}

pub async fn wait_terminal(tasks: &TaskRegistry, id: Uuid) -> TaskView {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let view = tasks.get(id).expect("task registered").view();
            if view.state.is_terminal() {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("task reached a terminal state")
}
