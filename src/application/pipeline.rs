//! Submission pipeline: dedupe, convert, schedule the snapshot.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use markmap_api_types::ArtifactResponse;
use metrics::histogram;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::error::SubmitError;
use crate::application::links::LinkBuilder;
use crate::application::render::{PrimaryConverter, SecondaryRenderer};
use crate::application::tasks::TaskRegistry;
use crate::application::workers::{WorkerPool, WorkerPoolError};
use crate::cache::{CachedArtifact, Claim, ContentCache, Flight};
use crate::domain::artifacts::ArtifactKind;
use crate::domain::fingerprint::Fingerprint;
use crate::infra::storage::{ArtifactStore, NewArtifactSet};

pub(crate) const METRIC_CONVERT_MS: &str = "markmap_convert_ms";

const SOURCE: &str = "application::pipeline";

#[derive(Clone)]
pub struct RenderPipeline {
    store: ArtifactStore,
    cache: ContentCache,
    tasks: TaskRegistry,
    workers: WorkerPool,
    links: LinkBuilder,
    converter: Arc<dyn PrimaryConverter>,
    screenshot: Option<Arc<dyn SecondaryRenderer>>,
}

impl RenderPipeline {
    pub fn new(
        store: ArtifactStore,
        cache: ContentCache,
        tasks: TaskRegistry,
        workers: WorkerPool,
        links: LinkBuilder,
        converter: Arc<dyn PrimaryConverter>,
    ) -> Self {
        Self {
            store,
            cache,
            tasks,
            workers,
            links,
            converter,
            screenshot: None,
        }
    }

    /// Schedule a snapshot for every new artifact set.
    pub fn with_screenshot(mut self, renderer: Arc<dyn SecondaryRenderer>) -> Self {
        self.screenshot = Some(renderer);
        self
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    pub fn links(&self) -> &LinkBuilder {
        &self.links
    }

    /// Turn a Markdown document into an artifact set, or return the set
    /// already produced for identical bytes.
    ///
    /// Concurrent submissions of the same bytes share one conversion.
    pub async fn submit(
        &self,
        content: &[u8],
        label: Option<&str>,
    ) -> Result<ArtifactResponse, SubmitError> {
        let text = std::str::from_utf8(content)
            .map_err(|_| SubmitError::validation("content must be UTF-8 text"))?;
        if text.trim().is_empty() {
            return Err(SubmitError::validation("content is empty"));
        }

        let fingerprint = Fingerprint::of(content);
        loop {
            match self.cache.claim(&fingerprint) {
                Claim::Hit(response) => {
                    debug!(
                        target = SOURCE,
                        op = "pipeline::submit",
                        result = "cache_hit",
                        fingerprint = %fingerprint,
                        base_name = %response.base_name,
                        "Serving cached artifact set"
                    );
                    return Ok(response);
                }
                Claim::Wait(waiter) => match waiter.wait().await {
                    Some(Ok(response)) => return Ok(response),
                    Some(Err(message)) => return Err(SubmitError::InFlightFailed(message)),
                    // Leader went away without an outcome; claim again.
                    None => continue,
                },
                Claim::Lead(flight) => return self.lead(flight, content, label).await,
            }
        }
    }

    async fn lead(
        &self,
        flight: Flight,
        content: &[u8],
        label: Option<&str>,
    ) -> Result<ArtifactResponse, SubmitError> {
        let started_at = Instant::now();
        let timestamp = OffsetDateTime::now_utc().unix_timestamp();

        let set = match self.store.create_set(label, timestamp, content).await {
            Ok(set) => set,
            Err(err) => {
                error!(
                    target = SOURCE,
                    op = "pipeline::submit",
                    result = "storage_error",
                    error = %err,
                    "Failed to write source document"
                );
                flight.fail(err.to_string());
                return Err(err.into());
            }
        };

        let html_path = self.store.path_for(&set.base_name, ArtifactKind::Html);
        let convert_started_at = Instant::now();
        if let Err(err) = self.converter.convert(&set.source_path, &html_path).await {
            error!(
                target = SOURCE,
                op = "pipeline::submit",
                result = "conversion_error",
                base_name = %set.base_name,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                error = %err,
                "Markmap conversion failed"
            );
            flight.fail(err.diagnostic());
            return Err(err.into());
        }
        histogram!(METRIC_CONVERT_MS).record(convert_started_at.elapsed().as_secs_f64() * 1000.0);

        let mut response = self.response_for(&set);
        let screenshot = self.screenshot.clone().map(|renderer| {
            let task_id = self.tasks.create(format!(
                "rendering {}",
                ArtifactKind::Png.file_name(&set.base_name)
            ));
            response.task_id = Some(task_id);
            (task_id, renderer)
        });

        let fingerprint = flight.fingerprint().clone();
        let files = vec![set.source_path.clone(), html_path.clone()];
        let response = flight.complete(CachedArtifact::new(response, files));

        if let Some((task_id, renderer)) = screenshot {
            self.schedule_screenshot(fingerprint, task_id, &set.base_name, html_path, renderer);
        }

        info!(
            target = SOURCE,
            op = "pipeline::submit",
            result = "rendered",
            base_name = %response.base_name,
            task_id = ?response.task_id,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Artifact set created"
        );
        Ok(response)
    }

    fn response_for(&self, set: &NewArtifactSet) -> ArtifactResponse {
        let html = self.links.link(&set.base_name, ArtifactKind::Html);
        ArtifactResponse {
            success: true,
            message: "markmap rendered".to_string(),
            base_name: set.base_name.clone(),
            timestamp: set.timestamp,
            file_name: html.file_name.clone(),
            preview_url: self.links.preview(&html.file_name),
            source: self.links.link(&set.base_name, ArtifactKind::Source),
            html,
            png: None,
            png_ready: false,
            task_id: None,
        }
    }

    fn schedule_screenshot(
        &self,
        fingerprint: Fingerprint,
        task_id: Uuid,
        base_name: &str,
        html_path: PathBuf,
        renderer: Arc<dyn SecondaryRenderer>,
    ) {
        let cache = self.cache.clone();
        let tasks = self.tasks.clone();
        let store = self.store.clone();
        let link = self.links.link(base_name, ArtifactKind::Png);
        let png_path = self.store.path_for(base_name, ArtifactKind::Png);
        let base_name = base_name.to_string();

        let job = async move {
            let started_at = Instant::now();
            match renderer.render(&html_path, &png_path).await {
                Ok(()) => {
                    let file_name = link.file_name.clone();
                    let patched = cache.patch(&fingerprint, |entry| {
                        if entry.response.base_name == base_name {
                            entry.attach_png(link, png_path.clone());
                        }
                    });
                    tasks.complete(task_id, true, format!("{file_name} is ready"));
                    info!(
                        target = SOURCE,
                        op = "pipeline::screenshot",
                        result = "completed",
                        task_id = %task_id,
                        base_name = %base_name,
                        cache_patched = patched,
                        elapsed_ms = started_at.elapsed().as_millis() as u64,
                        "Snapshot rendered"
                    );
                }
                Err(err) => {
                    if let Err(remove_err) = store.remove(&png_path).await {
                        warn!(
                            target = SOURCE,
                            op = "pipeline::screenshot",
                            path = %png_path.display(),
                            error = %remove_err,
                            "Failed to remove partial snapshot"
                        );
                    }
                    tasks.complete(task_id, false, err.diagnostic());
                    warn!(
                        target = SOURCE,
                        op = "pipeline::screenshot",
                        result = "failed",
                        task_id = %task_id,
                        base_name = %base_name,
                        elapsed_ms = started_at.elapsed().as_millis() as u64,
                        error = %err,
                        "Snapshot rendering failed"
                    );
                }
            }
        };

        if let Err(err) = self.workers.submit(job) {
            let message = match err {
                WorkerPoolError::Saturated => "secondary render queue is full",
                WorkerPoolError::Closed => "secondary render workers are shut down",
            };
            warn!(
                target = SOURCE,
                op = "pipeline::screenshot",
                result = "rejected",
                task_id = %task_id,
                error = %err,
                "Snapshot job not queued"
            );
            self.tasks.complete(task_id, false, message);
        }
    }
}
