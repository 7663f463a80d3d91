use std::{net::SocketAddr, process, sync::Arc, time::Duration};

use markmap_service::{
    application::{
        error::AppError,
        links::LinkBuilder,
        pipeline::RenderPipeline,
        render::{HeadlessScreenshot, MarkmapCli},
        sweeper::{ExpirySweeper, SweepOutcome, SweepPolicy},
        tasks::TaskRegistry,
        workers::WorkerPool,
    },
    cache::{CacheConfig, ContentCache},
    config,
    infra::{
        error::InfraError,
        http::{self, HttpState, RateLimiter},
        storage::ArtifactStore,
        telemetry,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

const SOURCE: &str = "markmap_service::main";

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Sweep(_) => run_sweep(settings).await,
    }
}

fn open_store(settings: &config::Settings) -> Result<ArtifactStore, AppError> {
    ArtifactStore::new(settings.storage.directory.clone())
        .map_err(|err| AppError::from(InfraError::Io(err)))
}

fn sweep_policy(settings: &config::Settings) -> SweepPolicy {
    SweepPolicy {
        ttl: settings.storage.ttl,
        interval: settings.storage.sweep_interval,
        retry_delay: settings.storage.sweep_retry,
        task_ttl: settings.tasks.ttl,
    }
}

async fn run_sweep(settings: config::Settings) -> Result<(), AppError> {
    let store = open_store(&settings)?;
    let sweeper = ExpirySweeper::new(store, sweep_policy(&settings));

    match sweeper.run_cycle().await? {
        SweepOutcome::Skipped => info!(
            target = SOURCE,
            "Another process holds the sweep lock; nothing done"
        ),
        SweepOutcome::Swept { scanned, deleted } => info!(
            target = SOURCE,
            scanned,
            deleted,
            "Sweep finished"
        ),
    }
    Ok(())
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let shutdown = CancellationToken::new();

    let store = open_store(&settings)?;
    let cache = ContentCache::new(&CacheConfig::from(&settings.cache));
    let tasks = TaskRegistry::new();
    let workers = WorkerPool::start(
        settings.workers.pool_size,
        settings.workers.queue_capacity,
        shutdown.child_token(),
    );
    let links = LinkBuilder::new(&settings.server.public_url);
    let converter = Arc::new(MarkmapCli::new(
        settings.render.markmap_cli_path.clone(),
        settings.render.convert_timeout,
    ));

    let mut pipeline = RenderPipeline::new(
        store.clone(),
        cache,
        tasks.clone(),
        workers.clone(),
        links,
        converter,
    );
    if settings.render.screenshot_enabled {
        pipeline = pipeline.with_screenshot(Arc::new(HeadlessScreenshot::new(
            settings.render.screenshot_cli_path.clone(),
            settings.render.screenshot_timeout,
            settings.render.screenshot_width,
            settings.render.screenshot_height,
            settings.render.screenshot_settle,
        )));
    }

    let policy = sweep_policy(&settings);
    let sweeper = ExpirySweeper::new(store.clone(), policy).with_tasks(tasks);
    let sweeper_handle = tokio::spawn(sweeper.run(shutdown.child_token()));

    info!(
        target = SOURCE,
        addr = %settings.server.addr,
        public_url = %settings.server.public_url,
        store = %store.root().display(),
        workers = workers.size(),
        screenshots = settings.render.screenshot_enabled,
        sweep_interval_secs = policy.interval.as_secs(),
        ttl_hours = policy.ttl.as_secs() / 3600,
        "Markmap service starting"
    );

    let rate_limiter = RateLimiter::new(
        Duration::from_secs(u64::from(settings.rate_limit.window_seconds.get())),
        settings.rate_limit.max_requests.get(),
    );
    let body_limit = usize::try_from(settings.uploads.max_request_bytes.get())
        .map_err(|_| AppError::validation("uploads.max_request_bytes does not fit in memory"))?;
    let router = http::build_router(HttpState::new(pipeline, rate_limiter), body_limit);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    let served = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
    .await
    .map_err(|err| AppError::unexpected(format!("server error: {err}")));

    shutdown.cancel();
    let drained = tokio::time::timeout(settings.server.graceful_shutdown, async {
        workers.shutdown().await;
        let _ = sweeper_handle.await;
    })
    .await;
    if drained.is_err() {
        warn!(
            target = SOURCE,
            timeout_secs = settings.server.graceful_shutdown.as_secs(),
            "Background work did not stop before the shutdown deadline"
        );
    }

    info!(target = SOURCE, "Markmap service stopped");
    served
}

/// Resolve on Ctrl-C, SIGTERM, or an external cancellation.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(target = SOURCE, error = %err, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(target = SOURCE, error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = shutdown.cancelled() => {}
    }

    info!(target = SOURCE, "Shutdown requested; draining");
}
