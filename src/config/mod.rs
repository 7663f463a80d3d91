//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroU64, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

mod cli;

pub use cli::{
    CliArgs, Command, RenderOverrides, ServeArgs, ServeOverrides, StorageOverrides, SweepArgs,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "markmap";
const ENV_PREFIX: &str = "MARKMAP";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 5003;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_STORAGE_DIR: &str = "data";
const DEFAULT_STORAGE_TTL_HOURS: u64 = 24;
const DEFAULT_SWEEP_INTERVAL_HOURS: u64 = 1;
const DEFAULT_SWEEP_RETRY_SECS: u64 = 300;
const DEFAULT_MARKMAP_CLI_PATH: &str = "markmap";
const DEFAULT_CONVERT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_SCREENSHOT_CLI_PATH: &str = "chromium";
const DEFAULT_SCREENSHOT_TIMEOUT_SECS: u64 = 90;
const DEFAULT_SCREENSHOT_WIDTH: u32 = 1600;
const DEFAULT_SCREENSHOT_HEIGHT: u32 = 1200;
const DEFAULT_SCREENSHOT_SETTLE_MS: u64 = 3000;
const DEFAULT_WORKER_POOL_SIZE: u64 = 2;
const DEFAULT_WORKER_QUEUE_CAPACITY: u64 = 64;
const DEFAULT_CACHE_CAPACITY: u64 = crate::cache::DEFAULT_CAPACITY as u64;
const DEFAULT_TASK_TTL_HOURS: u64 = 24;
const DEFAULT_UPLOAD_REQUEST_LIMIT_BYTES: u64 = 5 * 1024 * 1024;
const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;
const DEFAULT_RATE_LIMIT_MAX_REQUESTS: u64 = 30;

const SECS_PER_HOUR: u64 = 3600;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub storage: StorageSettings,
    pub render: RenderSettings,
    pub workers: WorkerSettings,
    pub cache: CacheSettings,
    pub tasks: TaskSettings,
    pub uploads: UploadSettings,
    pub rate_limit: RateLimitSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    /// Base for every absolute link handed to clients.
    pub public_url: Url,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub directory: PathBuf,
    pub ttl: Duration,
    pub sweep_interval: Duration,
    pub sweep_retry: Duration,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub markmap_cli_path: PathBuf,
    pub convert_timeout: Duration,
    pub screenshot_enabled: bool,
    pub screenshot_cli_path: PathBuf,
    pub screenshot_timeout: Duration,
    pub screenshot_width: u32,
    pub screenshot_height: u32,
    pub screenshot_settle: Duration,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub pool_size: NonZeroUsize,
    pub queue_capacity: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub capacity: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct TaskSettings {
    /// Finished tasks older than this are pruned.
    pub ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub max_request_bytes: NonZeroU64,
}

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub window_seconds: NonZeroU32,
    pub max_requests: NonZeroU32,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Sweep(args)) => raw.apply_storage_overrides(&args.storage),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    storage: RawStorageSettings,
    render: RawRenderSettings,
    workers: RawWorkerSettings,
    cache: RawCacheSettings,
    tasks: RawTaskSettings,
    uploads: RawUploadSettings,
    rate_limit: RawRateLimitSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(url) = overrides.public_url.as_ref() {
            self.server.public_url = Some(url.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(size) = overrides.workers_pool_size {
            self.workers.pool_size = Some(size);
        }
        if let Some(capacity) = overrides.cache_capacity {
            self.cache.capacity = Some(capacity);
        }
        if let Some(limit) = overrides.uploads_max_request_bytes {
            self.uploads.max_request_bytes = Some(limit);
        }
        if let Some(window) = overrides.rate_limit_window_seconds {
            self.rate_limit.window_seconds = Some(window);
        }
        if let Some(max) = overrides.rate_limit_max_requests {
            self.rate_limit.max_requests = Some(max);
        }

        self.apply_storage_overrides(&overrides.storage);
        self.apply_render_overrides(&overrides.render);
    }

    fn apply_storage_overrides(&mut self, overrides: &StorageOverrides) {
        if let Some(directory) = overrides.storage_directory.as_ref() {
            self.storage.directory = Some(directory.clone());
        }
        if let Some(hours) = overrides.storage_ttl_hours {
            self.storage.ttl_hours = Some(hours);
        }
        if let Some(hours) = overrides.storage_sweep_interval_hours {
            self.storage.sweep_interval_hours = Some(hours);
        }
    }

    fn apply_render_overrides(&mut self, overrides: &RenderOverrides) {
        if let Some(path) = overrides.markmap_cli_path.as_ref() {
            self.render.markmap_cli_path = Some(path.clone());
        }
        if let Some(path) = overrides.screenshot_cli_path.as_ref() {
            self.render.screenshot_cli_path = Some(path.clone());
        }
        if let Some(enabled) = overrides.screenshot_enabled {
            self.render.screenshot_enabled = Some(enabled);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            storage,
            render,
            workers,
            cache,
            tasks,
            uploads,
            rate_limit,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            storage: build_storage_settings(storage)?,
            render: build_render_settings(render)?,
            workers: build_worker_settings(workers)?,
            cache: build_cache_settings(cache)?,
            tasks: build_task_settings(tasks)?,
            uploads: build_upload_settings(uploads)?,
            rate_limit: build_rate_limit_settings(rate_limit)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }
    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let public_url = match server.public_url {
        Some(value) => value,
        None => format!("http://{addr}"),
    };
    let public_url = Url::parse(public_url.trim())
        .map_err(|err| LoadError::invalid("server.public_url", format!("invalid URL: {err}")))?;
    if public_url.cannot_be_a_base() {
        return Err(LoadError::invalid(
            "server.public_url",
            "URL cannot be used as a base for links",
        ));
    }

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        public_url,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_storage_settings(storage: RawStorageSettings) -> Result<StorageSettings, LoadError> {
    let directory = storage
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR));
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "storage.directory",
            "path must not be empty",
        ));
    }

    let ttl_hours = positive(
        storage.ttl_hours.unwrap_or(DEFAULT_STORAGE_TTL_HOURS),
        "storage.ttl_hours",
    )?;
    let interval_hours = positive(
        storage
            .sweep_interval_hours
            .unwrap_or(DEFAULT_SWEEP_INTERVAL_HOURS),
        "storage.sweep_interval_hours",
    )?;
    let retry_secs = positive(
        storage.sweep_retry_seconds.unwrap_or(DEFAULT_SWEEP_RETRY_SECS),
        "storage.sweep_retry_seconds",
    )?;

    Ok(StorageSettings {
        directory,
        ttl: hours(ttl_hours, "storage.ttl_hours")?,
        sweep_interval: hours(interval_hours, "storage.sweep_interval_hours")?,
        sweep_retry: Duration::from_secs(retry_secs),
    })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let markmap_cli_path = render
        .markmap_cli_path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MARKMAP_CLI_PATH));
    if markmap_cli_path.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "render.markmap_cli_path",
            "path must not be empty",
        ));
    }

    let screenshot_cli_path = render
        .screenshot_cli_path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SCREENSHOT_CLI_PATH));
    if screenshot_cli_path.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "render.screenshot_cli_path",
            "path must not be empty",
        ));
    }

    let convert_timeout = positive(
        render
            .convert_timeout_seconds
            .unwrap_or(DEFAULT_CONVERT_TIMEOUT_SECS),
        "render.convert_timeout_seconds",
    )?;
    let screenshot_timeout = positive(
        render
            .screenshot_timeout_seconds
            .unwrap_or(DEFAULT_SCREENSHOT_TIMEOUT_SECS),
        "render.screenshot_timeout_seconds",
    )?;
    let screenshot_width = non_zero_u32(
        render
            .screenshot_width
            .unwrap_or(DEFAULT_SCREENSHOT_WIDTH.into()),
        "render.screenshot_width",
    )?;
    let screenshot_height = non_zero_u32(
        render
            .screenshot_height
            .unwrap_or(DEFAULT_SCREENSHOT_HEIGHT.into()),
        "render.screenshot_height",
    )?;

    Ok(RenderSettings {
        markmap_cli_path,
        convert_timeout: Duration::from_secs(convert_timeout),
        screenshot_enabled: render.screenshot_enabled.unwrap_or(true),
        screenshot_cli_path,
        screenshot_timeout: Duration::from_secs(screenshot_timeout),
        screenshot_width: screenshot_width.get(),
        screenshot_height: screenshot_height.get(),
        screenshot_settle: Duration::from_millis(
            render
                .screenshot_settle_ms
                .unwrap_or(DEFAULT_SCREENSHOT_SETTLE_MS),
        ),
    })
}

fn build_worker_settings(workers: RawWorkerSettings) -> Result<WorkerSettings, LoadError> {
    Ok(WorkerSettings {
        pool_size: non_zero_usize(
            workers.pool_size.unwrap_or(DEFAULT_WORKER_POOL_SIZE),
            "workers.pool_size",
        )?,
        queue_capacity: non_zero_usize(
            workers
                .queue_capacity
                .unwrap_or(DEFAULT_WORKER_QUEUE_CAPACITY),
            "workers.queue_capacity",
        )?,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    Ok(CacheSettings {
        capacity: non_zero_usize(
            cache.capacity.unwrap_or(DEFAULT_CACHE_CAPACITY),
            "cache.capacity",
        )?,
    })
}

fn build_task_settings(tasks: RawTaskSettings) -> Result<TaskSettings, LoadError> {
    let ttl_hours = positive(
        tasks.ttl_hours.unwrap_or(DEFAULT_TASK_TTL_HOURS),
        "tasks.ttl_hours",
    )?;
    Ok(TaskSettings {
        ttl: hours(ttl_hours, "tasks.ttl_hours")?,
    })
}

fn build_upload_settings(uploads: RawUploadSettings) -> Result<UploadSettings, LoadError> {
    let max_request_bytes_value = uploads
        .max_request_bytes
        .unwrap_or(DEFAULT_UPLOAD_REQUEST_LIMIT_BYTES);
    let max_request_bytes = NonZeroU64::new(max_request_bytes_value).ok_or_else(|| {
        LoadError::invalid("uploads.max_request_bytes", "must be greater than zero")
    })?;
    usize::try_from(max_request_bytes_value).map_err(|_| {
        LoadError::invalid(
            "uploads.max_request_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    Ok(UploadSettings { max_request_bytes })
}

fn build_rate_limit_settings(
    rate_limit: RawRateLimitSettings,
) -> Result<RateLimitSettings, LoadError> {
    let window_seconds_val = rate_limit
        .window_seconds
        .unwrap_or(DEFAULT_RATE_LIMIT_WINDOW_SECS);
    let window_seconds = non_zero_u32(window_seconds_val, "rate_limit.window_seconds")?;

    let max_requests_val = rate_limit
        .max_requests
        .unwrap_or(DEFAULT_RATE_LIMIT_MAX_REQUESTS);
    let max_requests = non_zero_u32(max_requests_val, "rate_limit.max_requests")?;

    Ok(RateLimitSettings {
        window_seconds,
        max_requests,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    public_url: Option<String>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    directory: Option<PathBuf>,
    ttl_hours: Option<u64>,
    sweep_interval_hours: Option<u64>,
    sweep_retry_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    markmap_cli_path: Option<PathBuf>,
    convert_timeout_seconds: Option<u64>,
    screenshot_enabled: Option<bool>,
    screenshot_cli_path: Option<PathBuf>,
    screenshot_timeout_seconds: Option<u64>,
    screenshot_width: Option<u64>,
    screenshot_height: Option<u64>,
    screenshot_settle_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWorkerSettings {
    pool_size: Option<u64>,
    queue_capacity: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    capacity: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawTaskSettings {
    ttl_hours: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawUploadSettings {
    max_request_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRateLimitSettings {
    window_seconds: Option<u64>,
    max_requests: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn positive(value: u64, key: &'static str) -> Result<u64, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(value)
}

fn hours(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    value
        .checked_mul(SECS_PER_HOUR)
        .map(Duration::from_secs)
        .ok_or_else(|| LoadError::invalid(key, "value is too large"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

#[cfg(test)]
mod tests;
