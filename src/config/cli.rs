use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the markmap service binary.
#[derive(Debug, Parser)]
#[command(
    name = "markmap-service",
    version,
    about = "Markdown to mind-map rendering service"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "MARKMAP_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service with its background sweeper and workers.
    Serve(Box<ServeArgs>),
    /// Run a single expiry sweep against the artifact store and exit.
    Sweep(SweepArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct StorageOverrides {
    /// Override the artifact store directory.
    #[arg(long = "storage-directory", value_name = "PATH")]
    pub storage_directory: Option<PathBuf>,

    /// Override the artifact expiry age in hours.
    #[arg(long = "storage-ttl-hours", value_name = "HOURS")]
    pub storage_ttl_hours: Option<u64>,

    /// Override the pause between sweep cycles in hours.
    #[arg(long = "storage-sweep-interval-hours", value_name = "HOURS")]
    pub storage_sweep_interval_hours: Option<u64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct SweepArgs {
    #[command(flatten)]
    pub storage: StorageOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RenderOverrides {
    /// Override the markmap CLI executable.
    #[arg(long = "render-markmap-cli-path", value_name = "PATH")]
    pub markmap_cli_path: Option<PathBuf>,

    /// Override the headless browser executable used for PNG snapshots.
    #[arg(long = "render-screenshot-cli-path", value_name = "PATH")]
    pub screenshot_cli_path: Option<PathBuf>,

    /// Toggle PNG snapshots.
    #[arg(
        long = "render-screenshot-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub screenshot_enabled: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub render: RenderOverrides,

    #[command(flatten)]
    pub storage: StorageOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the public base URL used in returned links.
    #[arg(long = "public-url", value_name = "URL")]
    pub public_url: Option<String>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the number of snapshot workers.
    #[arg(long = "workers-pool-size", value_name = "COUNT")]
    pub workers_pool_size: Option<u64>,

    /// Override the content cache capacity.
    #[arg(long = "cache-capacity", value_name = "COUNT")]
    pub cache_capacity: Option<u64>,

    /// Override the maximum request body size in bytes.
    #[arg(long = "uploads-max-request-bytes", value_name = "BYTES")]
    pub uploads_max_request_bytes: Option<u64>,

    /// Override the rate limit window size.
    #[arg(long = "rate-limit-window-seconds", value_name = "SECONDS")]
    pub rate_limit_window_seconds: Option<u64>,

    /// Override the rate limit request ceiling.
    #[arg(long = "rate-limit-max-requests", value_name = "COUNT")]
    pub rate_limit_max_requests: Option<u64>,
}
