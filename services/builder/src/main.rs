//! lxcci Builder
//!
//! Builds a disposable, SSH-ready LXC container for CI from the latest
//! published build of a distribution image.
//!
//! ```text
//! lxcci-builder centos 9-Stream amd64 --output-dir ./out
//! ```
//!
//! On success the container is running, its credentials are written to
//! `{output_dir}/{name}.info`, and unless `--skip-publish` is given its root
//! filesystem is archived to `{output_dir}/{name}.tar.gz`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use lxcci_builder::config::{DEFAULT_CONTAINERS_ROOT, DEFAULT_PROBE_TIMEOUT, DEFAULT_TRANSFER_TIMEOUT};
use lxcci_builder::{
    generate_password, BuilderConfig, DirectoryUploader, NetworkConfig, NoopUploader, Pipeline,
    ProcessExecutor, TracingReporter, Uploader,
};
use lxcci_image::{ImageCoordinate, DEFAULT_MIRROR};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod output;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Build an SSH-ready CI container from a published image.
#[derive(Debug, Parser)]
#[command(name = "lxcci-builder", version, about)]
struct Cli {
    /// Distribution, e.g. `debian`.
    distro: String,

    /// Distribution release, e.g. `12` or `9-Stream`.
    #[arg(id = "release", value_name = "VERSION")]
    version: String,

    /// Architecture, e.g. `amd64`.
    arch: String,

    /// Image mirror base URL.
    #[arg(long, env = "LXCCI_MIRROR", default_value = DEFAULT_MIRROR)]
    mirror: String,

    /// Root password to set. Generated when omitted.
    #[arg(long, env = "LXCCI_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Directory for downloaded artifacts.
    #[arg(long, env = "LXCCI_WORK_DIR", default_value = ".")]
    work_dir: PathBuf,

    /// Directory for the container record and archive.
    #[arg(long, env = "LXCCI_OUTPUT_DIR", default_value = ".")]
    output_dir: PathBuf,

    /// Copy the finished archive into this directory.
    #[arg(long, env = "LXCCI_PUBLISH_DIR")]
    publish_dir: Option<PathBuf>,

    /// Path to the `lxc` executable.
    #[arg(long, env = "LXCCI_LXC", default_value = "lxc")]
    lxc: String,

    /// Directory holding each instance's `<name>/rootfs`.
    #[arg(long, env = "LXCCI_CONTAINERS_ROOT", default_value = DEFAULT_CONTAINERS_ROOT)]
    containers_root: PathBuf,

    /// Network to attach the container to.
    #[arg(long, env = "LXCCI_NETWORK")]
    network: Option<String>,

    /// Storage pool for the root disk.
    #[arg(long, env = "LXCCI_STORAGE")]
    storage: Option<String>,

    /// Root disk size, e.g. `10GiB`.
    #[arg(long, env = "LXCCI_ROOT_SIZE")]
    root_size: Option<String>,

    /// Timeout in seconds for index fetches and existence probes.
    #[arg(long, env = "LXCCI_PROBE_TIMEOUT_SECS", default_value_t = DEFAULT_PROBE_TIMEOUT.as_secs())]
    probe_timeout_secs: u64,

    /// Timeout in seconds for a single artifact download.
    #[arg(long, env = "LXCCI_TRANSFER_TIMEOUT_SECS", default_value_t = DEFAULT_TRANSFER_TIMEOUT.as_secs())]
    transfer_timeout_secs: u64,

    /// Leave the container running without archiving it.
    #[arg(long, env = "LXCCI_SKIP_PUBLISH")]
    skip_publish: bool,

    /// Launch from the runtime's `images:` remote instead of downloading.
    #[arg(long, env = "LXCCI_REMOTE")]
    remote: bool,

    /// Log level used when RUST_LOG is not set.
    #[arg(long, env = "LXCCI_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log output format.
    #[arg(long, env = "LXCCI_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

impl Cli {
    fn builder_config(&self) -> BuilderConfig {
        BuilderConfig {
            mirror: self.mirror.clone(),
            probe_timeout: Duration::from_secs(self.probe_timeout_secs),
            transfer_timeout: Duration::from_secs(self.transfer_timeout_secs),
            work_dir: self.work_dir.clone(),
            output_dir: self.output_dir.clone(),
            lxc_path: self.lxc.clone(),
            containers_root: self.containers_root.clone(),
            network: NetworkConfig {
                network: self.network.clone(),
                storage_pool: self.storage.clone(),
                root_size: self.root_size.clone(),
            },
            launch_from_remote: self.remote,
            publish: !self.skip_publish,
            ..BuilderConfig::default()
        }
    }

    fn uploader(&self) -> Arc<dyn Uploader> {
        match &self.publish_dir {
            Some(dir) => Arc::new(DirectoryUploader::new(dir)),
            None => Arc::new(NoopUploader),
        }
    }
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

async fn run(cli: Cli) -> Result<()> {
    let coordinate = ImageCoordinate::new(&cli.distro, &cli.version, &cli.arch)?;
    let password = cli.password.clone().unwrap_or_else(generate_password);

    let config = cli.builder_config();
    info!(
        coordinate = %coordinate,
        mirror = %config.mirror,
        work_dir = %config.work_dir.display(),
        output_dir = %config.output_dir.display(),
        remote = config.launch_from_remote,
        publish = config.publish,
        "Configuration loaded"
    );

    let pipeline = Pipeline::new(
        config,
        Arc::new(ProcessExecutor::new()),
        cli.uploader(),
        Arc::new(TracingReporter::new()),
    )?;

    let outcome = pipeline.run(&coordinate, &password).await?;
    output::print_outcome(&outcome);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_format);

    if let Err(e) = run(cli).await {
        output::print_error(&e);
        std::process::exit(1);
    }

    Ok(())
}
