//! Configuration for the builder.

use std::path::PathBuf;
use std::time::Duration;

use lxcci_image::DEFAULT_MIRROR;

/// Default bound for index fetches and existence probes.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound for a whole artifact transfer.
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Size of the slices written to disk during a transfer.
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

/// Where LXD keeps instance filesystems on a snap install.
pub const DEFAULT_CONTAINERS_ROOT: &str = "/var/snap/lxd/common/lxd/containers";

/// Optional network and root disk settings passed to `lxc launch`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Runtime network to attach the instance to.
    pub network: Option<String>,
    /// Storage pool for the root disk.
    pub storage_pool: Option<String>,
    /// Root disk size, e.g. `10GiB`.
    pub root_size: Option<String>,
}

/// Builder configuration.
#[derive(Debug, Clone)]
pub struct BuilderConfig {
    /// Image mirror base URL.
    pub mirror: String,

    /// Timeout for index fetches and existence probes.
    pub probe_timeout: Duration,

    /// Timeout for a single artifact transfer.
    pub transfer_timeout: Duration,

    /// Chunk size used when writing transfers to disk.
    pub chunk_size: usize,

    /// Directory for downloaded artifacts.
    pub work_dir: PathBuf,

    /// Directory for the info record and the filesystem archive.
    pub output_dir: PathBuf,

    /// `lxc` executable.
    pub lxc_path: String,

    /// Directory holding `<name>/rootfs` for each instance.
    pub containers_root: PathBuf,

    /// Launch options.
    pub network: NetworkConfig,

    /// Launch straight from the runtime's `images:` remote instead of
    /// downloading and importing the artifacts.
    pub launch_from_remote: bool,

    /// Stop, archive and upload the container after provisioning.
    pub publish: bool,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            mirror: DEFAULT_MIRROR.to_string(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            work_dir: PathBuf::from("."),
            output_dir: PathBuf::from("."),
            lxc_path: "lxc".to_string(),
            containers_root: PathBuf::from(DEFAULT_CONTAINERS_ROOT),
            network: NetworkConfig::default(),
            launch_from_remote: false,
            publish: true,
        }
    }
}
