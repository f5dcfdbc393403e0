//! Container runtime interface.
//!
//! Wraps the `lxc` command line tool:
//! - Importing an image from a metadata + rootfs pair
//! - Launching an instance from an alias or a remote image
//! - Running shell commands inside an instance
//! - Stopping an instance
//!
//! Success is decided by the tool's exit status alone.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use lxcci_image::ImageCoordinate;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::NetworkConfig;
use crate::executor::{CommandExecutor, CommandOutput, CommandSpec, ExecError, SecretInput};

/// Longest instance name the runtime accepts (hostname label limit).
const MAX_NAME_LEN: usize = 63;

/// Errors from runtime operations.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("{operation} of {target} failed with exit status {status:?}")]
    Failed {
        operation: &'static str,
        target: String,
        status: Option<i32>,
    },

    #[error("archiving {path} failed: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("upload of {path} failed: {message}")]
    Upload { path: PathBuf, message: String },
}

/// Where an instance's image comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// An image previously registered under this alias.
    Alias(String),
    /// A remote image reference, e.g. `images:alpine/3.20/amd64`.
    Remote(String),
}

impl ImageSource {
    pub fn as_str(&self) -> &str {
        match self {
            ImageSource::Alias(s) | ImageSource::Remote(s) => s,
        }
    }
}

/// Declarative description of an instance to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub source: ImageSource,
    pub network: NetworkConfig,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, source: ImageSource, network: NetworkConfig) -> Self {
        Self {
            name: name.into(),
            source,
            network,
        }
    }
}

/// A registered image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHandle {
    pub alias: String,
}

/// A launched instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningContainer {
    pub name: String,
    pub source: ImageSource,
}

/// Derive an instance name unique to this host and process.
///
/// The name is `{alias}-{pid}`, lowercased, with anything other than ASCII
/// letters, digits and `-` replaced by `-`, and cut to the hostname limit.
pub fn container_name(coordinate: &ImageCoordinate, pid: u32) -> String {
    let suffix = format!("-{pid}");
    let mut base: String = coordinate
        .alias()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();

    if !base.starts_with(|c: char| c.is_ascii_alphabetic()) {
        base.insert_str(0, "ci-");
    }
    base.truncate(MAX_NAME_LEN.saturating_sub(suffix.len()));
    let base = base.trim_end_matches('-');

    format!("{base}{suffix}")
}

/// `lxc` command line runtime.
pub struct LxcRuntime {
    executor: Arc<dyn CommandExecutor>,
    lxc_path: String,
    containers_root: PathBuf,
}

impl LxcRuntime {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        lxc_path: impl Into<String>,
        containers_root: PathBuf,
    ) -> Self {
        Self {
            executor,
            lxc_path: lxc_path.into(),
            containers_root,
        }
    }

    fn lxc(&self) -> CommandSpec {
        CommandSpec::new(&self.lxc_path)
    }

    async fn run_checked(
        &self,
        operation: &'static str,
        target: &str,
        command: CommandSpec,
    ) -> Result<CommandOutput, RuntimeError> {
        let output = self.executor.run(&command).await?;
        if !output.success() {
            return Err(RuntimeError::Failed {
                operation,
                target: target.to_string(),
                status: output.status,
            });
        }
        Ok(output)
    }

    /// Register a metadata + rootfs pair under `alias`.
    ///
    /// An existing image with the same alias is deleted first, so re-running
    /// on the same host replaces it.
    pub async fn import_image(
        &self,
        metadata: &Path,
        rootfs: &Path,
        alias: &str,
    ) -> Result<ImageHandle, RuntimeError> {
        let delete = self.lxc().args(["image", "delete", alias]);
        let deleted = self.executor.run(&delete).await?;
        if deleted.success() {
            warn!(alias = %alias, "Replaced existing image with the same alias");
        } else {
            debug!(alias = %alias, "No previous image under alias");
        }

        let import = self
            .lxc()
            .args(["image", "import"])
            .arg(metadata.to_string_lossy())
            .arg(rootfs.to_string_lossy())
            .args(["--alias", alias]);

        info!(alias = %alias, command = %import, "Importing image");
        self.run_checked("image import", alias, import).await?;

        Ok(ImageHandle {
            alias: alias.to_string(),
        })
    }

    /// Create and start an instance.
    pub async fn launch(&self, spec: &ContainerSpec) -> Result<RunningContainer, RuntimeError> {
        let mut launch = self
            .lxc()
            .args(["launch", spec.source.as_str(), spec.name.as_str()]);

        if let Some(network) = &spec.network.network {
            launch = launch.args(["--network", network.as_str()]);
        }
        if let Some(pool) = &spec.network.storage_pool {
            launch = launch.args(["--storage", pool.as_str()]);
        }
        if let Some(size) = &spec.network.root_size {
            launch = launch.args(["--device".to_string(), format!("root,size={size}")]);
        }

        info!(name = %spec.name, command = %launch, "Launching container");
        self.run_checked("launch", &spec.name, launch).await?;

        Ok(RunningContainer {
            name: spec.name.clone(),
            source: spec.source.clone(),
        })
    }

    /// Run `script` with `sh -c` inside an instance, feeding it `input` on
    /// stdin when given.
    ///
    /// Returns the output whatever the exit status; only a failure to run
    /// `lxc` itself is an error.
    pub async fn exec_shell(
        &self,
        name: &str,
        script: &str,
        input: Option<&SecretInput>,
    ) -> Result<CommandOutput, RuntimeError> {
        let mut exec = self
            .lxc()
            .args(["exec", name, "--", "sh", "-c", script]);
        if let Some(input) = input {
            exec = exec.stdin(input.clone());
        }
        Ok(self.executor.run(&exec).await?)
    }

    /// Stop an instance.
    pub async fn stop(&self, name: &str) -> Result<(), RuntimeError> {
        let stop = self.lxc().args(["stop", name]);
        self.run_checked("stop", name, stop).await?;
        Ok(())
    }

    /// Host path of an instance's root filesystem.
    pub fn rootfs_path(&self, name: &str) -> PathBuf {
        self.containers_root.join(name).join("rootfs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ScriptedExecutor;

    fn runtime(executor: Arc<ScriptedExecutor>) -> LxcRuntime {
        LxcRuntime::new(executor, "lxc", PathBuf::from("/var/lib/lxd/containers"))
    }

    #[test]
    fn test_container_name_is_sanitized() {
        let coordinate = ImageCoordinate::new("alpine", "3.20", "amd64").unwrap();
        assert_eq!(container_name(&coordinate, 4242), "alpine-3-20-amd64-4242");

        let coordinate = ImageCoordinate::new("centos", "9-Stream", "amd64").unwrap();
        assert_eq!(container_name(&coordinate, 7), "centos-9-stream-amd64-7");
    }

    #[test]
    fn test_container_name_leading_digit_and_length() {
        let long = "x".repeat(80);
        let coordinate = ImageCoordinate::new("9front", long.as_str(), "amd64").unwrap();
        let name = container_name(&coordinate, 123456);
        assert!(name.starts_with("ci-9front-"));
        assert!(name.len() <= MAX_NAME_LEN);
        assert!(name.ends_with("-123456"));
    }

    #[test]
    fn test_container_name_differs_per_process() {
        let coordinate = ImageCoordinate::new("debian", "12", "arm64").unwrap();
        assert_ne!(container_name(&coordinate, 1), container_name(&coordinate, 2));
    }

    #[tokio::test]
    async fn test_import_deletes_then_imports() {
        let executor = Arc::new(ScriptedExecutor::new().fail_when("image delete"));
        let rt = runtime(executor.clone());

        let handle = rt
            .import_image(
                Path::new("/work/meta.tar.xz"),
                Path::new("/work/rootfs.tar.xz"),
                "centos-9-Stream-amd64",
            )
            .await
            .unwrap();

        assert_eq!(handle.alias, "centos-9-Stream-amd64");
        assert_eq!(
            executor.command_lines(),
            vec![
                "lxc image delete centos-9-Stream-amd64",
                "lxc image import /work/meta.tar.xz /work/rootfs.tar.xz --alias centos-9-Stream-amd64",
            ]
        );
    }

    #[tokio::test]
    async fn test_import_warns_only_when_alias_existed() {
        let (logs, _guard) = crate::report::log_capture::capture();

        let missing = Arc::new(ScriptedExecutor::new().fail_when("image delete"));
        runtime(missing)
            .import_image(Path::new("m"), Path::new("r"), "fresh-alias")
            .await
            .unwrap();
        assert!(!logs.contents().contains("WARN"));

        let existing = Arc::new(ScriptedExecutor::new());
        runtime(existing)
            .import_image(Path::new("m"), Path::new("r"), "stale-alias")
            .await
            .unwrap();
        let output = logs.contents();
        assert!(output.contains("WARN"));
        assert!(output.contains("Replaced existing image with the same alias"));
        assert!(output.contains("stale-alias"));
    }

    #[tokio::test]
    async fn test_import_failure_is_fatal() {
        let executor = Arc::new(ScriptedExecutor::new().fail_when("image import"));
        let err = runtime(executor)
            .import_image(Path::new("m"), Path::new("r"), "a")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Failed {
                operation: "image import",
                status: Some(1),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_launch_with_network_options() {
        let executor = Arc::new(ScriptedExecutor::new());
        let rt = runtime(executor.clone());
        let spec = ContainerSpec::new(
            "ci-1",
            ImageSource::Remote("images:alpine/3.20/amd64".to_string()),
            NetworkConfig {
                network: Some("lxdbr0".to_string()),
                storage_pool: Some("default".to_string()),
                root_size: Some("8GiB".to_string()),
            },
        );

        let running = rt.launch(&spec).await.unwrap();
        assert_eq!(running.name, "ci-1");
        assert_eq!(
            executor.command_lines(),
            vec![
                "lxc launch images:alpine/3.20/amd64 ci-1 --network lxdbr0 --storage default --device root,size=8GiB"
            ]
        );
    }

    #[tokio::test]
    async fn test_exec_shell_returns_nonzero_status() {
        let executor = Arc::new(ScriptedExecutor::new().exit_when("apt-get", 100));
        let rt = runtime(executor.clone());

        let output = rt.exec_shell("ci-1", "apt-get update", None).await.unwrap();
        assert_eq!(output.status, Some(100));

        let call = &executor.calls()[0];
        assert_eq!(call.args, vec!["exec", "ci-1", "--", "sh", "-c", "apt-get update"]);
        assert!(call.stdin.is_none());
    }

    #[tokio::test]
    async fn test_exec_shell_passes_input_on_stdin() {
        let executor = Arc::new(ScriptedExecutor::new());
        let rt = runtime(executor.clone());
        let input = SecretInput::new("root:pw\n");

        rt.exec_shell("ci-1", "chpasswd", Some(&input)).await.unwrap();

        let call = &executor.calls()[0];
        assert_eq!(call.stdin.as_ref(), Some(&input));
        assert_eq!(executor.command_lines(), vec!["lxc exec ci-1 -- sh -c chpasswd"]);
    }

    #[tokio::test]
    async fn test_exec_shell_spawn_failure() {
        let executor = Arc::new(ScriptedExecutor::new().spawn_error_when("exec"));
        let err = runtime(executor)
            .exec_shell("ci-1", "true", None)
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Exec(_)));
    }

    #[test]
    fn test_rootfs_path() {
        let rt = runtime(Arc::new(ScriptedExecutor::new()));
        assert_eq!(
            rt.rootfs_path("ci-1"),
            PathBuf::from("/var/lib/lxd/containers/ci-1/rootfs")
        );
    }
}
