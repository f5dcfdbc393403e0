//! The end-to-end build pipeline.
//!
//! ```text
//! coordinate -> resolve build dir -> verify artifacts -> download
//!            -> import image -> launch -> provision -> record -> publish
//! ```
//!
//! Stages run strictly one after another. The first fatal error ends the run;
//! completed stages are not rolled back, so a failed run may leave an image or
//! a container behind for the operator to remove.

use std::sync::Arc;

use lxcci_image::{candidate_urls, ArtifactKind, BuildDirectory, ImageCoordinate, ImageError, Mirror};
use rand::distr::Alphanumeric;
use rand::Rng;
use thiserror::Error;
use tracing::info;

use crate::config::BuilderConfig;
use crate::executor::CommandExecutor;
use crate::fetcher::{Artifact, ArtifactFetcher, TransferError, VerificationError};
use crate::provision::{ChainOutcome, ProvisioningError, ProvisioningPlan, Provisioner};
use crate::publish::{ArchiveHandle, Publisher, Uploader};
use crate::record::{ContainerRecord, RecordFiles, RecordWriter, SshCredentials};
use crate::report::{Reporter, Stage};
use crate::resolver::{DirectoryResolver, DiscoveryError};
use crate::runtime::{
    container_name, ContainerSpec, ImageHandle, ImageSource, LxcRuntime, RunningContainer,
    RuntimeError,
};

/// Length of generated root passwords.
pub const GENERATED_PASSWORD_LEN: usize = 16;

/// Fatal pipeline errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ImageError),

    #[error("discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("verification failed: {0}")]
    Verification(#[from] VerificationError),

    #[error("transfer failed: {0}")]
    Transfer(#[from] TransferError),

    #[error("{stage} failed: {source}")]
    Runtime {
        stage: Stage,
        #[source]
        source: RuntimeError,
    },

    #[error("provisioning failed: {0}")]
    Provisioning(#[source] ProvisioningError),

    #[error("writing container record failed: {0}")]
    Record(#[source] std::io::Error),
}

impl PipelineError {
    fn runtime(stage: Stage) -> impl FnOnce(RuntimeError) -> Self {
        move |source| PipelineError::Runtime { stage, source }
    }

    /// Stage the error was raised in.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Config(_) | PipelineError::Discovery(_) => Stage::Discovery,
            PipelineError::Verification(_) => Stage::Verification,
            PipelineError::Transfer(_) => Stage::Transfer,
            PipelineError::Runtime { stage, .. } => *stage,
            PipelineError::Provisioning(_) => Stage::Provision,
            PipelineError::Record(_) => Stage::Record,
        }
    }
}

impl From<ProvisioningError> for PipelineError {
    fn from(err: ProvisioningError) -> Self {
        match err {
            ProvisioningError::Runtime { source, .. } => PipelineError::Runtime {
                stage: Stage::Provision,
                source,
            },
            other => PipelineError::Provisioning(other),
        }
    }
}

/// Latest build of a coordinate with both artifacts verified.
#[derive(Debug, Clone)]
pub struct DiscoveredImage {
    pub index_url: String,
    pub build: BuildDirectory,
    pub rootfs: Artifact,
    pub metadata: Artifact,
}

/// Everything a successful run produced.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    /// Imported image, absent when launching from the remote.
    pub image: Option<ImageHandle>,
    pub container: RunningContainer,
    pub provisioning: Vec<ChainOutcome>,
    pub record: ContainerRecord,
    pub record_files: RecordFiles,
    pub archive: Option<ArchiveHandle>,
}

/// Generate a random alphanumeric root password.
pub fn generate_password() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

/// Builds one provisioned container per run.
pub struct Pipeline {
    config: BuilderConfig,
    mirror: Mirror,
    resolver: DirectoryResolver,
    fetcher: ArtifactFetcher,
    runtime: Arc<LxcRuntime>,
    provisioner: Provisioner,
    publisher: Publisher,
    records: RecordWriter,
    reporter: Arc<dyn Reporter>,
}

impl Pipeline {
    pub fn new(
        config: BuilderConfig,
        executor: Arc<dyn CommandExecutor>,
        uploader: Arc<dyn Uploader>,
        reporter: Arc<dyn Reporter>,
    ) -> Result<Self, PipelineError> {
        let mirror = Mirror::new(config.mirror.clone())?;
        let resolver = DirectoryResolver::new(config.probe_timeout, reporter.clone())?;
        let fetcher = ArtifactFetcher::new(
            config.probe_timeout,
            config.transfer_timeout,
            config.chunk_size,
            reporter.clone(),
        )?;
        let runtime = Arc::new(LxcRuntime::new(
            executor,
            config.lxc_path.clone(),
            config.containers_root.clone(),
        ));
        let provisioner = Provisioner::new(runtime.clone(), reporter.clone());
        let publisher = Publisher::new(
            runtime.clone(),
            uploader,
            config.output_dir.clone(),
            reporter.clone(),
        );
        let records = RecordWriter::new(config.output_dir.clone());

        Ok(Self {
            config,
            mirror,
            resolver,
            fetcher,
            runtime,
            provisioner,
            publisher,
            records,
            reporter,
        })
    }

    /// Resolve the latest build of `coordinate` and verify its artifacts.
    pub async fn discover(
        &self,
        coordinate: &ImageCoordinate,
    ) -> Result<DiscoveredImage, PipelineError> {
        let index_url = self.mirror.index_url(coordinate);
        info!(coordinate = %coordinate, url = %index_url, "Resolving latest build");

        let build = self.resolver.resolve(&index_url).await?;

        let rootfs = self
            .fetcher
            .select(
                ArtifactKind::Rootfs,
                &candidate_urls(&index_url, &build, ArtifactKind::Rootfs),
                &self.config.work_dir,
            )
            .await?;
        let metadata = self
            .fetcher
            .select(
                ArtifactKind::Metadata,
                &candidate_urls(&index_url, &build, ArtifactKind::Metadata),
                &self.config.work_dir,
            )
            .await?;

        Ok(DiscoveredImage {
            index_url,
            build,
            rootfs,
            metadata,
        })
    }

    /// Download both artifacts of a discovered image.
    pub async fn download(&self, image: &DiscoveredImage) -> Result<u64, PipelineError> {
        let rootfs = self.fetcher.fetch(&image.rootfs).await?;
        let metadata = self.fetcher.fetch(&image.metadata).await?;
        Ok(rootfs + metadata)
    }

    /// Download and import the latest build of `coordinate`.
    pub async fn prepare_image(
        &self,
        coordinate: &ImageCoordinate,
    ) -> Result<ImageHandle, PipelineError> {
        let image = self.discover(coordinate).await?;
        self.download(&image).await?;

        let alias = coordinate.alias();
        self.reporter
            .stage_started(Stage::Import, format!("Importing image {alias}"));
        let handle = self
            .runtime
            .import_image(
                image.metadata.local_path(),
                image.rootfs.local_path(),
                &alias,
            )
            .await
            .map_err(PipelineError::runtime(Stage::Import))?;
        self.reporter
            .stage_completed(Stage::Import, format!("Image {alias} imported"));

        Ok(handle)
    }

    /// Run the whole pipeline with a container name unique to this process.
    pub async fn run(
        &self,
        coordinate: &ImageCoordinate,
        password: &str,
    ) -> Result<PipelineOutcome, PipelineError> {
        let name = container_name(coordinate, std::process::id());
        self.run_as(coordinate, &name, password).await
    }

    /// Run the whole pipeline, naming the container `name`.
    pub async fn run_as(
        &self,
        coordinate: &ImageCoordinate,
        name: &str,
        password: &str,
    ) -> Result<PipelineOutcome, PipelineError> {
        let (image, source) = if self.config.launch_from_remote {
            (None, ImageSource::Remote(coordinate.remote_reference()))
        } else {
            let handle = self.prepare_image(coordinate).await?;
            let source = ImageSource::Alias(handle.alias.clone());
            (Some(handle), source)
        };

        let spec = ContainerSpec::new(name, source, self.config.network.clone());
        self.reporter.stage_started(
            Stage::Launch,
            format!("Launching {} from {}", spec.name, spec.source.as_str()),
        );
        let container = self
            .runtime
            .launch(&spec)
            .await
            .map_err(PipelineError::runtime(Stage::Launch))?;
        self.reporter
            .stage_completed(Stage::Launch, format!("Container {name} running"));

        let provisioning = self
            .provisioner
            .provision(&container.name, &ProvisioningPlan::ssh(password))
            .await?;

        let record = ContainerRecord::new(name, coordinate, SshCredentials::root(password));
        let record_files = self
            .records
            .write(&record)
            .await
            .map_err(PipelineError::Record)?;
        self.reporter.stage_completed(
            Stage::Record,
            format!("Record written to {}", record_files.info.display()),
        );

        let archive = if self.config.publish {
            Some(
                self.publisher
                    .publish(name)
                    .await
                    .map_err(PipelineError::runtime(Stage::Publish))?,
            )
        } else {
            None
        };

        Ok(PipelineOutcome {
            image,
            container,
            provisioning,
            record,
            record_files,
            archive,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_password_shape() {
        let a = generate_password();
        let b = generate_password();
        assert_eq!(a.len(), GENERATED_PASSWORD_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_provisioning_runtime_error_maps_to_runtime() {
        let err: PipelineError = ProvisioningError::Runtime {
            step: "Install SSH server".to_string(),
            source: RuntimeError::Failed {
                operation: "exec",
                target: "ci-1".to_string(),
                status: None,
            },
        }
        .into();
        assert!(matches!(
            err,
            PipelineError::Runtime {
                stage: Stage::Provision,
                ..
            }
        ));
        assert_eq!(err.stage(), Stage::Provision);
    }

    #[test]
    fn test_exhausted_chain_maps_to_provisioning() {
        let err: PipelineError = ProvisioningError::Exhausted {
            step: "Restart SSH server".to_string(),
            attempts: 4,
            last_status: Some(1),
        }
        .into();
        assert!(matches!(err, PipelineError::Provisioning(_)));
        assert!(err.to_string().contains("all 4 candidate"));
    }
}
