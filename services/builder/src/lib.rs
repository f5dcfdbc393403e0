//! lxcci Builder Library
//!
//! Turns an image coordinate (distribution, version, architecture) into a
//! running LXC container reachable over SSH, ready to be used by CI jobs.
//!
//! ## Pipeline
//!
//! ```text
//! Pipeline
//! ├── DirectoryResolver   (latest build directory on the mirror)
//! ├── ArtifactFetcher     (existence probes + chunked downloads)
//! ├── LxcRuntime          (image import, launch, exec, stop)
//! ├── Provisioner         (fallback-chain SSH setup)
//! ├── RecordWriter        (info + JSON record)
//! └── Publisher           (stop, archive, upload)
//! ```
//!
//! Every stage reports through a [`Reporter`] and every external process goes
//! through a [`CommandExecutor`], so the whole pipeline can run in tests
//! against an HTTP stub and a scripted executor.
//!
//! ## Modules
//!
//! - `config`: Builder configuration and defaults
//! - `executor`: External process capability
//! - `fetcher`: Artifact verification and download
//! - `pipeline`: Stage orchestration and the fatal error taxonomy
//! - `provision`: Fallback-chain provisioning
//! - `publish`: Archive and upload
//! - `record`: Container record files
//! - `report`: Progress and status reporting
//! - `resolver`: Build directory discovery
//! - `runtime`: `lxc` command wrappers

pub mod config;
pub mod executor;
pub mod fetcher;
pub mod pipeline;
pub mod provision;
pub mod publish;
pub mod record;
pub mod report;
pub mod resolver;
pub mod runtime;

// Re-export commonly used types
pub use config::{BuilderConfig, NetworkConfig};
pub use executor::{CommandExecutor, ProcessExecutor, ScriptedExecutor};
pub use pipeline::{generate_password, Pipeline, PipelineError, PipelineOutcome};
pub use provision::{ProvisioningPlan, ProvisioningStep};
pub use publish::{DirectoryUploader, NoopUploader, Uploader};
pub use record::ContainerRecord;
pub use report::{RecordingReporter, Reporter, Stage, TracingReporter};
