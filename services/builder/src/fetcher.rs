//! Artifact existence probing and streaming transfer.
//!
//! An [`Artifact`] only becomes transferable after [`ArtifactFetcher::select`]
//! has seen a 200 response to a HEAD request for it. Transfers are written to
//! disk chunk by chunk and never buffered whole in memory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use lxcci_image::ArtifactKind;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::report::{ReportEvent, Reporter, Stage};

/// No candidate URL for an artifact answered the existence probe.
#[derive(Debug, Error)]
#[error("{kind} artifact not found, last probed {last_url}")]
pub struct VerificationError {
    pub kind: ArtifactKind,
    pub last_url: String,
}

/// Errors from artifact transfers.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("refusing to transfer unverified artifact {url}")]
    Unverified { url: String },

    #[error("request for {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("download of {url} failed, status code {status}")]
    Status { url: String, status: u16 },

    #[error("reading {url} failed after {transferred} bytes: {source}")]
    Read {
        url: String,
        transferred: u64,
        #[source]
        source: reqwest::Error,
    },

    #[error("writing {path} failed: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A single downloadable file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    kind: ArtifactKind,
    url: String,
    local_path: PathBuf,
    verified_exists: bool,
}

impl Artifact {
    /// An artifact that has not been probed yet.
    pub fn unverified(kind: ArtifactKind, url: impl Into<String>, local_path: PathBuf) -> Self {
        Self {
            kind,
            url: url.into(),
            local_path,
            verified_exists: false,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn verified_exists(&self) -> bool {
        self.verified_exists
    }

    /// Last path segment of the URL.
    pub fn file_name(&self) -> &str {
        self.url.rsplit('/').next().unwrap_or(&self.url)
    }
}

/// HTTP client for artifact probes and transfers.
pub struct ArtifactFetcher {
    probe_client: Client,
    transfer_client: Client,
    chunk_size: usize,
    reporter: Arc<dyn Reporter>,
}

impl ArtifactFetcher {
    /// Create a fetcher. Probes are bounded by `probe_timeout`, each whole
    /// transfer by `transfer_timeout`.
    pub fn new(
        probe_timeout: Duration,
        transfer_timeout: Duration,
        chunk_size: usize,
        reporter: Arc<dyn Reporter>,
    ) -> Result<Self, TransferError> {
        let probe_client = Client::builder()
            .timeout(probe_timeout)
            .build()
            .map_err(TransferError::Client)?;
        let transfer_client = Client::builder()
            .timeout(transfer_timeout)
            .build()
            .map_err(TransferError::Client)?;

        Ok(Self {
            probe_client,
            transfer_client,
            chunk_size: chunk_size.max(1),
            reporter,
        })
    }

    /// Whether `url` answers a HEAD request with exactly 200.
    ///
    /// Any transport error, timeout or other status counts as absent.
    pub async fn exists(&self, url: &str) -> bool {
        match self.probe_client.head(url).send().await {
            Ok(response) => {
                debug!(url = %url, status = response.status().as_u16(), "Probed artifact");
                response.status() == StatusCode::OK
            }
            Err(e) => {
                debug!(url = %url, error = %e, "Artifact probe failed");
                false
            }
        }
    }

    /// Probe candidate URLs in order and return the first that exists.
    ///
    /// The returned artifact is marked verified and will be stored in
    /// `work_dir` under its remote file name.
    pub async fn select(
        &self,
        kind: ArtifactKind,
        candidates: &[String],
        work_dir: &Path,
    ) -> Result<Artifact, VerificationError> {
        self.reporter
            .stage_started(Stage::Verification, format!("Verifying {kind} artifact"));

        let mut last_url = String::new();
        for url in candidates {
            last_url.clone_from(url);
            if !self.exists(url).await {
                continue;
            }

            let mut artifact = Artifact::unverified(kind, url.clone(), PathBuf::new());
            artifact.local_path = work_dir.join(artifact.file_name());
            artifact.verified_exists = true;

            self.reporter.stage_completed(
                Stage::Verification,
                format!("{kind} artifact verified: {url}"),
            );
            return Ok(artifact);
        }

        Err(VerificationError { kind, last_url })
    }

    /// Stream a verified artifact to its local path.
    ///
    /// Returns the number of bytes written.
    pub async fn fetch(&self, artifact: &Artifact) -> Result<u64, TransferError> {
        if !artifact.verified_exists {
            return Err(TransferError::Unverified {
                url: artifact.url.clone(),
            });
        }
        debug!(kind = %artifact.kind, url = %artifact.url, "Starting transfer");
        self.fetch_to(&artifact.url, &artifact.local_path).await
    }

    async fn fetch_to(&self, url: &str, dest: &Path) -> Result<u64, TransferError> {
        self.reporter.stage_started(
            Stage::Transfer,
            format!("Downloading {url} to {}", dest.display()),
        );

        let response = self
            .transfer_client
            .get(url)
            .send()
            .await
            .map_err(|source| TransferError::Request {
                url: url.to_string(),
                source,
            })?;

        if response.status() != StatusCode::OK {
            return Err(TransferError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let write_err = |source| TransferError::Write {
            path: dest.to_path_buf(),
            source,
        };

        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        let mut file = File::create(dest).await.map_err(write_err)?;

        let total = response.content_length().filter(|len| *len > 0);
        let label = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| url.to_string());

        let mut transferred: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|source| TransferError::Read {
                url: url.to_string(),
                transferred,
                source,
            })?;

            for piece in chunk.chunks(self.chunk_size) {
                file.write_all(piece).await.map_err(write_err)?;
                transferred += piece.len() as u64;

                if let Some(total) = total {
                    self.reporter.report(ReportEvent::Progress {
                        label: label.clone(),
                        transferred,
                        total,
                        ratio: transferred as f64 / total as f64,
                    });
                }
            }
        }

        file.flush().await.map_err(write_err)?;
        file.sync_all().await.map_err(write_err)?;

        if let Some(total) = total {
            if total != transferred {
                warn!(
                    url = %url,
                    expected = total,
                    transferred,
                    "Transferred size differs from content length"
                );
            }
        }

        info!(url = %url, path = %dest.display(), bytes = transferred, "Download complete");
        self.reporter.stage_completed(
            Stage::Transfer,
            format!("Downloaded {} ({transferred} bytes)", dest.display()),
        );

        Ok(transferred)
    }
}
