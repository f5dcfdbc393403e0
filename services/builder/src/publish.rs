//! Stopping, archiving and uploading a provisioned container.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, info};

use crate::report::{Reporter, Stage};
use crate::runtime::{LxcRuntime, RuntimeError};

/// A finished archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveHandle {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Where the uploader put the archive, if anywhere.
    pub uploaded_to: Option<String>,
}

/// Destination for finished archives.
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Upload `archive` and return a description of where it went.
    async fn upload(&self, archive: &Path) -> Result<Option<String>, RuntimeError>;
}

/// Leaves the archive where it was written.
#[derive(Debug, Default, Clone)]
pub struct NoopUploader;

#[async_trait]
impl Uploader for NoopUploader {
    async fn upload(&self, archive: &Path) -> Result<Option<String>, RuntimeError> {
        debug!(path = %archive.display(), "No upload destination configured");
        Ok(None)
    }
}

/// Copies archives into a publish directory.
#[derive(Debug, Clone)]
pub struct DirectoryUploader {
    dir: PathBuf,
}

impl DirectoryUploader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl Uploader for DirectoryUploader {
    async fn upload(&self, archive: &Path) -> Result<Option<String>, RuntimeError> {
        let upload_err = |message: String| RuntimeError::Upload {
            path: archive.to_path_buf(),
            message,
        };

        let file_name = archive
            .file_name()
            .ok_or_else(|| upload_err("archive path has no file name".to_string()))?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| upload_err(e.to_string()))?;

        let dest = self.dir.join(file_name);
        tokio::fs::copy(archive, &dest)
            .await
            .map_err(|e| upload_err(e.to_string()))?;

        info!(from = %archive.display(), to = %dest.display(), "Archive published");
        Ok(Some(dest.display().to_string()))
    }
}

/// Writes `source_dir` as a gzip-compressed tarball at `dest`.
///
/// Symlinks are stored as links, not followed, since they usually point at
/// absolute paths that only make sense inside the container.
pub fn archive_directory(source_dir: &Path, dest: &Path) -> Result<u64, RuntimeError> {
    let archive_err = |source| RuntimeError::Archive {
        path: source_dir.to_path_buf(),
        source,
    };

    if !source_dir.is_dir() {
        return Err(archive_err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "container root filesystem not found",
        )));
    }

    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(archive_err)?;
    }

    let file = File::create(dest).map_err(archive_err)?;
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    builder.append_dir_all(".", source_dir).map_err(archive_err)?;

    let encoder = builder.into_inner().map_err(archive_err)?;
    let mut writer = encoder.finish().map_err(archive_err)?;
    writer.flush().map_err(archive_err)?;
    drop(writer);

    let size = std::fs::metadata(dest).map_err(archive_err)?.len();
    Ok(size)
}

/// Stops a container, archives its filesystem and hands the archive to an uploader.
pub struct Publisher {
    runtime: Arc<LxcRuntime>,
    uploader: Arc<dyn Uploader>,
    output_dir: PathBuf,
    reporter: Arc<dyn Reporter>,
}

impl Publisher {
    pub fn new(
        runtime: Arc<LxcRuntime>,
        uploader: Arc<dyn Uploader>,
        output_dir: impl Into<PathBuf>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            runtime,
            uploader,
            output_dir: output_dir.into(),
            reporter,
        }
    }

    /// Path the archive for `name` is written to.
    pub fn archive_path(&self, name: &str) -> PathBuf {
        self.output_dir.join(format!("{name}.tar.gz"))
    }

    pub async fn publish(&self, name: &str) -> Result<ArchiveHandle, RuntimeError> {
        self.reporter
            .stage_started(Stage::Publish, format!("Stopping container {name}"));

        // The archive reads the filesystem directly, so a failed stop is not fatal.
        if let Err(e) = self.runtime.stop(name).await {
            self.reporter
                .warning(Stage::Publish, format!("Failed to stop {name}: {e}"));
        }

        let source = self.runtime.rootfs_path(name);
        let dest = self.archive_path(name);
        self.reporter.stage_started(
            Stage::Publish,
            format!("Archiving {} to {}", source.display(), dest.display()),
        );

        let size_bytes = {
            let (src, dst) = (source.clone(), dest.clone());
            tokio::task::spawn_blocking(move || archive_directory(&src, &dst))
                .await
                .map_err(|e| RuntimeError::Archive {
                    path: source.clone(),
                    source: std::io::Error::other(e),
                })??
        };

        let uploaded_to = self.uploader.upload(&dest).await?;

        self.reporter.stage_completed(
            Stage::Publish,
            format!("Archive {} ({size_bytes} bytes)", dest.display()),
        );

        Ok(ArchiveHandle {
            path: dest,
            size_bytes,
            uploaded_to,
        })
    }
}
