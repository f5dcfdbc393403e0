//! Container record written for downstream automation.

use std::fmt::Write as _;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use lxcci_image::ImageCoordinate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::provision::{SSH_PORT, SSH_USER};

/// SSH access details for a provisioned container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshCredentials {
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl SshCredentials {
    /// Root login on the standard port.
    pub fn root(password: impl Into<String>) -> Self {
        Self {
            port: SSH_PORT,
            username: SSH_USER.to_string(),
            password: password.into(),
        }
    }
}

/// Result of a successful build. Written once, never modified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub name: String,
    pub distro: String,
    pub version: String,
    pub arch: String,
    pub ssh: SshCredentials,
    pub created_at: DateTime<Utc>,
}

impl ContainerRecord {
    pub fn new(name: impl Into<String>, coordinate: &ImageCoordinate, ssh: SshCredentials) -> Self {
        Self {
            name: name.into(),
            distro: coordinate.distro().to_string(),
            version: coordinate.version().to_string(),
            arch: coordinate.arch().to_string(),
            ssh,
            created_at: Utc::now(),
        }
    }

    /// Plain `key: value` rendering used for the `.info` file.
    pub fn to_info(&self) -> String {
        let mut out = String::new();
        let fields = [
            ("distro", self.distro.as_str()),
            ("version", self.version.as_str()),
            ("arch", self.arch.as_str()),
            ("container", self.name.as_str()),
        ];
        for (key, value) in fields {
            let _ = writeln!(out, "{key}: {value}");
        }
        let _ = writeln!(out, "ssh_port: {}", self.ssh.port);
        let _ = writeln!(out, "ssh_user: {}", self.ssh.username);
        let _ = writeln!(out, "ssh_password: {}", self.ssh.password);
        out
    }
}

/// Paths of the files written for a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFiles {
    pub info: PathBuf,
    pub json: PathBuf,
}

/// Writes container records to an output directory.
pub struct RecordWriter {
    output_dir: PathBuf,
}

impl RecordWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Write `{name}.info` and `{name}.json`.
    pub async fn write(&self, record: &ContainerRecord) -> std::io::Result<RecordFiles> {
        tokio::fs::create_dir_all(&self.output_dir).await?;

        let info = self.output_dir.join(format!("{}.info", record.name));
        let json = self.output_dir.join(format!("{}.json", record.name));

        tokio::fs::write(&info, record.to_info()).await?;
        let body = serde_json::to_vec_pretty(record).map_err(std::io::Error::other)?;
        tokio::fs::write(&json, body).await?;

        info!(path = %info.display(), container = %record.name, "Container record written");
        Ok(RecordFiles { info, json })
    }
}
