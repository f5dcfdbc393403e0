//! Latest build directory resolution.
//!
//! Fetches a coordinate's index page from the mirror and picks the newest
//! timestamped build directory listed on it.

use std::sync::Arc;
use std::time::Duration;

use lxcci_image::{latest_build_directory, BuildDirectory};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::debug;

use crate::report::{Reporter, Stage};

/// Errors from build directory discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("failed to fetch index page {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("index page {url} unavailable, status code {status}")]
    Status { url: String, status: u16 },

    #[error("failed to read index page {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("no build directories found at {url}")]
    NoBuilds { url: String },
}

/// Resolves the newest build directory of an index page.
pub struct DirectoryResolver {
    client: Client,
    reporter: Arc<dyn Reporter>,
}

impl DirectoryResolver {
    /// Create a resolver whose requests are bounded by `timeout`.
    pub fn new(timeout: Duration, reporter: Arc<dyn Reporter>) -> Result<Self, DiscoveryError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(DiscoveryError::Client)?;

        Ok(Self { client, reporter })
    }

    /// Fetch `index_url` and return its lexicographically newest build directory.
    pub async fn resolve(&self, index_url: &str) -> Result<BuildDirectory, DiscoveryError> {
        self.reporter
            .stage_started(Stage::Discovery, format!("Fetching build index {index_url}"));

        let response = self
            .client
            .get(index_url)
            .send()
            .await
            .map_err(|source| DiscoveryError::Request {
                url: index_url.to_string(),
                source,
            })?;

        if response.status() != StatusCode::OK {
            return Err(DiscoveryError::Status {
                url: index_url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|source| DiscoveryError::Body {
                url: index_url.to_string(),
                source,
            })?;

        debug!(url = %index_url, bytes = body.len(), "Index page fetched");

        let latest = latest_build_directory(&body).ok_or_else(|| DiscoveryError::NoBuilds {
            url: index_url.to_string(),
        })?;

        self.reporter.stage_completed(
            Stage::Discovery,
            format!("Latest build directory: {}", latest.path_segment),
        );

        Ok(latest)
    }
}
