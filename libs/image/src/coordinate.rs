//! Image coordinates and mirror URL layout.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ImageError;

/// Default public image mirror.
pub const DEFAULT_MIRROR: &str = "https://images.linuxcontainers.org";

/// Identity of a desired base image: `(distro, version, arch)`.
///
/// Components are compared as exact strings. Nothing is lowercased or trimmed,
/// so `centos/9-Stream` and `centos/9-stream` are different coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageCoordinate {
    distro: String,
    version: String,
    arch: String,
}

impl ImageCoordinate {
    /// Creates a coordinate, rejecting empty components.
    pub fn new(
        distro: impl Into<String>,
        version: impl Into<String>,
        arch: impl Into<String>,
    ) -> Result<Self, ImageError> {
        let distro = distro.into();
        let version = version.into();
        let arch = arch.into();

        for (field, value) in [("distro", &distro), ("version", &version), ("arch", &arch)] {
            if value.is_empty() {
                return Err(ImageError::EmptyComponent { field });
            }
        }

        Ok(Self {
            distro,
            version,
            arch,
        })
    }

    pub fn distro(&self) -> &str {
        &self.distro
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    /// Alias under which the imported image is registered, e.g. `centos-9-Stream-amd64`.
    #[must_use]
    pub fn alias(&self) -> String {
        format!("{}-{}-{}", self.distro, self.version, self.arch)
    }

    /// Reference understood by the runtime's built-in `images:` remote.
    #[must_use]
    pub fn remote_reference(&self) -> String {
        format!("images:{}/{}/{}", self.distro, self.version, self.arch)
    }
}

impl fmt::Display for ImageCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.distro, self.version, self.arch)
    }
}

/// Base URL of an image mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mirror {
    base: String,
}

impl Mirror {
    /// Creates a mirror from its base URL. A trailing `/` is dropped.
    pub fn new(base: impl Into<String>) -> Result<Self, ImageError> {
        let base = base.into();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ImageError::InvalidMirror(base));
        }
        Ok(Self {
            base: base.trim_end_matches('/').to_string(),
        })
    }

    /// Index page listing the build directories of a coordinate.
    ///
    /// Always ends with `/`, so a decoded build directory segment can be appended directly.
    #[must_use]
    pub fn index_url(&self, coordinate: &ImageCoordinate) -> String {
        format!(
            "{}/images/{}/{}/{}/default/",
            self.base, coordinate.distro, coordinate.version, coordinate.arch
        )
    }
}

impl Default for Mirror {
    fn default() -> Self {
        Self {
            base: DEFAULT_MIRROR.to_string(),
        }
    }
}
