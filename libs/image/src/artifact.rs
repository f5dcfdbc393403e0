//! Artifact kinds and their candidate filenames inside a build directory.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::BuildDirectory;

/// Kind of file needed to construct a container image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Root filesystem archive.
    Rootfs,
    /// Image metadata archive.
    Metadata,
}

impl ArtifactKind {
    /// Filenames to probe for this kind, most preferred first.
    #[must_use]
    pub const fn candidates(self) -> &'static [&'static str] {
        match self {
            ArtifactKind::Rootfs => &["rootfs.tar.xz", "rootfs.squashfs"],
            ArtifactKind::Metadata => &["meta.tar.xz"],
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            ArtifactKind::Rootfs => "rootfs",
            ArtifactKind::Metadata => "metadata",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Candidate URLs for an artifact kind within a build directory, in probe order.
pub fn candidate_urls(index_url: &str, dir: &BuildDirectory, kind: ArtifactKind) -> Vec<String> {
    let base = dir.url(index_url);
    kind.candidates()
        .iter()
        .map(|name| format!("{base}{name}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{latest_build_directory, ImageCoordinate, Mirror};

    #[test]
    fn test_candidate_urls_for_centos() {
        let coordinate = ImageCoordinate::new("centos", "9-Stream", "amd64").unwrap();
        let index = Mirror::default().index_url(&coordinate);
        let dir = latest_build_directory(r#"<a href="20240101_00%3A00/">"#).unwrap();

        let rootfs = candidate_urls(&index, &dir, ArtifactKind::Rootfs);
        assert_eq!(
            rootfs[0],
            "https://images.linuxcontainers.org/images/centos/9-Stream/amd64/default/20240101_00:00/rootfs.tar.xz"
        );
        assert!(rootfs[1].ends_with("/20240101_00:00/rootfs.squashfs"));

        let meta = candidate_urls(&index, &dir, ArtifactKind::Metadata);
        assert_eq!(meta.len(), 1);
        assert!(meta[0].ends_with("/default/20240101_00:00/meta.tar.xz"));
    }

    #[test]
    fn test_tar_xz_preferred_over_squashfs() {
        assert_eq!(ArtifactKind::Rootfs.candidates()[0], "rootfs.tar.xz");
    }
}
