//! Build-directory discovery from mirror index pages.
//!
//! Index pages list one anchor per published build, named after the build
//! time with the colon percent-encoded:
//!
//! ```text
//! <a href="20250924_08%3A35/">20250924_08:35/</a>
//! ```
//!
//! The timestamp is fixed-width (`YYYYMMDD_HH:MM`), so lexicographic order is
//! chronological order and the newest build is simply the maximal segment.

use std::cmp::Ordering;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

const BUILD_DIR_PATTERN: &str = r#"href="([0-9]{8}_[0-9]{2}%3A[0-9]{2}/)""#;

fn build_dir_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(BUILD_DIR_PATTERN).expect("build directory pattern is valid"))
}

/// One timestamped build directory parsed from an index page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildDirectory {
    /// Decoded timestamp, e.g. `20250924_08:35`.
    pub timestamp: String,
    /// Decoded path segment including the trailing slash, e.g. `20250924_08:35/`.
    pub path_segment: String,
}

impl BuildDirectory {
    /// Builds a directory entry from a percent-encoded href value.
    fn from_encoded(href: &str) -> Self {
        let path_segment = href.replace("%3A", ":");
        let timestamp = path_segment.trim_end_matches('/').to_string();
        Self {
            timestamp,
            path_segment,
        }
    }

    /// URL of this build directory under an index URL ending in `/`.
    #[must_use]
    pub fn url(&self, index_url: &str) -> String {
        format!("{}{}", index_url, self.path_segment)
    }
}

impl Ord for BuildDirectory {
    fn cmp(&self, other: &Self) -> Ordering {
        self.path_segment.cmp(&other.path_segment)
    }
}

impl PartialOrd for BuildDirectory {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for BuildDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path_segment)
    }
}

/// Extracts every build directory anchor from an index page, in page order.
///
/// Entries are accepted as soon as they match the anchor pattern; the date and
/// time are not checked for validity.
pub fn parse_build_directories(html: &str) -> Vec<BuildDirectory> {
    build_dir_regex()
        .captures_iter(html)
        .filter_map(|caps| caps.get(1))
        .map(|m| BuildDirectory::from_encoded(m.as_str()))
        .collect()
}

/// Picks the newest build directory from a set of candidates.
pub fn select_latest(mut directories: Vec<BuildDirectory>) -> Option<BuildDirectory> {
    directories.sort_by(|a, b| b.cmp(a));
    directories.into_iter().next()
}

/// Parses an index page and returns its newest build directory, if any.
pub fn latest_build_directory(html: &str) -> Option<BuildDirectory> {
    select_latest(parse_build_directories(html))
}
