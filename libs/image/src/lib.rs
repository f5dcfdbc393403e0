//! # lxcci-image
//!
//! Pure data and parsing for locating base images on an image mirror.
//!
//! Mirrors publish one directory per coordinate, and below it one
//! timestamped directory per build:
//!
//! ```text
//! {mirror}/images/{distro}/{version}/{arch}/default/
//!     20250815_12:00/
//!     20250924_08:35/
//!         meta.tar.xz
//!         rootfs.tar.xz
//! ```
//!
//! This crate performs no I/O. Fetching the index page and probing the
//! artifacts is done by `lxcci-builder`.

mod artifact;
mod coordinate;
mod error;
mod index;

pub use artifact::{candidate_urls, ArtifactKind};
pub use coordinate::{ImageCoordinate, Mirror, DEFAULT_MIRROR};
pub use error::ImageError;
pub use index::{latest_build_directory, parse_build_directories, select_latest, BuildDirectory};
