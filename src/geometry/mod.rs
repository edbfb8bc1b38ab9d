//! Footprint geometry: inspection, alignment, cropping, and seam splitting.
//!
//! | Module | Role |
//! |--------|------|
//! | [`inspect`] | Reads extent, resolution, CRS and color table via `gdalinfo -json` |
//! | [`align`] | Snaps an insertion window to whole store blocks |
//! | [`crop`] | Clips a footprint to the store bounds |
//! | [`antimeridian`] | Cuts a seam-crossing tile into two halves |
//! | [`rational`] | Exact decimal ⇄ rational conversion used by [`align`] |
//!
//! [`align`] and [`antimeridian::split_footprint`] are pure. The rest drive
//! an [`ExternalTool`](crate::tools::ExternalTool) and write intermediates
//! into a worker's working directory.

pub mod align;
pub mod antimeridian;
pub mod crop;
pub mod inspect;
pub mod rational;
