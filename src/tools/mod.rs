//! External GDAL / MRF tool invocation.
//!
//! | Concern | Tool |
//! |---|---|
//! | **Inspect** | `gdalinfo -json` |
//! | **Crop / restamp bounds / extract window** | `gdal_translate` |
//! | **Resample / cutline crop** | `gdalwarp` |
//! | **Mosaic** | `gdalbuildvrt` |
//! | **Paletted merge** | `gdal_merge.py -pct` |
//! | **Insert** | `mrf_insert` |
//! | **Compact** | `mrf_clean.py` |
//!
//! The module is split into:
//! - **Tool**: [`ExternalTool`] trait, [`Invocation`], [`ToolOutput`], stderr classification
//! - **Commands**: builders for each command line (unit testable)
//! - **System**: [`SystemTool`], which spawns the processes

pub mod commands;
pub mod system;
pub mod tool;

pub use system::SystemTool;
pub use tool::{Diagnostic, ExternalTool, Invocation, ToolError, ToolOutput, recoverable};
