//! Merge Compositor: composite a tile over the store's current content.
//!
//! The incoming tile is widened to its block-aligned window so that the
//! later insert replaces whole store blocks with pixels that already contain
//! the old content around the new tile.
//!
//! ```text
//! paletted tile   gdal_merge.py -pct  [store, tile]  →  <stem>_merged.tif
//! otherwise       gdalbuildvrt        [store, tile]  →  <stem>_mosaic.vrt
//!                 gdal_translate -projwin window      →  <stem>_merged.tif
//! ```
//!
//! Must run under the write lock: it reads the store while nothing inserts.

use crate::geometry::align::align;
use crate::store::TileStore;
use crate::tools::commands::{build_mosaic, extract_window, paletted_merge};
use crate::tools::{ExternalTool, ToolError, recoverable};
use crate::types::{ResampleMethod, SourceTile};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// A merged tile ready for insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct Merged {
    pub tile: SourceTile,
    pub artifacts: Vec<PathBuf>,
}

/// Composite `tile` with the current content of `store` (or of one z slice).
///
/// Returns `Ok(None)` when the window cannot be aligned or any tool fails.
/// Only a missing tool is an error.
pub fn merge<T: ExternalTool + ?Sized>(
    tool: &T,
    store: &TileStore,
    slot: Option<u32>,
    tile: &SourceTile,
    nodata: Option<f64>,
    resampling: ResampleMethod,
    working_dir: &Path,
) -> Result<Option<Merged>, ToolError> {
    let window = match align(&tile.extent, &store.bounds, store.pixel_size(), store.block_size()) {
        Ok(window) => window,
        Err(err) => {
            warn!(tile = %tile.path.display(), "cannot align merge window: {err}");
            return Ok(None);
        }
    };
    let stem = tile.stem();
    let source = store.insert_target(slot);
    let source = Path::new(&source);
    let output = working_dir.join(format!("{stem}_merged.tif"));
    let mut artifacts = Vec::new();
    info!(tile = %tile.path.display(), window = ?window.to_strings(), "merging with store");

    if tile.has_color_table {
        let inv = paletted_merge(source, &tile.path, &output, &window, nodata);
        artifacts.push(output.clone());
        if recoverable(tool.run_checked(&inv), "paletted merge")?.is_none() {
            return Ok(None);
        }
    } else {
        let mosaic = working_dir.join(format!("{stem}_mosaic.vrt"));
        let inv = build_mosaic(
            &mosaic,
            &[source, tile.path.as_path()],
            &window,
            &store.resolution(),
            resampling,
            nodata,
        );
        artifacts.push(mosaic.clone());
        if recoverable(tool.run_checked(&inv), "mosaic")?.is_none() {
            return Ok(None);
        }

        let inv = extract_window(&mosaic, &output, &window);
        artifacts.push(output.clone());
        if recoverable(tool.run_checked(&inv), "window extract")?.is_none() {
            return Ok(None);
        }
    }

    Ok(Some(Merged {
        tile: tile.derive(output, window.to_extent()),
        artifacts,
    }))
}
