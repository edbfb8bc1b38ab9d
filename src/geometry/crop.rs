//! Extent Cropper: clip a tile to the store's projection bounds.

use crate::tools::commands::crop_window;
use crate::tools::{ExternalTool, ToolError};
use crate::types::{Bounds, SourceTile};
use std::path::Path;
use tracing::info;

/// Crop `tile` to `bounds`, writing `<working_dir>/<stem>_crop.vrt`.
///
/// The returned tile points at the new VRT and carries the clamped
/// footprint. A fresh intermediate is written on every call.
pub fn crop<T: ExternalTool + ?Sized>(
    tool: &T,
    tile: &SourceTile,
    bounds: &Bounds,
    working_dir: &Path,
) -> Result<SourceTile, ToolError> {
    let window = tile.extent.clamp_to(bounds);
    let output = working_dir.join(format!("{}_crop.vrt", tile.stem()));
    info!(tile = %tile.path.display(), from = %tile.extent, to = %window, "cropping to store bounds");

    let inv = crop_window(&tile.path, &output, &window);
    tool.run_checked(&inv)?;
    Ok(tile.derive(output, window))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::source_tile;
    use crate::tools::ToolOutput;
    use crate::tools::tool::tests::MockTool;
    use crate::types::Extent;

    #[test]
    fn crop_clamps_and_names_intermediate() {
        let tool = MockTool::new();
        let tile = source_tile("/in/north.tif", Extent::new(-20.0, 95.0, 20.0, 60.0));
        let world = Bounds::new(-180.0, -90.0, 180.0, 90.0);

        let cropped = crop(&tool, &tile, &world, Path::new("/work")).unwrap();
        assert_eq!(cropped.path, Path::new("/work/north_crop.vrt"));
        assert_eq!(cropped.extent, Extent::new(-20.0, 90.0, 20.0, 60.0));
        assert_eq!(cropped.resolution, tile.resolution);

        assert_eq!(
            tool.get_invocations()[0].command_line(),
            "gdal_translate -q -of VRT -projwin -20 90 20 60 /in/north.tif /work/north_crop.vrt"
        );
    }

    #[test]
    fn crop_failure_propagates() {
        let tool = MockTool::with_responder(|_| Ok(ToolOutput::ok("").with_stderr("ERROR 1: bad")));
        let tile = source_tile("/in/a.tif", Extent::new(0.0, 1.0, 1.0, 0.0));
        let world = Bounds::new(-180.0, -90.0, 180.0, 90.0);
        assert!(crop(&tool, &tile, &world, Path::new("/work")).is_err());
    }
}
