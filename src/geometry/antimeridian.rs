//! Antimeridian Splitter.
//!
//! A tile crossing the `±seam` meridian is cut into a west half ending at
//! `+seam` and an east half that is moved back by one period so it starts at
//! `-seam`. Pixels are never reprojected; only affine bounds are rewritten.
//!
//! ```text
//!   wrapped footprint           170 ........ 190
//!   left  (kept in place)       170 .. 180
//!   right (restamped -360)                 -180 .. -170
//! ```
//!
//! A half narrower than one target pixel is dropped. That guarantees a
//! re-split of a half always produces at most one non-empty piece.

use crate::tools::commands::{assign_bounds, warp_cutline};
use crate::tools::{ExternalTool, ToolError, recoverable};
use crate::types::{Extent, Resolution, SourceTile};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Pure result of cutting a footprint at the seam.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FootprintSplit {
    /// Footprint after moving it into `[-seam, ..)` with a continuous x range.
    pub wrapped: Extent,
    /// West half, `wrapped.ulx .. seam`.
    pub left: Option<Extent>,
    /// East half as cut in wrapped space, `seam .. wrapped.lrx`.
    pub right_cut: Option<Extent>,
    /// East half restamped by `-period`.
    pub right: Option<Extent>,
}

/// Move a footprint so its x range is continuous and starts at or after
/// `-seam`.
///
/// A footprint whose right edge lies west of its left edge gets one period
/// added to the right edge. One that starts west of `-seam` is shifted east
/// by a whole period.
pub fn wrap_footprint(extent: &Extent, seam: f64) -> Extent {
    let period = 2.0 * seam;
    if extent.wraps() {
        Extent::new(extent.ulx, extent.uly, extent.lrx + period, extent.lry)
    } else if extent.ulx < -seam {
        Extent::new(extent.ulx + period, extent.uly, extent.lrx + period, extent.lry)
    } else {
        *extent
    }
}

/// Cut `extent` at `seam`, dropping halves narrower than `resolution`.
pub fn split_footprint(extent: &Extent, seam: f64, resolution: &Resolution) -> FootprintSplit {
    let period = 2.0 * seam;
    let wrapped = wrap_footprint(extent, seam);
    let wide_enough = |e: &Extent| e.width() >= resolution.x && e.height() >= resolution.y;

    let left = Some(Extent::new(wrapped.ulx, wrapped.uly, seam.min(wrapped.lrx), wrapped.lry))
        .filter(wide_enough);
    let right_cut = Some(Extent::new(seam.max(wrapped.ulx), wrapped.uly, wrapped.lrx, wrapped.lry))
        .filter(wide_enough);
    let right = right_cut
        .map(|cut| Extent::new(cut.ulx - period, cut.uly, cut.lrx - period, cut.lry));

    FootprintSplit {
        wrapped,
        left,
        right_cut,
        right,
    }
}

/// Halves produced by [`split`], plus every intermediate written on the way.
#[derive(Debug, Default)]
pub struct SplitTiles {
    pub left: Option<SourceTile>,
    pub right: Option<SourceTile>,
    pub artifacts: Vec<PathBuf>,
}

impl SplitTiles {
    pub fn is_empty(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }

    /// Present halves, west first.
    pub fn into_halves(self) -> impl Iterator<Item = SourceTile> {
        self.left.into_iter().chain(self.right)
    }
}

/// GeoJSON polygon covering `extent`, in the tile's own CRS.
pub fn cutline_geojson(extent: &Extent) -> serde_json::Value {
    let ring = [
        [extent.ulx, extent.uly],
        [extent.lrx, extent.uly],
        [extent.lrx, extent.lry],
        [extent.ulx, extent.lry],
        [extent.ulx, extent.uly],
    ];
    json!({
        "type": "FeatureCollection",
        "features": [{
            "type": "Feature",
            "properties": {},
            "geometry": { "type": "Polygon", "coordinates": [ring] }
        }]
    })
}

fn write_cutline(path: &Path, extent: &Extent) -> std::io::Result<()> {
    let text = serde_json::to_string_pretty(&cutline_geojson(extent))?;
    fs::write(path, text)
}

/// Cut `source` to `window` through a cutline file. `Ok(None)` on a recoverable
/// failure.
fn cut<T: ExternalTool + ?Sized>(
    tool: &T,
    source: &Path,
    window: &Extent,
    cutline: PathBuf,
    output: PathBuf,
    artifacts: &mut Vec<PathBuf>,
) -> Result<Option<PathBuf>, ToolError> {
    if let Err(err) = write_cutline(&cutline, window) {
        warn!(cutline = %cutline.display(), "cannot write cutline: {err}");
        return Ok(None);
    }
    artifacts.push(cutline.clone());

    let inv = warp_cutline(source, &cutline, &output);
    let done = recoverable(tool.run_checked(&inv), "cutline crop")?;
    artifacts.push(output.clone());
    Ok(done.map(|_| output))
}

/// Split a seam-crossing tile into up to two derived tiles.
///
/// Intermediates are named `<stem>_wrapped.vrt`, `<stem>_{left,right}_cutline.json`,
/// `<stem>_left.tif`, `<stem>_right_cut.tif` and `<stem>_right.vrt`. If the
/// initial restamp fails both halves are `None`.
pub fn split<T: ExternalTool + ?Sized>(
    tool: &T,
    tile: &SourceTile,
    seam: f64,
    resolution: &Resolution,
    working_dir: &Path,
) -> Result<SplitTiles, ToolError> {
    let stem = tile.stem();
    let geometry = split_footprint(&tile.extent, seam, resolution);
    let mut result = SplitTiles::default();
    info!(tile = %tile.path.display(), footprint = %tile.extent, "splitting at antimeridian");

    let source = if geometry.wrapped == tile.extent {
        tile.path.clone()
    } else {
        let wrapped = working_dir.join(format!("{stem}_wrapped.vrt"));
        let inv = assign_bounds(&tile.path, &wrapped, &geometry.wrapped);
        let done = recoverable(tool.run_checked(&inv), "restamp")?;
        result.artifacts.push(wrapped.clone());
        if done.is_none() {
            return Ok(result);
        }
        wrapped
    };

    if let Some(window) = geometry.left {
        let cut_path = cut(
            tool,
            &source,
            &window,
            working_dir.join(format!("{stem}_left_cutline.json")),
            working_dir.join(format!("{stem}_left.tif")),
            &mut result.artifacts,
        )?;
        result.left = cut_path.map(|path| tile.derive(path, window));
    }

    if let (Some(window), Some(restamped)) = (geometry.right_cut, geometry.right) {
        let cut_path = cut(
            tool,
            &source,
            &window,
            working_dir.join(format!("{stem}_right_cutline.json")),
            working_dir.join(format!("{stem}_right_cut.tif")),
            &mut result.artifacts,
        )?;
        if let Some(cut_path) = cut_path {
            let output = working_dir.join(format!("{stem}_right.vrt"));
            let inv = assign_bounds(&cut_path, &output, &restamped);
            let done = recoverable(tool.run_checked(&inv), "restamp")?;
            result.artifacts.push(output.clone());
            result.right = done.map(|_| tile.derive(output, restamped));
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::align::align;
    use crate::test_helpers::source_tile;
    use crate::tools::ToolOutput;
    use crate::tools::tool::tests::MockTool;
    use crate::types::Bounds;
    use tempfile::TempDir;

    const GEO_SEAM: f64 = 180.0;
    const PIXEL: Resolution = Resolution { x: 0.087890625, y: 0.087890625 };

    // =========================================================================
    // Pure geometry
    // =========================================================================

    #[test]
    fn splits_wrapped_tile_into_two_halves() {
        let split = split_footprint(&Extent::new(170.0, 10.0, -170.0, -10.0), GEO_SEAM, &PIXEL);
        assert_eq!(split.wrapped, Extent::new(170.0, 10.0, 190.0, -10.0));
        assert_eq!(split.left, Some(Extent::new(170.0, 10.0, 180.0, -10.0)));
        assert_eq!(split.right, Some(Extent::new(-180.0, 10.0, -170.0, -10.0)));
    }

    #[test]
    fn split_halves_align_like_any_tile() {
        let split = split_footprint(&Extent::new(170.0, 10.0, -170.0, -10.0), GEO_SEAM, &PIXEL);
        let world = Bounds::new(-180.0, -90.0, 180.0, 90.0);
        for half in [split.left.unwrap(), split.right.unwrap()] {
            let window = align(&half, &world, (4096, 2048), 512).unwrap();
            let [ulx, _, lrx, _] = window.to_strings();
            assert!(ulx.parse::<f64>().unwrap() <= half.ulx);
            assert!(lrx.parse::<f64>().unwrap() >= half.lrx);
        }
    }

    #[test]
    fn tile_starting_west_of_seam_is_shifted() {
        let split = split_footprint(&Extent::new(-190.0, 10.0, -170.0, -10.0), GEO_SEAM, &PIXEL);
        assert_eq!(split.wrapped, Extent::new(170.0, 10.0, 190.0, -10.0));
        assert_eq!(split.left, Some(Extent::new(170.0, 10.0, 180.0, -10.0)));
        assert_eq!(split.right, Some(Extent::new(-180.0, 10.0, -170.0, -10.0)));
    }

    #[test]
    fn tile_past_east_edge_keeps_both_halves() {
        let split = split_footprint(&Extent::new(175.0, 5.0, 185.0, 0.0), GEO_SEAM, &PIXEL);
        assert_eq!(split.left, Some(Extent::new(175.0, 5.0, 180.0, 0.0)));
        assert_eq!(split.right, Some(Extent::new(-180.0, 5.0, -175.0, 0.0)));
    }

    #[test]
    fn sliver_narrower_than_a_pixel_is_dropped() {
        let split = split_footprint(&Extent::new(179.95, 10.0, -170.0, -10.0), GEO_SEAM, &PIXEL);
        assert_eq!(split.left, None);
        assert_eq!(split.right, Some(Extent::new(-180.0, 10.0, -170.0, -10.0)));
    }

    #[test]
    fn splitting_a_half_again_yields_one_piece() {
        let seams = [GEO_SEAM, 20037508.342789244];
        let tiles = [
            Extent::new(170.0, 10.0, -170.0, -10.0),
            Extent::new(-185.0, 1.0, 10.0, 0.0),
            Extent::new(179.99, 1.0, 180.2, 0.0),
        ];
        for seam in seams {
            for tile in tiles {
                let tile = Extent::new(tile.ulx * seam / GEO_SEAM, tile.uly, tile.lrx * seam / GEO_SEAM, tile.lry);
                let first = split_footprint(&tile, seam, &PIXEL);
                for half in first.left.into_iter().chain(first.right) {
                    let again = split_footprint(&half, seam, &PIXEL);
                    let pieces = again.left.iter().count() + again.right.iter().count();
                    assert!(pieces <= 1, "{half} split into {pieces} pieces at seam {seam}");
                }
            }
        }
    }

    #[test]
    fn halves_reconstruct_wrapped_footprint() {
        let tile = Extent::new(100.0, 40.0, -120.0, -30.0);
        let split = split_footprint(&tile, GEO_SEAM, &PIXEL);
        let left = split.left.unwrap();
        let cut = split.right_cut.unwrap();
        assert_eq!(left.ulx, split.wrapped.ulx);
        assert_eq!(left.lrx, cut.ulx);
        assert_eq!(cut.lrx, split.wrapped.lrx);
        assert_eq!(left.width() + cut.width(), split.wrapped.width());
        assert_eq!(split.right.unwrap().ulx, -GEO_SEAM);
    }

    #[test]
    fn cutline_is_closed_polygon() {
        let value = cutline_geojson(&Extent::new(170.0, 10.0, 180.0, -10.0));
        let ring = &value["features"][0]["geometry"]["coordinates"][0];
        assert_eq!(ring.as_array().unwrap().len(), 5);
        assert_eq!(ring[0], ring[4]);
        assert_eq!(ring[1], json!([180.0, 10.0]));
    }

    // =========================================================================
    // Tool-driven split
    // =========================================================================

    #[test]
    fn split_runs_restamp_cut_and_shift() {
        let tmp = TempDir::new().unwrap();
        let tool = MockTool::new();
        let tile = source_tile("/in/seam.tif", Extent::new(170.0, 10.0, -170.0, -10.0));

        let halves = split(&tool, &tile, GEO_SEAM, &PIXEL, tmp.path()).unwrap();
        let left = halves.left.as_ref().unwrap();
        let right = halves.right.as_ref().unwrap();
        assert_eq!(left.path, tmp.path().join("seam_left.tif"));
        assert_eq!(left.extent, Extent::new(170.0, 10.0, 180.0, -10.0));
        assert_eq!(right.path, tmp.path().join("seam_right.vrt"));
        assert_eq!(right.extent, Extent::new(-180.0, 10.0, -170.0, -10.0));

        let invs = tool.get_invocations();
        assert_eq!(
            tool.programs(),
            vec!["gdal_translate", "gdalwarp", "gdalwarp", "gdal_translate"]
        );
        assert!(invs[0].command_line().contains("-a_ullr 170 10 190 -10"));
        assert!(invs[3].command_line().contains("-a_ullr -180 10 -170 -10"));
        assert!(tmp.path().join("seam_left_cutline.json").exists());
        assert!(halves.artifacts.contains(&tmp.path().join("seam_wrapped.vrt")));
    }

    #[test]
    fn failed_restamp_yields_no_halves() {
        let tmp = TempDir::new().unwrap();
        let tool = MockTool::with_responder(|_| Ok(ToolOutput::failed("ERROR 1: cannot open")));
        let tile = source_tile("/in/seam.tif", Extent::new(170.0, 10.0, -170.0, -10.0));

        let halves = split(&tool, &tile, GEO_SEAM, &PIXEL, tmp.path()).unwrap();
        assert!(halves.is_empty());
        assert_eq!(tool.programs(), vec!["gdal_translate"]);
    }

    #[test]
    fn failed_cut_drops_only_that_half() {
        let tmp = TempDir::new().unwrap();
        let tool = MockTool::with_responder(|inv| {
            if inv.args.iter().any(|a| a.ends_with("seam_left.tif")) {
                Ok(ToolOutput::failed("ERROR 1: cutline"))
            } else {
                Ok(ToolOutput::ok(""))
            }
        });
        let tile = source_tile("/in/seam.tif", Extent::new(175.0, 10.0, 185.0, -10.0));

        let halves = split(&tool, &tile, GEO_SEAM, &PIXEL, tmp.path()).unwrap();
        assert!(halves.left.is_none());
        assert!(halves.right.is_some());
    }
}
