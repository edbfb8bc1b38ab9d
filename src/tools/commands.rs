//! Command builders for the GDAL and MRF tools.
//!
//! These functions describe *what* to run, not *how*. They are the interface
//! between the geometry / engine modules (which decide what files to make)
//! and the [`ExternalTool`](super::ExternalTool) (which runs them). Keeping
//! them here lets tests assert on exact argument lists.
//!
//! Coordinates are written with Rust's shortest round-trip `f64` formatting,
//! or as the exact decimal strings produced by the block aligner.

use super::tool::Invocation;
use crate::geometry::align::AlignedExtent;
use crate::types::{Extent, InsertMethod, ResampleMethod, Resolution};
use std::path::Path;
use std::time::Duration;

pub const GDALINFO: &str = "gdalinfo";
pub const GDAL_TRANSLATE: &str = "gdal_translate";
pub const GDALWARP: &str = "gdalwarp";
pub const GDALBUILDVRT: &str = "gdalbuildvrt";
pub const GDAL_MERGE: &str = "gdal_merge.py";
pub const MRF_INSERT: &str = "mrf_insert";
pub const MRF_CLEAN: &str = "mrf_clean.py";

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn extent_args(extent: &Extent) -> [String; 4] {
    [
        extent.ulx.to_string(),
        extent.uly.to_string(),
        extent.lrx.to_string(),
        extent.lry.to_string(),
    ]
}

/// `gdalinfo -json`, bounded by `timeout`.
pub fn raster_info(path: &Path, timeout: Duration) -> Invocation {
    Invocation::new(GDALINFO)
        .arg("-json")
        .arg(path_arg(path))
        .with_timeout(timeout)
}

/// Cut a window out of `source` into a VRT without touching pixels.
pub fn crop_window(source: &Path, output: &Path, window: &Extent) -> Invocation {
    Invocation::new(GDAL_TRANSLATE)
        .args(["-q", "-of", "VRT", "-projwin"])
        .args(extent_args(window))
        .arg(path_arg(source))
        .arg(path_arg(output))
}

/// Restamp the affine bounds of `source` (no reprojection).
pub fn assign_bounds(source: &Path, output: &Path, bounds: &Extent) -> Invocation {
    Invocation::new(GDAL_TRANSLATE)
        .args(["-q", "-of", "VRT", "-a_ullr"])
        .args(extent_args(bounds))
        .arg(path_arg(source))
        .arg(path_arg(output))
}

/// Resample `source` to the store resolution.
pub fn warp_to_resolution(
    source: &Path,
    output: &Path,
    resolution: &Resolution,
    resampling: ResampleMethod,
) -> Invocation {
    Invocation::new(GDALWARP)
        .args(["-q", "-overwrite", "-of", "GTiff", "-r", resampling.as_gdal(), "-tr"])
        .arg(resolution.x.to_string())
        .arg(resolution.y.to_string())
        .arg(path_arg(source))
        .arg(path_arg(output))
}

/// Crop `source` to the polygon stored in `cutline` (GeoJSON).
pub fn warp_cutline(source: &Path, cutline: &Path, output: &Path) -> Invocation {
    Invocation::new(GDALWARP)
        .args(["-q", "-overwrite", "-of", "GTiff", "-crop_to_cutline", "-cutline"])
        .arg(path_arg(cutline))
        .arg(path_arg(source))
        .arg(path_arg(output))
}

/// Mosaic `inputs` (later inputs on top) over the aligned window.
pub fn build_mosaic(
    output: &Path,
    inputs: &[&Path],
    window: &AlignedExtent,
    resolution: &Resolution,
    resampling: ResampleMethod,
    nodata: Option<f64>,
) -> Invocation {
    let [ulx, uly, lrx, lry] = window.to_strings();
    let mut inv = Invocation::new(GDALBUILDVRT)
        .args(["-q", "-r", resampling.as_gdal(), "-te"])
        .args([ulx, lry, lrx, uly])
        .arg("-tr")
        .arg(resolution.x.to_string())
        .arg(resolution.y.to_string());
    if let Some(nodata) = nodata {
        inv = inv
            .arg("-srcnodata")
            .arg(nodata.to_string())
            .arg("-vrtnodata")
            .arg(nodata.to_string());
    }
    inv.arg(path_arg(output))
        .args(inputs.iter().map(|p| path_arg(p)))
}

/// Extract the aligned window from a mosaic.
pub fn extract_window(source: &Path, output: &Path, window: &AlignedExtent) -> Invocation {
    Invocation::new(GDAL_TRANSLATE)
        .args(["-q", "-of", "GTiff", "-projwin"])
        .args(window.to_strings())
        .arg(path_arg(source))
        .arg(path_arg(output))
}

/// Merge a paletted tile onto the store, keeping the color table.
pub fn paletted_merge(
    store: &Path,
    tile: &Path,
    output: &Path,
    window: &AlignedExtent,
    nodata: Option<f64>,
) -> Invocation {
    let mut inv = Invocation::new(GDAL_MERGE)
        .args(["-q", "-pct", "-of", "GTiff", "-ul_lr"])
        .args(window.to_strings());
    if let Some(nodata) = nodata {
        inv = inv.arg("-n").arg(nodata.to_string());
    }
    inv.arg("-o")
        .arg(path_arg(output))
        .arg(path_arg(store))
        .arg(path_arg(tile))
}

/// Insert one tile into the store (or one z-slice of it).
pub fn insert_tile(tile: &Path, target: &str, method: InsertMethod) -> Invocation {
    Invocation::new(MRF_INSERT)
        .args(["-v", "-r", method.as_flag()])
        .arg(path_arg(tile))
        .arg(target)
}

/// Rewrite the store's live tiles into a fresh data/index pair.
pub fn compact_store(data: &Path, destination: &Path) -> Invocation {
    Invocation::new(MRF_CLEAN)
        .arg(path_arg(data))
        .arg(path_arg(destination))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::align::align;
    use crate::types::Bounds;

    #[test]
    fn raster_info_carries_timeout() {
        let inv = raster_info(Path::new("/in/a.tif"), Duration::from_secs(90));
        assert_eq!(inv.program, "gdalinfo");
        assert_eq!(inv.args, vec!["-json", "/in/a.tif"]);
        assert_eq!(inv.timeout, Some(Duration::from_secs(90)));
    }

    #[test]
    fn crop_window_uses_projwin_order() {
        let inv = crop_window(
            Path::new("a.tif"),
            Path::new("w/a_crop.vrt"),
            &Extent::new(-180.0, 90.0, -170.5, 80.0),
        );
        assert_eq!(
            inv.command_line(),
            "gdal_translate -q -of VRT -projwin -180 90 -170.5 80 a.tif w/a_crop.vrt"
        );
    }

    #[test]
    fn insert_targets_z_slice() {
        let inv = insert_tile(Path::new("t.tif"), "/s/store.mrf:MRF:Z3", InsertMethod::Nearest);
        assert_eq!(
            inv.command_line(),
            "mrf_insert -v -r NearNb t.tif /s/store.mrf:MRF:Z3"
        );
    }

    #[test]
    fn mosaic_uses_te_min_max_order() {
        let window = align(
            &Extent::new(-179.0, 10.0, -170.0, 0.0),
            &Bounds::new(-180.0, -90.0, 180.0, 90.0),
            (4096, 2048),
            512,
        )
        .unwrap();
        let res = Resolution { x: 0.087890625, y: 0.087890625 };
        let inv = build_mosaic(
            Path::new("m.vrt"),
            &[Path::new("store.mrf"), Path::new("tile.tif")],
            &window,
            &res,
            ResampleMethod::Near,
            Some(0.0),
        );
        assert_eq!(
            inv.command_line(),
            "gdalbuildvrt -q -r near -te -180 0 -135 45 -tr 0.087890625 0.087890625 \
             -srcnodata 0 -vrtnodata 0 m.vrt store.mrf tile.tif"
        );
    }
}
