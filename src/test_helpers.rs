//! Shared test utilities for the tile-ingest test suite.
//!
//! Builds the inputs the pipeline reads from the outside world: `gdalinfo
//! -json` reports, MRF headers, and a [`MockTool`] that answers `gdalinfo`
//! from a table of scripted rasters.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let store = world_store("/s/global.mrf", None);
//! let tool = scripted_tool(HashMap::from([(
//!     "/in/a.tif".to_string(),
//!     ScriptedRaster::new(Extent::new(-179.0, 10.0, -170.0, 0.0)),
//! )]));
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;

use crate::store::TileStore;
use crate::tools::ToolOutput;
use crate::tools::tool::tests::MockTool;
use crate::types::{Bounds, Extent, Resolution, SourceTile};

/// Pixel size of the 4096x2048 world store.
pub const WORLD_PIXEL: f64 = 0.087890625;

// =========================================================================
// gdalinfo reports
// =========================================================================

/// A `gdalinfo -json` report for a north-up raster.
pub fn gdalinfo_json(extent: &Extent, resolution: (f64, f64), epsg: u32, paletted: bool) -> String {
    let mut band = json!({
        "band": 1,
        "type": "Byte",
        "colorInterpretation": if paletted { "Palette" } else { "Gray" },
    });
    if paletted {
        band["colorTable"] = json!({
            "palette": "RGB",
            "count": 2,
            "entries": [[0, 0, 0, 255], [255, 255, 255, 255]],
        });
    }
    json!({
        "description": "scripted",
        "driverShortName": "GTiff",
        "coordinateSystem": {
            "wkt": format!("GEOGCRS[\"scripted\",CS[ellipsoidal,2],ID[\"EPSG\",{epsg}]]"),
        },
        "geoTransform": [extent.ulx, resolution.0, 0.0, extent.uly, 0.0, -resolution.1],
        "cornerCoordinates": {
            "upperLeft": [extent.ulx, extent.uly],
            "lowerLeft": [extent.ulx, extent.lry],
            "lowerRight": [extent.lrx, extent.lry],
            "upperRight": [extent.lrx, extent.uly],
        },
        "bands": [band],
    })
    .to_string()
}

/// A tile already described by the inspector, at world-store resolution.
pub fn source_tile(path: &str, extent: Extent) -> SourceTile {
    SourceTile {
        path: PathBuf::from(path),
        extent,
        resolution: Resolution {
            x: WORLD_PIXEL,
            y: WORLD_PIXEL,
        },
        epsg: Some(4326),
        has_color_table: false,
    }
}

// =========================================================================
// Stores
// =========================================================================

/// MRF header text. The projection is WKT1 with an EPSG authority.
pub fn mrf_header(size: (u64, u64), block: u64, bounds: Bounds, epsg: u32, z: Option<u32>) -> String {
    let z_attr = z.map(|z| format!(" z=\"{z}\"")).unwrap_or_default();
    format!(
        r#"<MRF_META>
  <Raster>
    <Size x="{x}" y="{y}" c="1"{z_attr} />
    <PageSize x="{block}" y="{block}" c="1" />
    <Compression>PNG</Compression>
    <DataValues NoData="0" />
  </Raster>
  <Rsets model="uniform" scale="2" />
  <GeoTags>
    <BoundingBox minx="{minx}" miny="{miny}" maxx="{maxx}" maxy="{maxy}" />
    <Projection>GEOGCS["scripted",AUTHORITY["EPSG","{epsg}"]]</Projection>
  </GeoTags>
</MRF_META>
"#,
        x = size.0,
        y = size.1,
        minx = bounds.xmin,
        miny = bounds.ymin,
        maxx = bounds.xmax,
        maxy = bounds.ymax,
    )
}

fn world() -> Bounds {
    Bounds::new(-180.0, -90.0, 180.0, 90.0)
}

/// Write `<dir>/store.mrf` (world bounds, block 512, EPSG:4326) and open it.
///
/// Only the header is written; the data and index files do not exist yet.
pub fn write_store(dir: &Path, size: (u64, u64), z: Option<u32>) -> TileStore {
    let header = dir.join("store.mrf");
    fs::write(&header, mrf_header(size, 512, world(), 4326, z)).unwrap();
    TileStore::open(&header).unwrap()
}

/// In-memory 4096x2048 world store at `header`.
pub fn world_store(header: &str, z: Option<u32>) -> TileStore {
    let xml = mrf_header((4096, 2048), 512, world(), 4326, z);
    TileStore::from_xml(Path::new(header), &xml).unwrap()
}

// =========================================================================
// Scripted tool
// =========================================================================

/// What `gdalinfo` reports for one scripted path.
#[derive(Debug, Clone)]
pub struct ScriptedRaster {
    pub extent: Extent,
    pub resolution: f64,
    pub epsg: u32,
    pub paletted: bool,
}

impl ScriptedRaster {
    pub fn new(extent: Extent) -> Self {
        Self {
            extent,
            resolution: WORLD_PIXEL,
            epsg: 4326,
            paletted: false,
        }
    }

    pub fn with_resolution(mut self, resolution: f64) -> Self {
        self.resolution = resolution;
        self
    }
}

/// Mock tool that answers `gdalinfo` from `rasters` (keyed by path) and
/// lets every other command succeed.
///
/// Unknown paths make `gdalinfo` fail. `mrf_clean.py` writes a small data
/// file and index at its destination so compaction renames succeed.
pub fn scripted_tool(rasters: HashMap<String, ScriptedRaster>) -> MockTool {
    MockTool::with_responder(move |inv| match inv.program.as_str() {
        "gdalinfo" => {
            let path = inv.args.last().map(String::as_str).unwrap_or_default();
            Ok(match rasters.get(path) {
                Some(r) => ToolOutput::ok(gdalinfo_json(
                    &r.extent,
                    (r.resolution, r.resolution),
                    r.epsg,
                    r.paletted,
                )),
                None => ToolOutput::failed(format!("ERROR 4: {path}: No such file or directory")),
            })
        }
        "mrf_clean.py" => {
            let dest = Path::new(&inv.args[1]);
            let _ = fs::write(dest, b"live");
            let _ = fs::write(dest.with_extension("idx"), b"index");
            Ok(ToolOutput::ok(""))
        }
        _ => Ok(ToolOutput::ok("")),
    })
}
