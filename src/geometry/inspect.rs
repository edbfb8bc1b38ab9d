//! Geometry Inspector.
//!
//! Every query runs `gdalinfo -json` and reads what it needs from the parsed
//! report, retrying a failed run up to the inspector's attempt count. A
//! query that still cannot be answered (timeout, non-zero exit, unparsable
//! JSON) is *not determined* and comes back as `None`; callers decide how
//! conservative to be.
//!
//! ```text
//! gdalinfo -json tile.tif
//!   cornerCoordinates.upperLeft / lowerRight  → Extent
//!   geoTransform[1], geoTransform[5]          → Resolution
//!   coordinateSystem.wkt                      → EPSG code (outermost ID)
//!   bands[*].colorInterpretation / colorTable → paletted?
//! ```

use crate::tools::commands::raster_info;
use crate::tools::{ExternalTool, ToolError};
use crate::types::{Bounds, Extent, Resolution, SourceTile};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Slack, in map units, allowed on every edge when deciding a tile covers the
/// whole store.
pub const GLOBAL_SLACK: f64 = 10.0;

/// Significant digits used when comparing pixel sizes.
pub const RESOLUTION_DIGITS: usize = 12;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(90);

/// One run plus one retry.
pub const DEFAULT_ATTEMPTS: u32 = 2;

// ============================================================================
// gdalinfo JSON
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GdalInfo {
    corner_coordinates: Option<CornerCoordinates>,
    geo_transform: Option<Vec<f64>>,
    coordinate_system: Option<CoordinateSystem>,
    #[serde(default)]
    bands: Vec<Band>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CornerCoordinates {
    upper_left: Option<[f64; 2]>,
    lower_right: Option<[f64; 2]>,
}

#[derive(Debug, Deserialize)]
struct CoordinateSystem {
    wkt: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Band {
    color_interpretation: Option<String>,
    color_table: Option<serde_json::Value>,
}

/// What `gdalinfo` reported about one raster.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterInfo {
    pub extent: Option<Extent>,
    pub resolution: Option<Resolution>,
    pub epsg: Option<u32>,
    pub has_color_table: bool,
}

impl RasterInfo {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let info: GdalInfo = serde_json::from_str(json)?;

        let extent = info.corner_coordinates.and_then(|c| {
            let [ulx, uly] = c.upper_left?;
            let [lrx, lry] = c.lower_right?;
            Some(Extent::new(ulx, uly, lrx, lry))
        });
        let resolution = info.geo_transform.as_deref().and_then(|gt| match gt {
            [_, x, _, _, _, y, ..] => Some(Resolution {
                x: x.abs(),
                y: y.abs(),
            }),
            _ => None,
        });
        let epsg = info
            .coordinate_system
            .and_then(|cs| cs.wkt)
            .and_then(|wkt| epsg_from_wkt(&wkt));
        let has_color_table = info.bands.iter().any(|band| {
            band.color_table.is_some()
                || band
                    .color_interpretation
                    .as_deref()
                    .is_some_and(|ci| ci.eq_ignore_ascii_case("palette"))
        });

        Ok(Self {
            extent,
            resolution,
            epsg,
            has_color_table,
        })
    }
}

/// EPSG code of the outermost CRS in a WKT string.
///
/// The CRS-level identifier is the last `ID["EPSG",n]` (WKT2) or
/// `AUTHORITY["EPSG","n"]` (WKT1) in the text; earlier ones belong to the
/// datum, ellipsoid, and axes.
pub fn epsg_from_wkt(wkt: &str) -> Option<u32> {
    let mut found: Option<(usize, u32)> = None;
    for marker in ["ID[\"EPSG\",", "AUTHORITY[\"EPSG\","] {
        let mut rest = wkt;
        while let Some(pos) = rest.find(marker) {
            let after = &rest[pos + marker.len()..];
            let code: String = after
                .trim_start_matches('"')
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            if let Ok(code) = code.parse::<u32>() {
                let offset = wkt.len() - after.len();
                if found.is_none_or(|(at, _)| offset > at) {
                    found = Some((offset, code));
                }
            }
            rest = after;
        }
    }
    found.map(|(_, code)| code)
}

// ============================================================================
// Pure comparisons
// ============================================================================

fn significant(value: f64) -> String {
    format!("{:.*e}", RESOLUTION_DIGITS - 1, value.abs())
}

/// True unless both resolutions are known and equal to
/// [`RESOLUTION_DIGITS`] significant digits.
pub fn resolutions_differ(a: Option<&Resolution>, b: Option<&Resolution>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => {
            significant(a.x) != significant(b.x) || significant(a.y) != significant(b.y)
        }
        _ => true,
    }
}

/// True when `extent` covers `bounds` to within [`GLOBAL_SLACK`] on every edge.
pub fn is_global(extent: &Extent, bounds: &Bounds) -> bool {
    (extent.ulx - bounds.xmin).abs() <= GLOBAL_SLACK
        && (extent.lrx - bounds.xmax).abs() <= GLOBAL_SLACK
        && (extent.uly - bounds.ymax).abs() <= GLOBAL_SLACK
        && (extent.lry - bounds.ymin).abs() <= GLOBAL_SLACK
}

// ============================================================================
// Inspector
// ============================================================================

/// Runs `gdalinfo` through an [`ExternalTool`] with a hard timeout and a
/// bounded number of attempts.
pub struct Inspector<'a, T: ExternalTool + ?Sized> {
    tool: &'a T,
    timeout: Duration,
    attempts: u32,
}

impl<'a, T: ExternalTool + ?Sized> Inspector<'a, T> {
    pub fn new(tool: &'a T, timeout: Duration) -> Self {
        Self {
            tool,
            timeout,
            attempts: DEFAULT_ATTEMPTS,
        }
    }

    /// Total `gdalinfo` runs per query, at least one.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    /// Full report for `path`.
    ///
    /// Only [`ToolError::NotFound`] is returned as an error; every other
    /// failure is retried, then logged and reported as `Ok(None)`.
    pub fn info(&self, path: &Path) -> Result<Option<RasterInfo>, ToolError> {
        let inv = raster_info(path, self.timeout);
        for attempt in 1..=self.attempts {
            let output = match self.tool.run_checked(&inv) {
                Ok(output) => output,
                Err(err) if err.is_not_found() => return Err(err),
                Err(err) => {
                    warn!(tile = %path.display(), attempt, "cannot inspect tile: {err}");
                    continue;
                }
            };
            match RasterInfo::from_json(&output.stdout) {
                Ok(info) => return Ok(Some(info)),
                Err(err) => {
                    warn!(tile = %path.display(), attempt, "unreadable gdalinfo report: {err}");
                }
            }
        }
        Ok(None)
    }

    fn query<R>(&self, path: &Path, pick: impl FnOnce(RasterInfo) -> Option<R>) -> Option<R> {
        match self.info(path) {
            Ok(info) => info.and_then(pick),
            Err(err) => {
                warn!(tile = %path.display(), "cannot inspect tile: {err}");
                None
            }
        }
    }

    pub fn extents(&self, path: &Path) -> Option<Extent> {
        self.query(path, |info| info.extent)
    }

    pub fn epsg(&self, path: &Path) -> Option<u32> {
        self.query(path, |info| info.epsg)
    }

    pub fn has_color_table(&self, path: &Path) -> Option<bool> {
        self.query(path, |info| Some(info.has_color_table))
    }

    /// Build a [`SourceTile`] for `path`, or `Ok(None)` when its footprint or
    /// resolution cannot be determined.
    pub fn describe(&self, path: &Path) -> Result<Option<SourceTile>, ToolError> {
        let Some(info) = self.info(path)? else {
            return Ok(None);
        };
        let (Some(extent), Some(resolution)) = (info.extent, info.resolution) else {
            warn!(tile = %path.display(), "gdalinfo report has no georeferencing");
            return Ok(None);
        };
        Ok(Some(SourceTile {
            path: path.to_path_buf(),
            extent,
            resolution,
            epsg: info.epsg,
            has_color_table: info.has_color_table,
        }))
    }
}
