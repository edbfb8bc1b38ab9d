//! Shared types used across the geometry, engine, and driver modules.
//!
//! Footprints come out of `gdalinfo` as floating point corner coordinates and
//! are carried as `f64` here. Anything that must not drift (block alignment)
//! converts them to exact rationals in [`crate::geometry::rational`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// A tile footprint in map units, as upper-left / lower-right corners.
///
/// A footprint whose `lrx` is smaller than its `ulx` wraps across the
/// antimeridian (e.g. `170 .. -170`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub ulx: f64,
    pub uly: f64,
    pub lrx: f64,
    pub lry: f64,
}

impl Extent {
    pub fn new(ulx: f64, uly: f64, lrx: f64, lry: f64) -> Self {
        Self { ulx, uly, lrx, lry }
    }

    pub fn width(&self) -> f64 {
        self.lrx - self.ulx
    }

    pub fn height(&self) -> f64 {
        self.uly - self.lry
    }

    /// True when the right edge lies west of the left edge.
    pub fn wraps(&self) -> bool {
        self.lrx < self.ulx
    }

    /// Clamp every corner into `bounds`.
    pub fn clamp_to(&self, bounds: &Bounds) -> Self {
        Self {
            ulx: self.ulx.clamp(bounds.xmin, bounds.xmax),
            uly: self.uly.clamp(bounds.ymin, bounds.ymax),
            lrx: self.lrx.clamp(bounds.xmin, bounds.xmax),
            lry: self.lry.clamp(bounds.ymin, bounds.ymax),
        }
    }

    pub fn exceeds_horizontally(&self, bounds: &Bounds) -> bool {
        self.ulx < bounds.xmin || self.lrx > bounds.xmax
    }

    pub fn exceeds_vertically(&self, bounds: &Bounds) -> bool {
        self.uly > bounds.ymax || self.lry < bounds.ymin
    }

    pub fn exceeds(&self, bounds: &Bounds) -> bool {
        self.exceeds_horizontally(bounds) || self.exceeds_vertically(bounds)
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {}, {})", self.ulx, self.uly, self.lrx, self.lry)
    }
}

/// Store bounds in `xmin, ymin, xmax, ymax` order, matching the MRF
/// `<BoundingBox>` element.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl Bounds {
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }

    pub fn as_extent(&self) -> Extent {
        Extent::new(self.xmin, self.ymax, self.xmax, self.ymin)
    }
}

/// Pixel size in map units. `y` is reported positive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub x: f64,
    pub y: f64,
}

/// An input raster tile and the geometry the inspector found for it.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceTile {
    pub path: PathBuf,
    pub extent: Extent,
    pub resolution: Resolution,
    pub epsg: Option<u32>,
    pub has_color_table: bool,
}

impl SourceTile {
    /// Filename stem used to derive worker-local intermediate names.
    pub fn stem(&self) -> String {
        tile_stem(&self.path)
    }

    /// Copy of this tile pointing at a derived file with a new footprint.
    pub fn derive(&self, path: PathBuf, extent: Extent) -> Self {
        Self {
            path,
            extent,
            ..self.clone()
        }
    }
}

pub fn tile_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "tile".to_string())
}

/// Resampling used when a tile has to be resized to the store resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResampleMethod {
    #[default]
    Near,
    Bilinear,
    Cubic,
    Cubicspline,
    Lanczos,
    Average,
    Mode,
}

impl ResampleMethod {
    /// Value for `gdalwarp -r`.
    pub fn as_gdal(self) -> &'static str {
        match self {
            Self::Near => "near",
            Self::Bilinear => "bilinear",
            Self::Cubic => "cubic",
            Self::Cubicspline => "cubicspline",
            Self::Lanczos => "lanczos",
            Self::Average => "average",
            Self::Mode => "mode",
        }
    }
}

/// How `mrf_insert` rebuilds the pyramid levels above an inserted tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsertMethod {
    Nearest,
    #[default]
    Average,
}

impl InsertMethod {
    /// Value for `mrf_insert -r`.
    pub fn as_flag(self) -> &'static str {
        match self {
            Self::Nearest => "NearNb",
            Self::Average => "Avg",
        }
    }
}
