//! Block alignment of insertion windows.
//!
//! All functions here are pure and run on exact rationals, so repeated
//! alignment of the same window never drifts.
//!
//! # Algorithm
//!
//! 1. Store resolution is `bounds width / size.x` by `bounds height / size.y`.
//! 2. The source is clamped to the bounds and expressed in pixels from the
//!    store's upper-left corner.
//! 3. The unit is the smallest `block * 2^k` covering the pixel span, taken
//!    per axis and then the larger of the two (the store is block-uniform).
//! 4. Corners are snapped outward to unit multiples. If the snapped window
//!    still spans more than one unit on an axis (the source straddled a cell
//!    boundary) the unit is doubled and snapping repeats. The result is
//!    always one aligned cell, which is what makes alignment idempotent.
//! 5. Every coordinate is clamped to the bounds.

use super::rational::{self, RationalError};
use crate::types::{Bounds, Extent};
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{One, Zero};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum AlignError {
    #[error("store size must be non-zero, got {0}x{1}")]
    ZeroSize(u64, u64),
    #[error("block size must be non-zero")]
    ZeroBlock,
    #[error("store bounds are empty")]
    EmptyBounds,
    #[error("extent is inverted or wraps: {0}")]
    Inverted(String),
    #[error(transparent)]
    Coordinate(#[from] RationalError),
}

/// A footprint held as exact rationals.
///
/// Aligned windows use the same representation; see [`AlignedExtent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExactExtent {
    pub ulx: BigRational,
    pub uly: BigRational,
    pub lrx: BigRational,
    pub lry: BigRational,
}

/// An [`ExactExtent`] produced by [`align`]: one block-aligned cell.
pub type AlignedExtent = ExactExtent;

impl ExactExtent {
    pub fn from_extent(extent: &Extent) -> Result<Self, RationalError> {
        Ok(Self {
            ulx: rational::from_f64(extent.ulx)?,
            uly: rational::from_f64(extent.uly)?,
            lrx: rational::from_f64(extent.lrx)?,
            lry: rational::from_f64(extent.lry)?,
        })
    }

    /// Corners as exact decimal strings in `ulx, uly, lrx, lry` order.
    pub fn to_strings(&self) -> [String; 4] {
        [
            rational::to_decimal_string(&self.ulx),
            rational::to_decimal_string(&self.uly),
            rational::to_decimal_string(&self.lrx),
            rational::to_decimal_string(&self.lry),
        ]
    }

    pub fn to_extent(&self) -> Extent {
        Extent::new(
            rational::to_f64(&self.ulx),
            rational::to_f64(&self.uly),
            rational::to_f64(&self.lrx),
            rational::to_f64(&self.lry),
        )
    }
}

/// Store bounds held as exact rationals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExactBounds {
    pub xmin: BigRational,
    pub ymin: BigRational,
    pub xmax: BigRational,
    pub ymax: BigRational,
}

impl ExactBounds {
    pub fn from_bounds(bounds: &Bounds) -> Result<Self, RationalError> {
        Ok(Self {
            xmin: rational::from_f64(bounds.xmin)?,
            ymin: rational::from_f64(bounds.ymin)?,
            xmax: rational::from_f64(bounds.xmax)?,
            ymax: rational::from_f64(bounds.ymax)?,
        })
    }

    pub fn contains(&self, extent: &ExactExtent) -> bool {
        extent.ulx >= self.xmin
            && extent.lrx <= self.xmax
            && extent.uly <= self.ymax
            && extent.lry >= self.ymin
    }
}

/// Map units per pixel along x and y.
pub fn resolution(
    bounds: &ExactBounds,
    size: (u64, u64),
) -> Result<(BigRational, BigRational), AlignError> {
    if size.0 == 0 || size.1 == 0 {
        return Err(AlignError::ZeroSize(size.0, size.1));
    }
    let width = &bounds.xmax - &bounds.xmin;
    let height = &bounds.ymax - &bounds.ymin;
    if width <= BigRational::zero() || height <= BigRational::zero() {
        return Err(AlignError::EmptyBounds);
    }
    Ok((
        width / rational::from_u64(size.0),
        height / rational::from_u64(size.1),
    ))
}

/// Smallest `block * 2^k` (k ≥ 0) that is at least `span` pixels.
pub fn block_unit(span: &BigRational, block: u64) -> BigInt {
    let mut unit = BigInt::from(block);
    while BigRational::from_integer(unit.clone()) < *span {
        unit *= 2u32;
    }
    unit
}

fn clamp(value: BigRational, low: &BigRational, high: &BigRational) -> BigRational {
    if value < *low {
        low.clone()
    } else if value > *high {
        high.clone()
    } else {
        value
    }
}

fn snap_down(px: &BigRational, unit: &BigInt) -> BigInt {
    (px / BigRational::from_integer(unit.clone())).floor().to_integer() * unit
}

fn snap_up(px: &BigRational, unit: &BigInt) -> BigInt {
    (px / BigRational::from_integer(unit.clone())).ceil().to_integer() * unit
}

/// Align a floating point footprint. See [`align_exact`].
pub fn align(
    source: &Extent,
    bounds: &Bounds,
    size: (u64, u64),
    block: u64,
) -> Result<AlignedExtent, AlignError> {
    let source = ExactExtent::from_extent(source)?;
    let bounds = ExactBounds::from_bounds(bounds)?;
    align_exact(&source, &bounds, size, block)
}

/// Snap `source` outward to one aligned block cell inside `bounds`.
pub fn align_exact(
    source: &ExactExtent,
    bounds: &ExactBounds,
    size: (u64, u64),
    block: u64,
) -> Result<AlignedExtent, AlignError> {
    if block == 0 {
        return Err(AlignError::ZeroBlock);
    }
    let (xres, yres) = resolution(bounds, size)?;
    if source.ulx > source.lrx || source.lry > source.uly {
        return Err(AlignError::Inverted(format!("{:?}", source.to_strings())));
    }

    let ulx = clamp(source.ulx.clone(), &bounds.xmin, &bounds.xmax);
    let lrx = clamp(source.lrx.clone(), &bounds.xmin, &bounds.xmax);
    let uly = clamp(source.uly.clone(), &bounds.ymin, &bounds.ymax);
    let lry = clamp(source.lry.clone(), &bounds.ymin, &bounds.ymax);

    // pixel space, origin at the store's upper-left, y growing downward
    let left = (&ulx - &bounds.xmin) / &xres;
    let right = (&lrx - &bounds.xmin) / &xres;
    let top = (&bounds.ymax - &uly) / &yres;
    let bottom = (&bounds.ymax - &lry) / &yres;

    let mut unit = block_unit(&(&right - &left), block).max(block_unit(&(&bottom - &top), block));
    let (l, r, t, b) = loop {
        let l = snap_down(&left, &unit);
        let r = snap_up(&right, &unit);
        let t = snap_down(&top, &unit);
        let b = snap_up(&bottom, &unit);
        if &r - &l <= unit && &b - &t <= unit {
            break (l, r, t, b);
        }
        unit *= 2u32;
    };

    let px = |v: BigInt| BigRational::from_integer(v);
    Ok(ExactExtent {
        ulx: clamp(&bounds.xmin + px(l) * &xres, &bounds.xmin, &bounds.xmax),
        uly: clamp(&bounds.ymax - px(t) * &yres, &bounds.ymin, &bounds.ymax),
        lrx: clamp(&bounds.xmin + px(r) * &xres, &bounds.xmin, &bounds.xmax),
        lry: clamp(&bounds.ymax - px(b) * &yres, &bounds.ymin, &bounds.ymax),
    })
}

/// Window size in store pixels, `(width, height)`.
pub fn pixel_span(
    window: &ExactExtent,
    bounds: &ExactBounds,
    size: (u64, u64),
) -> Result<(BigRational, BigRational), AlignError> {
    let (xres, yres) = resolution(bounds, size)?;
    Ok((
        (&window.lrx - &window.ulx) / xres,
        (&window.uly - &window.lry) / yres,
    ))
}

/// True when `value` is a whole multiple of `block`.
pub fn is_block_multiple(value: &BigRational, block: u64) -> bool {
    let q = value / rational::from_u64(block);
    q.denom().is_one()
}
