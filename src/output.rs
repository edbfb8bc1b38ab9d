//! CLI output formatting for every subcommand.
//!
//! Results go to stdout; progress and diagnostics go through `tracing` to
//! stderr. Each result has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.
//!
//! # Output Format
//!
//! ## Insert
//!
//! ```text
//! Store /data/layer.mrf
//!     z slot: 3
//!     tiles: 120 (7 workers)
//!     inserted: 124
//!     derived: 6
//!     merged: 2
//!     compacted: 1
//!     warnings: 0
//!     errors: 0
//! ```
//!
//! ## Inspect
//!
//! ```text
//! /data/incoming/a.tif
//!     extent: (-179, 10, -170, 0)
//!     resolution: 0.087890625 x 0.087890625
//!     crs: EPSG:4326
//!     color table: no
//! ```

use crate::geometry::align::AlignedExtent;
use crate::geometry::inspect::RasterInfo;
use crate::ingest::RunReport;
use crate::types::Extent;
use std::path::Path;

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn field(name: &str, value: impl std::fmt::Display) -> String {
    format!("{}{}: {}", indent(1), name, value)
}

fn or_unknown<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "undetermined".to_string(), |v| v.to_string())
}

// ============================================================================
// Insert
// ============================================================================

pub fn format_run_report(report: &RunReport) -> Vec<String> {
    let totals = &report.totals;
    let mut lines = vec![format!("Store {}", report.store.display())];
    if let Some(slot) = report.slot {
        lines.push(field("z slot", slot));
    }
    lines.push(field(
        "tiles",
        format!("{} ({} workers)", report.tiles, report.workers),
    ));
    lines.push(field("inserted", totals.inserted));
    lines.push(field("derived", totals.derived));
    lines.push(field("merged", totals.merged));
    lines.push(field("compacted", totals.compacted));
    lines.push(field("warnings", totals.warnings));
    lines.push(field("errors", totals.errors));
    lines
}

pub fn print_run_report(report: &RunReport) {
    for line in format_run_report(report) {
        println!("{}", line);
    }
}

// ============================================================================
// Inspect
// ============================================================================

pub fn format_raster_info(path: &Path, info: Option<&RasterInfo>) -> Vec<String> {
    let mut lines = vec![path.display().to_string()];
    let Some(info) = info else {
        lines.push(format!("{}geometry undetermined", indent(1)));
        return lines;
    };
    lines.push(field("extent", or_unknown(info.extent)));
    lines.push(field(
        "resolution",
        or_unknown(info.resolution.map(|r| format!("{} x {}", r.x, r.y))),
    ));
    lines.push(field("crs", or_unknown(info.epsg.map(|e| format!("EPSG:{e}")))));
    lines.push(field(
        "color table",
        if info.has_color_table { "yes" } else { "no" },
    ));
    lines
}

pub fn print_raster_info(path: &Path, info: Option<&RasterInfo>) {
    for line in format_raster_info(path, info) {
        println!("{}", line);
    }
}

// ============================================================================
// Align
// ============================================================================

/// Requested extent and its block-aligned window, full precision.
pub fn format_aligned(requested: &Extent, window: &AlignedExtent) -> Vec<String> {
    let [ulx, uly, lrx, lry] = window.to_strings();
    vec![
        format!("requested {}", requested),
        format!("aligned   ({}, {}, {}, {})", ulx, uly, lrx, lry),
    ]
}

pub fn print_aligned(requested: &Extent, window: &AlignedExtent) {
    for line in format_aligned(requested, window) {
        println!("{}", line);
    }
}

// ============================================================================
// Compact
// ============================================================================

pub fn format_compaction(data_file: &Path, compacted: bool) -> Vec<String> {
    let status = if compacted { "compacted" } else { "left unchanged" };
    vec![format!("{} {}", data_file.display(), status)]
}

pub fn print_compaction(data_file: &Path, compacted: bool) {
    for line in format_compaction(data_file, compacted) {
        println!("{}", line);
    }
}
