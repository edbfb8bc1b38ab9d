//! Insertion Engine: the per-tile state machine.
//!
//! Each input tile becomes a root [`InsertionTask`] on a LIFO work stack.
//! Classifying a task either inserts it or replaces it with derived tasks
//! (a cropped tile, two antimeridian halves) that go through the same
//! classification:
//!
//! ```text
//!                 ┌──────────────► OutOfBounds ─── crop ────────┐
//!                 │                                             │ push
//! pop ─► Classify ├──────────────► AntimeridianCrossing ─ split ┤
//!                 │                                             │
//!                 ├──────────────► ResolutionMismatch ─ warp ─┬─┴─► (merge) ─► insert
//!                 └──────────────► Ordinary ──────────────────┘
//! ```
//!
//! ## Locking
//!
//! | Step | Lock |
//! |---|---|
//! | crop, split | read |
//! | merge (+ compaction when due) | write |
//! | `mrf_insert` | read |
//! | threshold compaction after an insert | write, re-checked |
//!
//! ## Failure accounting
//!
//! Per-tile failures are counted in [`TileOutcome::errors`] and the tile is
//! abandoned; the run goes on. Only a missing tool
//! ([`ToolError::NotFound`]) leaves this module as an `Err`.
//!
//! Intermediates are deleted once every task of a tile succeeded and kept
//! for inspection otherwise.

use crate::compact::{compact, compact_if_needed, over_threshold};
use crate::config::IngestConfig;
use crate::geometry::antimeridian::split;
use crate::geometry::crop::crop;
use crate::geometry::inspect::{Inspector, is_global, resolutions_differ};
use crate::lock::InsertLock;
use crate::merge::merge;
use crate::store::{CrsFamily, TileStore};
use crate::tools::commands::{insert_tile, warp_to_resolution};
use crate::tools::{Diagnostic, ExternalTool, ToolError, recoverable};
use crate::types::{InsertMethod, ResampleMethod, SourceTile};
use std::fs;
use std::io;
use std::ops::AddAssign;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Derived tasks deeper than this that still need reshaping are errors.
pub const MAX_DERIVATION_DEPTH: u32 = 2;

/// Everything a worker shares with the rest of the run.
pub struct RunContext<'a> {
    pub tool: &'a dyn ExternalTool,
    pub store: &'a TileStore,
    pub lock: &'a InsertLock,
    pub config: &'a IngestConfig,
    /// z slot for this run, when the store has a z dimension.
    pub slot: Option<u32>,
}

impl RunContext<'_> {
    fn inspector(&self) -> Inspector<'_, dyn ExternalTool + '_> {
        Inspector::new(
            self.tool,
            Duration::from_secs(self.config.processing.inspect_timeout_secs),
        )
        .with_attempts(self.config.processing.inspect_attempts)
    }

    fn working_dir(&self) -> &Path {
        &self.config.insert.working_dir
    }
}

/// One unit of work on the engine's stack.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertionTask {
    pub tile: SourceTile,
    pub resampling: ResampleMethod,
    pub insert_method: InsertMethod,
    pub merge: bool,
    pub working_dir: PathBuf,
    /// `mrf_insert` destination: the store header or one of its z slices.
    pub target: String,
    pub nodata: Option<f64>,
    /// 0 for tasks created from input tiles.
    pub depth: u32,
}

impl InsertionTask {
    pub fn root(tile: SourceTile, ctx: &RunContext<'_>) -> Self {
        let insert = &ctx.config.insert;
        Self {
            tile,
            resampling: insert.resampling,
            insert_method: insert.insert_method,
            merge: insert.merge,
            working_dir: insert.working_dir.clone(),
            target: ctx.store.insert_target(ctx.slot),
            nodata: insert.nodata,
            depth: 0,
        }
    }

    /// Task for a tile derived from this one. Derived tiles always merge.
    pub fn derive(&self, tile: SourceTile) -> Self {
        Self {
            tile,
            merge: true,
            depth: self.depth + 1,
            ..self.clone()
        }
    }
}

/// How a tile has to be reshaped before it can be inserted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TileState {
    OutOfBounds,
    AntimeridianCrossing { seam: f64 },
    ResolutionMismatch,
    Ordinary,
}

/// Classify `tile` against `store`.
pub fn classify(tile: &SourceTile, store: &TileStore) -> TileState {
    let extent = &tile.extent;
    let bounds = &store.bounds;
    let family = store.family();

    let reshape = match (family, store.seam()) {
        (CrsFamily::Geographic | CrsFamily::WebMercator, Some(seam)) => {
            if is_global(extent, bounds) {
                extent.exceeds(bounds).then_some(TileState::OutOfBounds)
            } else if extent.wraps() || extent.exceeds_horizontally(bounds) {
                Some(TileState::AntimeridianCrossing { seam })
            } else {
                extent.exceeds_vertically(bounds).then_some(TileState::OutOfBounds)
            }
        }
        _ => extent.exceeds(bounds).then_some(TileState::OutOfBounds),
    };

    reshape.unwrap_or_else(|| {
        if resolutions_differ(Some(&tile.resolution), Some(&store.resolution())) {
            TileState::ResolutionMismatch
        } else {
            TileState::Ordinary
        }
    })
}

/// Counts for one input tile, summed by the driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TileOutcome {
    pub inserted: usize,
    pub derived: usize,
    pub merged: usize,
    pub compacted: usize,
    pub warnings: usize,
    pub errors: usize,
}

impl AddAssign for TileOutcome {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.derived += other.derived;
        self.merged += other.merged;
        self.compacted += other.compacted;
        self.warnings += other.warnings;
        self.errors += other.errors;
    }
}

/// Inspect and insert one input tile, following every derived task.
pub fn process_tile(ctx: &RunContext<'_>, path: &Path) -> Result<TileOutcome, ToolError> {
    let mut outcome = TileOutcome::default();
    let Some(tile) = ctx.inspector().describe(path)? else {
        error!(tile = %path.display(), "cannot determine tile geometry, skipping");
        outcome.errors += 1;
        return Ok(outcome);
    };

    let mut artifacts = Vec::new();
    let mut stack = vec![InsertionTask::root(tile, ctx)];
    while let Some(task) = stack.pop() {
        run_task(ctx, task, &mut stack, &mut artifacts, &mut outcome)?;
    }

    if outcome.errors == 0 {
        remove_artifacts(&artifacts);
    } else if !artifacts.is_empty() {
        info!(tile = %path.display(), kept = artifacts.len(), "keeping intermediates of failed tile");
    }
    Ok(outcome)
}

fn run_task(
    ctx: &RunContext<'_>,
    task: InsertionTask,
    stack: &mut Vec<InsertionTask>,
    artifacts: &mut Vec<PathBuf>,
    outcome: &mut TileOutcome,
) -> Result<(), ToolError> {
    let state = classify(&task.tile, ctx.store);
    debug!(tile = %task.tile.path.display(), depth = task.depth, ?state, "classified");

    let needs_reshape = matches!(
        state,
        TileState::OutOfBounds | TileState::AntimeridianCrossing { .. }
    );
    if needs_reshape && task.depth >= MAX_DERIVATION_DEPTH {
        error!(tile = %task.tile.path.display(), depth = task.depth, ?state, "tile still needs reshaping after derivation");
        outcome.errors += 1;
        return Ok(());
    }

    match state {
        TileState::OutOfBounds => {
            let cropped = {
                let _read = ctx.lock.read();
                recoverable(
                    crop(ctx.tool, &task.tile, &ctx.store.bounds, &task.working_dir),
                    "crop",
                )?
            };
            match cropped {
                Some(tile) => {
                    artifacts.push(tile.path.clone());
                    outcome.derived += 1;
                    stack.push(task.derive(tile));
                }
                None => outcome.errors += 1,
            }
        }
        TileState::AntimeridianCrossing { seam } => {
            let halves = {
                let _read = ctx.lock.read();
                split(
                    ctx.tool,
                    &task.tile,
                    seam,
                    &ctx.store.resolution(),
                    &task.working_dir,
                )?
            };
            artifacts.extend(halves.artifacts.iter().cloned());
            if halves.is_empty() {
                error!(tile = %task.tile.path.display(), "antimeridian split produced no tiles");
                outcome.errors += 1;
            }
            // east half pushed first so the west half is processed first
            let halves: Vec<_> = halves.into_halves().collect();
            outcome.derived += halves.len();
            for half in halves.into_iter().rev() {
                stack.push(task.derive(half));
            }
        }
        TileState::ResolutionMismatch => {
            let Some(resampled) = resample(ctx, &task)? else {
                outcome.errors += 1;
                return Ok(());
            };
            artifacts.push(resampled.path.clone());
            if task.merge {
                let Some(merged) = merge_into_store(ctx, &task, resampled, artifacts, outcome)?
                else {
                    outcome.errors += 1;
                    return Ok(());
                };
                insert(ctx, &task, &merged, outcome)?;
            } else {
                insert(ctx, &task, &resampled, outcome)?;
            }
        }
        TileState::Ordinary => insert(ctx, &task, &task.tile, outcome)?,
    }
    Ok(())
}

/// Warp the task's tile to the store resolution as `<stem>_res.tif`.
fn resample(ctx: &RunContext<'_>, task: &InsertionTask) -> Result<Option<SourceTile>, ToolError> {
    let output = task.working_dir.join(format!("{}_res.tif", task.tile.stem()));
    info!(tile = %task.tile.path.display(), "resampling to store resolution");
    let inv = warp_to_resolution(
        &task.tile.path,
        &output,
        &ctx.store.resolution(),
        task.resampling,
    );
    let done = recoverable(ctx.tool.run_checked(&inv), "resample")?;
    Ok(done.map(|_| {
        let mut tile = task.tile.derive(output, task.tile.extent);
        tile.resolution = ctx.store.resolution();
        tile
    }))
}

/// Re-read the resampled footprint, then merge under the write lock and
/// compact if the store has grown past its threshold.
fn merge_into_store(
    ctx: &RunContext<'_>,
    task: &InsertionTask,
    mut resampled: SourceTile,
    artifacts: &mut Vec<PathBuf>,
    outcome: &mut TileOutcome,
) -> Result<Option<SourceTile>, ToolError> {
    let Some(info) = ctx.inspector().info(&resampled.path)? else {
        return Ok(None);
    };
    let Some(extent) = info.extent else {
        warn!(tile = %resampled.path.display(), "resampled tile has no footprint");
        return Ok(None);
    };
    resampled.extent = extent;
    resampled.has_color_table = info.has_color_table;

    let _write = ctx.lock.write();
    let merged = merge(
        ctx.tool,
        ctx.store,
        ctx.slot,
        &resampled,
        task.nodata,
        task.resampling,
        ctx.working_dir(),
    )?;
    let Some(merged) = merged else {
        return Ok(None);
    };
    artifacts.extend(merged.artifacts);
    outcome.merged += 1;

    if let Some(threshold) = ctx.config.store.compaction_threshold {
        if over_threshold(ctx.store, threshold) && compact(ctx.tool, ctx.store)? {
            outcome.compacted += 1;
        }
    }
    Ok(Some(merged.tile))
}

/// Run `mrf_insert` under the read lock and classify its diagnostics.
fn insert(
    ctx: &RunContext<'_>,
    task: &InsertionTask,
    tile: &SourceTile,
    outcome: &mut TileOutcome,
) -> Result<(), ToolError> {
    let inv = insert_tile(&tile.path, &task.target, task.insert_method);
    info!(tile = %tile.path.display(), target = %task.target, "inserting");

    let result = {
        let _read = ctx.lock.read();
        ctx.tool.run(&inv)
    };
    let output = match result {
        Ok(output) => output,
        Err(err) if err.is_not_found() => return Err(err),
        Err(err) => {
            error!(tile = %tile.path.display(), "insert failed: {err}");
            outcome.errors += 1;
            return Ok(());
        }
    };

    let mut failed = false;
    for diagnostic in output.diagnostics() {
        match diagnostic {
            Diagnostic::WindowOutOfRange(line) => {
                warn!(tile = %tile.path.display(), "{line}");
                outcome.warnings += 1;
            }
            Diagnostic::Error(line) => {
                error!(tile = %tile.path.display(), "{line}");
                failed = true;
            }
            Diagnostic::Info(line) => debug!(tile = %tile.path.display(), "{line}"),
        }
    }
    if !output.success && !failed {
        error!(tile = %tile.path.display(), "mrf_insert exited with failure");
        failed = true;
    }
    if failed {
        outcome.errors += 1;
    } else {
        outcome.inserted += 1;
    }

    if let Some(threshold) = ctx.config.store.compaction_threshold {
        if compact_if_needed(ctx.tool, ctx.store, ctx.lock, threshold)? {
            outcome.compacted += 1;
        }
    }
    Ok(())
}

fn remove_artifacts(artifacts: &[PathBuf]) {
    for path in artifacts {
        match fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "removed intermediate"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %path.display(), "cannot remove intermediate: {err}"),
        }
    }
}
