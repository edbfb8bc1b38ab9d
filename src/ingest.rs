//! Ingest driver: one run of tiles into one store.
//!
//! ```text
//! open store ─► (z key?) assign slot ─► shuffle ─► deal slices ─► rayon pool
//!                                                                    │
//!                          commit slot ◄── sum TileOutcomes ◄────────┘
//! ```
//!
//! Each worker takes one disjoint slice of the shuffled tile list and
//! processes it sequentially through [`engine::process_tile`]. Workers share
//! only the store, the [`InsertLock`] and the tool. The shuffle is a
//! SHA-256 ordering of `seed ‖ path`, so a rerun with the same seed deals the
//! same slices.
//!
//! A z-slot assignment is held as an open transaction while tiles are
//! inserted and committed once every worker finished. A run-fatal error
//! drops it, which rolls the assignment back.

use crate::config::{IngestConfig, InputConfig, effective_workers};
use crate::engine::{self, RunContext, TileOutcome};
use crate::lock::InsertLock;
use crate::store::{StoreError, TileStore};
use crate::tools::{ExternalTool, ToolError};
use crate::zindex::{ZIndex, ZIndexError, ZMetadata};
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{error, info, warn};
use walkdir::WalkDir;

/// Errors that end the whole run.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("No store header configured (use --store or [store] header)")]
    NoStore,
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Z-index error: {0}")]
    ZIndex(#[from] ZIndexError),
    #[error("z key {key:?} given but {} has no z dimension", .header.display())]
    NoZDimension { key: String, header: PathBuf },
    #[error("Required tool unavailable: {0}")]
    Tool(#[from] ToolError),
    #[error("Cannot create working directory {}: {source}", .path.display())]
    WorkingDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Cannot start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Summary of a finished run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub store: PathBuf,
    pub tiles: usize,
    pub workers: usize,
    /// z slot written, when the run had a z key.
    pub slot: Option<u32>,
    pub totals: TileOutcome,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.totals.errors == 0
    }
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| extensions.iter().any(|want| want.eq_ignore_ascii_case(ext)))
}

fn is_store_header(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("mrf"))
}

/// Gather input tiles: `extra` and `input.tiles` as given, then every file
/// under `input.input_dir` with a configured extension.
///
/// `.mrf` headers are never tiles. Duplicates are dropped, first one wins.
pub fn collect_tiles(input: &InputConfig, extra: &[PathBuf]) -> Vec<PathBuf> {
    let mut tiles: Vec<PathBuf> = extra.iter().chain(&input.tiles).cloned().collect();

    if let Some(dir) = &input.input_dir {
        let mut found = Vec::new();
        for entry in WalkDir::new(dir).follow_links(true) {
            match entry {
                Ok(entry) if entry.file_type().is_file() => {
                    if has_extension(entry.path(), &input.extensions) {
                        found.push(entry.into_path());
                    }
                }
                Ok(_) => {}
                Err(err) => warn!(dir = %dir.display(), "skipping unreadable entry: {err}"),
            }
        }
        found.sort();
        tiles.extend(found);
    }

    let mut seen = std::collections::HashSet::new();
    tiles.retain(|path| {
        if is_store_header(path) {
            warn!(path = %path.display(), "skipping MRF header given as a tile");
            return false;
        }
        seen.insert(path.clone())
    });
    tiles
}

fn shuffle_key(seed: u64, path: &Path) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_le_bytes());
    hasher.update(path.as_os_str().as_encoded_bytes());
    let mut key = [0u8; 32];
    key.copy_from_slice(&hasher.finalize());
    key
}

/// Deterministic shuffle: order by SHA-256 of `seed ‖ path`.
pub fn shuffle(mut tiles: Vec<PathBuf>, seed: u64) -> Vec<PathBuf> {
    tiles.sort_by_cached_key(|path| shuffle_key(seed, path));
    tiles
}

/// Deal `tiles` round-robin into `workers` disjoint slices.
pub fn partition(tiles: Vec<PathBuf>, workers: usize) -> Vec<Vec<PathBuf>> {
    let workers = workers.max(1);
    let mut slices = vec![Vec::new(); workers];
    for (i, tile) in tiles.into_iter().enumerate() {
        slices[i % workers].push(tile);
    }
    slices.retain(|slice| !slice.is_empty());
    slices
}

fn process_slice(
    ctx: &RunContext<'_>,
    slice: &[PathBuf],
    abort: &AtomicBool,
) -> Result<TileOutcome, ToolError> {
    let mut totals = TileOutcome::default();
    for path in slice {
        if abort.load(Ordering::Relaxed) {
            break;
        }
        match engine::process_tile(ctx, path) {
            Ok(outcome) => totals += outcome,
            Err(err) => {
                abort.store(true, Ordering::Relaxed);
                return Err(err);
            }
        }
    }
    Ok(totals)
}

/// Insert `tiles` into the store named by `config`.
///
/// Per-tile failures are counted in the report; only run-fatal conditions
/// return `Err`.
pub fn run(
    config: &IngestConfig,
    tool: &dyn ExternalTool,
    tiles: Vec<PathBuf>,
) -> Result<RunReport, IngestError> {
    let header = config.store.header.as_deref().ok_or(IngestError::NoStore)?;
    let store = TileStore::open(header)?;
    let working_dir = &config.insert.working_dir;
    std::fs::create_dir_all(working_dir).map_err(|source| IngestError::WorkingDir {
        path: working_dir.clone(),
        source,
    })?;

    let zindex = match &config.zindex.key {
        Some(key) => {
            if store.z_depth().is_none() {
                return Err(IngestError::NoZDimension {
                    key: key.clone(),
                    header: header.to_path_buf(),
                });
            }
            Some(ZIndex::open(&store.zdb_path())?)
        }
        None => None,
    };
    let assignment = match (&zindex, &config.zindex.key, store.z_depth()) {
        (Some(zindex), Some(key), Some(depth)) => {
            let metadata = ZMetadata {
                source_url: config.zindex.source_url.clone(),
                scale: config.zindex.scale,
                offset: config.zindex.offset,
                uom: config.zindex.uom.clone(),
            };
            Some(zindex.assign_or_update(key, &metadata, depth)?)
        }
        _ => None,
    };
    let mut slot = assignment.as_ref().map(|a| a.slot());

    let tile_count = tiles.len();
    let workers = effective_workers(&config.processing, tile_count);
    let slices = partition(shuffle(tiles, config.processing.shuffle_seed), workers);
    info!(
        store = %header.display(),
        tiles = tile_count,
        workers,
        slot = ?slot,
        "starting ingest"
    );

    let pool = rayon::ThreadPoolBuilder::new().num_threads(workers).build()?;
    let lock = InsertLock::new();
    let ctx = RunContext {
        tool,
        store: &store,
        lock: &lock,
        config,
        slot,
    };
    let abort = AtomicBool::new(false);
    let results: Vec<Result<TileOutcome, ToolError>> = pool.install(|| {
        slices
            .par_iter()
            .map(|slice| process_slice(&ctx, slice, &abort))
            .collect()
    });

    let mut totals = TileOutcome::default();
    for result in results {
        totals += result?;
    }

    // a run that wrote nothing leaves the z-index untouched
    if let Some(assignment) = assignment {
        if totals.inserted > 0 {
            let slot = assignment.commit()?;
            info!(slot, "z slot committed");
        } else {
            warn!(slot = assignment.slot(), "no tile inserted, z slot not committed");
            slot = None;
        }
    }

    let report = RunReport {
        store: header.to_path_buf(),
        tiles: tile_count,
        workers,
        slot,
        totals,
    };
    if report.is_success() {
        info!(inserted = totals.inserted, warnings = totals.warnings, "ingest finished");
    } else {
        error!(inserted = totals.inserted, errors = totals.errors, "ingest finished with errors");
    }
    Ok(report)
}
