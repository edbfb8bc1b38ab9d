//! Store Compactor.
//!
//! Inserting over an existing block appends the new block to the data file
//! and leaves the old bytes behind. `mrf_clean.py` copies only the live
//! blocks into a fresh data/index pair, which is then renamed over the
//! originals: index first, then data. The original index is copied aside
//! before the swap and restored if the data rename fails, so the store
//! always holds a matching pair.
//!
//! Compaction failures never abort a run: the original files are left in
//! place and the next threshold crossing tries again.

use crate::lock::InsertLock;
use crate::store::TileStore;
use crate::tools::commands::compact_store;
use crate::tools::{ExternalTool, ToolError, recoverable};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Temporary data and index paths: `<data stem>_compact.<ext>` and
/// `<data stem>_compact.idx`.
pub fn scratch_paths(store: &TileStore) -> (PathBuf, PathBuf) {
    let stem = store
        .data_file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut data = store.data_file.with_file_name(format!("{stem}_compact"));
    if let Some(ext) = store.data_file.extension() {
        data.set_extension(ext);
    }
    let index = data.with_extension("idx");
    (data, index)
}

/// Rewrite the store's live blocks and rename them into place.
///
/// Returns `Ok(false)` when compaction failed and was skipped.
pub fn compact<T: ExternalTool + ?Sized>(tool: &T, store: &TileStore) -> Result<bool, ToolError> {
    let (scratch_data, scratch_index) = scratch_paths(store);
    info!(data = %store.data_file.display(), "compacting store");

    let inv = compact_store(&store.data_file, &scratch_data);
    if recoverable(tool.run_checked(&inv), "compaction")?.is_none() {
        return Ok(false);
    }

    if !scratch_data.is_file() || !scratch_index.is_file() {
        warn!(
            data = %scratch_data.display(),
            index = %scratch_index.display(),
            "compaction did not produce both files"
        );
        discard(&[&scratch_data, &scratch_index]);
        return Ok(false);
    }

    match swap_in(store, &scratch_data, &scratch_index) {
        Ok(()) => Ok(true),
        Err(err) => {
            warn!(data = %store.data_file.display(), "cannot move compacted files into place: {err}");
            discard(&[&scratch_data, &scratch_index]);
            Ok(false)
        }
    }
}

/// `<index>.bak`, where the original index waits during the swap.
fn backup_path(index: &Path) -> PathBuf {
    let mut name = OsString::from(index.as_os_str());
    name.push(".bak");
    PathBuf::from(name)
}

/// Rename the scratch pair over the store files, index first. If the data
/// rename fails the original index is put back.
fn swap_in(store: &TileStore, scratch_data: &Path, scratch_index: &Path) -> io::Result<()> {
    let backup = backup_path(&store.index_file);
    let had_index = store.index_file.is_file();
    if had_index {
        fs::copy(&store.index_file, &backup)?;
    }

    if let Err(err) = fs::rename(scratch_index, &store.index_file) {
        discard(&[&backup]);
        return Err(err);
    }

    if let Err(err) = fs::rename(scratch_data, &store.data_file) {
        let restored = if had_index {
            fs::rename(&backup, &store.index_file)
        } else {
            fs::remove_file(&store.index_file)
        };
        if let Err(restore_err) = restored {
            warn!(index = %store.index_file.display(), "cannot restore original index: {restore_err}");
        }
        return Err(err);
    }

    discard(&[&backup]);
    Ok(())
}

fn discard<P: AsRef<Path>>(paths: &[P]) {
    for path in paths {
        let path = path.as_ref();
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %path.display(), "cannot remove compaction scratch file: {err}"),
        }
    }
}

pub fn over_threshold(store: &TileStore, threshold: u64) -> bool {
    match store.data_size() {
        Ok(size) => size > threshold,
        Err(err) => {
            warn!(data = %store.data_file.display(), "cannot read data file size: {err}");
            false
        }
    }
}

/// Compact when the data file exceeds `threshold` bytes.
///
/// The size is checked once without the lock and again under the write
/// lock, so only one of several workers crossing the threshold together
/// compacts. Call only while holding no guard on `lock`.
pub fn compact_if_needed<T: ExternalTool + ?Sized>(
    tool: &T,
    store: &TileStore,
    lock: &InsertLock,
    threshold: u64,
) -> Result<bool, ToolError> {
    if !over_threshold(store, threshold) {
        return Ok(false);
    }
    let _write = lock.write();
    if !over_threshold(store, threshold) {
        return Ok(false);
    }
    compact(tool, store)
}
