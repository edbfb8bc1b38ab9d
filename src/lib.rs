//! # tile-ingest
//!
//! Inserts georeferenced raster tiles into a shared, block-tiled MRF store.
//! Many workers insert into the same store at once; the pipeline reshapes
//! each tile until the MRF tools can write it:
//!
//! ```text
//! tile ─► inspect ─► classify ─┬─ out of bounds ───────► crop ──┐
//!                              ├─ crosses antimeridian ─► split ┤ (re-classify)
//!                              ├─ resolution mismatch ──► warp ─┴─► merge ─► mrf_insert
//!                              └─ ordinary ─────────────────────────────────► mrf_insert
//! ```
//!
//! Every raster operation is delegated to the GDAL / MRF command line tools
//! through the [`tools::ExternalTool`] seam, so the whole pipeline is
//! testable with a recording mock.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`ingest`] | Run driver: tile discovery, shuffle, worker pool, z-slot commit |
//! | [`engine`] | Per-tile state machine on an explicit work stack |
//! | [`geometry`] | Inspector, exact block alignment, crop, antimeridian split |
//! | [`merge`] | Composite a tile with the store's content on a block-aligned window |
//! | [`lock`] | Reader-preferring insert lock shared by all workers |
//! | [`compact`] | Rewrite the store's live blocks once its data file grows too large |
//! | [`zindex`] | SQLite key → z-slot index for stores with a z dimension |
//! | [`store`] | MRF header parsing and derived store geometry |
//! | [`tools`] | `ExternalTool` trait, command builders, process runner |
//! | [`config`] | `ingest.toml` loading, validation and merging |
//! | [`types`] | Shared geometry types (`Extent`, `Bounds`, `SourceTile`) |
//! | [`output`] | CLI result formatting |
//! | [`logging`] | `tracing` subscriber setup |
//!
//! # Design Decisions
//!
//! ## Exact Alignment
//!
//! Merge windows must land on block boundaries bit-for-bit, or the insert
//! rewrites a sliver of a neighbouring block. [`geometry::align`] works in
//! arbitrary-precision rationals and only rounds when formatting a tool
//! argument.
//!
//! ## Reads Share, Writes Wait
//!
//! `mrf_insert` calls on different tiles may run together; a merge reads the
//! store and must see no insert in flight. [`lock::InsertLock`] lets readers
//! in freely and makes a writer wait until the reader count reaches zero.
//!
//! ## Failures Stay Per Tile
//!
//! A tile that cannot be inserted is logged and counted; the run goes on. Only
//! conditions no later tile could escape (unreadable store, missing tool,
//! full z dimension) end the run.

pub mod compact;
pub mod config;
pub mod engine;
pub mod geometry;
pub mod ingest;
pub mod lock;
pub mod logging;
pub mod merge;
pub mod output;
pub mod store;
pub mod tools;
pub mod types;
pub mod zindex;

#[cfg(test)]
pub(crate) mod test_helpers;
