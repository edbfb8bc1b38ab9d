//! Z-Index Manager: persistent key → z-slot map for stores with a z dimension.
//!
//! Each store with a z dimension has a SQLite database next to its header
//! (`store.zdb`) holding one row per slot:
//!
//! ```sql
//! CREATE TABLE ZINDEX (
//!     z INTEGER PRIMARY KEY AUTOINCREMENT,
//!     key_str TEXT UNIQUE,
//!     source_url TEXT,   -- only once a run supplies it
//!     scale REAL,        -- ditto
//!     "offset" REAL,     -- ditto
//!     uom TEXT           -- ditto
//! );
//! ```
//!
//! A run looks up (or assigns) its key inside an `IMMEDIATE` transaction and
//! keeps that transaction open while its tiles are inserted. The slot is only
//! committed once the inserts are done; a failed run rolls it back.
//!
//! Several ingest processes may share one database. Busy/locked databases
//! and a table that another process has not finished creating are retried
//! with exponential backoff, a bounded number of times.

use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// How long SQLite itself waits on a locked database before reporting busy.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Error, Debug)]
pub enum ZIndexError {
    #[error("cannot open z-index {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
    #[error("z-index error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("z-index is full: {count} keys for a z-depth of {depth}, cannot add {key:?}")]
    CapacityExceeded { key: String, count: u32, depth: u32 },
    #[error("z-index row id {rowid} is not a valid z slot")]
    SlotOutOfRange { rowid: i64 },
    #[error("z-index still busy after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: rusqlite::Error,
    },
}

impl ZIndexError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Sqlite(err) => is_transient(err),
            _ => false,
        }
    }
}

/// Busy, locked, and "no such table" errors are worth retrying.
pub fn is_transient(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    ) || err.to_string().contains("no such table")
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 8,
            initial: Duration::from_millis(100),
            max: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

/// Optional per-key metadata stored alongside the slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZMetadata {
    pub source_url: Option<String>,
    pub scale: Option<f64>,
    pub offset: Option<f64>,
    pub uom: Option<String>,
}

/// One row of the z-index.
#[derive(Debug, Clone, PartialEq)]
pub struct ZIndexRecord {
    pub slot: u32,
    pub key: String,
    pub metadata: ZMetadata,
}

const OPTIONAL_COLUMNS: [(&str, &str); 4] = [
    ("source_url", "TEXT"),
    ("scale", "REAL"),
    ("offset", "REAL"),
    ("uom", "TEXT"),
];

pub struct ZIndex {
    conn: Connection,
    path: PathBuf,
    retry: RetryPolicy,
}

/// A slot held inside an open transaction.
///
/// [`commit`](Self::commit) makes it durable; dropping the assignment rolls
/// the transaction back.
#[must_use = "an uncommitted z-slot is rolled back when dropped"]
pub struct ZAssignment<'a> {
    conn: &'a Connection,
    slot: u32,
    existing: bool,
    open: bool,
}

impl ZAssignment<'_> {
    pub fn slot(&self) -> u32 {
        self.slot
    }

    /// True when the key already had a slot (its content is being overwritten).
    pub fn existing(&self) -> bool {
        self.existing
    }

    pub fn commit(mut self) -> Result<u32, ZIndexError> {
        self.conn.execute_batch("COMMIT")?;
        self.open = false;
        Ok(self.slot)
    }
}

impl Drop for ZAssignment<'_> {
    fn drop(&mut self) {
        if self.open {
            if let Err(err) = self.conn.execute_batch("ROLLBACK") {
                warn!("z-index rollback failed: {err}");
            }
        }
    }
}

impl ZIndex {
    pub fn open(path: &Path) -> Result<Self, ZIndexError> {
        let open_err = |source| ZIndexError::Open {
            path: path.to_path_buf(),
            source,
        };
        let conn = Connection::open(path).map_err(open_err)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(open_err)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_busy_timeout(self, timeout: Duration) -> Result<Self, ZIndexError> {
        self.conn.busy_timeout(timeout)?;
        Ok(self)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Slot for `key`, assigning the next free one if the key is new.
    ///
    /// Existing keys keep their slot and get their metadata refreshed. A new
    /// key on a full index is [`ZIndexError::CapacityExceeded`].
    pub fn assign_or_update(
        &self,
        key: &str,
        metadata: &ZMetadata,
        z_depth: u32,
    ) -> Result<ZAssignment<'_>, ZIndexError> {
        let mut attempt = 1;
        loop {
            match self.try_assign(key, metadata, z_depth) {
                Ok(assignment) => return Ok(assignment),
                Err(err) if err.is_transient() && attempt < self.retry.attempts => {
                    let delay = self.retry.delay(attempt);
                    warn!(attempt, ?delay, "z-index busy, retrying: {err}");
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(ZIndexError::Sqlite(last)) if is_transient(&last) => {
                    return Err(ZIndexError::RetriesExhausted {
                        attempts: attempt,
                        last,
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn try_assign(
        &self,
        key: &str,
        metadata: &ZMetadata,
        z_depth: u32,
    ) -> Result<ZAssignment<'_>, ZIndexError> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        let mut assignment = ZAssignment {
            conn: &self.conn,
            slot: 0,
            existing: false,
            open: true,
        };

        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS ZINDEX (z INTEGER PRIMARY KEY AUTOINCREMENT, key_str TEXT UNIQUE)",
        )?;
        self.ensure_columns(metadata)?;

        let existing: Option<u32> = self
            .conn
            .query_row("SELECT z FROM ZINDEX WHERE key_str = ?1", [key], |row| row.get(0))
            .optional()?;

        let slot = match existing {
            Some(slot) => {
                warn!(key, slot, "z-index key exists, overwriting its slot");
                assignment.existing = true;
                slot
            }
            None => {
                let count: u32 = self
                    .conn
                    .query_row("SELECT COUNT(*) FROM ZINDEX", [], |row| row.get(0))?;
                if count >= z_depth {
                    return Err(ZIndexError::CapacityExceeded {
                        key: key.to_string(),
                        count,
                        depth: z_depth,
                    });
                }
                if count == 0 {
                    self.conn
                        .execute("INSERT INTO ZINDEX (z, key_str) VALUES (0, ?1)", [key])?;
                    0
                } else {
                    self.conn
                        .execute("INSERT INTO ZINDEX (key_str) VALUES (?1)", [key])?;
                    let rowid = self.conn.last_insert_rowid();
                    u32::try_from(rowid).map_err(|_| ZIndexError::SlotOutOfRange { rowid })?
                }
            }
        };

        self.write_metadata(slot, metadata)?;
        assignment.slot = slot;
        info!(key, slot, "z-index slot assigned");
        Ok(assignment)
    }

    fn columns(&self) -> Result<Vec<String>, rusqlite::Error> {
        let mut stmt = self.conn.prepare("PRAGMA table_info(ZINDEX)")?;
        let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
        names.collect()
    }

    fn ensure_columns(&self, metadata: &ZMetadata) -> Result<(), rusqlite::Error> {
        let used = [
            metadata.source_url.is_some(),
            metadata.scale.is_some(),
            metadata.offset.is_some(),
            metadata.uom.is_some(),
        ];
        let present = self.columns()?;
        for ((name, kind), used) in OPTIONAL_COLUMNS.iter().zip(used) {
            if used && !present.iter().any(|c| c == name) {
                self.conn
                    .execute_batch(&format!("ALTER TABLE ZINDEX ADD COLUMN \"{name}\" {kind}"))?;
            }
        }
        Ok(())
    }

    fn write_metadata(&self, slot: u32, metadata: &ZMetadata) -> Result<(), rusqlite::Error> {
        if let Some(url) = &metadata.source_url {
            self.conn
                .execute("UPDATE ZINDEX SET source_url = ?1 WHERE z = ?2", params![url, slot])?;
        }
        if let Some(scale) = metadata.scale {
            self.conn
                .execute("UPDATE ZINDEX SET scale = ?1 WHERE z = ?2", params![scale, slot])?;
        }
        if let Some(offset) = metadata.offset {
            self.conn
                .execute("UPDATE ZINDEX SET \"offset\" = ?1 WHERE z = ?2", params![offset, slot])?;
        }
        if let Some(uom) = &metadata.uom {
            self.conn
                .execute("UPDATE ZINDEX SET uom = ?1 WHERE z = ?2", params![uom, slot])?;
        }
        Ok(())
    }

    /// All committed rows ordered by slot. Empty before the first assignment.
    pub fn records(&self) -> Result<Vec<ZIndexRecord>, ZIndexError> {
        let present = match self.columns() {
            Ok(columns) if columns.is_empty() => return Ok(Vec::new()),
            Ok(columns) => columns,
            Err(err) => return Err(err.into()),
        };
        let select = |name: &str| {
            if present.iter().any(|c| c == name) {
                format!("\"{name}\"")
            } else {
                format!("NULL AS \"{name}\"")
            }
        };
        let sql = format!(
            "SELECT z, key_str, {}, {}, {}, {} FROM ZINDEX ORDER BY z",
            select("source_url"),
            select("scale"),
            select("offset"),
            select("uom"),
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(ZIndexRecord {
                slot: row.get(0)?,
                key: row.get(1)?,
                metadata: ZMetadata {
                    source_url: row.get(2)?,
                    scale: row.get(3)?,
                    offset: row.get(4)?,
                    uom: row.get(5)?,
                },
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }
}
