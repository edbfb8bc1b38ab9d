//! Ingest configuration module.
//!
//! Handles loading, validating, and merging `ingest.toml`. Stock defaults are
//! the base layer; the user file only needs the keys it overrides, and CLI
//! flags override both.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [store]
//! # header = "/data/layer/layer.mrf"   # MRF header of the target store
//! # compaction_threshold = 4294967296  # bytes; omit to never compact
//!
//! [input]
//! # input_dir = "/data/incoming"
//! tiles = []                  # explicit tile paths, used with input_dir
//! extensions = ["tif", "tiff", "vrt", "jp2", "png"]
//!
//! [insert]
//! resampling = "near"         # near, bilinear, cubic, average, mode, ...
//! insert_method = "average"   # average (Avg) or nearest (NearNb)
//! merge = true                # composite with store content after resampling
//! # nodata = 0
//! working_dir = "work"        # intermediates, named after each tile
//!
//! [zindex]
//! # key = "20120101"          # z-dimension key; needs a store with z-depth
//! # source_url = "https://..."
//! # scale = 1.0
//! # offset = 0.0
//! # uom = "K"
//!
//! [processing]
//! # max_processes = 4         # omit for auto = CPU cores - 1
//! inspect_timeout_secs = 90
//! inspect_attempts = 2        # gdalinfo runs before a tile is given up
//! shuffle_seed = 0
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::types::{InsertMethod, ResampleMethod};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Ingest configuration loaded from `ingest.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestConfig {
    pub store: StoreConfig,
    pub input: InputConfig,
    pub insert: InsertConfig,
    pub zindex: ZIndexConfig,
    pub processing: ProcessingConfig,
}

impl IngestConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.processing.inspect_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "processing.inspect_timeout_secs must be non-zero".into(),
            ));
        }
        if self.processing.inspect_attempts == 0 {
            return Err(ConfigError::Validation(
                "processing.inspect_attempts must be at least 1".into(),
            ));
        }
        if self.processing.max_processes == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_processes must be at least 1".into(),
            ));
        }
        if self.zindex.key.as_deref().is_some_and(str::is_empty) {
            return Err(ConfigError::Validation(
                "zindex.key must not be empty".into(),
            ));
        }
        if self.zindex.key.is_none() && self.zindex.has_metadata() {
            return Err(ConfigError::Validation(
                "zindex metadata given without zindex.key".into(),
            ));
        }
        if self.insert.working_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "insert.working_dir must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Target store settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Path to the MRF header. Required to run, usually given with `--store`.
    pub header: Option<PathBuf>,
    /// Data file size in bytes above which the store is compacted.
    pub compaction_threshold: Option<u64>,
}

/// Where tiles come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InputConfig {
    /// Directory searched recursively for tiles.
    pub input_dir: Option<PathBuf>,
    /// Explicit tile paths.
    pub tiles: Vec<PathBuf>,
    /// File extensions (case-insensitive, no dot) picked up from `input_dir`.
    pub extensions: Vec<String>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            input_dir: None,
            tiles: Vec::new(),
            extensions: ["tif", "tiff", "vrt", "jp2", "png"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// How tiles are written into the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InsertConfig {
    pub resampling: ResampleMethod,
    pub insert_method: InsertMethod,
    /// Composite resampled tiles with existing store content before insert.
    pub merge: bool,
    pub nodata: Option<f64>,
    pub working_dir: PathBuf,
}

impl Default for InsertConfig {
    fn default() -> Self {
        Self {
            resampling: ResampleMethod::default(),
            insert_method: InsertMethod::default(),
            merge: true,
            nodata: None,
            working_dir: PathBuf::from("work"),
        }
    }
}

/// Z-dimension assignment. Without a key, inserts go to the store itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ZIndexConfig {
    pub key: Option<String>,
    pub source_url: Option<String>,
    pub scale: Option<f64>,
    pub offset: Option<f64>,
    pub uom: Option<String>,
}

impl ZIndexConfig {
    fn has_metadata(&self) -> bool {
        self.source_url.is_some()
            || self.scale.is_some()
            || self.offset.is_some()
            || self.uom.is_some()
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel insert workers.
    /// When absent, one less than the number of CPU cores (at least 1).
    pub max_processes: Option<usize>,
    /// `gdalinfo` is killed after this many seconds.
    pub inspect_timeout_secs: u64,
    /// `gdalinfo` runs per query, the first included.
    pub inspect_attempts: u32,
    /// Seed for the deterministic tile shuffle.
    pub shuffle_seed: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_processes: None,
            inspect_timeout_secs: 90,
            inspect_attempts: 2,
            shuffle_seed: 0,
        }
    }
}

/// Resolve the worker count for `tiles` tiles.
///
/// `min(cores - 1, tiles, max_processes)`, never below 1.
pub fn effective_workers(config: &ProcessingConfig, tiles: usize) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let auto = cores.saturating_sub(1).max(1);
    let cap = config.max_processes.map(|n| n.min(auto)).unwrap_or(auto);
    cap.min(tiles).max(1)
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    toml::Value::try_from(IngestConfig::default())
        .map_err(|err| ConfigError::Validation(format!("default config does not serialize: {err}")))
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<IngestConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: IngestConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load `path` over the stock defaults. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<IngestConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(path)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `ingest.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# tile-ingest configuration
# ========================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Target store
# ---------------------------------------------------------------------------
[store]
# MRF header of the store tiles are inserted into (or pass --store).
# header = "/data/layer/layer.mrf"

# Compact the store once its data file grows past this many bytes.
# Omit to never compact.
# compaction_threshold = 4294967296

# ---------------------------------------------------------------------------
# Input tiles
# ---------------------------------------------------------------------------
[input]
# Directory searched recursively. .mrf files are never picked up.
# input_dir = "/data/incoming"

# Explicit tile paths, in addition to input_dir and command-line tiles.
tiles = []

# Extensions picked up from input_dir (case-insensitive).
extensions = ["tif", "tiff", "vrt", "jp2", "png"]

# ---------------------------------------------------------------------------
# Insertion
# ---------------------------------------------------------------------------
[insert]
# gdalwarp / gdalbuildvrt resampling: near, bilinear, cubic, cubicspline,
# lanczos, average, mode.
resampling = "near"

# mrf_insert resampling: "average" (Avg) or "nearest" (NearNb).
insert_method = "average"

# Composite resampled tiles with existing store content before insertion.
merge = true

# Nodata value passed to the merge tools.
# nodata = 0

# Intermediate files are written here, named after each tile.
working_dir = "work"

# ---------------------------------------------------------------------------
# Z dimension
# ---------------------------------------------------------------------------
[zindex]
# Key of the z slice to insert into. Requires a store with a z size.
# key = "20120101"
# source_url = "https://example.com/source"
# scale = 1.0
# offset = 0.0
# uom = "K"

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel insert workers.
# Omit to auto-detect (= number of CPU cores - 1).
# max_processes = 4

# gdalinfo is killed after this many seconds.
inspect_timeout_secs = 90

# gdalinfo runs per query before a tile's geometry counts as unknown.
inspect_attempts = 2

# Seed for the deterministic tile shuffle.
shuffle_seed = 0
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_values() {
        let config = IngestConfig::default();
        assert_eq!(config.store.header, None);
        assert_eq!(config.insert.resampling, ResampleMethod::Near);
        assert_eq!(config.insert.insert_method, InsertMethod::Average);
        assert!(config.insert.merge);
        assert_eq!(config.insert.working_dir, PathBuf::from("work"));
        assert_eq!(config.processing.inspect_timeout_secs, 90);
        assert_eq!(config.processing.inspect_attempts, 2);
        assert!(config.input.extensions.contains(&"tif".to_string()));
    }

    #[test]
    fn parse_partial_config() {
        let toml = r#"
[insert]
merge = false
nodata = 0
"#;
        let config: IngestConfig = toml::from_str(toml).unwrap();
        // Overridden values
        assert!(!config.insert.merge);
        assert_eq!(config.insert.nodata, Some(0.0));
        // Default values preserved
        assert_eq!(config.insert.insert_method, InsertMethod::Average);
        assert_eq!(config.processing.inspect_timeout_secs, 90);
    }

    #[test]
    fn parse_zindex_and_methods() {
        let toml = r#"
[insert]
resampling = "average"
insert_method = "nearest"

[zindex]
key = "20120101"
scale = 0.01
uom = "K"
"#;
        let config: IngestConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.insert.resampling, ResampleMethod::Average);
        assert_eq!(config.insert.insert_method, InsertMethod::Nearest);
        assert_eq!(config.zindex.key.as_deref(), Some("20120101"));
        assert_eq!(config.zindex.scale, Some(0.01));
        assert_eq!(config.zindex.offset, None);
    }

    // =========================================================================
    // load_config tests
    // =========================================================================

    #[test]
    fn load_config_returns_default_when_no_file() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(&tmp.path().join("ingest.toml")).unwrap();
        assert_eq!(config, IngestConfig::default());
    }

    #[test]
    fn load_config_reads_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ingest.toml");
        fs::write(
            &path,
            r#"
[store]
header = "/data/layer.mrf"
compaction_threshold = 1000

[processing]
max_processes = 2
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.store.header, Some(PathBuf::from("/data/layer.mrf")));
        assert_eq!(config.store.compaction_threshold, Some(1000));
        assert_eq!(config.processing.max_processes, Some(2));
        // Unspecified values should be defaults
        assert!(config.insert.merge);
    }

    #[test]
    fn load_config_invalid_toml_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ingest.toml");
        fs::write(&path, "this is not valid toml [[[").unwrap();

        let result = load_config(&path);
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    // =========================================================================
    // Processing config tests
    // =========================================================================

    #[test]
    fn effective_workers_auto_leaves_a_core() {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let workers = effective_workers(&ProcessingConfig::default(), 10_000);
        assert_eq!(workers, cores.saturating_sub(1).max(1));
    }

    #[test]
    fn effective_workers_capped_by_tiles() {
        assert_eq!(effective_workers(&ProcessingConfig::default(), 1), 1);
        assert_eq!(effective_workers(&ProcessingConfig::default(), 0), 1);
    }

    #[test]
    fn effective_workers_user_constrains_down() {
        let config = ProcessingConfig {
            max_processes: Some(1),
            ..ProcessingConfig::default()
        };
        assert_eq!(effective_workers(&config, 100), 1);
    }

    #[test]
    fn effective_workers_never_above_auto() {
        let config = ProcessingConfig {
            max_processes: Some(99999),
            ..ProcessingConfig::default()
        };
        let auto = effective_workers(&ProcessingConfig::default(), 99999);
        assert_eq!(effective_workers(&config, 99999), auto);
    }

    // =========================================================================
    // merge_toml tests
    // =========================================================================

    #[test]
    fn merge_toml_scalar_override() {
        let base: toml::Value = toml::from_str(r#"merge = true"#).unwrap();
        let overlay: toml::Value = toml::from_str(r#"merge = false"#).unwrap();
        let merged = merge_toml(base, overlay);
        assert_eq!(merged.get("merge").unwrap().as_bool(), Some(false));
    }

    #[test]
    fn merge_toml_deep_nested() {
        let base: toml::Value = toml::from_str(
            r#"
[insert]
resampling = "near"
working_dir = "work"
"#,
        )
        .unwrap();
        let overlay: toml::Value = toml::from_str(
            r#"
[insert]
resampling = "cubic"
"#,
        )
        .unwrap();
        let merged = merge_toml(base, overlay);
        let insert = merged.get("insert").unwrap();
        assert_eq!(insert.get("resampling").unwrap().as_str(), Some("cubic"));
        assert_eq!(insert.get("working_dir").unwrap().as_str(), Some("work"));
    }

    // =========================================================================
    // Unknown key rejection tests
    // =========================================================================

    #[test]
    fn unknown_key_rejected() {
        let toml_str = r#"
[insert]
mrege = true
"#;
        let result: Result<IngestConfig, _> = toml::from_str(toml_str);
        let err = result.unwrap_err().to_string();
        assert!(err.contains("unknown field"));
    }

    #[test]
    fn unknown_section_rejected() {
        let toml_str = r#"
[store_settings]
header = "x.mrf"
"#;
        let result: Result<IngestConfig, _> = toml::from_str(toml_str);
        assert!(result.is_err());
    }

    #[test]
    fn unknown_resampling_rejected() {
        let toml_str = r#"
[insert]
resampling = "sharpest"
"#;
        let result: Result<IngestConfig, _> = toml::from_str(toml_str);
        assert!(result.is_err());
    }

    // =========================================================================
    // Validation tests
    // =========================================================================

    #[test]
    fn validate_default_config_passes() {
        assert!(IngestConfig::default().validate().is_ok());
    }

    #[test]
    fn validate_zero_timeout() {
        let mut config = IngestConfig::default();
        config.processing.inspect_timeout_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("inspect_timeout_secs"));
    }

    #[test]
    fn validate_zero_inspect_attempts() {
        let mut config = IngestConfig::default();
        config.processing.inspect_attempts = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("inspect_attempts"));
    }

    #[test]
    fn validate_zero_workers() {
        let mut config = IngestConfig::default();
        config.processing.max_processes = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_zindex_metadata_needs_key() {
        let mut config = IngestConfig::default();
        config.zindex.uom = Some("K".into());
        assert!(config.validate().is_err());

        config.zindex.key = Some("20120101".into());
        assert!(config.validate().is_ok());

        config.zindex.key = Some(String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_config_validates_values() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ingest.toml");
        fs::write(
            &path,
            r#"
[processing]
inspect_timeout_secs = 0
"#,
        )
        .unwrap();

        let result = load_config(&path);
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    // =========================================================================
    // stock config tests
    // =========================================================================

    #[test]
    fn resolve_config_with_overlay() {
        let base = stock_defaults_value().unwrap();
        let overlay: toml::Value = toml::from_str(
            r#"
[insert]
nodata = -9999
"#,
        )
        .unwrap();
        let config = resolve_config(base, Some(overlay)).unwrap();
        assert_eq!(config.insert.nodata, Some(-9999.0));
        assert_eq!(config.processing.inspect_timeout_secs, 90);
    }

    #[test]
    fn stock_config_toml_roundtrips_to_defaults() {
        let config: IngestConfig = toml::from_str(stock_config_toml()).unwrap();
        assert_eq!(config, IngestConfig::default());
    }

    #[test]
    fn stock_config_toml_contains_all_sections() {
        let content = stock_config_toml();
        for section in ["[store]", "[input]", "[insert]", "[zindex]", "[processing]"] {
            assert!(content.contains(section), "missing {section}");
        }
    }

    #[test]
    fn stock_defaults_value_has_all_sections() {
        let val = stock_defaults_value().unwrap();
        for section in ["store", "input", "insert", "zindex", "processing"] {
            assert!(val.get(section).is_some(), "missing {section}");
        }
    }
}
