use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tile_ingest::geometry::align::align;
use tile_ingest::geometry::inspect::Inspector;
use tile_ingest::store::TileStore;
use tile_ingest::tools::SystemTool;
use tile_ingest::types::Extent;
use tile_ingest::{compact, config, ingest, logging, output};

#[derive(Parser)]
#[command(name = "tile-ingest")]
#[command(about = "Insert georeferenced raster tiles into a block-tiled MRF store")]
#[command(long_about = "\
Insert georeferenced raster tiles into a block-tiled MRF store

Tiles are inspected with gdalinfo and reshaped until mrf_insert can write
them: cropped to the store bounds, split at the antimeridian, resampled to
the store resolution and merged with existing content on a block-aligned
window. Many workers insert into the same store concurrently.

Required tools on the PATH:

  gdalinfo, gdal_translate, gdalwarp, gdalbuildvrt   (GDAL)
  gdal_merge.py                                      (paletted merges)
  mrf_insert, mrf_clean.py                           (MRF utilities)

Run 'tile-ingest gen-config' to generate a documented ingest.toml.")]
#[command(version)]
struct Cli {
    /// Configuration file (missing file = stock defaults)
    #[arg(long, default_value = "ingest.toml", global = true)]
    config: PathBuf,

    /// Log debug output, including tool stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

/// Flags that override `ingest.toml` for one insert run.
#[derive(clap::Args)]
struct InsertArgs {
    /// MRF header of the target store
    #[arg(long)]
    store: Option<PathBuf>,

    /// Maximum parallel workers
    #[arg(long)]
    workers: Option<usize>,

    /// Insert into the z slice assigned to this key
    #[arg(long)]
    zkey: Option<String>,

    /// Insert resampled tiles without merging with store content
    #[arg(long)]
    no_merge: bool,

    /// Tiles to insert, in addition to [input] in the config
    tiles: Vec<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Insert tiles into a store
    Insert(InsertArgs),
    /// Print what gdalinfo reports about a tile's geometry
    Inspect {
        tile: PathBuf,
    },
    /// Print the block-aligned window the store would use for an extent
    #[command(allow_negative_numbers = true)]
    Align {
        /// MRF header of the store
        #[arg(long)]
        store: PathBuf,
        ulx: f64,
        uly: f64,
        lrx: f64,
        lry: f64,
    },
    /// Rewrite a store's live blocks into fresh data and index files
    Compact {
        /// MRF header of the store
        #[arg(long)]
        store: PathBuf,
    },
    /// Print a stock ingest.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command {
        Command::Insert(args) => {
            let mut config = config::load_config(&cli.config)?;
            if let Some(store) = args.store {
                config.store.header = Some(store);
            }
            if let Some(workers) = args.workers {
                config.processing.max_processes = Some(workers);
            }
            if let Some(key) = args.zkey {
                config.zindex.key = Some(key);
            }
            if args.no_merge {
                config.insert.merge = false;
            }
            config.validate()?;

            let tiles = ingest::collect_tiles(&config.input, &args.tiles);
            let report = ingest::run(&config, &SystemTool::new(), tiles)?;
            output::print_run_report(&report);
            if !report.is_success() {
                std::process::exit(1);
            }
        }
        Command::Inspect { tile } => {
            let config = config::load_config(&cli.config)?;
            let tool = SystemTool::new();
            let timeout = Duration::from_secs(config.processing.inspect_timeout_secs);
            let info = Inspector::new(&tool, timeout)
                .with_attempts(config.processing.inspect_attempts)
                .info(&tile)?;
            output::print_raster_info(&tile, info.as_ref());
            if info.is_none() {
                std::process::exit(1);
            }
        }
        Command::Align {
            store,
            ulx,
            uly,
            lrx,
            lry,
        } => {
            let store = TileStore::open(&store)?;
            let requested = Extent::new(ulx, uly, lrx, lry);
            let window = align(&requested, &store.bounds, store.pixel_size(), store.block_size())?;
            output::print_aligned(&requested, &window);
        }
        Command::Compact { store } => {
            let store = TileStore::open(&store)?;
            let compacted = compact::compact(&SystemTool::new(), &store)?;
            output::print_compaction(&store.data_file, compacted);
            if !compacted {
                std::process::exit(1);
            }
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}
