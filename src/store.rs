//! The target tile store, read from its MRF header.
//!
//! An MRF store is three files side by side:
//!
//! ```text
//! store.mrf   XML header: size, block size, bounds, projection
//! store.idx   tile index
//! store.ppg   tile data (.pjg / .ptf / .lrc / ... by compression)
//! store.zdb   z-index database, only for stores with a z dimension
//! ```
//!
//! Only the header elements the ingest engine needs are read:
//!
//! ```xml
//! <MRF_META>
//!   <Raster>
//!     <Size x="4096" y="2048" c="1" z="10"/>
//!     <PageSize x="512" y="512" c="1"/>
//!     <Compression>PPNG</Compression>
//!     <DataFile>store.ppg</DataFile>     <!-- optional -->
//!     <IndexFile>store.idx</IndexFile>   <!-- optional -->
//!   </Raster>
//!   <GeoTags>
//!     <BoundingBox minx="-180" miny="-90" maxx="180" maxy="90"/>
//!     <Projection>GEOGCS[...]</Projection>
//!   </GeoTags>
//! </MRF_META>
//! ```

use crate::geometry::inspect::epsg_from_wkt;
use crate::types::{Bounds, Resolution};
use roxmltree::{Document, Node};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Half the period of EPSG:3857 x coordinates.
pub const MERCATOR_SEAM: f64 = 20037508.342789244;
pub const GEOGRAPHIC_SEAM: f64 = 180.0;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("cannot read store header {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("store header is not valid XML: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("store header has no {0}")]
    Missing(&'static str),
    #[error("store header {element} has invalid {attribute}: {value:?}")]
    InvalidValue {
        element: &'static str,
        attribute: &'static str,
        value: String,
    },
}

/// Coordinate system families with distinct out-of-bounds handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrsFamily {
    /// EPSG:4326
    Geographic,
    /// EPSG:3857
    WebMercator,
    /// EPSG:3413 (Arctic) and EPSG:3031 (Antarctic)
    Polar,
    Other,
}

impl CrsFamily {
    pub fn from_epsg(epsg: Option<u32>) -> Self {
        match epsg {
            Some(4326) => Self::Geographic,
            Some(3857) => Self::WebMercator,
            Some(3413) | Some(3031) => Self::Polar,
            _ => Self::Other,
        }
    }

    /// Antimeridian x coordinate, for families that wrap.
    pub fn seam(self) -> Option<f64> {
        match self {
            Self::Geographic => Some(GEOGRAPHIC_SEAM),
            Self::WebMercator => Some(MERCATOR_SEAM),
            Self::Polar | Self::Other => None,
        }
    }
}

/// Store raster dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSize {
    pub x: u64,
    pub y: u64,
    pub bands: u64,
    /// Number of z slots; `None` for a plain 2D store.
    pub z: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TileStore {
    pub header: PathBuf,
    pub data_file: PathBuf,
    pub index_file: PathBuf,
    pub size: StoreSize,
    /// Block (page) size in pixels, `(x, y)`.
    pub block: (u64, u64),
    pub bounds: Bounds,
    pub epsg: Option<u32>,
}

fn element<'a, 'input>(parent: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    parent
        .descendants()
        .find(|node| node.is_element() && node.tag_name().name() == name)
}

fn parse_attr<T: std::str::FromStr>(
    node: Node<'_, '_>,
    element: &'static str,
    attribute: &'static str,
) -> Result<Option<T>, StoreError> {
    match node.attribute(attribute) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| StoreError::InvalidValue {
                element,
                attribute,
                value: raw.to_string(),
            }),
    }
}

fn required_attr<T: std::str::FromStr>(
    node: Node<'_, '_>,
    element: &'static str,
    attribute: &'static str,
) -> Result<T, StoreError> {
    parse_attr(node, element, attribute)?.ok_or(StoreError::Missing(attribute))
}

fn data_extension(compression: &str) -> &'static str {
    match compression.to_ascii_uppercase().as_str() {
        "JPEG" | "JPG" => "pjg",
        "TIF" | "TIFF" => "ptf",
        "LERC" => "lrc",
        "DEFLATE" => "pzp",
        "NONE" => "til",
        _ => "ppg",
    }
}

fn epsg_from_projection(text: &str) -> Option<u32> {
    let text = text.trim();
    text.strip_prefix("EPSG:")
        .and_then(|code| code.parse().ok())
        .or_else(|| epsg_from_wkt(text))
}

impl TileStore {
    /// Read and parse the store header at `header`.
    pub fn open(header: &Path) -> Result<Self, StoreError> {
        let xml = fs::read_to_string(header).map_err(|source| StoreError::Io {
            path: header.to_path_buf(),
            source,
        })?;
        Self::from_xml(header, &xml)
    }

    /// Parse header text; `header` locates the sibling data and index files.
    pub fn from_xml(header: &Path, xml: &str) -> Result<Self, StoreError> {
        let doc = Document::parse(xml)?;
        let root = doc.root_element();
        let raster = element(root, "Raster").ok_or(StoreError::Missing("Raster"))?;

        let size_node = element(raster, "Size").ok_or(StoreError::Missing("Size"))?;
        let size = StoreSize {
            x: required_attr(size_node, "Size", "x")?,
            y: required_attr(size_node, "Size", "y")?,
            bands: parse_attr(size_node, "Size", "c")?.unwrap_or(1),
            z: parse_attr(size_node, "Size", "z")?,
        };
        let block = match element(raster, "PageSize") {
            Some(page) => (
                parse_attr(page, "PageSize", "x")?.unwrap_or(512),
                parse_attr(page, "PageSize", "y")?.unwrap_or(512),
            ),
            None => (512, 512),
        };

        let bbox = element(root, "BoundingBox").ok_or(StoreError::Missing("BoundingBox"))?;
        let bounds = Bounds::new(
            required_attr(bbox, "BoundingBox", "minx")?,
            required_attr(bbox, "BoundingBox", "miny")?,
            required_attr(bbox, "BoundingBox", "maxx")?,
            required_attr(bbox, "BoundingBox", "maxy")?,
        );
        let epsg = element(root, "Projection")
            .and_then(|node| node.text())
            .and_then(epsg_from_projection);

        let text_of = |name: &'static str| element(raster, name).and_then(|n| n.text()).map(str::trim);
        let dir = header.parent().unwrap_or(Path::new(""));
        let extension = data_extension(text_of("Compression").unwrap_or("PNG"));
        let data_file = match text_of("DataFile") {
            Some(name) => dir.join(name),
            None => header.with_extension(extension),
        };
        let index_file = match text_of("IndexFile") {
            Some(name) => dir.join(name),
            None => header.with_extension("idx"),
        };

        let store = Self {
            header: header.to_path_buf(),
            data_file,
            index_file,
            size,
            block,
            bounds,
            epsg,
        };
        store.validate()?;
        Ok(store)
    }

    fn validate(&self) -> Result<(), StoreError> {
        let invalid = |element, attribute, value: String| StoreError::InvalidValue {
            element,
            attribute,
            value,
        };
        if self.size.x == 0 || self.size.y == 0 {
            return Err(invalid("Size", "x/y", format!("{}x{}", self.size.x, self.size.y)));
        }
        if self.block.0 == 0 || self.block.1 == 0 {
            return Err(invalid("PageSize", "x/y", format!("{}x{}", self.block.0, self.block.1)));
        }
        if self.bounds.width() <= 0.0 || self.bounds.height() <= 0.0 {
            return Err(invalid("BoundingBox", "extent", format!("{:?}", self.bounds)));
        }
        Ok(())
    }

    pub fn family(&self) -> CrsFamily {
        CrsFamily::from_epsg(self.epsg)
    }

    /// Antimeridian x coordinate used to split tiles, for stores that wrap.
    ///
    /// A header whose east bound lies within one pixel of the nominal seam
    /// (rounded bounds such as `maxx="20037508.34"`) splits at that bound, so
    /// both halves end inside the store.
    pub fn seam(&self) -> Option<f64> {
        let nominal = self.family().seam()?;
        if (self.bounds.xmax - nominal).abs() <= self.resolution().x {
            Some(self.bounds.xmax)
        } else {
            Some(nominal)
        }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution {
            x: self.bounds.width() / self.size.x as f64,
            y: self.bounds.height() / self.size.y as f64,
        }
    }

    /// Square alignment block, the larger page edge.
    pub fn block_size(&self) -> u64 {
        self.block.0.max(self.block.1)
    }

    pub fn pixel_size(&self) -> (u64, u64) {
        (self.size.x, self.size.y)
    }

    pub fn z_depth(&self) -> Option<u32> {
        self.size.z
    }

    /// Current data file size in bytes, read on every call.
    pub fn data_size(&self) -> io::Result<u64> {
        fs::metadata(&self.data_file).map(|m| m.len())
    }

    /// `mrf_insert` target: the header, or one z slice of it.
    pub fn insert_target(&self, slot: Option<u32>) -> String {
        let header = self.header.to_string_lossy();
        match slot {
            Some(z) => format!("{header}:MRF:Z{z}"),
            None => header.into_owned(),
        }
    }

    /// `<header stem>.zdb` next to the header.
    pub fn zdb_path(&self) -> PathBuf {
        self.header.with_extension("zdb")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{mrf_header, write_store};
    use tempfile::TempDir;

    #[test]
    fn parses_geographic_store() {
        let xml = mrf_header((4096, 2048), 512, Bounds::new(-180.0, -90.0, 180.0, 90.0), 4326, None);
        let store = TileStore::from_xml(Path::new("/s/global.mrf"), &xml).unwrap();
        assert_eq!(store.size.x, 4096);
        assert_eq!(store.size.y, 2048);
        assert_eq!(store.block, (512, 512));
        assert_eq!(store.epsg, Some(4326));
        assert_eq!(store.family(), CrsFamily::Geographic);
        assert_eq!(store.family().seam(), Some(180.0));
        assert_eq!(store.seam(), Some(180.0));
        assert_eq!(store.resolution(), Resolution { x: 0.087890625, y: 0.087890625 });
        assert_eq!(store.data_file, Path::new("/s/global.ppg"));
        assert_eq!(store.index_file, Path::new("/s/global.idx"));
        assert_eq!(store.z_depth(), None);
    }

    #[test]
    fn explicit_file_names_resolve_against_header_dir() {
        let xml = r#"<MRF_META>
  <Raster>
    <Size x="1024" y="1024" c="3" z="4"/>
    <PageSize x="256" y="256" c="3"/>
    <Compression>JPEG</Compression>
    <DataFile>data/tiles.pjg</DataFile>
    <IndexFile>data/tiles.idx</IndexFile>
  </Raster>
  <GeoTags>
    <BoundingBox minx="-4194304" miny="-4194304" maxx="4194304" maxy="4194304"/>
    <Projection>EPSG:3413</Projection>
  </GeoTags>
</MRF_META>"#;
        let store = TileStore::from_xml(Path::new("/s/arctic.mrf"), xml).unwrap();
        assert_eq!(store.data_file, Path::new("/s/data/tiles.pjg"));
        assert_eq!(store.index_file, Path::new("/s/data/tiles.idx"));
        assert_eq!(store.size.bands, 3);
        assert_eq!(store.z_depth(), Some(4));
        assert_eq!(store.family(), CrsFamily::Polar);
        assert_eq!(store.family().seam(), None);
        assert_eq!(store.seam(), None);
    }

    #[test]
    fn rounded_mercator_bounds_set_the_seam() {
        let bounds = Bounds::new(-20037508.34, -20037508.34, 20037508.34, 20037508.34);
        let xml = mrf_header((4096, 4096), 512, bounds, 3857, None);
        let store = TileStore::from_xml(Path::new("/s/merc.mrf"), &xml).unwrap();
        assert_eq!(store.family().seam(), Some(MERCATOR_SEAM));
        assert_eq!(store.seam(), Some(20037508.34));
    }

    #[test]
    fn regional_store_keeps_nominal_seam() {
        let xml = mrf_header((1024, 1024), 512, Bounds::new(0.0, 0.0, 90.0, 90.0), 4326, None);
        let store = TileStore::from_xml(Path::new("/s/region.mrf"), &xml).unwrap();
        assert_eq!(store.seam(), Some(GEOGRAPHIC_SEAM));
    }

    #[test]
    fn compression_picks_default_data_extension() {
        assert_eq!(data_extension("PPNG"), "ppg");
        assert_eq!(data_extension("jpeg"), "pjg");
        assert_eq!(data_extension("LERC"), "lrc");
        assert_eq!(data_extension("TIF"), "ptf");
    }

    #[test]
    fn insert_target_names_z_slice() {
        let xml = mrf_header((512, 512), 512, Bounds::new(0.0, 0.0, 1.0, 1.0), 4326, Some(8));
        let store = TileStore::from_xml(Path::new("/s/t.mrf"), &xml).unwrap();
        assert_eq!(store.insert_target(None), "/s/t.mrf");
        assert_eq!(store.insert_target(Some(3)), "/s/t.mrf:MRF:Z3");
        assert_eq!(store.zdb_path(), Path::new("/s/t.zdb"));
    }

    #[test]
    fn missing_bounding_box_is_error() {
        let xml = r#"<MRF_META><Raster><Size x="10" y="10"/></Raster></MRF_META>"#;
        let err = TileStore::from_xml(Path::new("a.mrf"), xml).unwrap_err();
        assert!(matches!(err, StoreError::Missing("BoundingBox")));
    }

    #[test]
    fn malformed_size_is_error() {
        let xml = r#"<MRF_META><Raster><Size x="ten" y="10"/></Raster></MRF_META>"#;
        let err = TileStore::from_xml(Path::new("a.mrf"), xml).unwrap_err();
        assert!(err.to_string().contains("ten"));
    }

    #[test]
    fn empty_bounds_rejected() {
        let xml = mrf_header((10, 10), 512, Bounds::new(0.0, 0.0, 0.0, 1.0), 4326, None);
        assert!(TileStore::from_xml(Path::new("a.mrf"), &xml).is_err());
    }

    #[test]
    fn open_reads_data_size() {
        let tmp = TempDir::new().unwrap();
        let store = write_store(tmp.path(), (4096, 2048), None);
        std::fs::write(&store.data_file, vec![0u8; 1234]).unwrap();
        let reopened = TileStore::open(&store.header).unwrap();
        assert_eq!(reopened.data_size().unwrap(), 1234);
    }

    #[test]
    fn open_missing_header_is_io_error() {
        let err = TileStore::open(Path::new("/definitely/not/here.mrf")).unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
    }
}
