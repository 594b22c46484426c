//! Geometry helpers shared by ingestion and search.
//!
//! Everything stored in the catalog lives in the canonical spatial reference
//! (EPSG:4326, lon/lat degrees). [`transform`] moves polygons into it and
//! [`codec`] converts between WKT / GeoJSON text and `geo` types.

pub mod codec;
pub mod transform;

/// User string understood by proj4rs for the canonical SRID.
pub const CANONICAL_CRS: &str = "EPSG:4326";
