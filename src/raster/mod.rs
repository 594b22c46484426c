//! Raster decoding and spatial metadata extraction.
//!
//! - [`reader`]: header metadata and validity masks of one GeoTIFF
//! - [`statistics`]: independent per-band statistics pass
//! - [`footprint`]: outline and valid-data footprint polygons
//! - [`validate`]: consistency check across the images of a raster

pub mod affine;
pub mod footprint;
pub mod reader;
pub mod statistics;
mod tags;
pub mod validate;

#[cfg(test)]
pub(crate) mod testing;
