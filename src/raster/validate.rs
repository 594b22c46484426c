//! Cross-image consistency check for multi-image rasters.
//!
//! Every image of a raster asset must carry identical spatial metadata. The
//! outline and footprint are then computed once, from the first image.

use std::path::PathBuf;

use geo::Polygon;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use super::{
    footprint::{FootprintError, extract_outline_and_footprint},
    reader::{DecodeError, RasterDataset},
};
use crate::geometry::transform::ReprojectionError;

/// Spatial metadata shared by all images of a raster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RasterMeta {
    /// PROJ string of the raster CRS.
    pub crs: String,
    /// `[left, bottom]`
    pub origin: [f64; 2],
    /// `[left, bottom, right, top]`
    pub extent: [f64; 4],
    pub resolution: [f64; 2],
    /// GDAL-ordered geotransform.
    pub transform: [f64; 6],
}

impl RasterMeta {
    pub fn from_dataset(dataset: &RasterDataset) -> Result<Self, DecodeError> {
        let crs = dataset.require_crs()?.to_string();
        let b = dataset.bounds();
        let (res_x, res_y) = dataset.resolution();
        Ok(Self {
            crs,
            origin: [b.left, b.bottom],
            extent: [b.left, b.bottom, b.right, b.top],
            resolution: [res_x, res_y],
            transform: dataset.transform.to_gdal(),
        })
    }

    /// First field that differs from `other`, with both renderings.
    fn first_difference(&self, other: &Self) -> Option<(&'static str, String, String)> {
        if self.crs != other.crs {
            return Some(("crs", self.crs.clone(), other.crs.clone()));
        }
        if self.origin != other.origin {
            return Some(("origin", fmt(&self.origin), fmt(&other.origin)));
        }
        if self.extent != other.extent {
            return Some(("extent", fmt(&self.extent), fmt(&other.extent)));
        }
        if self.resolution != other.resolution {
            return Some(("resolution", fmt(&self.resolution), fmt(&other.resolution)));
        }
        if self.transform != other.transform {
            return Some(("transform", fmt(&self.transform), fmt(&other.transform)));
        }
        None
    }
}

fn fmt(values: &[f64]) -> String {
    format!("{values:?}")
}

#[derive(Debug, Error)]
pub enum RasterConsistencyError {
    #[error("raster has no images")]
    Empty,
    #[error("raster meta mismatch at image `{image}`: {field} is {found}, expected {expected}")]
    Mismatch {
        image: String,
        field: &'static str,
        expected: String,
        found: String,
    },
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error(transparent)]
    Consistency(#[from] RasterConsistencyError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Reprojection(#[from] ReprojectionError),
}

impl From<FootprintError> for ValidationError {
    fn from(err: FootprintError) -> Self {
        match err {
            FootprintError::Decode(e) => Self::Decode(e),
            FootprintError::Reprojection(e) => Self::Reprojection(e),
        }
    }
}

/// One member image: a human readable label for diagnostics plus its local path.
#[derive(Debug, Clone)]
pub struct ImageSource {
    pub label: String,
    pub path: PathBuf,
}

/// Result of validating a raster's image set.
#[derive(Debug, Clone)]
pub struct ValidatedRaster {
    pub crs: String,
    pub origin: [f64; 2],
    pub extent: [f64; 4],
    pub resolution: [f64; 2],
    pub transform: [f64; 6],
    pub outline: Polygon<f64>,
    pub footprint: Polygon<f64>,
    pub hull_fallback: Option<String>,
}

/// Check that every image of `images` shares the same spatial metadata and
/// compute the raster's outline and footprint from the first one.
pub fn validate_image_set(
    images: &[ImageSource],
    max_shape: (usize, usize),
) -> Result<ValidatedRaster, ValidationError> {
    let (base, rest) = images.split_first().ok_or(RasterConsistencyError::Empty)?;

    let base_dataset = RasterDataset::open(&base.path)?;
    let meta = RasterMeta::from_dataset(&base_dataset)?;

    for image in rest {
        let other = RasterMeta::from_dataset(&RasterDataset::open(&image.path)?)?;
        if let Some((field, expected, found)) = meta.first_difference(&other) {
            return Err(RasterConsistencyError::Mismatch {
                image: image.label.clone(),
                field,
                expected,
                found,
            }
            .into());
        }
    }
    debug!(images = images.len(), "raster image set is consistent");

    // All images share geometry; the hull is only computed once.
    let shapes = extract_outline_and_footprint(&base_dataset, max_shape)?;

    let RasterMeta {
        crs,
        origin,
        extent,
        resolution,
        transform,
    } = meta;
    Ok(ValidatedRaster {
        crs,
        origin,
        extent,
        resolution,
        transform,
        outline: shapes.outline,
        footprint: shapes.footprint,
        hull_fallback: shapes.hull_fallback,
    })
}
