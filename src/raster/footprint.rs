//! Outline and valid-data footprint of a single raster image.

use geo::{Area, ConvexHull, Coord, LineString, MultiPoint, Point, Polygon};
use ndarray::Array2;
use thiserror::Error;
use tracing::info;

use super::reader::{Bounds, DecodeError, RasterDataset};
use crate::geometry::transform::{GeometryTransformer, ReprojectionError};

/// Only the first band is inspected for valid data.
pub const FOOTPRINT_BAND: usize = 1;

#[derive(Debug, Error)]
pub enum FootprintError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Reprojection(#[from] ReprojectionError),
}

/// Why the valid-data hull could not be built. Never fatal: the caller falls
/// back to the outline.
#[derive(Debug, Error)]
pub enum HullError {
    #[error("cannot sample validity mask: {0}")]
    Mask(#[from] DecodeError),
    #[error("band has no valid pixels")]
    NoValidData,
    #[error("only {0} valid pixel centre(s), a hull needs at least 3")]
    Degenerate(usize),
    #[error("valid pixel centres are collinear")]
    Collinear,
}

#[derive(Debug, Clone)]
pub struct OutlineAndFootprint {
    /// Reprojected corners of the full pixel extent.
    pub outline: Polygon<f64>,
    /// Reprojected convex hull of valid pixels, or the outline on fallback.
    pub footprint: Polygon<f64>,
    /// Set when the footprint fell back to the outline because of a hull failure.
    pub hull_fallback: Option<String>,
}

enum ValidData {
    /// Every sampled cell is valid; the footprint is the outline itself.
    Full,
    Hull(Polygon<f64>),
}

/// Closed quadrilateral: left/top, right/top, right/bottom, left/bottom.
pub fn outline_polygon(bounds: &Bounds) -> Polygon<f64> {
    Polygon::new(
        LineString::from(vec![
            (bounds.left, bounds.top),
            (bounds.right, bounds.top),
            (bounds.right, bounds.bottom),
            (bounds.left, bounds.bottom),
            (bounds.left, bounds.top),
        ]),
        vec![],
    )
}

/// Compute `(outline, footprint)` for `dataset` in EPSG:4326.
pub fn extract_outline_and_footprint(
    dataset: &RasterDataset,
    max_shape: (usize, usize),
) -> Result<OutlineAndFootprint, FootprintError> {
    let transformer = GeometryTransformer::new(dataset.require_crs()?)?;
    let bounds = dataset.bounds();
    let outline = transformer.transform(&outline_polygon(&bounds))?;

    let (footprint, hull_fallback) = match valid_data_hull(dataset, &bounds, max_shape) {
        Ok(ValidData::Full) => (outline.clone(), None),
        Ok(ValidData::Hull(hull)) => (transformer.transform(&hull)?, None),
        Err(err) => {
            info!(
                path = %dataset.path.display(),
                "issue computing convex hull of non-null data: {err}"
            );
            (outline.clone(), Some(err.to_string()))
        }
    };

    Ok(OutlineAndFootprint {
        outline,
        footprint,
        hull_fallback,
    })
}

fn valid_data_hull(
    dataset: &RasterDataset,
    bounds: &Bounds,
    max_shape: (usize, usize),
) -> Result<ValidData, HullError> {
    let mask = dataset.sample_valid_mask(FOOTPRINT_BAND, max_shape)?;
    if !mask.is_empty() && mask.iter().all(|valid| *valid) {
        return Ok(ValidData::Full);
    }
    let points = valid_cell_centers(&mask, bounds);
    convex_hull(points).map(ValidData::Hull)
}

/// Centres of valid mask cells in the raster CRS.
///
/// Only the outermost valid cell of each row is kept: everything between them
/// lies inside their hull anyway.
fn valid_cell_centers(mask: &Array2<bool>, bounds: &Bounds) -> Vec<Point<f64>> {
    let (rows, cols) = mask.dim();
    if rows == 0 || cols == 0 {
        return Vec::new();
    }
    let dx = (bounds.right - bounds.left) / cols as f64;
    let dy = (bounds.top - bounds.bottom) / rows as f64;

    let mut points = Vec::with_capacity(rows * 2);
    for (r, row) in mask.outer_iter().enumerate() {
        let first = row.iter().position(|v| *v);
        let last = row.iter().rposition(|v| *v);
        let y = bounds.top - (r as f64 + 0.5) * dy;
        if let (Some(first), Some(last)) = (first, last) {
            points.push(Point::new(bounds.left + (first as f64 + 0.5) * dx, y));
            if last != first {
                points.push(Point::new(bounds.left + (last as f64 + 0.5) * dx, y));
            }
        }
    }
    points
}

/// Convex hull of `points` as a closed polygon.
pub fn convex_hull(points: Vec<Point<f64>>) -> Result<Polygon<f64>, HullError> {
    match points.len() {
        0 => return Err(HullError::NoValidData),
        n if n < 3 => return Err(HullError::Degenerate(n)),
        _ => {}
    }
    let hull = MultiPoint::new(points).convex_hull();
    if hull.unsigned_area() <= 0.0 {
        return Err(HullError::Collinear);
    }
    // geo already closes the ring; make sure of it for downstream consumers
    let mut ring: Vec<Coord<f64>> = hull.exterior().0.clone();
    if ring.first() != ring.last() {
        if let Some(first) = ring.first().copied() {
            ring.push(first);
        }
    }
    Ok(Polygon::new(LineString::new(ring), vec![]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{
        reader::MAX_LOAD_SHAPE,
        testing::{GeoTiffFixture, write_fixture},
    };
    use geo::{BoundingRect, Contains};

    fn assert_closed(polygon: &Polygon<f64>) {
        let ring = &polygon.exterior().0;
        assert!(ring.len() >= 4, "ring has {} vertices", ring.len());
        assert_eq!(ring.first(), ring.last());
    }

    #[test]
    fn test_uniform_raster_footprint_equals_outline() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = GeoTiffFixture::uniform(10, 10, 3.0).origin(-10.0, 10.0);
        let path = write_fixture(dir.path(), "uniform.tif", &fixture);
        let ds = RasterDataset::open(&path).unwrap();

        let result = extract_outline_and_footprint(&ds, MAX_LOAD_SHAPE).unwrap();
        assert_eq!(result.footprint, result.outline);
        assert!(result.hull_fallback.is_none());
        assert_closed(&result.outline);
        let rect = result.outline.bounding_rect().unwrap();
        approx::assert_relative_eq!(rect.min().x, -10.0, epsilon = 1e-9);
        approx::assert_relative_eq!(rect.max().y, 10.0, epsilon = 1e-9);
    }

    #[test]
    fn test_partial_footprint_is_inside_outline() {
        let dir = tempfile::tempdir().unwrap();
        let mut fixture = GeoTiffFixture::uniform(10, 10, 0.0).nodata(0.0);
        // valid diamond-ish blob in the middle
        for row in 3..7 {
            for col in 2..8 {
                fixture.set(row, col, 1.0);
            }
        }
        let path = write_fixture(dir.path(), "blob.tif", &fixture);
        let ds = RasterDataset::open(&path).unwrap();

        let result = extract_outline_and_footprint(&ds, MAX_LOAD_SHAPE).unwrap();
        assert!(result.hull_fallback.is_none());
        assert_closed(&result.footprint);
        assert_ne!(result.footprint, result.outline);
        assert!(result.outline.contains(&result.footprint));

        let rect = result.footprint.bounding_rect().unwrap();
        // pixel centres of cols 2..=7 and rows 3..=6 in a 1° grid topped at y = 10
        approx::assert_relative_eq!(rect.min().x, 2.5, epsilon = 1e-9);
        approx::assert_relative_eq!(rect.max().x, 7.5, epsilon = 1e-9);
        approx::assert_relative_eq!(rect.max().y, 6.5, epsilon = 1e-9);
        approx::assert_relative_eq!(rect.min().y, 3.5, epsilon = 1e-9);
    }

    #[test]
    fn test_empty_mask_falls_back_to_outline() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = GeoTiffFixture::uniform(5, 5, 0.0).nodata(0.0);
        let path = write_fixture(dir.path(), "nothing.tif", &fixture);
        let ds = RasterDataset::open(&path).unwrap();

        let result = extract_outline_and_footprint(&ds, MAX_LOAD_SHAPE).unwrap();
        assert_eq!(result.footprint, result.outline);
        assert!(result.hull_fallback.unwrap().contains("no valid pixels"));
    }

    #[test]
    fn test_collinear_pixels_fall_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut fixture = GeoTiffFixture::uniform(5, 5, 0.0).nodata(0.0);
        for col in 0..5 {
            fixture.set(2, col, 1.0);
        }
        let path = write_fixture(dir.path(), "line.tif", &fixture);
        let ds = RasterDataset::open(&path).unwrap();

        let result = extract_outline_and_footprint(&ds, MAX_LOAD_SHAPE).unwrap();
        assert_eq!(result.footprint, result.outline);
        assert!(result.hull_fallback.is_some());
    }

    #[test]
    fn test_convex_hull_rejects_degenerate_sets() {
        assert!(matches!(convex_hull(vec![]), Err(HullError::NoValidData)));
        assert!(matches!(
            convex_hull(vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)]),
            Err(HullError::Degenerate(2))
        ));
        let hull = convex_hull(vec![
            Point::new(0.0, 0.0),
            Point::new(2.0, 0.0),
            Point::new(1.0, 1.0),
            Point::new(1.0, 0.5),
        ])
        .unwrap();
        // interior point dropped, triangle closed
        assert_eq!(hull.exterior().0.len(), 4);
        assert_closed(&hull);
    }

    #[test]
    fn test_missing_crs_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(dir.path(), "plain.tif", &GeoTiffFixture::uniform(2, 2, 1.0));
        let mut ds = RasterDataset::open(&path).unwrap();
        ds.crs = None;
        assert!(matches!(
            extract_outline_and_footprint(&ds, MAX_LOAD_SHAPE),
            Err(FootprintError::Decode(DecodeError::MissingSpatialReference { .. }))
        ));
    }
}
