//! Reprojection of polygons into the canonical spatial reference.
//!
//! Pure Rust (proj4rs + crs-definitions), no PROJ/GDAL system dependency.

use geo::{Coord, LineString, Polygon};
use proj4rs::Proj;
use thiserror::Error;

use super::CANONICAL_CRS;

#[derive(Debug, Error)]
pub enum ReprojectionError {
    #[error("unknown source CRS `{crs}`: {reason}")]
    UnknownCrs { crs: String, reason: String },
    #[error("coordinate ({x}, {y}) cannot be reprojected: {reason}")]
    OutOfDomain { x: f64, y: f64, reason: String },
}

/// Transforms geometries from one source CRS into EPSG:4326.
///
/// Built once per raster and reused for the outline and footprint so the CRS
/// definition is only parsed a single time.
pub struct GeometryTransformer {
    src: Proj,
    dst: Proj,
    src_is_geo: bool,
    dst_is_geo: bool,
}

impl std::fmt::Debug for GeometryTransformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeometryTransformer")
            .field("src_is_geo", &self.src_is_geo)
            .field("dst_is_geo", &self.dst_is_geo)
            .finish()
    }
}

impl GeometryTransformer {
    /// Build a transformer from a source CRS given as a PROJ string
    /// (`+proj=utm +zone=33 ...`) or an EPSG user string (`EPSG:32633`).
    pub fn new(source_crs: &str) -> Result<Self, ReprojectionError> {
        let src = Proj::from_user_string(source_crs).map_err(|e| ReprojectionError::UnknownCrs {
            crs: source_crs.to_string(),
            reason: e.to_string(),
        })?;
        let dst = Proj::from_user_string(CANONICAL_CRS).map_err(|e| {
            ReprojectionError::UnknownCrs {
                crs: CANONICAL_CRS.to_string(),
                reason: e.to_string(),
            }
        })?;
        let src_is_geo = src.is_latlong();
        let dst_is_geo = dst.is_latlong();
        Ok(Self {
            src,
            dst,
            src_is_geo,
            dst_is_geo,
        })
    }

    /// Reproject a single coordinate. Input and output are in CRS native units.
    pub fn transform_coord(&self, coord: Coord<f64>) -> Result<Coord<f64>, ReprojectionError> {
        let (x, y) = (coord.x, coord.y);
        // proj4rs works in radians for geographic systems
        let mut point = if self.src_is_geo {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };

        proj4rs::transform::transform(&self.src, &self.dst, &mut point).map_err(|e| {
            ReprojectionError::OutOfDomain {
                x,
                y,
                reason: e.to_string(),
            }
        })?;

        let (out_x, out_y) = if self.dst_is_geo {
            (point.0.to_degrees(), point.1.to_degrees())
        } else {
            (point.0, point.1)
        };

        if !out_x.is_finite() || !out_y.is_finite() {
            return Err(ReprojectionError::OutOfDomain {
                x,
                y,
                reason: "transform produced a non-finite coordinate".into(),
            });
        }

        Ok(Coord { x: out_x, y: out_y })
    }

    /// Reproject every vertex of `polygon`, keeping vertex order and closure.
    pub fn transform(&self, polygon: &Polygon<f64>) -> Result<Polygon<f64>, ReprojectionError> {
        let exterior = self.transform_ring(polygon.exterior())?;
        let interiors = polygon
            .interiors()
            .iter()
            .map(|ring| self.transform_ring(ring))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Polygon::new(exterior, interiors))
    }

    fn transform_ring(&self, ring: &LineString<f64>) -> Result<LineString<f64>, ReprojectionError> {
        ring.coords()
            .map(|c| self.transform_coord(*c))
            .collect::<Result<Vec<_>, _>>()
            .map(LineString::new)
    }
}

/// PROJ string for an EPSG code from the crs-definitions database.
pub fn proj_string_for_epsg(epsg: u16) -> Option<&'static str> {
    crs_definitions::from_code(epsg).map(|def| def.proj4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geo::polygon;

    fn reproject(polygon: &Polygon<f64>, crs: &str) -> Polygon<f64> {
        GeometryTransformer::new(crs).unwrap().transform(polygon).unwrap()
    }

    #[test]
    fn test_geographic_identity_keeps_coordinates() {
        let square = polygon![
            (x: 10.0, y: 50.0),
            (x: 11.0, y: 50.0),
            (x: 11.0, y: 49.0),
            (x: 10.0, y: 49.0),
        ];
        let out = reproject(&square, "EPSG:4326");
        for (a, b) in square.exterior().coords().zip(out.exterior().coords()) {
            assert_relative_eq!(a.x, b.x, epsilon = 1e-9);
            assert_relative_eq!(a.y, b.y, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_utm_polygon_lands_in_zone() {
        // UTM 32N around Oslo
        let proj = proj_string_for_epsg(32632).unwrap();
        let square = polygon![
            (x: 590_000.0, y: 6_650_000.0),
            (x: 600_000.0, y: 6_650_000.0),
            (x: 600_000.0, y: 6_640_000.0),
            (x: 590_000.0, y: 6_640_000.0),
        ];
        let out = reproject(&square, proj);
        assert_eq!(out.exterior().0.len(), 5);
        assert_eq!(out.exterior().0.first(), out.exterior().0.last());
        for c in out.exterior().coords() {
            assert!(c.x > 9.0 && c.x < 12.0, "lon out of range: {}", c.x);
            assert!(c.y > 59.0 && c.y < 61.0, "lat out of range: {}", c.y);
        }
    }

    #[test]
    fn test_vertex_order_preserved() {
        let proj = proj_string_for_epsg(32633).unwrap();
        let square = polygon![
            (x: 590_000.0, y: 6_650_000.0),
            (x: 600_000.0, y: 6_650_000.0),
            (x: 600_000.0, y: 6_640_000.0),
            (x: 590_000.0, y: 6_640_000.0),
        ];
        let out = reproject(&square, proj);
        let coords: Vec<_> = out.exterior().coords().collect();
        // left/top then right/top: longitude increases, latitude roughly constant
        assert!(coords[1].x > coords[0].x);
        // right/bottom is south of right/top
        assert!(coords[2].y < coords[1].y);
    }

    #[test]
    fn test_unparseable_crs() {
        let err = GeometryTransformer::new("not a crs").unwrap_err();
        assert!(matches!(err, ReprojectionError::UnknownCrs { .. }));
    }
}
