//! WKT / GeoJSON text <-> `geo` conversions.
//!
//! The catalog persists geometries as WKT. Callers may hand us either form;
//! GeoJSON is normalised to WKT before it goes anywhere else.

use geo::{Geometry, Polygon};
use geojson::GeoJson;
use thiserror::Error;
use wkt::{ToWkt, TryFromWkt};

#[derive(Debug, Error)]
pub enum GeometryParseError {
    #[error("invalid WKT: {0}")]
    Wkt(String),
    #[error("invalid GeoJSON: {0}")]
    GeoJson(String),
    #[error("expected a {expected}, found {found}")]
    WrongType {
        expected: &'static str,
        found: &'static str,
    },
}

/// Parse a geometry given as WKT or as a GeoJSON geometry/feature document.
pub fn parse_geometry(text: &str) -> Result<Geometry<f64>, GeometryParseError> {
    let trimmed = text.trim();
    if trimmed.starts_with('{') {
        let wkt = geojson_to_wkt(trimmed)?;
        return parse_wkt(&wkt);
    }
    parse_wkt(trimmed)
}

/// Parse a WKT string into a `geo` geometry.
pub fn parse_wkt(text: &str) -> Result<Geometry<f64>, GeometryParseError> {
    Geometry::<f64>::try_from_wkt_str(text).map_err(|e| GeometryParseError::Wkt(e.to_string()))
}

/// Normalise a GeoJSON geometry (or a feature carrying one) to WKT.
pub fn geojson_to_wkt(text: &str) -> Result<String, GeometryParseError> {
    let document: GeoJson = text
        .parse()
        .map_err(|e: geojson::Error| GeometryParseError::GeoJson(e.to_string()))?;

    let geometry = match document {
        GeoJson::Geometry(geometry) => geometry,
        GeoJson::Feature(feature) => feature.geometry.ok_or_else(|| {
            GeometryParseError::GeoJson("feature has no geometry".into())
        })?,
        GeoJson::FeatureCollection(_) => {
            return Err(GeometryParseError::GeoJson(
                "feature collections are not accepted as a single geometry".into(),
            ));
        }
    };

    let geometry = Geometry::<f64>::try_from(geometry)
        .map_err(|e| GeometryParseError::GeoJson(e.to_string()))?;
    Ok(geometry.wkt_string())
}

/// Parse a stored polygon column.
pub fn polygon_from_wkt(text: &str) -> Result<Polygon<f64>, GeometryParseError> {
    match parse_wkt(text)? {
        Geometry::Polygon(polygon) => Ok(polygon),
        other => Err(GeometryParseError::WrongType {
            expected: "Polygon",
            found: geometry_type_name(&other),
        }),
    }
}

pub fn polygon_to_wkt(polygon: &Polygon<f64>) -> String {
    polygon.wkt_string()
}

pub fn geometry_to_wkt(geometry: &Geometry<f64>) -> String {
    geometry.wkt_string()
}

pub fn geometry_type_name(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_point_wkt() {
        let geom = parse_geometry("POINT(10 20)").unwrap();
        assert!(matches!(geom, Geometry::Point(p) if p.x() == 10.0 && p.y() == 20.0));
    }

    #[test]
    fn test_geojson_is_normalised() {
        let json = r#"{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,1],[0,0]]]}"#;
        let wkt = geojson_to_wkt(json).unwrap();
        assert!(wkt.starts_with("POLYGON"), "{wkt}");
        let geom = parse_geometry(json).unwrap();
        assert!(matches!(geom, Geometry::Polygon(_)));
    }

    #[test]
    fn test_feature_geometry_accepted() {
        let json = r#"{"type":"Feature","properties":{},"geometry":{"type":"Point","coordinates":[1.5,2.5]}}"#;
        let geom = parse_geometry(json).unwrap();
        assert!(matches!(geom, Geometry::Point(_)));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(parse_geometry("POINT(").is_err());
        assert!(parse_geometry("{\"type\": \"Nope\"}").is_err());
    }

    #[test]
    fn test_polygon_roundtrip_through_column() {
        let wkt = "POLYGON((0 0,2 0,2 2,0 2,0 0))";
        let polygon = polygon_from_wkt(wkt).unwrap();
        let back = polygon_from_wkt(&polygon_to_wkt(&polygon)).unwrap();
        assert_eq!(polygon, back);
        assert!(matches!(
            polygon_from_wkt("POINT(1 1)"),
            Err(GeometryParseError::WrongType { .. })
        ));
    }
}
