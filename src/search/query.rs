//! Compiled search queries.
//!
//! [`SpatialQuery::compile`] validates [`SearchParams`] once; the engine only
//! ever sees well-formed filters.

use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use geo::{Geometry, Relate, relate::IntersectionMatrix};
use thiserror::Error;

use super::params::SearchParams;
use crate::{
    geometry::codec::{self, GeometryParseError},
    models::spatial::SpatialKind,
};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid query geometry: {0}")]
    Geometry(#[from] GeometryParseError),
    #[error("unknown predicate `{0}`")]
    UnknownPredicate(String),
    #[error("relates pattern `{0}` must be exactly 9 characters from T, F, *, 0, 1, 2")]
    InvalidPattern(String),
    #[error("`predicate` and `relates` cannot be combined")]
    ConflictingRelation,
    #[error("`{0}` requires a query geometry `q`")]
    MissingGeometry(&'static str),
    #[error("invalid `{field}` range: min {min} is greater than max {max}")]
    InvalidRange {
        field: &'static str,
        min: String,
        max: String,
    },
    #[error("`{0}` must not be negative")]
    Negative(&'static str),
    #[error("unknown datatype `{0}`, expected `raster` or `geometry`")]
    UnknownDatatype(String),
}

/// Named topological predicates, evaluated as `predicate(catalog, query)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    Intersects,
    Contains,
    Within,
    Crosses,
    Overlaps,
    Touches,
    Disjoint,
    Equals,
    Covers,
    CoveredBy,
}

impl FromStr for Predicate {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "intersects" => Self::Intersects,
            "contains" => Self::Contains,
            "within" => Self::Within,
            "crosses" => Self::Crosses,
            "overlaps" => Self::Overlaps,
            "touches" => Self::Touches,
            "disjoint" => Self::Disjoint,
            "equals" => Self::Equals,
            "covers" => Self::Covers,
            "coveredby" | "covered_by" => Self::CoveredBy,
            _ => return Err(QueryError::UnknownPredicate(s.to_string())),
        })
    }
}

impl Predicate {
    pub fn evaluate(&self, matrix: &IntersectionMatrix) -> bool {
        match self {
            Self::Intersects => matrix.is_intersects(),
            Self::Contains => matrix.is_contains(),
            Self::Within => matrix.is_within(),
            Self::Crosses => matrix.is_crosses(),
            Self::Overlaps => matrix.is_overlaps(),
            Self::Touches => matrix.is_touches(),
            Self::Disjoint => matrix.is_disjoint(),
            Self::Equals => matrix.is_equal_topo(),
            Self::Covers => matrix.is_covers(),
            Self::CoveredBy => matrix.is_coveredby(),
        }
    }
}

/// A validated 9-character DE-9IM pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct De9im(String);

impl De9im {
    pub fn parse(pattern: &str) -> Result<Self, QueryError> {
        let valid = pattern.chars().count() == 9
            && pattern
                .chars()
                .all(|c| matches!(c, 'T' | 'F' | '*' | '0' | '1' | '2' | 't' | 'f'));
        if !valid {
            return Err(QueryError::InvalidPattern(pattern.to_string()));
        }
        Ok(Self(pattern.to_ascii_uppercase()))
    }

    pub fn evaluate(&self, matrix: &IntersectionMatrix) -> bool {
        matrix.matches(&self.0).unwrap_or(false)
    }

    /// True when every match must share at least one point with the query:
    /// one of the interior/boundary cells demands a non-empty intersection.
    fn requires_intersection(&self) -> bool {
        self.0
            .char_indices()
            .filter(|(i, _)| matches!(i, 0 | 1 | 3 | 4))
            .any(|(_, c)| c != 'F' && c != '*')
    }
}

/// How catalog footprints must relate to the query geometry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relation {
    Named(Predicate),
    Pattern(De9im),
}

impl Relation {
    pub fn evaluate(&self, catalog: &Geometry<f64>, query: &Geometry<f64>) -> bool {
        let matrix = catalog.relate(query);
        match self {
            Self::Named(predicate) => predicate.evaluate(&matrix),
            Self::Pattern(pattern) => pattern.evaluate(&matrix),
        }
    }

    /// Whether a match implies intersecting bounding boxes, which lets the
    /// bounding box index prefilter candidates.
    pub fn implies_intersection(&self) -> bool {
        match self {
            Self::Named(predicate) => *predicate != Predicate::Disjoint,
            Self::Pattern(pattern) => pattern.requires_intersection(),
        }
    }
}

/// Inclusive range; either bound may be open.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range<T> {
    pub min: Option<T>,
    pub max: Option<T>,
}

impl<T: PartialOrd + Display + Copy> Range<T> {
    /// `None` when neither bound is given.
    pub fn new(
        field: &'static str,
        min: Option<T>,
        max: Option<T>,
    ) -> Result<Option<Self>, QueryError> {
        if let (Some(lo), Some(hi)) = (min, max) {
            if lo > hi {
                return Err(QueryError::InvalidRange {
                    field,
                    min: lo.to_string(),
                    max: hi.to_string(),
                });
            }
        }
        if min.is_none() && max.is_none() {
            return Ok(None);
        }
        Ok(Some(Self { min, max }))
    }

    pub fn contains(&self, value: T) -> bool {
        self.min.is_none_or(|lo| value >= lo) && self.max.is_none_or(|hi| value <= hi)
    }
}

/// A validated search over the catalog.
#[derive(Debug, Clone)]
pub struct SpatialQuery {
    pub geometry: Option<Geometry<f64>>,
    pub relation: Option<Relation>,
    /// Metres from the query geometry.
    pub distance: Option<Range<f64>>,
    pub acquired: Option<Range<DateTime<Utc>>>,
    pub created: Option<Range<DateTime<Utc>>>,
    pub modified: Option<Range<DateTime<Utc>>>,
    pub datatype: Option<SpatialKind>,
    pub instrumentation: Option<String>,
    pub num_bands: Option<Range<i64>>,
    pub resolution: Option<Range<f64>>,
    pub cloud_cover: Option<Range<f64>>,
    pub frame_rate: Option<Range<f64>>,
    pub limit: Option<u32>,
    pub offset: u32,
}

impl SpatialQuery {
    /// Validate and normalise wire parameters.
    ///
    /// A query geometry without `predicate`, `relates` or distance bounds
    /// selects records intersecting it.
    pub fn compile(params: &SearchParams) -> Result<Self, QueryError> {
        let geometry = params
            .q
            .as_deref()
            .filter(|q| !q.trim().is_empty())
            .map(codec::parse_geometry)
            .transpose()?;

        let relation = match (params.predicate.as_deref(), params.relates.as_deref()) {
            (Some(_), Some(_)) => return Err(QueryError::ConflictingRelation),
            (Some(name), None) => Some(Relation::Named(name.parse()?)),
            (None, Some(pattern)) => Some(Relation::Pattern(De9im::parse(pattern)?)),
            (None, None) => None,
        };

        for (field, value) in [
            ("distance_min", params.distance_min),
            ("distance_max", params.distance_max),
        ] {
            if value.is_some_and(|v| v < 0.0) {
                return Err(QueryError::Negative(field));
            }
        }
        let distance = Range::new("distance", params.distance_min, params.distance_max)?;

        if geometry.is_none() {
            if relation.is_some() {
                let field = if params.relates.is_some() { "relates" } else { "predicate" };
                return Err(QueryError::MissingGeometry(field));
            }
            if distance.is_some() {
                return Err(QueryError::MissingGeometry("distance"));
            }
        }
        let relation = match relation {
            None if geometry.is_some() && distance.is_none() => {
                Some(Relation::Named(Predicate::Intersects))
            }
            other => other,
        };

        let datatype = params
            .datatype
            .as_deref()
            .map(|d| match d.to_ascii_lowercase().as_str() {
                "raster" => Ok(SpatialKind::Raster),
                "geometry" => Ok(SpatialKind::Geometry),
                _ => Err(QueryError::UnknownDatatype(d.to_string())),
            })
            .transpose()?;

        Ok(Self {
            geometry,
            relation,
            distance,
            acquired: Range::new("acquired", params.acquired_after, params.acquired_before)?,
            created: Range::new("created", params.created_after, params.created_before)?,
            modified: Range::new("modified", params.modified_after, params.modified_before)?,
            datatype,
            instrumentation: params.instrumentation.clone(),
            num_bands: Range::new("num_bands", params.num_bands_min, params.num_bands_max)?,
            resolution: Range::new("resolution", params.resolution_min, params.resolution_max)?,
            cloud_cover: Range::new(
                "cloud_cover",
                params.cloud_cover_min,
                params.cloud_cover_max,
            )?,
            frame_rate: Range::new("frame_rate", params.frame_rate_min, params.frame_rate_max)?,
            limit: params.limit,
            offset: params.offset.unwrap_or(0),
        })
    }

    /// Whether matches need geometric refinement beyond what SQL can decide.
    pub fn needs_refinement(&self) -> bool {
        self.geometry.is_some() && (self.relation.is_some() || self.distance.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Point, polygon};

    fn params() -> SearchParams {
        SearchParams::default()
    }

    #[test]
    fn test_relates_must_be_nine_characters() {
        let short = SearchParams {
            q: Some("POINT(0 0)".into()),
            relates: Some("T*F**F**".into()),
            ..params()
        };
        assert!(matches!(
            SpatialQuery::compile(&short),
            Err(QueryError::InvalidPattern(_))
        ));

        let long = SearchParams {
            relates: Some("T*F**F***F".into()),
            ..short.clone()
        };
        assert!(matches!(
            SpatialQuery::compile(&long),
            Err(QueryError::InvalidPattern(_))
        ));

        let alphabet = SearchParams {
            relates: Some("T*F**F*X*".into()),
            ..short.clone()
        };
        assert!(SpatialQuery::compile(&alphabet).is_err());

        let ok = SearchParams {
            relates: Some("T*F**F***".into()),
            ..short
        };
        let query = SpatialQuery::compile(&ok).unwrap();
        assert!(matches!(query.relation, Some(Relation::Pattern(_))));
    }

    #[test]
    fn test_range_bounds_are_inclusive_and_open() {
        let upper = Range::new("num_bands", None, Some(5)).unwrap().unwrap();
        assert!(upper.contains(5) && upper.contains(-3) && !upper.contains(6));

        let lower = Range::new("num_bands", Some(2), None).unwrap().unwrap();
        assert!(lower.contains(2) && lower.contains(100) && !lower.contains(1));

        let both = Range::new("num_bands", Some(2), Some(5)).unwrap().unwrap();
        assert!(both.contains(2) && both.contains(5) && !both.contains(6) && !both.contains(1));

        assert!(Range::<i64>::new("num_bands", None, None).unwrap().is_none());
    }

    #[test]
    fn test_inverted_range_is_rejected() {
        let bad = SearchParams {
            cloud_cover_min: Some(50.0),
            cloud_cover_max: Some(10.0),
            ..params()
        };
        match SpatialQuery::compile(&bad) {
            Err(QueryError::InvalidRange { field, .. }) => assert_eq!(field, "cloud_cover"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_geometry_defaults_to_intersects() {
        let query = SpatialQuery::compile(&SearchParams {
            q: Some(r#"{"type":"Point","coordinates":[1.0,2.0]}"#.into()),
            ..params()
        })
        .unwrap();
        assert_eq!(query.relation, Some(Relation::Named(Predicate::Intersects)));
        assert!(query.needs_refinement());

        let near = SpatialQuery::compile(&SearchParams {
            q: Some("POINT(1 2)".into()),
            distance_max: Some(1000.0),
            ..params()
        })
        .unwrap();
        assert!(near.relation.is_none());
    }

    #[test]
    fn test_filters_without_geometry_are_rejected() {
        for bad in [
            SearchParams { predicate: Some("within".into()), ..params() },
            SearchParams { distance_max: Some(10.0), ..params() },
        ] {
            assert!(matches!(
                SpatialQuery::compile(&bad),
                Err(QueryError::MissingGeometry(_))
            ));
        }
        assert!(matches!(
            SpatialQuery::compile(&SearchParams { q: Some("POLYGON((0 0".into()), ..params() }),
            Err(QueryError::Geometry(_))
        ));
        assert!(matches!(
            SpatialQuery::compile(&SearchParams { datatype: Some("video".into()), ..params() }),
            Err(QueryError::UnknownDatatype(_))
        ));
        assert!(matches!(
            SpatialQuery::compile(&SearchParams { predicate: Some("near".into()), q: Some("POINT(0 0)".into()), ..params() }),
            Err(QueryError::UnknownPredicate(_))
        ));
    }

    #[test]
    fn test_relations_evaluate_catalog_against_query() {
        let footprint: Geometry<f64> = polygon![
            (x: 0.0, y: 0.0), (x: 4.0, y: 0.0), (x: 4.0, y: 4.0), (x: 0.0, y: 4.0), (x: 0.0, y: 0.0)
        ]
        .into();
        let inside: Geometry<f64> = Point::new(1.0, 1.0).into();
        let outside: Geometry<f64> = Point::new(9.0, 9.0).into();

        let contains = Relation::Named(Predicate::Contains);
        assert!(contains.evaluate(&footprint, &inside));
        assert!(!contains.evaluate(&footprint, &outside));
        assert!(Relation::Named(Predicate::Disjoint).evaluate(&footprint, &outside));
        assert!(!Relation::Named(Predicate::Disjoint).implies_intersection());

        let pattern = Relation::Pattern(De9im::parse("T*****FF*").unwrap());
        assert!(pattern.evaluate(&footprint, &inside));
        assert!(pattern.implies_intersection());
        assert!(!Relation::Pattern(De9im::parse("FF*FF****").unwrap()).implies_intersection());
    }
}
