//! Executes compiled queries against the catalog.
//!
//! Attribute filters and the outline bounding box prefilter run in SQL over
//! the indexed `spatial_records` columns; exact topological and distance
//! predicates are refined in-process on the stored footprints.

use std::sync::Arc;

use geo::{
    BoundingRect, Closest, ClosestPoint, CoordsIter, Geometry, HaversineDistance, Intersects,
    Point, Polygon, Rect, coord,
};
use serde::Serialize;
use sqlx::{Encode, QueryBuilder, Sqlite, SqlitePool, Type};
use thiserror::Error;
use tracing::{Instrument, debug, info_span};

use super::query::{Range, SpatialQuery};
use crate::{
    geometry::codec::{self, GeometryParseError},
    models::spatial::{CatalogRow, SpatialKind, SpatialRecordView},
    services::catalog_service::{CATALOG_COLUMNS, CATALOG_FROM},
};

#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("stored geometry of record `{id}` is unreadable: {source}")]
    StoredGeometry {
        id: uuid::Uuid,
        #[source]
        source: GeometryParseError,
    },
}

/// Catalog subset a search runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Subview {
    All,
    Raster,
    Geometry,
}

impl Subview {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Raster => "raster",
            Self::Geometry => "geometry",
        }
    }

    fn kind(&self) -> Option<SpatialKind> {
        match self {
            Self::All => None,
            Self::Raster => Some(SpatialKind::Raster),
            Self::Geometry => Some(SpatialKind::Geometry),
        }
    }
}

#[derive(Clone)]
pub struct SearchEngine {
    db: Arc<SqlitePool>,
    /// Applied when a query carries no `limit`; `None` returns everything.
    default_limit: Option<u32>,
}

impl SearchEngine {
    pub fn new(db: Arc<SqlitePool>, default_limit: Option<u32>) -> Self {
        Self { db, default_limit }
    }

    /// Matching records ordered by creation time, then id.
    pub async fn search(
        &self,
        subview: Subview,
        query: &SpatialQuery,
    ) -> Result<Vec<SpatialRecordView>, SearchError> {
        let span = info_span!("search", subview = subview.as_str());
        self.search_inner(subview, query).instrument(span).await
    }

    async fn search_inner(
        &self,
        subview: Subview,
        query: &SpatialQuery,
    ) -> Result<Vec<SpatialRecordView>, SearchError> {
        let limit = query.limit.or(self.default_limit);
        let mut builder = QueryBuilder::<Sqlite>::new(CATALOG_COLUMNS);
        builder.push(CATALOG_FROM);
        push_filters(&mut builder, subview, query);
        builder.push(" ORDER BY s.created_at, s.id");

        let refine = query.needs_refinement();
        if !refine {
            // SQLite treats a negative limit as unbounded.
            builder
                .push(" LIMIT ")
                .push_bind(limit.map_or(-1, i64::from))
                .push(" OFFSET ")
                .push_bind(i64::from(query.offset));
        }

        let rows = builder
            .build_query_as::<CatalogRow>()
            .fetch_all(&*self.db)
            .await?;
        debug!(candidates = rows.len(), refine, "catalog rows fetched");

        if !refine {
            return Ok(rows.into_iter().map(CatalogRow::into_view).collect());
        }

        let mut matches = Vec::new();
        for row in rows {
            if refine_match(query, row.record.id, &row.record.footprint)? {
                matches.push(row.into_view());
            }
        }
        let page = matches
            .into_iter()
            .skip(query.offset as usize)
            .take(limit.map_or(usize::MAX, |l| l as usize))
            .collect();
        Ok(page)
    }

    /// Bounding box of the outlines of every match, ignoring pagination.
    /// `None` when nothing matches.
    pub async fn extent(
        &self,
        subview: Subview,
        query: &SpatialQuery,
    ) -> Result<Option<Polygon<f64>>, SearchError> {
        let span = info_span!("search", subview = subview.as_str(), extent = true);
        self.extent_inner(subview, query).instrument(span).await
    }

    async fn extent_inner(
        &self,
        subview: Subview,
        query: &SpatialQuery,
    ) -> Result<Option<Polygon<f64>>, SearchError> {
        if !query.needs_refinement() {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "SELECT MIN(s.min_x), MIN(s.min_y), MAX(s.max_x), MAX(s.max_y)",
            );
            builder.push(CATALOG_FROM);
            push_filters(&mut builder, subview, query);
            let (min_x, min_y, max_x, max_y) = builder
                .build_query_as::<(Option<f64>, Option<f64>, Option<f64>, Option<f64>)>()
                .fetch_one(&*self.db)
                .await?;
            return Ok(match (min_x, min_y, max_x, max_y) {
                (Some(min_x), Some(min_y), Some(max_x), Some(max_y)) => Some(
                    Rect::new(coord! { x: min_x, y: min_y }, coord! { x: max_x, y: max_y })
                        .to_polygon(),
                ),
                _ => None,
            });
        }

        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT s.id, s.outline, s.footprint");
        builder.push(CATALOG_FROM);
        push_filters(&mut builder, subview, query);
        let rows = builder
            .build_query_as::<(uuid::Uuid, String, String)>()
            .fetch_all(&*self.db)
            .await?;

        let mut extent: Option<Rect<f64>> = None;
        for (id, outline, footprint) in rows {
            if !refine_match(query, id, &footprint)? {
                continue;
            }
            let outline = codec::polygon_from_wkt(&outline)
                .map_err(|source| SearchError::StoredGeometry { id, source })?;
            if let Some(rect) = outline.bounding_rect() {
                extent = Some(match extent {
                    None => rect,
                    Some(acc) => merge(acc, rect),
                });
            }
        }
        Ok(extent.map(|r| r.to_polygon()))
    }
}

fn merge(a: Rect<f64>, b: Rect<f64>) -> Rect<f64> {
    Rect::new(
        coord! { x: a.min().x.min(b.min().x), y: a.min().y.min(b.min().y) },
        coord! { x: a.max().x.max(b.max().x), y: a.max().y.max(b.max().y) },
    )
}

/// Append the SQL-decidable filters of `query` as a `WHERE` clause.
fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, subview: Subview, query: &SpatialQuery) {
    builder.push(" WHERE 1 = 1");

    for kind in [subview.kind(), query.datatype].into_iter().flatten() {
        builder.push(" AND s.kind = ").push_bind(kind);
    }
    if let Some(instrumentation) = &query.instrumentation {
        builder
            .push(" AND s.instrumentation = ")
            .push_bind(instrumentation.clone());
    }

    push_range(builder, "s.acquisition_date", query.acquired);
    push_range(builder, "s.created_at", query.created);
    push_range(builder, "s.modified_at", query.modified);
    push_range(builder, "rm.num_bands", query.num_bands);
    push_range(builder, "rm.resolution_x", query.resolution);
    push_range(builder, "rm.resolution_y", query.resolution);
    push_range(builder, "rm.cloud_cover", query.cloud_cover);
    if query.frame_rate.is_some() {
        // No stored record kind carries a frame rate.
        builder.push(" AND 1 = 0");
    }

    if let (Some(geometry), Some(relation)) = (&query.geometry, &query.relation) {
        if relation.implies_intersection() {
            if let Some(bbox) = geometry.bounding_rect() {
                builder
                    .push(" AND s.max_x >= ")
                    .push_bind(bbox.min().x)
                    .push(" AND s.min_x <= ")
                    .push_bind(bbox.max().x)
                    .push(" AND s.max_y >= ")
                    .push_bind(bbox.min().y)
                    .push(" AND s.min_y <= ")
                    .push_bind(bbox.max().y);
            }
        }
    }
}

/// Inclusive bounds on `column`; rows where it is NULL never match.
fn push_range<'a, T>(builder: &mut QueryBuilder<'a, Sqlite>, column: &str, range: Option<Range<T>>)
where
    T: 'a + Encode<'a, Sqlite> + Type<Sqlite> + Send + Copy,
{
    let Some(range) = range else {
        return;
    };
    builder.push(format!(" AND {column} IS NOT NULL"));
    if let Some(min) = range.min {
        builder.push(format!(" AND {column} >= ")).push_bind(min);
    }
    if let Some(max) = range.max {
        builder.push(format!(" AND {column} <= ")).push_bind(max);
    }
}

/// Evaluate the geometric filters of `query` against a stored footprint.
fn refine_match(
    query: &SpatialQuery,
    id: uuid::Uuid,
    footprint: &str,
) -> Result<bool, SearchError> {
    let Some(geometry) = &query.geometry else {
        return Ok(true);
    };
    let footprint = codec::parse_wkt(footprint)
        .map_err(|source| SearchError::StoredGeometry { id, source })?;

    if let Some(relation) = &query.relation {
        if !relation.evaluate(&footprint, geometry) {
            return Ok(false);
        }
    }
    if let Some(range) = &query.distance {
        match distance_meters(&footprint, geometry) {
            Some(d) if range.contains(d) => {}
            _ => return Ok(false),
        }
    }
    Ok(true)
}

/// Great-circle distance in metres between the closest points of two
/// lon/lat geometries; zero when they intersect.
fn distance_meters(a: &Geometry<f64>, b: &Geometry<f64>) -> Option<f64> {
    if a.intersects(b) {
        return Some(0.0);
    }
    let towards = |from: &Geometry<f64>, to: &Geometry<f64>| {
        from.coords_iter()
            .filter_map(|c| {
                let origin = Point::from(c);
                match to.closest_point(&origin) {
                    Closest::SinglePoint(p) | Closest::Intersection(p) => {
                        Some(origin.haversine_distance(&p))
                    }
                    Closest::Indeterminate => None,
                }
            })
            .fold(None, |best: Option<f64>, d| Some(best.map_or(d, |b| b.min(d))))
    };
    match (towards(a, b), towards(b, a)) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, y) => x.or(y),
    }
}
