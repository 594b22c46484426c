//! HTTP handlers for spatial search.
//!
//! `GET /api/geosearch[/raster|/geometry]` lists matching records;
//! the `/extent` variants return one bounding geometry instead.

use crate::{
    errors::AppError,
    geometry::codec,
    models::spatial::SpatialRecordView,
    search::{
        engine::Subview,
        params::SearchParams,
        query::SpatialQuery,
    },
    services::AppState,
};
use axum::{
    Json,
    extract::{FromRequestParts, Query, State},
    http::request::Parts,
};
use serde::Serialize;

/// `Query<SearchParams>` whose rejection carries the JSON error body.
pub struct SearchQuery(pub SearchParams);

impl<S> FromRequestParts<S> for SearchQuery
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(params) = Query::<SearchParams>::from_request_parts(parts, state).await?;
        Ok(Self(params))
    }
}

/// Extent response; both fields are null when nothing matches.
#[derive(Debug, Serialize)]
pub struct ExtentResponse {
    pub extent: Option<geojson::Geometry>,
    pub wkt: Option<String>,
}

async fn search(
    state: AppState,
    subview: Subview,
    params: SearchParams,
) -> Result<Json<Vec<SpatialRecordView>>, AppError> {
    let query = SpatialQuery::compile(&params)?;
    Ok(Json(state.search.search(subview, &query).await?))
}

async fn extent(
    state: AppState,
    subview: Subview,
    params: SearchParams,
) -> Result<Json<ExtentResponse>, AppError> {
    let query = SpatialQuery::compile(&params)?;
    let extent = state.search.extent(subview, &query).await?;
    Ok(Json(ExtentResponse {
        wkt: extent.as_ref().map(codec::polygon_to_wkt),
        extent: extent
            .as_ref()
            .map(|p| geojson::Geometry::new(geojson::Value::from(p))),
    }))
}

pub async fn search_all(
    State(state): State<AppState>,
    SearchQuery(params): SearchQuery,
) -> Result<Json<Vec<SpatialRecordView>>, AppError> {
    search(state, Subview::All, params).await
}

pub async fn search_rasters(
    State(state): State<AppState>,
    SearchQuery(params): SearchQuery,
) -> Result<Json<Vec<SpatialRecordView>>, AppError> {
    search(state, Subview::Raster, params).await
}

pub async fn search_geometries(
    State(state): State<AppState>,
    SearchQuery(params): SearchQuery,
) -> Result<Json<Vec<SpatialRecordView>>, AppError> {
    search(state, Subview::Geometry, params).await
}

pub async fn extent_all(
    State(state): State<AppState>,
    SearchQuery(params): SearchQuery,
) -> Result<Json<ExtentResponse>, AppError> {
    extent(state, Subview::All, params).await
}

pub async fn extent_rasters(
    State(state): State<AppState>,
    SearchQuery(params): SearchQuery,
) -> Result<Json<ExtentResponse>, AppError> {
    extent(state, Subview::Raster, params).await
}

pub async fn extent_geometries(
    State(state): State<AppState>,
    SearchQuery(params): SearchQuery,
) -> Result<Json<ExtentResponse>, AppError> {
    extent(state, Subview::Geometry, params).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};

    async fn extract(uri: &str) -> Result<SearchQuery, AppError> {
        let (mut parts, _) = Request::builder().uri(uri).body(()).unwrap().into_parts();
        SearchQuery::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_malformed_parameters_are_bad_requests() {
        for uri in [
            "/api/geosearch?limit=ten",
            "/api/geosearch?cloud_cover_max=cloudy",
            "/api/geosearch?acquired_after=yesterday",
        ] {
            let Err(err) = extract(uri).await else {
                panic!("{uri} was accepted");
            };
            assert_eq!(err.status, StatusCode::BAD_REQUEST, "{uri}");
            assert!(err.message.contains("query string"), "{}", err.message);
        }

        let Ok(SearchQuery(params)) =
            extract("/api/geosearch?limit=5&acquired_after=2024-01-05T00:00:00Z").await
        else {
            panic!("well formed parameters were rejected");
        };
        assert_eq!(params.limit, Some(5));
        assert!(params.acquired_after.is_some());
    }
}
