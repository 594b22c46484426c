//! HTTP handlers for catalog entries and their ingestion.
//! Ingestion runs to completion within the request.

use crate::{
    errors::AppError,
    models::{
        image::{BandMeta, ImageFile},
        raster::{NewRaster, RasterEntry},
        spatial::{NewGeometry, SpatialRecordView},
    },
    services::{
        AppState,
        ingest_service::{ImageIngest, RasterIngest},
    },
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use std::path::Path as FsPath;
use uuid::Uuid;

/// Body of `POST /api/image_files`.
#[derive(Debug, Deserialize)]
pub struct RegisterImageFileReq {
    /// Defaults to the file name of `path`.
    pub name: Option<String>,
    pub path: String,
}

/// `POST /api/image_files`: register a local raster file.
pub async fn register_image_file(
    State(state): State<AppState>,
    Json(req): Json<RegisterImageFileReq>,
) -> Result<(StatusCode, Json<ImageFile>), AppError> {
    let name = match req.name {
        Some(name) => name,
        None => FsPath::new(&req.path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| AppError::bad_request("path has no file name"))?,
    };
    let file = state.catalog.register_image_file(&name, &req.path).await?;
    Ok((StatusCode::CREATED, Json(file)))
}

/// `POST /api/image_files/{id}/ingest`: decode the file and (re)build its image entry.
pub async fn ingest_image_file(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ImageIngest>, AppError> {
    Ok(Json(state.ingest.populate_image_entry(id).await?))
}

/// `GET /api/image_entries/{id}/bands`
pub async fn list_bands(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<BandMeta>>, AppError> {
    Ok(Json(state.catalog.list_bands(id).await?))
}

/// `POST /api/rasters`: create a raster from registered image files.
pub async fn create_raster(
    State(state): State<AppState>,
    Json(req): Json<NewRaster>,
) -> Result<(StatusCode, Json<RasterEntry>), AppError> {
    let raster = state.catalog.create_raster(&req).await?;
    Ok((StatusCode::CREATED, Json(raster)))
}

/// `GET /api/rasters/{id}`: raster entry, including any failure reason.
pub async fn get_raster(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RasterEntry>, AppError> {
    Ok(Json(state.catalog.fetch_raster(id).await?))
}

/// `POST /api/rasters/{id}/ingest`: validate the image set and rebuild the spatial record.
pub async fn ingest_raster(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RasterIngest>, AppError> {
    Ok(Json(state.ingest.populate_raster_entry(id).await?))
}

/// `POST /api/geometries`: store a WKT or GeoJSON geometry.
pub async fn create_geometry(
    State(state): State<AppState>,
    Json(req): Json<NewGeometry>,
) -> Result<(StatusCode, Json<SpatialRecordView>), AppError> {
    let record = state.catalog.register_geometry(&req).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// `GET /api/spatial_records/{id}`
pub async fn get_spatial_record(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SpatialRecordView>, AppError> {
    Ok(Json(state.catalog.fetch_spatial_record(id).await?))
}
