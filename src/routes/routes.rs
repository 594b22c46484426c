//! Defines routes for catalog management and spatial search.
//!
//! ## Structure
//! - **Catalog endpoints**
//!   - `POST /api/image_files`: register a local raster file
//!   - `POST /api/image_files/{id}/ingest`: extract image and band metadata
//!   - `GET  /api/image_entries/{id}/bands`: band metadata of an image
//!   - `POST /api/rasters`: create a raster from registered files
//!   - `GET  /api/rasters/{id}`: raster entry and failure state
//!   - `POST /api/rasters/{id}/ingest`: validate and (re)build the spatial record
//!   - `POST /api/geometries`: store a vector geometry
//!   - `GET  /api/spatial_records/{id}`: spatial record with subtype details
//!
//! - **Search endpoints**
//!   - `GET /api/geosearch[/raster|/geometry]`: matching records
//!   - `GET /api/geosearch[/raster|/geometry]/extent`: one bounding geometry

use crate::{
    handlers::{
        catalog_handlers::{
            create_geometry, create_raster, get_raster, get_spatial_record, ingest_image_file,
            ingest_raster, list_bands, register_image_file,
        },
        health_handlers::{healthz, readyz},
        search_handlers::{
            extent_all, extent_geometries, extent_rasters, search_all, search_geometries,
            search_rasters,
        },
    },
    services::AppState,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build and return the router for the catalog API.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Catalog routes
        .route("/api/image_files", post(register_image_file))
        .route("/api/image_files/{id}/ingest", post(ingest_image_file))
        .route("/api/image_entries/{id}/bands", get(list_bands))
        .route("/api/rasters", post(create_raster))
        .route("/api/rasters/{id}", get(get_raster))
        .route("/api/rasters/{id}/ingest", post(ingest_raster))
        .route("/api/geometries", post(create_geometry))
        .route("/api/spatial_records/{id}", get(get_spatial_record))
        // Search routes
        .route("/api/geosearch", get(search_all))
        .route("/api/geosearch/raster", get(search_rasters))
        .route("/api/geosearch/geometry", get(search_geometries))
        .route("/api/geosearch/extent", get(extent_all))
        .route("/api/geosearch/raster/extent", get(extent_rasters))
        .route("/api/geosearch/geometry/extent", get(extent_geometries))
}
