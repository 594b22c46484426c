//! Raster assets: an ordered set of images treated as one raster product.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A raster asset and its ingestion state.
///
/// Either `spatial_id` points at the current spatial record, or
/// `failure_reason` explains why the image set could not be validated.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct RasterEntry {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub acquisition_date: Option<DateTime<Utc>>,
    pub instrumentation: Option<String>,

    /// Cloud coverage, 0-100.
    pub cloud_cover: Option<f64>,

    /// Human readable reason of the last failed validation.
    pub failure_reason: Option<String>,

    pub spatial_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// Request payload to create a raster asset from already registered files.
#[derive(Deserialize, Clone, Debug)]
pub struct NewRaster {
    pub name: String,
    pub description: Option<String>,
    /// Ordered image file ids.
    pub images: Vec<Uuid>,
    pub acquisition_date: Option<DateTime<Utc>>,
    pub instrumentation: Option<String>,
    pub cloud_cover: Option<f64>,
}
