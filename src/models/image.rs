//! Image-level catalog rows: source files, decoded image entries and their
//! per-band metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use uuid::Uuid;

/// A raster file registered with the catalog.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ImageFile {
    pub id: Uuid,

    /// Display name, usually the file name.
    pub name: String,

    /// Local filesystem path the decoder reads from.
    pub path: String,

    /// MD5 of the file contents at registration time.
    pub checksum: Option<String>,

    pub created_at: DateTime<Utc>,
}

/// One decodable raster file, regenerated on every ingestion of its source.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ImageEntry {
    pub id: Uuid,

    /// Source file this entry was decoded from (at most one entry per file).
    pub image_file_id: Uuid,

    pub name: String,

    /// Decoder identifier, e.g. `GTiff`.
    pub driver: String,

    pub number_of_bands: i64,
    pub width: i64,
    pub height: i64,

    /// Per-band sample type names (`uint8`, `float32`, ...).
    pub dtypes: Json<Vec<String>>,

    /// Per-band colour interpretation names.
    pub interpretations: Json<Vec<String>>,

    pub modified_at: DateTime<Utc>,
}

/// Metadata of a single band. Any field the decoders could not provide stays null.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct BandMeta {
    pub id: Uuid,
    pub parent_image_id: Uuid,

    /// Zero-based band position.
    pub band_index: i64,

    pub description: Option<String>,
    pub nodata_value: Option<f64>,
    pub dtype: Option<String>,
    pub interpretation: Option<String>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub std: Option<f64>,
}

/// A derived file (e.g. a cloud optimised copy) generated from an image entry.
/// Removed whenever the source image is re-ingested.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ConvertedImage {
    pub id: Uuid,
    pub source_image_id: Uuid,
    pub path: String,
    pub created_at: DateTime<Utc>,
}
