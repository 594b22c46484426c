//! The canonical spatially indexed record and its subtype details.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use uuid::Uuid;

/// Which kind of asset a spatial record describes.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum SpatialKind {
    Raster,
    Geometry,
}

/// Shared spatial fields of every catalog entry.
///
/// Both polygons are closed WKT in EPSG:4326; `footprint` never extends past
/// `outline`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct SpatialRecord {
    pub id: Uuid,
    pub kind: SpatialKind,
    pub name: String,
    pub description: Option<String>,
    pub acquisition_date: Option<DateTime<Utc>>,
    pub instrumentation: Option<String>,
    pub outline: String,
    pub footprint: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// Request payload to register a vector geometry.
#[derive(Deserialize, Clone, Debug)]
pub struct NewGeometry {
    pub name: String,
    pub description: Option<String>,
    /// WKT or GeoJSON.
    pub geometry: String,
    pub acquisition_date: Option<DateTime<Utc>>,
    pub instrumentation: Option<String>,
}

/// Subtype specific fields returned alongside a spatial record.
#[derive(Serialize, Clone, Debug)]
#[serde(tag = "datatype", rename_all = "lowercase")]
pub enum RecordDetail {
    Raster {
        raster_id: Uuid,
        crs: String,
        origin: [f64; 2],
        extent: [f64; 4],
        resolution: [f64; 2],
        transform: [f64; 6],
        num_bands: Option<i64>,
        cloud_cover: Option<f64>,
    },
    Geometry {
        geometry_id: Uuid,
        data: String,
    },
}

/// A spatial record joined with its subtype row, as listed by searches.
#[derive(Serialize, Clone, Debug)]
pub struct SpatialRecordView {
    #[serde(flatten)]
    pub record: SpatialRecord,
    #[serde(flatten)]
    pub detail: Option<RecordDetail>,
}

/// Flat row produced by the catalog join, before it is split into
/// [`SpatialRecord`] and [`RecordDetail`].
#[derive(FromRow, Debug)]
pub struct CatalogRow {
    #[sqlx(flatten)]
    pub record: SpatialRecord,
    pub raster_id: Option<Uuid>,
    pub crs: Option<String>,
    pub origin: Option<Json<[f64; 2]>>,
    pub extent: Option<Json<[f64; 4]>>,
    pub resolution_x: Option<f64>,
    pub resolution_y: Option<f64>,
    pub transform: Option<Json<[f64; 6]>>,
    pub num_bands: Option<i64>,
    pub cloud_cover: Option<f64>,
    pub geometry_id: Option<Uuid>,
    pub data: Option<String>,
}

impl CatalogRow {
    pub fn into_view(self) -> SpatialRecordView {
        let detail = match self.record.kind {
            SpatialKind::Raster => match (
                self.raster_id,
                self.crs,
                self.origin,
                self.extent,
                self.resolution_x,
                self.resolution_y,
                self.transform,
            ) {
                (Some(raster_id), Some(crs), Some(origin), Some(extent), Some(rx), Some(ry), Some(transform)) => {
                    Some(RecordDetail::Raster {
                        raster_id,
                        crs,
                        origin: origin.0,
                        extent: extent.0,
                        resolution: [rx, ry],
                        transform: transform.0,
                        num_bands: self.num_bands,
                        cloud_cover: self.cloud_cover,
                    })
                }
                _ => None,
            },
            SpatialKind::Geometry => match (self.geometry_id, self.data) {
                (Some(geometry_id), Some(data)) => Some(RecordDetail::Geometry { geometry_id, data }),
                _ => None,
            },
        };
        SpatialRecordView {
            record: self.record,
            detail,
        }
    }
}
