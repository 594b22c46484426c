//! src/services/catalog_service.rs
//!
//! CatalogService: durable catalog rows (image files, image entries, band
//! metadata, rasters, spatial records) backed by SQLite. Every spatial record
//! write is a single transaction covering the record and its subtype row.

use crate::{
    geometry::codec::{self, GeometryParseError},
    models::{
        image::{BandMeta, ConvertedImage, ImageEntry, ImageFile},
        raster::{NewRaster, RasterEntry},
        spatial::{CatalogRow, NewGeometry, SpatialKind, SpatialRecordView},
    },
    raster::validate::ValidatedRaster,
};
use chrono::Utc;
use geo::{BoundingRect, ConvexHull, Polygon};
use md5::Context;
use sqlx::{QueryBuilder, Sqlite, SqlitePool, Transaction, types::Json};
use std::{io, path::Path, sync::Arc};
use thiserror::Error;
use tokio::{fs::File, io::AsyncReadExt};
use tracing::debug;
use uuid::Uuid;

/// Columns of the catalog view: a spatial record with its raster or
/// geometry row joined in.
pub(crate) const CATALOG_COLUMNS: &str = "SELECT s.id, s.kind, s.name, s.description, \
     s.acquisition_date, s.instrumentation, s.outline, s.footprint, s.created_at, s.modified_at, \
     rm.raster_id, rm.crs, rm.origin, rm.extent, rm.resolution_x, rm.resolution_y, rm.transform, \
     rm.num_bands, rm.cloud_cover, g.id AS geometry_id, g.data";

/// Source of the catalog view; consumers append `WHERE` clauses.
pub(crate) const CATALOG_FROM: &str = " FROM spatial_records s \
     LEFT JOIN raster_meta rm ON rm.spatial_id = s.id \
     LEFT JOIN geometry_entries g ON g.spatial_id = s.id";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("image file `{0}` not found")]
    ImageFileNotFound(Uuid),
    #[error("image entry `{0}` not found")]
    ImageEntryNotFound(Uuid),
    #[error("raster `{0}` not found")]
    RasterNotFound(Uuid),
    #[error("spatial record `{0}` not found")]
    SpatialRecordNotFound(Uuid),
    #[error("raster `{0}` must reference at least one image")]
    EmptyRaster(String),
    #[error("cloud cover {0} is outside 0..=100")]
    InvalidCloudCover(f64),
    #[error(transparent)]
    Geometry(#[from] GeometryParseError),
    #[error("geometry has no extent")]
    EmptyGeometry,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// Fields of a freshly decoded image, before it is persisted.
#[derive(Debug, Clone)]
pub struct NewImageEntry {
    pub name: String,
    pub driver: String,
    pub number_of_bands: i64,
    pub width: i64,
    pub height: i64,
    pub dtypes: Vec<String>,
    pub interpretations: Vec<String>,
}

/// Fields of one band, before it is persisted. Missing values stay `None`.
#[derive(Debug, Clone, Default)]
pub struct NewBandMeta {
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

/// Persistence layer of the catalog.
#[derive(Clone)]
pub struct CatalogService {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl CatalogService {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Register a local raster file, computing its MD5 checksum.
    ///
    /// Registering an already known path refreshes its name and checksum and
    /// keeps the original id.
    pub async fn register_image_file(
        &self,
        name: &str,
        path: impl AsRef<Path>,
    ) -> CatalogResult<ImageFile> {
        let path = path.as_ref();
        let checksum = file_checksum(path).await?;
        let path_str = path.to_string_lossy().into_owned();

        let file = sqlx::query_as::<_, ImageFile>(
            r#"
            INSERT INTO image_files (id, name, path, checksum, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                name = excluded.name,
                checksum = excluded.checksum
            RETURNING id, name, path, checksum, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(&path_str)
        .bind(&checksum)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await?;

        debug!(id = %file.id, path = %path_str, %checksum, "registered image file");
        Ok(file)
    }

    pub async fn fetch_image_file(&self, id: Uuid) -> CatalogResult<ImageFile> {
        sqlx::query_as::<_, ImageFile>(
            "SELECT id, name, path, checksum, created_at FROM image_files WHERE id = ?",
        )
        .bind(id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => CatalogError::ImageFileNotFound(id),
            other => CatalogError::Sqlx(other),
        })
    }

    pub async fn fetch_image_entry(&self, id: Uuid) -> CatalogResult<ImageEntry> {
        sqlx::query_as::<_, ImageEntry>(
            "SELECT id, image_file_id, name, driver, number_of_bands, width, height,
                    dtypes, interpretations, modified_at
             FROM image_entries WHERE id = ?",
        )
        .bind(id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => CatalogError::ImageEntryNotFound(id),
            other => CatalogError::Sqlx(other),
        })
    }

    /// Band metadata of an image entry, ordered by band index.
    pub async fn list_bands(&self, image_entry_id: Uuid) -> CatalogResult<Vec<BandMeta>> {
        self.fetch_image_entry(image_entry_id).await?;
        let bands = sqlx::query_as::<_, BandMeta>(
            "SELECT id, parent_image_id, band_index, description, nodata_value, dtype,
                    interpretation, min, max, mean, std
             FROM band_meta WHERE parent_image_id = ? ORDER BY band_index",
        )
        .bind(image_entry_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(bands)
    }

    /// Create or replace the image entry of `image_file_id`.
    ///
    /// Previous band metadata and converted artifacts are deleted and the
    /// bands regenerated; nothing of the previous run is merged. Converted
    /// files on disk are removed after commit, best-effort.
    pub async fn replace_image_entry(
        &self,
        image_file_id: Uuid,
        entry: &NewImageEntry,
        bands: &[NewBandMeta],
    ) -> CatalogResult<(ImageEntry, Vec<BandMeta>)> {
        let mut tx = self.db.begin().await?;

        let previous: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM image_entries WHERE image_file_id = ?")
                .bind(image_file_id)
                .fetch_optional(&mut *tx)
                .await?;

        let mut stale = Vec::new();
        if let Some(previous) = previous {
            stale = sqlx::query_as::<_, ConvertedImage>(
                "DELETE FROM converted_images WHERE source_image_id = ?
                 RETURNING id, source_image_id, path, created_at",
            )
            .bind(previous)
            .fetch_all(&mut *tx)
            .await?;
            sqlx::query("DELETE FROM band_meta WHERE parent_image_id = ?")
                .bind(previous)
                .execute(&mut *tx)
                .await?;
        }

        let image = sqlx::query_as::<_, ImageEntry>(
            r#"
            INSERT INTO image_entries (
                id, image_file_id, name, driver, number_of_bands, width, height,
                dtypes, interpretations, modified_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(image_file_id) DO UPDATE SET
                name = excluded.name,
                driver = excluded.driver,
                number_of_bands = excluded.number_of_bands,
                width = excluded.width,
                height = excluded.height,
                dtypes = excluded.dtypes,
                interpretations = excluded.interpretations,
                modified_at = excluded.modified_at
            RETURNING id, image_file_id, name, driver, number_of_bands, width, height,
                      dtypes, interpretations, modified_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(image_file_id)
        .bind(&entry.name)
        .bind(&entry.driver)
        .bind(entry.number_of_bands)
        .bind(entry.width)
        .bind(entry.height)
        .bind(Json(&entry.dtypes))
        .bind(Json(&entry.interpretations))
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        let mut stored = Vec::with_capacity(bands.len());
        for band in bands {
            let row = BandMeta {
                id: Uuid::new_v4(),
                parent_image_id: image.id,
                band_index: band.band_index,
                description: band.description.clone(),
                nodata_value: band.nodata_value,
                dtype: band.dtype.clone(),
                interpretation: band.interpretation.clone(),
                min: band.min,
                max: band.max,
                mean: band.mean,
                std: band.std,
            };
            sqlx::query(
                "INSERT INTO band_meta (
                    id, parent_image_id, band_index, description, nodata_value, dtype,
                    interpretation, min, max, mean, std
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(row.id)
            .bind(row.parent_image_id)
            .bind(row.band_index)
            .bind(&row.description)
            .bind(row.nodata_value)
            .bind(&row.dtype)
            .bind(&row.interpretation)
            .bind(row.min)
            .bind(row.max)
            .bind(row.mean)
            .bind(row.std)
            .execute(&mut *tx)
            .await?;
            stored.push(row);
        }

        tx.commit().await?;

        for converted in stale {
            if let Err(err) = tokio::fs::remove_file(&converted.path).await {
                if err.kind() != io::ErrorKind::NotFound {
                    debug!(
                        "failed to remove converted image {} ({}): {}",
                        converted.id, converted.path, err
                    );
                }
            }
        }

        Ok((image, stored))
    }

    /// Create a raster asset over already registered image files, in order.
    pub async fn create_raster(&self, new: &NewRaster) -> CatalogResult<RasterEntry> {
        if new.images.is_empty() {
            return Err(CatalogError::EmptyRaster(new.name.clone()));
        }
        if let Some(cover) = new.cloud_cover {
            if !(0.0..=100.0).contains(&cover) {
                return Err(CatalogError::InvalidCloudCover(cover));
            }
        }

        let mut tx = self.db.begin().await?;
        for image in &new.images {
            let known: Option<Uuid> = sqlx::query_scalar("SELECT id FROM image_files WHERE id = ?")
                .bind(image)
                .fetch_optional(&mut *tx)
                .await?;
            if known.is_none() {
                return Err(CatalogError::ImageFileNotFound(*image));
            }
        }

        let now = Utc::now();
        let raster = sqlx::query_as::<_, RasterEntry>(
            r#"
            INSERT INTO raster_entries (
                id, name, description, acquisition_date, instrumentation, cloud_cover,
                failure_reason, spatial_id, created_at, modified_at
            ) VALUES (?, ?, ?, ?, ?, ?, NULL, NULL, ?, ?)
            RETURNING id, name, description, acquisition_date, instrumentation, cloud_cover,
                      failure_reason, spatial_id, created_at, modified_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&new.name)
        .bind(&new.description)
        .bind(new.acquisition_date)
        .bind(&new.instrumentation)
        .bind(new.cloud_cover)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        let mut builder =
            QueryBuilder::<Sqlite>::new("INSERT INTO raster_images (raster_id, image_id, position) ");
        builder.push_values(new.images.iter().enumerate(), |mut row, (position, image)| {
            row.push_bind(raster.id)
                .push_bind(*image)
                .push_bind(position as i64);
        });
        builder.build().execute(&mut *tx).await?;

        tx.commit().await?;
        Ok(raster)
    }

    pub async fn fetch_raster(&self, id: Uuid) -> CatalogResult<RasterEntry> {
        sqlx::query_as::<_, RasterEntry>(
            "SELECT id, name, description, acquisition_date, instrumentation, cloud_cover,
                    failure_reason, spatial_id, created_at, modified_at
             FROM raster_entries WHERE id = ?",
        )
        .bind(id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => CatalogError::RasterNotFound(id),
            other => CatalogError::Sqlx(other),
        })
    }

    /// Member image files of a raster, in raster order.
    pub async fn raster_images(&self, raster_id: Uuid) -> CatalogResult<Vec<ImageFile>> {
        let files = sqlx::query_as::<_, ImageFile>(
            "SELECT f.id, f.name, f.path, f.checksum, f.created_at
             FROM raster_images ri JOIN image_files f ON f.id = ri.image_id
             WHERE ri.raster_id = ? ORDER BY ri.position",
        )
        .bind(raster_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(files)
    }

    /// Mark a raster as failed and drop the spatial record of any earlier
    /// successful run, so the raster disappears from searches.
    pub async fn record_raster_failure(
        &self,
        raster_id: Uuid,
        reason: &str,
    ) -> CatalogResult<RasterEntry> {
        let mut tx = self.db.begin().await?;
        drop_raster_record(&mut tx, raster_id).await?;

        let raster = sqlx::query_as::<_, RasterEntry>(
            r#"
            UPDATE raster_entries
            SET failure_reason = ?, spatial_id = NULL, modified_at = ?
            WHERE id = ?
            RETURNING id, name, description, acquisition_date, instrumentation, cloud_cover,
                      failure_reason, spatial_id, created_at, modified_at
            "#,
        )
        .bind(reason)
        .bind(Utc::now())
        .bind(raster_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => CatalogError::RasterNotFound(raster_id),
            other => CatalogError::Sqlx(other),
        })?;

        tx.commit().await?;
        Ok(raster)
    }

    /// Replace the raster's spatial record with one built from `validated`.
    ///
    /// Record, raster fields and the raster's pointer to them are written in
    /// one transaction. `num_bands` is the sum of the member images' bands.
    pub async fn store_raster_record(
        &self,
        raster_id: Uuid,
        validated: &ValidatedRaster,
    ) -> CatalogResult<SpatialRecordView> {
        let mut tx = self.db.begin().await?;

        let raster = sqlx::query_as::<_, RasterEntry>(
            "SELECT id, name, description, acquisition_date, instrumentation, cloud_cover,
                    failure_reason, spatial_id, created_at, modified_at
             FROM raster_entries WHERE id = ?",
        )
        .bind(raster_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => CatalogError::RasterNotFound(raster_id),
            other => CatalogError::Sqlx(other),
        })?;

        drop_raster_record(&mut tx, raster_id).await?;

        let num_bands: Option<i64> = sqlx::query_scalar(
            "SELECT SUM(e.number_of_bands)
             FROM raster_images ri JOIN image_entries e ON e.image_file_id = ri.image_id
             WHERE ri.raster_id = ?",
        )
        .bind(raster_id)
        .fetch_one(&mut *tx)
        .await?;

        let spatial_id = insert_spatial_record(
            &mut tx,
            SpatialKind::Raster,
            &SpatialFields {
                name: &raster.name,
                description: raster.description.as_deref(),
                acquisition_date: raster.acquisition_date,
                instrumentation: raster.instrumentation.as_deref(),
            },
            &validated.outline,
            &validated.footprint,
        )
        .await?;

        sqlx::query(
            "INSERT INTO raster_meta (
                spatial_id, raster_id, crs, origin, extent, resolution_x, resolution_y,
                transform, num_bands, cloud_cover
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(spatial_id)
        .bind(raster_id)
        .bind(&validated.crs)
        .bind(Json(validated.origin))
        .bind(Json(validated.extent))
        .bind(validated.resolution[0])
        .bind(validated.resolution[1])
        .bind(Json(validated.transform))
        .bind(num_bands)
        .bind(raster.cloud_cover)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE raster_entries SET spatial_id = ?, failure_reason = NULL, modified_at = ?
             WHERE id = ?",
        )
        .bind(spatial_id)
        .bind(Utc::now())
        .bind(raster_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        self.fetch_spatial_record(spatial_id).await
    }

    /// Store a vector geometry given as WKT or GeoJSON.
    ///
    /// The footprint is the convex hull of the data, the outline its
    /// bounding rectangle.
    pub async fn register_geometry(&self, new: &NewGeometry) -> CatalogResult<SpatialRecordView> {
        let geometry = codec::parse_geometry(&new.geometry)?;
        let rect = geometry.bounding_rect().ok_or(CatalogError::EmptyGeometry)?;
        let outline = rect.to_polygon();
        let footprint = geometry.convex_hull();

        let mut tx = self.db.begin().await?;
        let spatial_id = insert_spatial_record(
            &mut tx,
            SpatialKind::Geometry,
            &SpatialFields {
                name: &new.name,
                description: new.description.as_deref(),
                acquisition_date: new.acquisition_date,
                instrumentation: new.instrumentation.as_deref(),
            },
            &outline,
            &footprint,
        )
        .await?;

        sqlx::query("INSERT INTO geometry_entries (id, spatial_id, data) VALUES (?, ?, ?)")
            .bind(Uuid::new_v4())
            .bind(spatial_id)
            .bind(codec::geometry_to_wkt(&geometry))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!(id = %spatial_id, kind = codec::geometry_type_name(&geometry), "registered geometry");
        self.fetch_spatial_record(spatial_id).await
    }

    /// A spatial record with its raster or geometry details.
    pub async fn fetch_spatial_record(&self, id: Uuid) -> CatalogResult<SpatialRecordView> {
        let mut builder = QueryBuilder::<Sqlite>::new(CATALOG_COLUMNS);
        builder.push(CATALOG_FROM).push(" WHERE s.id = ").push_bind(id);
        builder
            .build_query_as::<CatalogRow>()
            .fetch_one(&*self.db)
            .await
            .map(CatalogRow::into_view)
            .map_err(|err| match err {
                sqlx::Error::RowNotFound => CatalogError::SpatialRecordNotFound(id),
                other => CatalogError::Sqlx(other),
            })
    }
}

struct SpatialFields<'a> {
    name: &'a str,
    description: Option<&'a str>,
    acquisition_date: Option<chrono::DateTime<Utc>>,
    instrumentation: Option<&'a str>,
}

async fn insert_spatial_record(
    tx: &mut Transaction<'_, Sqlite>,
    kind: SpatialKind,
    fields: &SpatialFields<'_>,
    outline: &Polygon<f64>,
    footprint: &Polygon<f64>,
) -> CatalogResult<Uuid> {
    let bbox = outline.bounding_rect().ok_or(CatalogError::EmptyGeometry)?;
    let id = Uuid::new_v4();
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO spatial_records (
            id, kind, name, description, acquisition_date, instrumentation,
            outline, footprint, min_x, min_y, max_x, max_y, created_at, modified_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(kind)
    .bind(fields.name)
    .bind(fields.description)
    .bind(fields.acquisition_date)
    .bind(fields.instrumentation)
    .bind(codec::polygon_to_wkt(outline))
    .bind(codec::polygon_to_wkt(footprint))
    .bind(bbox.min().x)
    .bind(bbox.min().y)
    .bind(bbox.max().x)
    .bind(bbox.max().y)
    .bind(now)
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(id)
}

/// Delete the spatial record currently attached to a raster, if any.
async fn drop_raster_record(
    tx: &mut Transaction<'_, Sqlite>,
    raster_id: Uuid,
) -> CatalogResult<()> {
    let current: Option<Option<Uuid>> =
        sqlx::query_scalar("SELECT spatial_id FROM raster_entries WHERE id = ?")
            .bind(raster_id)
            .fetch_optional(&mut **tx)
            .await?;
    if let Some(Some(spatial_id)) = current {
        sqlx::query("DELETE FROM spatial_records WHERE id = ?")
            .bind(spatial_id)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

/// Streaming MD5 of a file.
async fn file_checksum(path: &Path) -> io::Result<String> {
    let mut file = File::open(path).await?;
    let mut digest = Context::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        digest.consume(&buf[..n]);
    }
    Ok(format!("{:x}", digest.compute()))
}
