//! src/services/ingest_service.rs
//!
//! IngestService drives metadata extraction for images and validation of
//! raster image sets, persisting the results through `CatalogService`.
//! Decoding and hull computation run on the blocking thread pool.

use crate::{
    geometry::transform::ReprojectionError,
    models::{
        image::{BandMeta, ImageEntry},
        raster::RasterEntry,
        spatial::SpatialRecordView,
    },
    raster::{
        reader::{DecodeError, MAX_LOAD_SHAPE, RasterDataset},
        statistics::{BandSummary, summarize_bands},
        validate::{ImageSource, ValidationError, validate_image_set},
    },
    services::catalog_service::{CatalogError, CatalogService, NewBandMeta, NewImageEntry},
};
use serde::Serialize;
use std::{
    collections::HashSet,
    path::PathBuf,
    sync::{Arc, Mutex},
};
use thiserror::Error;
use tokio::task::{self, JoinError};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("ingestion of `{0}` is already running")]
    AlreadyRunning(Uuid),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Reprojection(#[from] ReprojectionError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("ingestion task failed: {0}")]
    Join(#[from] JoinError),
}

pub type IngestResult<T> = Result<T, IngestError>;

#[derive(Debug, Clone, Copy)]
pub struct IngestConfig {
    /// Upper bound on the validity mask grid used for footprints (rows, cols).
    pub max_mask_shape: (usize, usize),
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_mask_shape: MAX_LOAD_SHAPE,
        }
    }
}

/// Result of ingesting an image file.
#[derive(Debug, Serialize)]
pub struct ImageIngest {
    pub image: ImageEntry,
    pub bands: Vec<BandMeta>,
}

/// Result of ingesting a raster: either a fresh spatial record or the
/// failure recorded on the raster.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RasterIngest {
    Ingested { record: SpatialRecordView },
    Failed { raster: RasterEntry },
}

/// Set of asset ids with an ingestion in flight.
#[derive(Clone, Default)]
struct InFlight(Arc<Mutex<HashSet<Uuid>>>);

impl InFlight {
    fn acquire(&self, id: Uuid) -> IngestResult<InFlightGuard> {
        let mut running = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !running.insert(id) {
            return Err(IngestError::AlreadyRunning(id));
        }
        Ok(InFlightGuard {
            set: self.clone(),
            id,
        })
    }
}

/// Releases its id when dropped, on every exit path.
struct InFlightGuard {
    set: InFlight,
    id: Uuid,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut running = self.set.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        running.remove(&self.id);
    }
}

#[derive(Clone)]
pub struct IngestService {
    catalog: CatalogService,
    config: IngestConfig,
    in_flight: InFlight,
}

impl IngestService {
    pub fn new(catalog: CatalogService, config: IngestConfig) -> Self {
        Self {
            catalog,
            config,
            in_flight: InFlight::default(),
        }
    }

    /// Decode an image file and (re)generate its image entry and band metadata.
    pub async fn populate_image_entry(&self, image_file_id: Uuid) -> IngestResult<ImageIngest> {
        let _guard = self.in_flight.acquire(image_file_id)?;
        let span = info_span!("ingest_image", id = %image_file_id);
        self.populate_image_entry_inner(image_file_id)
            .instrument(span)
            .await
    }

    async fn populate_image_entry_inner(&self, image_file_id: Uuid) -> IngestResult<ImageIngest> {
        let file = self.catalog.fetch_image_file(image_file_id).await?;
        let path = PathBuf::from(&file.path);

        let (dataset, summaries) = task::spawn_blocking(move || {
            let dataset = RasterDataset::open(&path)?;
            let summaries = summarize_bands(&path)?;
            dataset.ensure_band_count(summaries.len())?;
            Ok::<_, DecodeError>((dataset, summaries))
        })
        .await??;

        let entry = NewImageEntry {
            name: file.name.clone(),
            driver: dataset.driver.to_string(),
            number_of_bands: dataset.band_count as i64,
            width: dataset.width as i64,
            height: dataset.height as i64,
            dtypes: dataset.dtypes.clone(),
            interpretations: dataset
                .interpretations
                .iter()
                .map(|i| i.name().to_string())
                .collect(),
        };
        let bands = band_rows(&entry, &summaries);

        let (image, bands) = self
            .catalog
            .replace_image_entry(file.id, &entry, &bands)
            .await?;
        info!(
            image = %image.id,
            bands = bands.len(),
            width = image.width,
            height = image.height,
            "image entry populated"
        );
        Ok(ImageIngest { image, bands })
    }

    /// Validate a raster's image set and replace its spatial record.
    ///
    /// An inconsistent image set is stored as the raster's failure reason
    /// and reported as [`RasterIngest::Failed`] rather than an error.
    pub async fn populate_raster_entry(&self, raster_id: Uuid) -> IngestResult<RasterIngest> {
        let _guard = self.in_flight.acquire(raster_id)?;
        let span = info_span!("ingest_raster", id = %raster_id);
        self.populate_raster_entry_inner(raster_id)
            .instrument(span)
            .await
    }

    async fn populate_raster_entry_inner(&self, raster_id: Uuid) -> IngestResult<RasterIngest> {
        self.catalog.fetch_raster(raster_id).await?;
        let sources: Vec<ImageSource> = self
            .catalog
            .raster_images(raster_id)
            .await?
            .into_iter()
            .map(|file| ImageSource {
                label: format!("{} ({})", file.name, file.id),
                path: PathBuf::from(file.path),
            })
            .collect();

        let max_shape = self.config.max_mask_shape;
        let validated =
            task::spawn_blocking(move || validate_image_set(&sources, max_shape)).await?;

        match validated {
            Ok(validated) => {
                if let Some(reason) = &validated.hull_fallback {
                    debug!(%reason, "footprint fell back to outline");
                }
                let record = self
                    .catalog
                    .store_raster_record(raster_id, &validated)
                    .await?;
                info!(record = %record.record.id, "raster ingested");
                Ok(RasterIngest::Ingested { record })
            }
            Err(ValidationError::Consistency(err)) => {
                warn!(error = %err, "raster image set is inconsistent");
                let raster = self
                    .catalog
                    .record_raster_failure(raster_id, &err.to_string())
                    .await?;
                Ok(RasterIngest::Failed { raster })
            }
            Err(ValidationError::Decode(err)) => Err(err.into()),
            Err(ValidationError::Reprojection(err)) => Err(err.into()),
        }
    }
}

/// One band row per band of `entry`; anything the statistics pass has no
/// value for stays unset.
fn band_rows(entry: &NewImageEntry, summaries: &[BandSummary]) -> Vec<NewBandMeta> {
    (0..entry.number_of_bands as usize)
        .map(|index| {
            let summary = summaries.get(index);
            let stats = summary.and_then(|s| s.statistics.as_ref());
            NewBandMeta {
                band_index: index as i64,
                description: summary.and_then(|s| s.description.clone()),
                nodata_value: summary.and_then(|s| s.nodata),
                dtype: entry.dtypes.get(index).cloned(),
                interpretation: entry.interpretations.get(index).cloned(),
                min: stats.map(|s| s.min),
                max: stats.map(|s| s.max),
                mean: stats.map(|s| s.mean),
                std: stats.map(|s| s.std),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::memory_pool,
        geometry::codec::polygon_from_wkt,
        models::raster::NewRaster,
        raster::testing::{GeoTiffFixture, write_fixture},
    };
    use approx::assert_relative_eq;
    use std::path::Path;

    async fn services() -> (CatalogService, IngestService) {
        let catalog = CatalogService::new(Arc::new(memory_pool().await));
        let ingest = IngestService::new(catalog.clone(), IngestConfig::default());
        (catalog, ingest)
    }

    async fn raster_of(catalog: &CatalogService, paths: &[&Path]) -> RasterEntry {
        let mut images = Vec::new();
        for (i, path) in paths.iter().enumerate() {
            let file = catalog
                .register_image_file(&format!("image-{i}"), path)
                .await
                .unwrap();
            images.push(file.id);
        }
        catalog
            .create_raster(&NewRaster {
                name: "raster".into(),
                description: None,
                images,
                acquisition_date: None,
                instrumentation: None,
                cloud_cover: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_populate_image_entry_records_bands() {
        let dir = tempfile::tempdir().unwrap();
        let mut fixture = GeoTiffFixture::rgb(3, 2, 4.0)
            .nodata(-1.0)
            .describe(&["red", "green", "blue"]);
        fixture.set(0, 0, 10.0);
        let path = write_fixture(dir.path(), "rgb.tif", &fixture);

        let (catalog, ingest) = services().await;
        let file = catalog.register_image_file("rgb", &path).await.unwrap();
        let result = ingest.populate_image_entry(file.id).await.unwrap();

        assert_eq!(result.image.number_of_bands, 3);
        assert_eq!((result.image.width, result.image.height), (3, 2));
        assert_eq!(result.image.driver, "GTiff");
        assert_eq!(result.bands.len(), 3);

        let red = &result.bands[0];
        assert_eq!(red.description.as_deref(), Some("red"));
        assert_eq!(red.nodata_value, Some(-1.0));
        assert_eq!(red.dtype.as_deref(), Some("float32"));
        assert_eq!(red.min, Some(4.0));
        assert_eq!(red.max, Some(10.0));
        assert_relative_eq!(red.mean.unwrap(), 5.0, epsilon = 1e-9);

        // Re-ingestion replaces, never duplicates.
        let again = ingest.populate_image_entry(file.id).await.unwrap();
        assert_eq!(again.image.id, result.image.id);
        assert_eq!(catalog.list_bands(again.image.id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_uniform_raster_footprint_equals_outline() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(dir.path(), "flat.tif", &GeoTiffFixture::uniform(8, 6, 1.0));
        let (catalog, ingest) = services().await;
        let raster = raster_of(&catalog, &[&path]).await;

        let RasterIngest::Ingested { record } =
            ingest.populate_raster_entry(raster.id).await.unwrap()
        else {
            panic!("raster ingestion failed");
        };
        let outline = polygon_from_wkt(&record.record.outline).unwrap();
        let footprint = polygon_from_wkt(&record.record.footprint).unwrap();
        assert_eq!(footprint, outline);
        assert!(outline.exterior().is_closed());
        assert!(outline.exterior().0.len() >= 4);

        let raster = catalog.fetch_raster(raster.id).await.unwrap();
        assert_eq!(raster.spatial_id, Some(record.record.id));
        assert!(raster.failure_reason.is_none());
    }

    #[tokio::test]
    async fn test_resolution_mismatch_records_failure() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_fixture(dir.path(), "a.tif", &GeoTiffFixture::uniform(4, 4, 1.0));
        let b = write_fixture(
            dir.path(),
            "b.tif",
            &GeoTiffFixture::uniform(8, 8, 1.0).resolution(0.5, 0.5).origin(0.0, 4.0),
        );
        let (catalog, ingest) = services().await;
        let raster = raster_of(&catalog, &[&a, &b]).await;

        let RasterIngest::Failed { raster: failed } =
            ingest.populate_raster_entry(raster.id).await.unwrap()
        else {
            panic!("inconsistent raster was ingested");
        };
        let reason = failed.failure_reason.unwrap();
        assert!(reason.contains("image-1"), "{reason}");
        assert!(failed.spatial_id.is_none());

        let records: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM spatial_records")
            .fetch_one(&*catalog.db)
            .await
            .unwrap();
        assert_eq!(records, 0);
    }

    #[tokio::test]
    async fn test_num_bands_sums_member_images() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_fixture(dir.path(), "a.tif", &GeoTiffFixture::rgb(4, 4, 1.0));
        let b = write_fixture(dir.path(), "b.tif", &GeoTiffFixture::uniform(4, 4, 1.0));
        let (catalog, ingest) = services().await;
        let raster = raster_of(&catalog, &[&a, &b]).await;
        for file in catalog.raster_images(raster.id).await.unwrap() {
            ingest.populate_image_entry(file.id).await.unwrap();
        }

        let RasterIngest::Ingested { record } =
            ingest.populate_raster_entry(raster.id).await.unwrap()
        else {
            panic!("raster ingestion failed");
        };
        match record.detail {
            Some(crate::models::spatial::RecordDetail::Raster { num_bands, .. }) => {
                assert_eq!(num_bands, Some(4))
            }
            other => panic!("unexpected detail {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_concurrent_ingestion_is_rejected() {
        let (_, ingest) = services().await;
        let id = Uuid::new_v4();
        let _held = ingest.in_flight.acquire(id).unwrap();
        assert!(matches!(
            ingest.populate_raster_entry(id).await,
            Err(IngestError::AlreadyRunning(_))
        ));
        drop(_held);
        assert!(matches!(
            ingest.populate_raster_entry(id).await,
            Err(IngestError::Catalog(CatalogError::RasterNotFound(_)))
        ));
    }
}
