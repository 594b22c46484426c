pub mod catalog_service;
pub mod ingest_service;

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::search::engine::SearchEngine;
use catalog_service::CatalogService;
use ingest_service::{IngestConfig, IngestService};

/// Shared state handed to every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub catalog: CatalogService,
    pub ingest: IngestService,
    pub search: SearchEngine,
}

impl AppState {
    pub fn new(db: Arc<SqlitePool>, ingest: IngestConfig, default_limit: Option<u32>) -> Self {
        let catalog = CatalogService::new(db.clone());
        Self {
            ingest: IngestService::new(catalog.clone(), ingest),
            search: SearchEngine::new(db, default_limit),
            catalog,
        }
    }
}
