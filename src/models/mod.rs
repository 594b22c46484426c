//! Core data models of the raster catalog.
//!
//! These entities map to database tables via `sqlx::FromRow` and serialize
//! as JSON via `serde`.

pub mod image;
pub mod raster;
pub mod spatial;
