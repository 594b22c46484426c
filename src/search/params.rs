//! Wire-level search parameters, as received in a query string.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Every filter is optional; supplied filters are AND-combined.
///
/// Time ranges use `{field}_after` as the inclusive lower bound and
/// `{field}_before` as the inclusive upper bound.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchParams {
    /// Query geometry as WKT or GeoJSON.
    pub q: Option<String>,
    pub predicate: Option<String>,
    /// DE-9IM pattern, used instead of `predicate`.
    pub relates: Option<String>,

    /// Distance bounds in metres around `q`.
    pub distance_min: Option<f64>,
    pub distance_max: Option<f64>,

    pub acquired_after: Option<DateTime<Utc>>,
    pub acquired_before: Option<DateTime<Utc>>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub modified_after: Option<DateTime<Utc>>,
    pub modified_before: Option<DateTime<Utc>>,

    /// `raster` or `geometry`.
    pub datatype: Option<String>,
    pub instrumentation: Option<String>,

    pub num_bands_min: Option<i64>,
    pub num_bands_max: Option<i64>,
    pub resolution_min: Option<f64>,
    pub resolution_max: Option<f64>,
    pub cloud_cover_min: Option<f64>,
    pub cloud_cover_max: Option<f64>,
    pub frame_rate_min: Option<f64>,
    pub frame_rate_max: Option<f64>,

    pub limit: Option<u32>,
    pub offset: Option<u32>,
}
