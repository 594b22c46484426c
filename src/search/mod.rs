//! Spatial search: wire parameters, their compiled form and the engine
//! executing them against the catalog.

pub mod engine;
pub mod params;
pub mod query;
