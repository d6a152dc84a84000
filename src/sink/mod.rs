//! Export destinations
//!
//! Fetched resources are handed to zero or more sinks behind one narrow
//! seam, the [`Sink`] trait. Three implementations are provided:
//!
//! - [`FileSink`]: writes each payload to a local directory
//! - [`ObjectStoreSink`]: uploads each payload to an S3-compatible store
//! - [`WarehouseSink`]: loads each payload's records into a Postgres table
//!   per resource type
//!
//! Sinks own persistence; the pipeline drops a resource as soon as every
//! sink has accepted it. Partial output from earlier links is never rolled
//! back when a later link fails.

use async_trait::async_trait;

use crate::config::SinkConfig;
use crate::error::{Result, SinkError};
use crate::types::FetchedResource;

mod file;
mod object_store;
mod warehouse;

pub use file::FileSink;
pub use object_store::ObjectStoreSink;
pub use warehouse::WarehouseSink;

/// Trait for export destinations
///
/// Implementations must be safe to call once per fetched resource, in
/// manifest order, and should treat re-delivery of the same resource as an
/// overwrite/append rather than an error where the destination allows it.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Persist one fetched resource
    ///
    /// # Errors
    ///
    /// Returns a [`SinkError`] when the destination rejects the payload or
    /// when the sink routes by resource type and the resource has none.
    async fn accept(&self, resource: &FetchedResource) -> std::result::Result<(), SinkError>;

    /// Human-readable name for logging and reports
    fn name(&self) -> &'static str;
}

/// Build the sinks selected by configuration
///
/// An absent config section disables that sink; an empty return is valid
/// (fetch-only run). The warehouse sink connects eagerly so a bad database
/// URL fails the run before any fetch happens.
pub async fn build_sinks(config: &SinkConfig) -> Result<Vec<Box<dyn Sink>>> {
    let mut sinks: Vec<Box<dyn Sink>> = Vec::new();

    if let Some(file) = &config.file {
        sinks.push(Box::new(FileSink::new(file.clone())));
    }
    if let Some(store) = &config.object_store {
        sinks.push(Box::new(ObjectStoreSink::new(store.clone()).await));
    }
    if let Some(warehouse) = &config.warehouse {
        sinks.push(Box::new(WarehouseSink::connect(warehouse.clone()).await?));
    }

    tracing::debug!(
        sinks = ?sinks.iter().map(|s| s.name()).collect::<Vec<_>>(),
        "sinks configured"
    );
    Ok(sinks)
}
