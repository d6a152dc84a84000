//! # fhir-bulk-dl
//!
//! Client library for the FHIR Bulk Data Access export flow.
//!
//! One [`ExportPipeline::run`] call drives a whole export job: it kicks the
//! job off (`Accept: application/fhir+ndjson`, `Prefer: respond-async`),
//! polls the returned `Content-Location` until the server reports ready,
//! extracts the manifest's resource links (JSON body or `Link` header), then
//! fetches each NDJSON payload and hands it to the configured sinks (local
//! files, S3-compatible object store, Postgres warehouse).
//!
//! ## Design Philosophy
//!
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Sensible defaults** - A default [`Config`] runs a fetch-only export
//! - **Fail-fast** - The first failed link aborts the run unless
//!   continue-on-error is opted into
//! - **Event-driven** - Consumers subscribe to progress events, no polling
//!   required
//!
//! ## Quick Start
//!
//! ```no_run
//! use fhir_bulk_dl::{Config, ExportPipeline};
//! use fhir_bulk_dl::config::FileSinkConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.sinks.file = Some(FileSinkConfig {
//!         output_dir: "./exports".into(),
//!         file_prefix: None,
//!     });
//!
//!     let pipeline = ExportPipeline::new(config).await?;
//!
//!     // Subscribe to progress events
//!     let mut events = pipeline.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let report = pipeline
//!         .run("https://bulk.example.com/Patient/$export")
//!         .await?;
//!     println!("exported {} resources", report.succeeded());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Bulk export protocol client (kickoff and status polling)
pub mod client;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Resource fetch and validation
pub mod fetch;
/// Manifest link extraction
pub mod manifest;
/// Export pipeline orchestration
pub mod pipeline;
/// FHIR resource-type vocabulary and file-name classification
pub mod resource_types;
/// Retry logic with exponential backoff
pub mod retry;
/// Export destinations
pub mod sink;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use client::BulkDataClient;
pub use config::{Config, ExportConfig, RetryConfig, SinkConfig};
pub use error::{Error, Result, SinkError};
pub use pipeline::ExportPipeline;
pub use sink::{FileSink, ObjectStoreSink, Sink, WarehouseSink};
pub use types::{
    ExportEvent, ExportJob, FetchedResource, JobState, ManifestResponse, Report, ResourceLink,
    ResourceOutcome,
};

/// Helper function to run an export with graceful signal handling.
///
/// Spawns a signal listener that cancels the pipeline on termination, then
/// drives the run to completion. A cancelled run returns
/// [`Error::Cancelled`].
///
/// - **Unix:** listens for SIGTERM and SIGINT.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_with_shutdown(pipeline: &ExportPipeline, kickoff_url: &str) -> Result<Report> {
    let cancel = pipeline.cancellation_token();
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("termination signal received, cancelling export");
        cancel.cancel();
    });
    pipeline.run(kickoff_url).await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration may fail in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        _ => {
            tracing::warn!("Could not register signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
    }
}
