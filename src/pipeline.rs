//! Export pipeline orchestration
//!
//! Ties the protocol legs together: kickoff → poll → extract → for each
//! link, fetch and dispatch to every configured sink. Sequential by design:
//! each link is fully fetched and dispatched before the next begins, which
//! keeps per-type sink writes trivially ordered. The default failure policy
//! is fail-fast; `continue_on_error` records per-link failures in the
//! report instead.

use std::time::Instant;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::client::BulkDataClient;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fetch::fetch_resource;
use crate::manifest::extract_links;
use crate::retry::with_retry;
use crate::sink::{Sink, build_sinks};
use crate::types::{ExportEvent, Report, ResourceLink, ResourceOutcome};

/// Capacity of the progress-event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Drives one export job from kickoff to report
///
/// # Example
///
/// ```no_run
/// use fhir_bulk_dl::{Config, ExportPipeline};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut config = Config::default();
///     config.sinks.file = Some(fhir_bulk_dl::config::FileSinkConfig {
///         output_dir: "./exports".into(),
///         file_prefix: None,
///     });
///
///     let pipeline = ExportPipeline::new(config).await?;
///     let report = pipeline
///         .run("https://bulk.example.com/Patient/$export")
///         .await?;
///     println!("exported {} resources", report.succeeded());
///     Ok(())
/// }
/// ```
pub struct ExportPipeline {
    config: Config,
    client: BulkDataClient,
    sinks: Vec<Box<dyn Sink>>,
    event_tx: broadcast::Sender<ExportEvent>,
    cancel: CancellationToken,
}

impl ExportPipeline {
    /// Build a pipeline from configuration
    ///
    /// Validates the configuration and constructs the configured sinks; the
    /// warehouse sink connects here, so a bad database URL fails before any
    /// request is issued.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let client = BulkDataClient::new(&config.export, event_tx.clone())?;
        let sinks = build_sinks(&config.sinks).await?;
        Ok(Self {
            config,
            client,
            sinks,
            event_tx,
            cancel: CancellationToken::new(),
        })
    }

    /// Register an additional, caller-provided sink
    pub fn add_sink(&mut self, sink: Box<dyn Sink>) {
        self.sinks.push(sink);
    }

    /// Subscribe to progress events for the next run
    pub fn subscribe(&self) -> broadcast::Receiver<ExportEvent> {
        self.event_tx.subscribe()
    }

    /// Token cancelling this pipeline's poll loop and link processing
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel the running export at the next suspension point
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Run one export job end to end
    ///
    /// Kicks off against `kickoff_url`, polls until ready, extracts the
    /// manifest links, and fetch-dispatches each link in manifest order.
    /// Output already written to sinks for earlier links is not rolled back
    /// when a later link fails.
    pub async fn run(&self, kickoff_url: &str) -> Result<Report> {
        let started = Instant::now();

        let mut job = self.client.kickoff(kickoff_url).await?;
        let manifest = self.client.await_manifest(&mut job, &self.cancel).await?;
        let links = extract_links(self.config.export.links_in_body, &job.status_url, &manifest)?;

        tracing::info!(links = links.len(), "manifest extracted");
        self.event_tx
            .send(ExportEvent::ManifestReady {
                link_count: links.len(),
            })
            .ok();

        let mut outcomes = Vec::with_capacity(links.len());
        for link in links {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            match self.process_link(&link).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    tracing::error!(url = %link.url, error = %e, "resource failed");
                    self.event_tx
                        .send(ExportEvent::ResourceFailed {
                            url: link.url.to_string(),
                            error: e.to_string(),
                        })
                        .ok();
                    if !self.config.export.continue_on_error {
                        return Err(e);
                    }
                    outcomes.push(ResourceOutcome {
                        url: link.url.to_string(),
                        file_name: link.file_name.clone(),
                        resource_type: link.resource_type,
                        bytes: 0,
                        sinks: Vec::new(),
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        let report = Report {
            outcomes,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            elapsed_secs = report.elapsed.as_secs_f64(),
            "export run finished"
        );
        self.event_tx
            .send(ExportEvent::Completed {
                succeeded: report.succeeded(),
                failed: report.failed(),
            })
            .ok();
        Ok(report)
    }

    /// Fetch one link and dispatch it to every sink
    async fn process_link(&self, link: &ResourceLink) -> Result<ResourceOutcome> {
        tracing::info!(url = %link.url, "fetching resource");
        self.event_tx
            .send(ExportEvent::Fetching {
                url: link.url.to_string(),
            })
            .ok();

        let resource = with_retry(&self.config.retry, || {
            fetch_resource(self.client.http(), link)
        })
        .await?;

        self.event_tx
            .send(ExportEvent::Fetched {
                file_name: resource.link.file_name.clone(),
                resource_type: resource.link.resource_type.map(str::to_string),
                bytes: resource.payload.len() as u64,
            })
            .ok();

        let mut accepted = Vec::with_capacity(self.sinks.len());
        for sink in &self.sinks {
            sink.accept(&resource).await?;
            accepted.push(sink.name());
            self.event_tx
                .send(ExportEvent::SinkDispatched {
                    file_name: resource.link.file_name.clone(),
                    sink: sink.name().to_string(),
                })
                .ok();
        }

        Ok(ResourceOutcome {
            url: link.url.to_string(),
            file_name: resource.link.file_name.clone(),
            resource_type: resource.link.resource_type,
            bytes: resource.payload.len() as u64,
            sinks: accepted,
            error: None,
        })
    }
}
