//! End-to-end export flow tests against a mocked bulk export server

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fhir_bulk_dl::config::FileSinkConfig;
use fhir_bulk_dl::{Config, Error, ExportEvent, ExportPipeline, FetchedResource, Sink, SinkError};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const NDJSON: &str = "application/fhir+ndjson";

/// Sink that records what it accepted, in order
#[derive(Clone, Default)]
struct RecordingSink {
    accepted: Arc<Mutex<Vec<(String, Option<&'static str>, usize)>>>,
}

impl RecordingSink {
    fn accepted(&self) -> Vec<(String, Option<&'static str>, usize)> {
        self.accepted.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sink for RecordingSink {
    async fn accept(&self, resource: &FetchedResource) -> Result<(), SinkError> {
        self.accepted.lock().unwrap().push((
            resource.link.file_name.clone(),
            resource.link.resource_type,
            resource.payload.len(),
        ));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Sink that rejects everything
struct FailingSink;

#[async_trait]
impl Sink for FailingSink {
    async fn accept(&self, resource: &FetchedResource) -> Result<(), SinkError> {
        Err(SinkError::Io {
            path: resource.link.file_name.clone().into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        })
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

fn fast_config() -> Config {
    let mut config = Config::default();
    config.export.poll_interval = Duration::from_millis(20);
    config
}

/// Mount a kickoff that accepts and a status endpoint that reports 202
/// `pending_polls` times before answering 200 with `manifest_body`.
async fn mount_export(server: &MockServer, pending_polls: u64, manifest_body: &str) {
    Mock::given(method("GET"))
        .and(path("/Group/1/$export"))
        .and(header("Accept", NDJSON))
        .and(header("Prefer", "respond-async"))
        .respond_with(ResponseTemplate::new(202).insert_header("Content-Location", "/status/123"))
        .expect(1)
        .mount(server)
        .await;

    if pending_polls > 0 {
        Mock::given(method("GET"))
            .and(path("/status/123"))
            .respond_with(ResponseTemplate::new(202))
            .up_to_n_times(pending_polls)
            .mount(server)
            .await;
    }

    Mock::given(method("GET"))
        .and(path("/status/123"))
        .respond_with(ResponseTemplate::new(200).set_body_string(manifest_body.to_string()))
        .mount(server)
        .await;
}

/// Mount one NDJSON resource at `/data/{file}`
async fn mount_resource(server: &MockServer, file: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/data/{file}")))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), NDJSON),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn end_to_end_body_strategy_with_file_sink() {
    let server = MockServer::start().await;
    mount_export(
        &server,
        1,
        r#"{"output":[{"url":"/data/Patient.ndjson"}]}"#,
    )
    .await;
    let body = "{\"resourceType\":\"Patient\",\"id\":\"1\"}\n";
    mount_resource(&server, "Patient.ndjson", body).await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = fast_config();
    config.sinks.file = Some(FileSinkConfig {
        output_dir: dir.path().to_path_buf(),
        file_prefix: None,
    });

    let pipeline = ExportPipeline::new(config).await.unwrap();
    let report = pipeline
        .run(&format!("{}/Group/1/$export", server.uri()))
        .await
        .unwrap();

    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.failed(), 0);
    assert_eq!(report.outcomes[0].resource_type, Some("Patient"));
    assert_eq!(report.outcomes[0].sinks, vec!["file"]);

    let written = std::fs::read(dir.path().join("Patient.ndjson")).unwrap();
    assert_eq!(written, body.as_bytes());
}

#[tokio::test]
async fn header_strategy_fetches_links_in_header_order() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/Group/1/$export"))
        .respond_with(ResponseTemplate::new(202).insert_header("Content-Location", "/status/123"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/status/123"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Link", "</data/Patient.ndjson>,</data/Observation.ndjson>"),
        )
        .mount(&server)
        .await;
    mount_resource(&server, "Patient.ndjson", "{\"id\":\"p\"}\n").await;
    mount_resource(&server, "Observation.ndjson", "{\"id\":\"o\"}\n").await;

    let mut config = fast_config();
    config.export.links_in_body = false;

    let mut pipeline = ExportPipeline::new(config).await.unwrap();
    let recorder = RecordingSink::default();
    pipeline.add_sink(Box::new(recorder.clone()));

    let report = pipeline
        .run(&format!("{}/Group/1/$export", server.uri()))
        .await
        .unwrap();

    assert_eq!(report.succeeded(), 2);
    let accepted = recorder.accepted();
    assert_eq!(accepted.len(), 2);
    assert_eq!(accepted[0].0, "Patient.ndjson");
    assert_eq!(accepted[0].1, Some("Patient"));
    assert_eq!(accepted[1].0, "Observation.ndjson");
    assert_eq!(accepted[1].1, Some("Observation"));
}

#[tokio::test]
async fn fail_fast_stops_before_later_links() {
    let server = MockServer::start().await;
    mount_export(
        &server,
        0,
        r#"{"output":[{"url":"/data/Patient.ndjson"},{"url":"/data/Broken.ndjson"},{"url":"/data/Observation.ndjson"}]}"#,
    )
    .await;
    mount_resource(&server, "Patient.ndjson", "{\"id\":\"p\"}\n").await;
    // Wrong content type on the second link
    Mock::given(method("GET"))
        .and(path("/data/Broken.ndjson"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/plain")
                .set_body_string("not ndjson"),
        )
        .expect(1)
        .mount(&server)
        .await;
    // The third link must never be fetched
    Mock::given(method("GET"))
        .and(path("/data/Observation.ndjson"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut pipeline = ExportPipeline::new(fast_config()).await.unwrap();
    let recorder = RecordingSink::default();
    pipeline.add_sink(Box::new(recorder.clone()));

    let err = pipeline
        .run(&format!("{}/Group/1/$export", server.uri()))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::UnexpectedContentType { .. }));
    let accepted = recorder.accepted();
    assert_eq!(accepted.len(), 1, "only the first link was dispatched");
    assert_eq!(accepted[0].0, "Patient.ndjson");
}

#[tokio::test]
async fn continue_on_error_records_failures_and_keeps_going() {
    let server = MockServer::start().await;
    mount_export(
        &server,
        0,
        r#"{"output":[{"url":"/data/Patient.ndjson"},{"url":"/data/Broken.ndjson"},{"url":"/data/Observation.ndjson"}]}"#,
    )
    .await;
    mount_resource(&server, "Patient.ndjson", "{\"id\":\"p\"}\n").await;
    Mock::given(method("GET"))
        .and(path("/data/Broken.ndjson"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    mount_resource(&server, "Observation.ndjson", "{\"id\":\"o\"}\n").await;

    let mut config = fast_config();
    config.export.continue_on_error = true;

    let mut pipeline = ExportPipeline::new(config).await.unwrap();
    let recorder = RecordingSink::default();
    pipeline.add_sink(Box::new(recorder.clone()));

    let report = pipeline
        .run(&format!("{}/Group/1/$export", server.uri()))
        .await
        .unwrap();

    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.outcomes[1].file_name, "Broken.ndjson");
    assert!(
        report.outcomes[1]
            .error
            .as_deref()
            .unwrap()
            .contains("404")
    );
    assert_eq!(recorder.accepted().len(), 2);
}

#[tokio::test]
async fn sink_failure_aborts_the_run() {
    let server = MockServer::start().await;
    mount_export(&server, 0, r#"{"output":[{"url":"/data/Patient.ndjson"}]}"#).await;
    mount_resource(&server, "Patient.ndjson", "{}\n").await;

    let mut pipeline = ExportPipeline::new(fast_config()).await.unwrap();
    pipeline.add_sink(Box::new(FailingSink));

    let err = pipeline
        .run(&format!("{}/Group/1/$export", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Sink(SinkError::Io { .. })));
}

#[tokio::test]
async fn kickoff_rejection_surfaces_with_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let pipeline = ExportPipeline::new(fast_config()).await.unwrap();
    let err = pipeline
        .run(&format!("{}/Group/1/$export", server.uri()))
        .await
        .unwrap_err();
    match err {
        Error::KickoffRejected { status } => assert_eq!(status.as_u16(), 500),
        other => panic!("expected KickoffRejected, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_manifest_fails_the_run() {
    let server = MockServer::start().await;
    mount_export(&server, 0, r#"{"no_output_here": true}"#).await;

    let pipeline = ExportPipeline::new(fast_config()).await.unwrap();
    let err = pipeline
        .run(&format!("{}/Group/1/$export", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MalformedManifest { .. }));
}

#[tokio::test]
async fn empty_manifest_completes_with_empty_report() {
    let server = MockServer::start().await;
    mount_export(&server, 0, r#"{"output":[]}"#).await;

    let pipeline = ExportPipeline::new(fast_config()).await.unwrap();
    let report = pipeline
        .run(&format!("{}/Group/1/$export", server.uri()))
        .await
        .unwrap();
    assert!(report.outcomes.is_empty());
}

#[tokio::test]
async fn retry_recovers_a_transient_fetch_failure() {
    let server = MockServer::start().await;
    mount_export(&server, 0, r#"{"output":[{"url":"/data/Patient.ndjson"}]}"#).await;
    Mock::given(method("GET"))
        .and(path("/data/Patient.ndjson"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_resource(&server, "Patient.ndjson", "{}\n").await;

    let mut config = fast_config();
    config.retry.max_attempts = 2;
    config.retry.initial_delay = Duration::from_millis(10);
    config.retry.jitter = false;

    let pipeline = ExportPipeline::new(config).await.unwrap();
    let report = pipeline
        .run(&format!("{}/Group/1/$export", server.uri()))
        .await
        .unwrap();
    assert_eq!(report.succeeded(), 1);
}

#[tokio::test]
async fn disabled_retry_fails_fast_on_transient_status() {
    let server = MockServer::start().await;
    mount_export(&server, 0, r#"{"output":[{"url":"/data/Patient.ndjson"}]}"#).await;
    Mock::given(method("GET"))
        .and(path("/data/Patient.ndjson"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let pipeline = ExportPipeline::new(fast_config()).await.unwrap();
    let err = pipeline
        .run(&format!("{}/Group/1/$export", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::FetchFailed { .. }));
}

#[tokio::test]
async fn events_narrate_the_run_in_stage_order() {
    let server = MockServer::start().await;
    mount_export(&server, 1, r#"{"output":[{"url":"/data/Patient.ndjson"}]}"#).await;
    mount_resource(&server, "Patient.ndjson", "{}\n").await;

    let mut pipeline = ExportPipeline::new(fast_config()).await.unwrap();
    pipeline.add_sink(Box::new(RecordingSink::default()));
    let mut events = pipeline.subscribe();

    pipeline
        .run(&format!("{}/Group/1/$export", server.uri()))
        .await
        .unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }

    assert!(matches!(seen[0], ExportEvent::KickoffAccepted { .. }));
    assert!(
        seen.iter()
            .any(|e| matches!(e, ExportEvent::JobPending { .. })),
        "one 202 poll should surface as a pending event"
    );
    assert!(
        seen.iter()
            .any(|e| matches!(e, ExportEvent::ManifestReady { link_count: 1 }))
    );
    assert!(
        seen.iter()
            .any(|e| matches!(e, ExportEvent::SinkDispatched { .. }))
    );
    assert!(matches!(
        seen.last(),
        Some(ExportEvent::Completed {
            succeeded: 1,
            failed: 0
        })
    ));
}

#[tokio::test]
async fn cancellation_preempts_a_pending_job() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/Group/1/$export"))
        .respond_with(ResponseTemplate::new(202).insert_header("Content-Location", "/status/123"))
        .mount(&server)
        .await;
    // Job never becomes ready
    Mock::given(method("GET"))
        .and(path("/status/123"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;

    let mut config = fast_config();
    config.export.poll_interval = Duration::from_secs(3600);
    config.export.max_poll_attempts = None;

    let pipeline = ExportPipeline::new(config).await.unwrap();
    let cancel = pipeline.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let err = pipeline
        .run(&format!("{}/Group/1/$export", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}
