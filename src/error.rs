//! Error types for fhir-bulk-dl
//!
//! One taxonomy for the whole export run, split into the protocol-level
//! [`Error`] and the destination-level [`SinkError`]. Every variant carries
//! enough context (stage, URL, status, file name) to diagnose a failed run
//! without re-running it.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for fhir-bulk-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// The bulk-format media type required on kickoff and resource responses
pub const BULK_CONTENT_TYPE: &str = "application/fhir+ndjson";

/// Main error type for fhir-bulk-dl
///
/// Protocol errors (`KickoffRejected`, `PollRejected`, `MissingStatusLocation`,
/// `MalformedManifest`) are contract violations by the remote server and are
/// never retried. Per-link errors (`FetchFailed`, `UnexpectedContentType`,
/// `ReadBody`) abort the run unless the pipeline is configured to continue on
/// error; a subset of them is classified as transient by
/// [`IsRetryable`](crate::retry::IsRetryable).
#[derive(Debug, Error)]
pub enum Error {
    /// Kickoff request returned something other than 202 Accepted
    #[error("bulk export kickoff rejected: got status {status}, want 202")]
    KickoffRejected {
        /// The status the server answered with
        status: reqwest::StatusCode,
    },

    /// Kickoff was accepted but the response carried no Content-Location
    #[error("kickoff accepted but response is missing the Content-Location header")]
    MissingStatusLocation,

    /// Status poll returned a terminal non-200/202 status
    #[error("status poll rejected: got status {status}, want 200 or 202")]
    PollRejected {
        /// The status the server answered with
        status: reqwest::StatusCode,
    },

    /// Status poll exhausted its configured attempt limit
    #[error("export job still not ready after {attempts} poll attempts")]
    PollTimedOut {
        /// Number of polls issued before giving up
        attempts: u32,
    },

    /// The run was cancelled through the pipeline's cancellation token
    #[error("export run cancelled")]
    Cancelled,

    /// Completed-job manifest violated the expected shape
    #[error("malformed export manifest: {detail}")]
    MalformedManifest {
        /// What was wrong with the manifest
        detail: String,
    },

    /// A resource link answered with a non-200 status
    #[error("fetch of {url} failed: got status {status}, want 200")]
    FetchFailed {
        /// The resource link that failed
        url: String,
        /// The status the server answered with
        status: reqwest::StatusCode,
    },

    /// A resource link answered with the wrong content type
    #[error("fetch of {url}: expected content type containing \"application/fhir+ndjson\", got {got:?}")]
    UnexpectedContentType {
        /// The resource link that failed
        url: String,
        /// The Content-Type header the server sent (empty when absent)
        got: String,
    },

    /// Reading a resource body off the wire failed mid-stream
    #[error("failed to read body of {url}: {source}")]
    ReadBody {
        /// The resource link whose body could not be read
        url: String,
        /// The underlying transport error
        source: reqwest::Error,
    },

    /// A kickoff URL, status location, or manifest link could not be parsed
    #[error("invalid URL {value:?}: {source}")]
    InvalidUrl {
        /// The offending URL string
        value: String,
        /// The parse failure
        source: url::ParseError,
    },

    /// Transport-level error issuing a request
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "object_store.bucket")
        key: Option<String>,
    },

    /// A sink failed to persist a fetched resource
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),
}

/// Destination-side errors raised by [`Sink`](crate::sink::Sink) implementations
#[derive(Debug, Error)]
pub enum SinkError {
    /// Local file write failed
    #[error("failed to write {path}: {source}")]
    Io {
        /// The destination path
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Object-store upload failed
    #[error("failed to upload s3://{bucket}/{key}: {detail}")]
    Upload {
        /// Destination bucket
        bucket: String,
        /// Destination object key
        key: String,
        /// SDK error rendered to text
        detail: String,
    },

    /// Warehouse connection could not be established
    #[error("failed to connect to warehouse: {detail}")]
    Connect {
        /// Database error rendered to text
        detail: String,
    },

    /// Warehouse load failed
    #[error("failed to load table {table}: {detail}")]
    Load {
        /// Destination table name
        table: String,
        /// Database error rendered to text
        detail: String,
    },

    /// A sink that routes by resource type received a resource with no type
    #[error("no known resource type in file name {file_name:?}")]
    MissingResourceType {
        /// The file name that matched no vocabulary entry
        file_name: String,
    },
}

impl Error {
    /// Shorthand for a configuration error tied to a specific key
    pub(crate) fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}
