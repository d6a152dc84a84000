//! Configuration types for fhir-bulk-dl

use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::error::{Error, Result};

/// Export protocol behavior (link strategy, polling, failure policy)
///
/// Groups settings for the kickoff/poll/fetch state machine. Used as a
/// nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Whether resource links arrive in the manifest body (`output[].url`)
    /// or in the `Link` response header (default: true = body)
    #[serde(default = "default_true")]
    pub links_in_body: bool,

    /// Interval between status polls while the job reports 202 (default: 5 seconds)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,

    /// Maximum number of status polls before giving up (default: 120)
    ///
    /// `None` removes the bound and polls until the server answers something
    /// other than 202; callers choosing this must bound the wait themselves
    /// through the pipeline's cancellation token.
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: Option<u32>,

    /// Per-request timeout for kickoff, poll, and fetch requests (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Record per-link failures in the report and keep going instead of
    /// aborting the run on the first failed link (default: false)
    #[serde(default)]
    pub continue_on_error: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            links_in_body: true,
            poll_interval: default_poll_interval(),
            max_poll_attempts: default_max_poll_attempts(),
            request_timeout: default_request_timeout(),
            continue_on_error: false,
        }
    }
}

/// Retry behavior for transient per-link fetch failures
///
/// Retries are disabled by default (`max_attempts: 0`): the base pipeline is
/// fail-fast, and enabling bounded retries is an explicit opt-in.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 0 = fail fast)
    #[serde(default)]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Local file destination
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileSinkConfig {
    /// Directory the NDJSON files are written into (created if absent)
    pub output_dir: PathBuf,

    /// Prefix prepended to each file name (default: none)
    #[serde(default)]
    pub file_prefix: Option<String>,
}

/// S3-compatible object-store destination
///
/// Objects are keyed `[key_prefix/]{ResourceType}/{file_name}`, so every
/// resource routed here must classify to a known resource type.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    /// Destination bucket
    pub bucket: String,

    /// Bucket region
    pub region: String,

    /// Custom endpoint for S3-compatible stores (default: AWS)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Prefix prepended to every object key (default: none)
    #[serde(default)]
    pub key_prefix: Option<String>,

    /// Use path-style addressing (required by MinIO and most self-hosted stores)
    #[serde(default)]
    pub path_style: bool,
}

/// Postgres warehouse destination
///
/// Each resource type loads into its own `jsonb` table, so every resource
/// routed here must classify to a known resource type.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// Postgres connection string
    pub database_url: String,

    /// Schema the per-type tables live in (default: the connection's default schema)
    #[serde(default)]
    pub schema: Option<String>,
}

/// Destination configuration
///
/// Every sink is optional; an absent section disables that sink. A present
/// section with blank required identifiers is a configuration error caught
/// by [`Config::validate`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Local file writes
    #[serde(default)]
    pub file: Option<FileSinkConfig>,

    /// Object-store uploads
    #[serde(default)]
    pub object_store: Option<ObjectStoreConfig>,

    /// Warehouse table loads
    #[serde(default)]
    pub warehouse: Option<WarehouseConfig>,
}

/// Main configuration for the export pipeline
///
/// Protocol fields are flattened for flat serialization; sinks and retry
/// tuning live under their own keys.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Export protocol behavior
    #[serde(flatten)]
    pub export: ExportConfig,

    /// Transient-failure retry tuning for resource fetches
    #[serde(default)]
    pub retry: RetryConfig,

    /// Configured destinations (zero or more)
    #[serde(default)]
    pub sinks: SinkConfig,
}

impl Config {
    /// Check the configuration for values that can never work
    ///
    /// Absent sink sections are fine (the sink is disabled); present
    /// sections must be complete.
    pub fn validate(&self) -> Result<()> {
        if self.export.poll_interval.is_zero() {
            return Err(Error::config(
                "poll_interval",
                "poll interval must be greater than zero",
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::config(
                "retry.backoff_multiplier",
                "backoff multiplier must be at least 1.0",
            ));
        }
        if let Some(file) = &self.sinks.file
            && file.output_dir.as_os_str().is_empty()
        {
            return Err(Error::config(
                "sinks.file.output_dir",
                "output directory must not be empty",
            ));
        }
        if let Some(store) = &self.sinks.object_store {
            if store.bucket.is_empty() {
                return Err(Error::config(
                    "sinks.object_store.bucket",
                    "bucket must not be empty",
                ));
            }
            if store.region.is_empty() {
                return Err(Error::config(
                    "sinks.object_store.region",
                    "region must not be empty",
                ));
            }
        }
        if let Some(warehouse) = &self.sinks.warehouse
            && warehouse.database_url.is_empty()
        {
            return Err(Error::config(
                "sinks.warehouse.database_url",
                "database URL must not be empty",
            ));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_max_poll_attempts() -> Option<u32> {
    Some(120)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Duration serialization helper (seconds as u64)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
