//! Bulk export protocol client
//!
//! Implements the asynchronous half of the export flow: the kickoff request
//! (202 + `Content-Location`) and the status poll loop (202 until ready,
//! 200 with a manifest). The poll sleep is the only suspension point before
//! fetching begins and is raced against the pipeline's cancellation token.

use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_LOCATION, LINK};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::ExportConfig;
use crate::error::{BULK_CONTENT_TYPE, Error, Result};
use crate::types::{ExportEvent, ExportJob, JobState, ManifestResponse};

/// Client for the kickoff and status-poll legs of an export
///
/// Owns the [`ExportJob`] between kickoff and the final poll. One client
/// serves one job lifecycle at a time.
#[derive(Clone, Debug)]
pub struct BulkDataClient {
    http: reqwest::Client,
    config: ExportConfig,
    event_tx: broadcast::Sender<ExportEvent>,
}

impl BulkDataClient {
    /// Create a client from export settings and the pipeline's event channel
    ///
    /// Standalone callers can pass the sender half of their own
    /// `tokio::sync::broadcast` channel.
    pub fn new(config: &ExportConfig, event_tx: broadcast::Sender<ExportEvent>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http,
            config: config.clone(),
            event_tx,
        })
    }

    /// The underlying HTTP client, shared with the resource fetcher
    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Kick off an export job
    ///
    /// Issues a GET declaring acceptance of the bulk content type and
    /// requesting asynchronous processing. Only 202 is success; the returned
    /// job carries the `Content-Location` status URL resolved against the
    /// kickoff URL.
    pub async fn kickoff(&self, kickoff_url: &str) -> Result<ExportJob> {
        let kickoff_url = Url::parse(kickoff_url).map_err(|source| Error::InvalidUrl {
            value: kickoff_url.to_string(),
            source,
        })?;

        let response = self
            .http
            .get(kickoff_url.clone())
            .header(ACCEPT, BULK_CONTENT_TYPE)
            .header("Prefer", "respond-async")
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::ACCEPTED {
            return Err(Error::KickoffRejected { status });
        }

        let location = response
            .headers()
            .get(CONTENT_LOCATION)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .ok_or(Error::MissingStatusLocation)?;

        let status_url = kickoff_url.join(location).map_err(|source| Error::InvalidUrl {
            value: location.to_string(),
            source,
        })?;

        tracing::info!(status_url = %status_url, "export job accepted");
        self.event_tx
            .send(ExportEvent::KickoffAccepted {
                status_url: status_url.to_string(),
            })
            .ok();

        Ok(ExportJob {
            kickoff_url,
            status_url,
            state: JobState::Pending,
        })
    }

    /// Poll the job's status URL until it is ready
    ///
    /// 202 means still processing: sleep for the configured interval and try
    /// again, up to `max_poll_attempts` polls. 200 returns the raw manifest
    /// response for extraction. Any other status is terminal. The backoff
    /// sleep races `cancel`, so a wrapping caller can bound the total wait.
    pub async fn await_manifest(
        &self,
        job: &mut ExportJob,
        cancel: &CancellationToken,
    ) -> Result<ManifestResponse> {
        let mut attempts: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let response = self.http.get(job.status_url.clone()).send().await?;
            attempts += 1;

            match response.status() {
                StatusCode::OK => {
                    job.state = JobState::Ready;
                    let link_header = response
                        .headers()
                        .get(LINK)
                        .and_then(|value| value.to_str().ok())
                        .map(str::to_string);
                    let body = response
                        .bytes()
                        .await
                        .map_err(|source| Error::ReadBody {
                            url: job.status_url.to_string(),
                            source,
                        })?
                        .to_vec();
                    tracing::info!(attempts, "export job ready");
                    return Ok(ManifestResponse { link_header, body });
                }
                StatusCode::ACCEPTED => {
                    if let Some(max) = self.config.max_poll_attempts
                        && attempts >= max
                    {
                        job.state = JobState::Failed;
                        return Err(Error::PollTimedOut { attempts });
                    }
                    tracing::debug!(
                        attempt = attempts,
                        interval_secs = self.config.poll_interval.as_secs_f64(),
                        "export job not ready"
                    );
                    self.event_tx
                        .send(ExportEvent::JobPending { attempt: attempts })
                        .ok();
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
                status => {
                    job.state = JobState::Failed;
                    return Err(Error::PollRejected { status });
                }
            }
        }
    }
}
