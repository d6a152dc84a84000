//! S3-compatible object-store destination

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::primitives::ByteStream;

use crate::config::ObjectStoreConfig;
use crate::error::SinkError;
use crate::sink::Sink;
use crate::types::FetchedResource;

/// Uploads each fetched payload to an S3-compatible object store
///
/// Objects are keyed `[key_prefix/]{ResourceType}/{file_name}`, so resources
/// that classify to no known type are rejected. Credentials come from the
/// SDK's default provider chain (environment, profile, instance role).
#[derive(Clone, Debug)]
pub struct ObjectStoreSink {
    client: aws_sdk_s3::Client,
    config: ObjectStoreConfig,
}

impl ObjectStoreSink {
    /// Create a sink for the configured bucket
    pub async fn new(config: ObjectStoreConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint.clone());
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if config.path_style {
            builder = builder.force_path_style(true);
        }
        let client = aws_sdk_s3::Client::from_conf(builder.build());

        tracing::debug!(bucket = %config.bucket, "object-store sink initialized");
        Self { client, config }
    }

    fn object_key(&self, resource_type: &str, file_name: &str) -> String {
        match &self.config.key_prefix {
            Some(prefix) => format!(
                "{}/{resource_type}/{file_name}",
                prefix.trim_end_matches('/')
            ),
            None => format!("{resource_type}/{file_name}"),
        }
    }
}

#[async_trait]
impl Sink for ObjectStoreSink {
    async fn accept(&self, resource: &FetchedResource) -> Result<(), SinkError> {
        let resource_type =
            resource
                .link
                .resource_type
                .ok_or_else(|| SinkError::MissingResourceType {
                    file_name: resource.link.file_name.clone(),
                })?;

        let key = self.object_key(resource_type, &resource.link.file_name);
        self.client
            .put_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .content_type(&resource.content_type)
            .body(ByteStream::from(resource.payload.clone()))
            .send()
            .await
            .map_err(|e| SinkError::Upload {
                bucket: self.config.bucket.clone(),
                key: key.clone(),
                detail: e.to_string(),
            })?;

        tracing::info!(
            bucket = %self.config.bucket,
            key = %key,
            bytes = resource.payload.len(),
            "resource uploaded"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "object-store"
    }
}
