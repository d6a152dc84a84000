//! Local file destination

use async_trait::async_trait;

use crate::config::FileSinkConfig;
use crate::error::SinkError;
use crate::sink::Sink;
use crate::types::FetchedResource;

/// Writes each fetched payload into a local directory
///
/// The output directory is created on first write; an existing file with the
/// same name is overwritten. Requires only the file name, so resources with
/// no inferred type are accepted.
#[derive(Clone, Debug)]
pub struct FileSink {
    config: FileSinkConfig,
}

impl FileSink {
    /// Create a file sink for the configured directory
    #[must_use]
    pub fn new(config: FileSinkConfig) -> Self {
        Self { config }
    }

    fn file_name(&self, resource: &FetchedResource) -> String {
        match &self.config.file_prefix {
            Some(prefix) => format!("{prefix}{}", resource.link.file_name),
            None => resource.link.file_name.clone(),
        }
    }
}

#[async_trait]
impl Sink for FileSink {
    async fn accept(&self, resource: &FetchedResource) -> Result<(), SinkError> {
        tokio::fs::create_dir_all(&self.config.output_dir)
            .await
            .map_err(|source| SinkError::Io {
                path: self.config.output_dir.clone(),
                source,
            })?;

        let path = self.config.output_dir.join(self.file_name(resource));
        tokio::fs::write(&path, &resource.payload)
            .await
            .map_err(|source| SinkError::Io {
                path: path.clone(),
                source,
            })?;

        tracing::info!(path = %path.display(), bytes = resource.payload.len(), "resource written");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
