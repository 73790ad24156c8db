//! Media-transport collaborator: downloads a content-addressed remote file
//! either to bytes (photos) or to a temp file path (videos). Failures are
//! non-fatal at the item level.

use std::path::PathBuf;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("download failed: {0}")]
    Download(String),
}

#[async_trait]
pub trait MediaTransport: Send + Sync {
    async fn download_bytes(&self, file_id: &str) -> Result<Vec<u8>, TransportError>;
    async fn download_to_path(&self, file_id: &str) -> Result<PathBuf, TransportError>;
}
