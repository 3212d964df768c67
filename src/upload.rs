use std::path::{Path, PathBuf};

use tracing::{debug, info};
use url::Url;

use crate::api::{ChannelId, ChatApi, OutgoingAttachment, OutgoingMessage, RawMessage};
use crate::error::{Result, TencordError};

/// A negotiated storage slot for one file.
///
/// Only [`AttachmentPipeline::negotiate`] creates one and
/// [`AttachmentPipeline::transfer`] takes it by value, so a session can never
/// be used twice.
#[derive(Debug)]
pub struct UploadSession {
    upload_url: String,
    storage_filename: String,
    local_path: PathBuf,
    filename: String,
    declared_size: u64,
}

impl UploadSession {
    pub fn upload_url(&self) -> &str {
        &self.upload_url
    }

    pub fn storage_filename(&self) -> &str {
        &self.storage_filename
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn declared_size(&self) -> u64 {
        self.declared_size
    }
}

/// Proof that the bytes reached storage. The only input `commit` accepts.
#[derive(Debug)]
pub struct UploadReceipt {
    filename: String,
    storage_filename: String,
}

/// negotiate → transfer → commit. Each step must succeed before the next one
/// runs; nothing is posted for an upload that did not complete.
pub struct AttachmentPipeline<'a> {
    api: &'a dyn ChatApi,
    max_upload_bytes: u64,
}

impl<'a> AttachmentPipeline<'a> {
    pub fn new(api: &'a dyn ChatApi, max_upload_bytes: u64) -> Self {
        Self {
            api,
            max_upload_bytes,
        }
    }

    /// Upload `path` and post it to `channel` with `caption`.
    pub async fn send(&self, channel: &ChannelId, path: &Path, caption: &str) -> Result<RawMessage> {
        let session = self.negotiate(channel, path).await?;
        let receipt = self.transfer(session).await?;
        let message = self.commit(channel, caption, receipt).await?;
        info!("Posted attachment {} to {channel}", path.display());
        Ok(message)
    }

    /// Validate the local file, then ask the service for a storage slot.
    pub async fn negotiate(&self, channel: &ChannelId, path: &Path) -> Result<UploadSession> {
        let (filename, size) = self.inspect(path).await?;

        let slot = self.api.negotiate_upload(channel, &filename, size).await?;
        let url = Url::parse(&slot.upload_url).map_err(|e| {
            TencordError::InvalidRequest(format!("bad upload URL {}: {e}", slot.upload_url))
        })?;
        if !url.query_pairs().any(|(k, _)| k == "upload_id") {
            return Err(TencordError::InvalidRequest(format!(
                "upload URL has no upload_id: {}",
                slot.upload_url
            )));
        }
        debug!("Negotiated upload of {filename} as {}", slot.upload_filename);

        Ok(UploadSession {
            upload_url: slot.upload_url,
            storage_filename: slot.upload_filename,
            local_path: path.to_path_buf(),
            filename,
            declared_size: size,
        })
    }

    /// Read the file and PUT it to the negotiated slot.
    pub async fn transfer(&self, session: UploadSession) -> Result<UploadReceipt> {
        let bytes = tokio::fs::read(&session.local_path).await.map_err(|e| {
            TencordError::Transfer(format!("read {}: {e}", session.local_path.display()))
        })?;
        if bytes.len() as u64 != session.declared_size {
            return Err(TencordError::Transfer(format!(
                "{} changed size during upload ({} bytes declared, {} read)",
                session.local_path.display(),
                session.declared_size,
                bytes.len()
            )));
        }

        self.api
            .transfer(&session.upload_url, bytes)
            .await
            .map_err(|e| TencordError::Transfer(e.to_string()))?;

        Ok(UploadReceipt {
            filename: session.filename,
            storage_filename: session.storage_filename,
        })
    }

    /// Post a message that references the uploaded object.
    pub async fn commit(
        &self,
        channel: &ChannelId,
        caption: &str,
        receipt: UploadReceipt,
    ) -> Result<RawMessage> {
        let message = OutgoingMessage {
            content: caption.to_string(),
            attachments: vec![OutgoingAttachment {
                id: "0".to_string(),
                filename: receipt.filename,
                uploaded_filename: receipt.storage_filename,
            }],
        };
        self.api.send_message(channel, &message).await
    }

    /// Regular file, within the size limit. No network involved.
    async fn inspect(&self, path: &Path) -> Result<(String, u64)> {
        let metadata = tokio::fs::metadata(path).await.map_err(|e| {
            TencordError::InvalidRequest(format!("cannot attach {}: {e}", path.display()))
        })?;
        if !metadata.is_file() {
            return Err(TencordError::InvalidRequest(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        if metadata.len() > self.max_upload_bytes {
            return Err(TencordError::InvalidRequest(format!(
                "{} is {} bytes, the limit is {}",
                path.display(),
                metadata.len(),
                self.max_upload_bytes
            )));
        }
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                TencordError::InvalidRequest(format!("{} has no file name", path.display()))
            })?;
        Ok((filename, metadata.len()))
    }
}
