//! Upload strategy.
//!
//! Places file bytes in object storage and commits metadata. The proxy
//! path (one multipart POST, server does the storage write) is always
//! tried first because it sidesteps cross-origin restrictions on the
//! storage endpoint. Only when the proxy fails does the three-step direct
//! path run: obtain a presigned ticket, PUT the bytes with bounded
//! retries, then fetch canonical metadata. When both paths fail the
//! errors are joined so the caller can log the full diagnosis.

use anyhow::{anyhow, Result};
use std::time::Duration;

use crate::config::UploadConfig;
use crate::models::FileMetadata;
use crate::transport::{FilePayload, Transport, TransportError, UploadTicketRequest};

/// Where an upload lands: a conversation's document set or a folder.
#[derive(Debug, Clone)]
pub enum UploadScope {
    Conversation {
        chat_id: String,
        description: Option<String>,
        tags: Vec<String>,
        /// Knowledge-base uploads only implement the proxy path; the
        /// direct fallback is deliberately not attempted for them.
        proxy_only: bool,
    },
    Folder {
        folder_id: String,
    },
}

#[derive(Clone)]
pub struct UploadStrategy {
    transport: Transport,
    retry: UploadConfig,
}

impl UploadStrategy {
    pub fn new(transport: Transport, retry: UploadConfig) -> Self {
        Self { transport, retry }
    }

    /// Upload `file` under `scope`, returning the canonical metadata.
    pub async fn upload(
        &self,
        file: &FilePayload,
        token: &str,
        scope: &UploadScope,
    ) -> Result<FileMetadata> {
        match scope {
            UploadScope::Conversation {
                chat_id,
                description,
                tags,
                proxy_only,
            } => {
                let proxy_err = match self
                    .transport
                    .proxy_upload(file, token, Some(chat_id), description.as_deref(), tags)
                    .await
                {
                    Ok(metadata) => return Ok(metadata),
                    Err(e) => e,
                };

                if *proxy_only {
                    return Err(anyhow!("proxy upload failed: {proxy_err}"));
                }

                match self
                    .direct_upload(file, token, Some(chat_id), description, tags)
                    .await
                {
                    Ok(metadata) => Ok(metadata),
                    Err(direct_err) => Err(anyhow!(
                        "proxy upload failed ({proxy_err}); direct upload failed ({direct_err})"
                    )),
                }
            }
            UploadScope::Folder { folder_id } => {
                let proxy_err = match self
                    .transport
                    .folder_proxy_upload(folder_id, file, token)
                    .await
                {
                    Ok(metadata) => return Ok(metadata),
                    Err(e) => e,
                };

                match self.direct_folder_upload(file, token, folder_id).await {
                    Ok(metadata) => Ok(metadata),
                    Err(direct_err) => Err(anyhow!(
                        "proxy upload failed ({proxy_err}); direct upload failed ({direct_err})"
                    )),
                }
            }
        }
    }

    async fn direct_upload(
        &self,
        file: &FilePayload,
        token: &str,
        chat_id: Option<&str>,
        description: &Option<String>,
        tags: &[String],
    ) -> Result<FileMetadata> {
        let ticket = self
            .transport
            .create_upload_ticket(
                &UploadTicketRequest {
                    filename: file.name.clone(),
                    file_type: file.mime.clone(),
                    file_size: file.bytes.len() as u64,
                    chat_id: chat_id.map(str::to_string),
                    folder_id: None,
                    description: description.clone(),
                    tags: tags.to_vec(),
                },
                token,
            )
            .await?;

        self.put_with_retries(&ticket.upload_url, file).await?;

        let metadata = self.transport.get_metadata(&ticket.file_id, token).await?;
        Ok(metadata)
    }

    async fn direct_folder_upload(
        &self,
        file: &FilePayload,
        token: &str,
        folder_id: &str,
    ) -> Result<FileMetadata> {
        let ticket = self
            .transport
            .folder_upload_ticket(
                folder_id,
                &UploadTicketRequest {
                    filename: file.name.clone(),
                    file_type: file.mime.clone(),
                    file_size: file.bytes.len() as u64,
                    chat_id: None,
                    folder_id: Some(folder_id.to_string()),
                    description: None,
                    tags: Vec::new(),
                },
                token,
            )
            .await?;

        self.put_with_retries(&ticket.upload_url, file).await?;

        self.transport
            .folder_complete_upload(folder_id, &ticket.file_id, token)
            .await?;

        let metadata = self.transport.get_metadata(&ticket.file_id, token).await?;
        Ok(metadata)
    }

    /// PUT the bytes to the presigned URL. The first attempt plus up to
    /// `max_put_retries` more; 4xx fails immediately, 5xx / network /
    /// per-attempt timeout back off and retry. Caller cancellation drops
    /// the future, so an aborted attempt is never retried.
    async fn put_with_retries(&self, upload_url: &str, file: &FilePayload) -> Result<()> {
        let mut last_err: Option<TransportError> = None;

        for attempt in 0..=self.retry.max_put_retries {
            if attempt > 0 {
                let delay = (self.retry.backoff_base_secs << (attempt - 1))
                    .min(self.retry.backoff_cap_secs);
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }

            match self
                .transport
                .put_bytes_to_storage(upload_url, file.bytes.clone(), &file.mime)
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) if e.is_client_error() => {
                    return Err(anyhow!("storage PUT rejected: {e}"));
                }
                Err(e) => {
                    last_err = Some(e);
                }
            }
        }

        let detail = last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempt completed".to_string());
        Err(anyhow!(
            "storage PUT failed after {} attempts: {}",
            self.retry.max_put_retries + 1,
            detail
        ))
    }
}
