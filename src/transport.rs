//! Typed HTTP seam for every remote call.
//!
//! All traffic to the metadata service, object storage, the AI endpoint,
//! and the report generator passes through [`Transport`]. It owns URL
//! composition relative to the configured base, bearer authentication,
//! per-operation timeouts, and the normalizing adapter that absorbs the
//! server's variant payload shapes before anything reaches the store.
//!
//! # Error mapping
//!
//! Non-2xx responses become [`TransportError::Status`] carrying the HTTP
//! status, the best-effort parsed `detail` field, and the offending path,
//! never the bearer token. Timeouts and caller-side aborts surface as the
//! distinct [`TransportError::TimedOut`] so retry policies can tell them
//! apart from network failure.

use reqwest::multipart;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::config::ApiConfig;
use crate::models::{FileMetadata, Folder, JobStatus};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP {status} on {path}: {detail}")]
    Status {
        status: u16,
        path: String,
        detail: String,
    },
    #[error("request to {path} timed out or was cancelled")]
    TimedOut { path: String },
    #[error("network error on {path}: {source}")]
    Network {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected response body from {path}: {detail}")]
    Decode { path: String, detail: String },
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::TimedOut { .. })
    }

    /// Client errors (4xx) are never worth retrying.
    pub fn is_client_error(&self) -> bool {
        matches!(self.status(), Some(s) if (400..500).contains(&s))
    }
}

pub type TransportResult<T> = Result<T, TransportError>;

// ============ Request / response shapes ============

#[derive(Debug, Clone, Serialize)]
pub struct UploadTicketRequest {
    pub filename: String,
    pub file_type: String,
    pub file_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tags: Vec<String>,
}

/// Presigned upload ticket issued by `POST /files/upload-url`.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadTicket {
    pub upload_url: String,
    pub file_key: String,
    pub file_id: String,
    #[serde(default = "default_expires")]
    pub expires_in: u64,
}

fn default_expires() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentResponse {
    pub content: String,
    pub filename: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

/// One page of the user's file listing.
#[derive(Debug, Clone, Deserialize)]
pub struct FilePage {
    #[serde(default)]
    pub files: Vec<FileMetadata>,
    #[serde(default)]
    pub total_count: u64,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub page_size: u32,
    #[serde(default)]
    pub has_next: bool,
    #[serde(default)]
    pub has_previous: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetadataUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessFileResponse {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub file_info: Option<Value>,
    #[serde(default)]
    pub processed_data: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FolderPayload {
    pub name: String,
    #[serde(rename = "fileIds")]
    pub file_ids: Vec<String>,
    #[serde(rename = "type")]
    pub folder_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateReportResponse {
    pub success: bool,
    pub job_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobStatusResponse {
    pub status: JobStatus,
    #[serde(default)]
    pub progress: Option<u8>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl JobStatusResponse {
    /// The server spells render failures two ways; prefer the explicit one.
    pub fn failure_message(&self) -> Option<String> {
        self.error_message.clone().or_else(|| self.error.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportArtifact {
    pub filename: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub modified: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ReportListResponse {
    #[serde(default)]
    reports: Vec<ReportArtifact>,
}

// AI agent wire shapes (POST /agent/run).

#[derive(Debug, Serialize)]
struct AgentMessageWire {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct AgentInputWire {
    messages: Vec<AgentMessageWire>,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct AgentRequestWire {
    input: AgentInputWire,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct AgentOutputWire {
    content: String,
}

#[derive(Debug, Deserialize)]
struct AgentResponseWire {
    success: bool,
    #[serde(default)]
    output: Option<AgentOutputWire>,
    #[serde(default)]
    error: Option<String>,
}

/// A file ready for the wire: name, declared MIME, and bytes.
#[derive(Debug, Clone)]
pub struct FilePayload {
    pub name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

// ============ Transport ============

#[derive(Clone)]
pub struct Transport {
    client: Client,
    base_url: String,
    upload_timeout: Duration,
    request_timeout: Duration,
    health_timeout: Duration,
    storage_put_timeout: Duration,
    ai_api_url: Option<String>,
}

impl Transport {
    pub fn new(api: &ApiConfig, ai_api_url: Option<String>) -> anyhow::Result<Self> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            upload_timeout: Duration::from_secs(api.upload_timeout_secs),
            request_timeout: Duration::from_secs(api.request_timeout_secs),
            health_timeout: Duration::from_secs(api.health_timeout_secs),
            storage_put_timeout: Duration::from_secs(api.storage_put_timeout_secs),
            ai_api_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Download link for a finished report artifact.
    pub fn build_download_url(&self, filename: &str) -> String {
        self.url(&format!("/report/download/{filename}"))
    }

    fn map_send_error(path: &str, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::TimedOut {
                path: path.to_string(),
            }
        } else {
            TransportError::Network {
                path: path.to_string(),
                source: err,
            }
        }
    }

    /// Pull the server's `detail` field out of an error body, falling back
    /// to a truncated raw body.
    fn parse_detail(body: &str) -> String {
        if let Ok(value) = serde_json::from_str::<Value>(body) {
            if let Some(detail) = value.get("detail").and_then(|d| d.as_str()) {
                return detail.to_string();
            }
        }
        body.chars().take(500).collect()
    }

    async fn execute(&self, builder: RequestBuilder, path: &str) -> TransportResult<String> {
        let resp = builder
            .send()
            .await
            .map_err(|e| Self::map_send_error(path, e))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| Self::map_send_error(path, e))?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                path: path.to_string(),
                detail: Self::parse_detail(&body),
            });
        }

        Ok(body)
    }

    async fn execute_json<T: for<'de> Deserialize<'de>>(
        &self,
        builder: RequestBuilder,
        path: &str,
    ) -> TransportResult<T> {
        let body = self.execute(builder, path).await?;
        serde_json::from_str(&body).map_err(|e| TransportError::Decode {
            path: path.to_string(),
            detail: e.to_string(),
        })
    }

    fn multipart_file(file: &FilePayload) -> TransportResult<multipart::Part> {
        multipart::Part::bytes(file.bytes.clone())
            .file_name(file.name.clone())
            .mime_str(&file.mime)
            .map_err(|e| TransportError::Decode {
                path: "<multipart>".to_string(),
                detail: format!("invalid MIME '{}': {}", file.mime, e),
            })
    }

    // ---- files ----

    pub async fn create_upload_ticket(
        &self,
        request: &UploadTicketRequest,
        token: &str,
    ) -> TransportResult<UploadTicket> {
        let path = "/files/upload-url";
        let builder = self
            .client
            .post(self.url(path))
            .bearer_auth(token)
            .timeout(self.request_timeout)
            .json(request);
        self.execute_json(builder, path).await
    }

    /// Raw PUT to the presigned URL. Unauthenticated; the signature in the
    /// URL is the credential.
    pub async fn put_bytes_to_storage(
        &self,
        upload_url: &str,
        bytes: Vec<u8>,
        declared_mime: &str,
    ) -> TransportResult<()> {
        // Only the path is ever reported; presigned query params stay private.
        let path = upload_url
            .split('?')
            .next()
            .unwrap_or(upload_url)
            .to_string();
        let builder = self
            .client
            .put(upload_url)
            .header("Content-Type", declared_mime)
            .timeout(self.storage_put_timeout)
            .body(bytes);
        self.execute(builder, &path).await?;
        Ok(())
    }

    pub async fn proxy_upload(
        &self,
        file: &FilePayload,
        token: &str,
        chat_id: Option<&str>,
        description: Option<&str>,
        tags: &[String],
    ) -> TransportResult<FileMetadata> {
        let path = "/files/proxy-upload";
        let mut form = multipart::Form::new().part("file", Self::multipart_file(file)?);
        if let Some(chat_id) = chat_id {
            form = form.text("chat_id", chat_id.to_string());
        }
        if let Some(description) = description {
            form = form.text("description", description.to_string());
        }
        if !tags.is_empty() {
            // The server accepts a JSON-encoded array here.
            form = form.text("tags", serde_json::to_string(tags).unwrap_or_default());
        }

        let builder = self
            .client
            .post(self.url(path))
            .bearer_auth(token)
            .timeout(self.upload_timeout)
            .multipart(form);
        self.execute_json(builder, path).await
    }

    pub async fn get_metadata(&self, file_id: &str, token: &str) -> TransportResult<FileMetadata> {
        let path = format!("/files/metadata/{file_id}");
        let builder = self
            .client
            .get(self.url(&path))
            .bearer_auth(token)
            .timeout(self.request_timeout);
        self.execute_json(builder, &path).await
    }

    pub async fn update_metadata(
        &self,
        file_id: &str,
        update: &MetadataUpdate,
        token: &str,
    ) -> TransportResult<FileMetadata> {
        let path = format!("/files/metadata/{file_id}");
        let builder = self
            .client
            .put(self.url(&path))
            .bearer_auth(token)
            .timeout(self.request_timeout)
            .json(update);
        self.execute_json(builder, &path).await
    }

    pub async fn get_content(&self, file_id: &str, token: &str) -> TransportResult<ContentResponse> {
        let path = format!("/files/content/{file_id}");
        let builder = self
            .client
            .get(self.url(&path))
            .bearer_auth(token)
            .timeout(self.request_timeout);
        self.execute_json(builder, &path).await
    }

    pub async fn list_user_files(
        &self,
        token: &str,
        chat_id: Option<&str>,
        page: u32,
        page_size: u32,
    ) -> TransportResult<FilePage> {
        let path = "/files/list";
        let mut query: Vec<(&str, String)> = vec![
            ("page", page.to_string()),
            ("page_size", page_size.to_string()),
        ];
        if let Some(chat_id) = chat_id {
            query.push(("chat_id", chat_id.to_string()));
        }
        let builder = self
            .client
            .get(self.url(path))
            .query(&query)
            .bearer_auth(token)
            .timeout(self.request_timeout);
        self.execute_json(builder, path).await
    }

    pub async fn delete_file(&self, file_id: &str, token: &str) -> TransportResult<()> {
        let path = format!("/files/delete/{file_id}");
        let builder = self
            .client
            .delete(self.url(&path))
            .bearer_auth(token)
            .timeout(self.request_timeout);
        self.execute(builder, &path).await?;
        Ok(())
    }

    // ---- server-side processing ----

    pub async fn process_file(
        &self,
        file: &FilePayload,
        prompt: &str,
    ) -> TransportResult<ProcessFileResponse> {
        let path = "/file-processing/process-file";
        let mut form = multipart::Form::new()
            .part("file", Self::multipart_file(file)?)
            .text("prompt", prompt.to_string());
        if let Some(ref ai_api_url) = self.ai_api_url {
            form = form.text("ai_api_url", ai_api_url.clone());
        }

        let builder = self
            .client
            .post(self.url(path))
            .timeout(self.upload_timeout)
            .multipart(form);
        self.execute_json(builder, path).await
    }

    pub async fn health(&self) -> TransportResult<()> {
        let path = "/file-processing/health";
        let builder = self
            .client
            .get(self.url(path))
            .timeout(self.health_timeout);
        self.execute(builder, path).await?;
        Ok(())
    }

    // ---- folders ----

    pub async fn create_folder(
        &self,
        payload: &FolderPayload,
        token: &str,
    ) -> TransportResult<Folder> {
        let path = "/folders/";
        let builder = self
            .client
            .post(self.url(path))
            .bearer_auth(token)
            .timeout(self.request_timeout)
            .json(payload);
        self.execute_json(builder, path).await
    }

    pub async fn update_folder(
        &self,
        folder_id: &str,
        payload: &FolderPayload,
        token: &str,
    ) -> TransportResult<Folder> {
        let path = format!("/folders/{folder_id}");
        let builder = self
            .client
            .put(self.url(&path))
            .bearer_auth(token)
            .timeout(self.request_timeout)
            .json(payload);
        self.execute_json(builder, &path).await
    }

    pub async fn get_folders(&self, token: &str) -> TransportResult<Vec<Folder>> {
        let path = "/folders/";
        let builder = self
            .client
            .get(self.url(path))
            .bearer_auth(token)
            .timeout(self.request_timeout);
        self.execute_json(builder, path).await
    }

    pub async fn delete_folder(&self, folder_id: &str, token: &str) -> TransportResult<()> {
        let path = format!("/folders/{folder_id}");
        let builder = self
            .client
            .delete(self.url(&path))
            .bearer_auth(token)
            .timeout(self.request_timeout);
        self.execute(builder, &path).await?;
        Ok(())
    }

    pub async fn folder_upload_ticket(
        &self,
        folder_id: &str,
        request: &UploadTicketRequest,
        token: &str,
    ) -> TransportResult<UploadTicket> {
        let path = format!("/folders/{folder_id}/files/upload-url");
        let builder = self
            .client
            .post(self.url(&path))
            .bearer_auth(token)
            .timeout(self.request_timeout)
            .json(request);
        self.execute_json(builder, &path).await
    }

    /// Attach a directly-uploaded file to its folder.
    pub async fn folder_complete_upload(
        &self,
        folder_id: &str,
        file_id: &str,
        token: &str,
    ) -> TransportResult<()> {
        let path = format!("/folders/{folder_id}/files/{file_id}/complete");
        let builder = self
            .client
            .post(self.url(&path))
            .bearer_auth(token)
            .timeout(self.request_timeout);
        self.execute(builder, &path).await?;
        Ok(())
    }

    pub async fn folder_proxy_upload(
        &self,
        folder_id: &str,
        file: &FilePayload,
        token: &str,
    ) -> TransportResult<FileMetadata> {
        let path = format!("/folders/{folder_id}/files/proxy-upload");
        let form = multipart::Form::new().part("file", Self::multipart_file(file)?);
        let builder = self
            .client
            .post(self.url(&path))
            .bearer_auth(token)
            .timeout(self.upload_timeout)
            .multipart(form);
        self.execute_json(builder, &path).await
    }

    // ---- reports ----

    pub async fn generate_excel_async(
        &self,
        config: &Value,
        filename: &str,
    ) -> TransportResult<GenerateReportResponse> {
        let path = "/report/generate-excel-async";
        let builder = self
            .client
            .post(self.url(path))
            .timeout(self.request_timeout)
            .json(&serde_json::json!({ "config": config, "filename": filename }));
        self.execute_json(builder, path).await
    }

    pub async fn get_job_status(&self, job_id: &str) -> TransportResult<JobStatusResponse> {
        let path = format!("/report/job-status/{job_id}");
        let builder = self
            .client
            .get(self.url(&path))
            .timeout(self.request_timeout);
        self.execute_json(builder, &path).await
    }

    pub async fn list_reports(&self) -> TransportResult<Vec<ReportArtifact>> {
        let path = "/report/list";
        let builder = self
            .client
            .get(self.url(path))
            .timeout(self.request_timeout);
        let resp: ReportListResponse = self.execute_json(builder, path).await?;
        Ok(resp.reports)
    }

    pub async fn delete_report(&self, filename: &str) -> TransportResult<()> {
        let path = format!("/report/delete/{filename}");
        let builder = self
            .client
            .delete(self.url(&path))
            .timeout(self.request_timeout);
        self.execute(builder, &path).await?;
        Ok(())
    }

    // ---- AI completion ----

    /// Submit a transcript to the AI endpoint in raw-response mode and
    /// return the assistant text.
    pub async fn run_agent(
        &self,
        messages: &[crate::models::ChatMessage],
        token: &str,
    ) -> TransportResult<String> {
        let path = "/agent/run";
        let url = match self.ai_api_url {
            Some(ref ai) => ai.clone(),
            None => self.url(path),
        };

        let request = AgentRequestWire {
            input: AgentInputWire {
                messages: messages
                    .iter()
                    .map(|m| AgentMessageWire {
                        role: m.role.as_str(),
                        content: m.content.clone(),
                    })
                    .collect(),
                session_id: None,
            },
            stream: false,
        };

        let builder = self
            .client
            .post(&url)
            .bearer_auth(token)
            .timeout(self.upload_timeout)
            .json(&request);
        let resp: AgentResponseWire = self.execute_json(builder, path).await?;

        if !resp.success {
            return Err(TransportError::Status {
                status: 200,
                path: path.to_string(),
                detail: resp
                    .error
                    .unwrap_or_else(|| "AI request unsuccessful".to_string()),
            });
        }

        resp.output
            .map(|o| o.content)
            .ok_or_else(|| TransportError::Decode {
                path: path.to_string(),
                detail: "successful AI response carried no output".to_string(),
            })
    }
}
