//! Core data models used throughout docsync.
//!
//! These types represent the documents, folders, and report jobs that flow
//! through the upload, reconciliation, and report pipelines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sentinel recorded on a document when its textual content could not be
/// fetched. Content failures never fail the document itself.
pub const CONTENT_UNAVAILABLE: &str = "Content not available";

/// Where an upload originated in the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentSource {
    Chat,
    Sidebar,
    Folder,
    KnowledgeBase,
}

impl DocumentSource {
    /// Derive the source tag for a server-listed file from its tag set.
    pub fn from_tags(tags: &[String]) -> Self {
        if tags.iter().any(|t| t == "sidebar") {
            DocumentSource::Sidebar
        } else {
            DocumentSource::Chat
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentSource::Chat => "chat",
            DocumentSource::Sidebar => "sidebar",
            DocumentSource::Folder => "folder",
            DocumentSource::KnowledgeBase => "knowledge-base",
        }
    }
}

/// Per-document processing status.
///
/// ```text
/// pending ──► uploading ──► processing ──► completed
///    │            │             │
///    └────────────┴─────────────┴──► failed     (terminal)
/// ```
///
/// The progression is forward-only; stations may be skipped (an offline
/// upload goes straight from `uploading` to `completed`), and `failed` is
/// reachable from any non-terminal state. Terminal states never transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Uploading,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Completed | DocumentStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            DocumentStatus::Pending => 0,
            DocumentStatus::Uploading => 1,
            DocumentStatus::Processing => 2,
            DocumentStatus::Completed => 3,
            DocumentStatus::Failed => 3,
        }
    }

    /// Whether `self → next` is a legal state-machine transition.
    pub fn can_advance_to(&self, next: DocumentStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            DocumentStatus::Failed => true,
            _ => next.rank() > self.rank(),
        }
    }
}

/// Internal consistency violation. Coordinators log and ignore these
/// rather than corrupt state.
#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("invalid status transition {from:?} -> {to:?} for document {id}")]
    InvalidTransition {
        id: String,
        from: DocumentStatus,
        to: DocumentStatus,
    },
    #[error("preview URL {0} already revoked")]
    PreviewAlreadyRevoked(String),
}

fn default_mime() -> String {
    "application/octet-stream".to_string()
}

/// Canonical file metadata as normalized at the transport boundary.
///
/// The server mixes shapes across endpoints (`id` vs `_id`, `size` vs
/// `file_size`, naive vs offset-carrying timestamps); the aliases and the
/// flexible timestamp codec absorb every variant here so nothing downstream
/// ever sees them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileMetadata {
    #[serde(alias = "_id")]
    pub id: String,
    pub filename: String,
    pub file_key: String,
    #[serde(default = "default_mime")]
    pub file_type: String,
    #[serde(alias = "size")]
    pub file_size: u64,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub folder_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default, with = "flexible_ts")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, with = "flexible_ts")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// The coordinator's unit of work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: String,
    pub conversation_id: String,
    pub source: DocumentSource,
    pub name: String,
    pub mime: String,
    pub size: u64,
    pub status: DocumentStatus,
    /// Server-rendered textual content; only set for text-like files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Structured summary produced by server-side processing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_data: Option<serde_json::Value>,
    /// Present iff the upload reached the metadata index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<FileMetadata>,
    /// Ephemeral handle to the in-memory blob; never persisted.
    #[serde(skip)]
    pub preview_url: Option<String>,
    pub stored_in_database: bool,
    pub uploaded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Document {
    /// The link consumers should render: the server-issued download URL once
    /// the upload committed, the local preview before that.
    pub fn url(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.download_url.as_deref())
            .or(self.preview_url.as_deref())
    }

    pub(crate) fn advance(&mut self, next: DocumentStatus) -> Result<(), IntegrityError> {
        if !self.status.can_advance_to(next) {
            return Err(IntegrityError::InvalidTransition {
                id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

/// Atomic snapshot of the currently-selected conversation's documents.
#[derive(Debug, Clone, Default)]
pub struct ViewSnapshot {
    pub conversation_id: Option<String>,
    pub documents: Vec<Document>,
}

/// A named aggregate referencing document identifiers. Folders do not own
/// file bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Folder {
    pub id: String,
    pub name: String,
    #[serde(rename = "fileIds", default)]
    pub file_ids: Vec<String>,
    #[serde(rename = "type", default = "default_folder_type")]
    pub folder_type: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default, with = "flexible_ts")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, with = "flexible_ts")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_folder_type() -> String {
    "documents".to_string()
}

impl Folder {
    pub fn member_count(&self) -> usize {
        self.file_ids.len()
    }
}

/// Report job lifecycle status. `pending` is the legacy wire spelling of
/// `queued` and is mapped here; any other unknown value is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[serde(alias = "pending")]
    Queued,
    Processing,
    Completed,
    Failed,
}

/// One report generation workflow, from configuration synthesis to the
/// downloadable artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportJob {
    pub job_id: String,
    pub filename: String,
    pub status: JobStatus,
    pub progress_percent: u8,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Set once the job completed.
    #[serde(default)]
    pub download_url: Option<String>,
}

/// Canonical chat role vocabulary. The wire occasionally says `ai` for
/// assistant turns; that spelling is mapped on input and never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn from_wire(role: &str) -> Self {
        match role {
            "assistant" | "ai" => ChatRole::Assistant,
            _ => ChatRole::User,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

/// One transcript turn handed to the report pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Timestamp codec tolerating both RFC 3339 and the backend's naive
/// `datetime.isoformat()` output (no offset; treated as UTC).
mod flexible_ts {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(dt) => serializer.serialize_str(&dt.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(Some(dt.with_timezone(&Utc)));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f") {
            return Ok(Some(naive.and_utc()));
        }

        Err(serde::de::Error::custom(format!(
            "unrecognized timestamp: {raw}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_never_transition() {
        for terminal in [DocumentStatus::Completed, DocumentStatus::Failed] {
            for next in [
                DocumentStatus::Pending,
                DocumentStatus::Uploading,
                DocumentStatus::Processing,
                DocumentStatus::Completed,
                DocumentStatus::Failed,
            ] {
                assert!(!terminal.can_advance_to(next), "{terminal:?} -> {next:?}");
            }
        }
    }

    #[test]
    fn forward_transitions_allowed() {
        assert!(DocumentStatus::Pending.can_advance_to(DocumentStatus::Uploading));
        assert!(DocumentStatus::Uploading.can_advance_to(DocumentStatus::Processing));
        assert!(DocumentStatus::Uploading.can_advance_to(DocumentStatus::Completed));
        assert!(DocumentStatus::Processing.can_advance_to(DocumentStatus::Completed));
        assert!(DocumentStatus::Pending.can_advance_to(DocumentStatus::Failed));
    }

    #[test]
    fn backward_transitions_rejected() {
        assert!(!DocumentStatus::Uploading.can_advance_to(DocumentStatus::Pending));
        assert!(!DocumentStatus::Processing.can_advance_to(DocumentStatus::Uploading));
        assert!(!DocumentStatus::Uploading.can_advance_to(DocumentStatus::Uploading));
    }

    #[test]
    fn metadata_accepts_variant_keys() {
        let with_underscore_id: FileMetadata = serde_json::from_value(serde_json::json!({
            "_id": "abc123",
            "filename": "notes.txt",
            "file_key": "u1/notes.txt",
            "size": 12288,
            "created_at": "2025-06-01T10:30:00.123456",
        }))
        .unwrap();
        assert_eq!(with_underscore_id.id, "abc123");
        assert_eq!(with_underscore_id.file_size, 12288);
        assert_eq!(with_underscore_id.file_type, "application/octet-stream");
        assert!(with_underscore_id.created_at.is_some());

        let plain: FileMetadata = serde_json::from_value(serde_json::json!({
            "id": "abc123",
            "filename": "notes.txt",
            "file_key": "u1/notes.txt",
            "file_type": "text/plain",
            "file_size": 12288,
            "created_at": "2025-06-01T10:30:00Z",
        }))
        .unwrap();
        assert_eq!(plain.id, "abc123");
        assert_eq!(plain.file_type, "text/plain");
    }

    #[test]
    fn job_status_maps_pending_and_rejects_unknown() {
        let queued: JobStatus = serde_json::from_str("\"pending\"").unwrap();
        assert_eq!(queued, JobStatus::Queued);
        assert!(serde_json::from_str::<JobStatus>("\"cancelled\"").is_err());
    }

    #[test]
    fn role_vocabulary_canonicalized() {
        assert_eq!(ChatRole::from_wire("ai"), ChatRole::Assistant);
        assert_eq!(ChatRole::from_wire("assistant"), ChatRole::Assistant);
        assert_eq!(ChatRole::from_wire("user"), ChatRole::User);
    }

    #[test]
    fn document_serialization_skips_preview() {
        let doc = Document {
            id: "d1".to_string(),
            conversation_id: "c1".to_string(),
            source: DocumentSource::Chat,
            name: "notes.txt".to_string(),
            mime: "text/plain".to_string(),
            size: 12,
            status: DocumentStatus::Completed,
            content: None,
            processed_data: None,
            metadata: None,
            preview_url: Some("blob:docsync/xyz".to_string()),
            stored_in_database: false,
            uploaded_at: Utc::now(),
            error: None,
        };
        let json = serde_json::to_value(&doc).unwrap();
        assert!(json.get("preview_url").is_none());

        let restored: Document = serde_json::from_value(json).unwrap();
        assert_eq!(restored.preview_url, None);
    }

    #[test]
    fn source_tag_mapping() {
        let sidebar = vec!["report".to_string(), "sidebar".to_string()];
        assert_eq!(DocumentSource::from_tags(&sidebar), DocumentSource::Sidebar);
        assert_eq!(DocumentSource::from_tags(&[]), DocumentSource::Chat);
    }
}
