//! Conversation reconciliation.
//!
//! On a conversation switch the store replaces its local slice with the
//! server's authoritative file list. This module does the remote half:
//! page through the listing, map each entry into a completed document,
//! and fetch textual content for text-like entries with bounded
//! parallelism. The caller commits the batch; a batch abandoned by a
//! later switch is discarded before it ever reaches an observer.

use anyhow::Result;
use chrono::Utc;
use std::collections::VecDeque;
use tokio::task::JoinSet;

use crate::classify;
use crate::models::{Document, DocumentSource, DocumentStatus, FileMetadata, CONTENT_UNAVAILABLE};
use crate::transport::Transport;

/// Hard upper bound on listing pages, in case the server never reports
/// `has_next = false`.
const MAX_PAGES: u32 = 100;

/// Convert one server listing entry into a local document.
pub fn document_from_metadata(meta: FileMetadata, conversation_id: &str) -> Document {
    Document {
        id: meta.id.clone(),
        conversation_id: conversation_id.to_string(),
        source: DocumentSource::from_tags(&meta.tags),
        name: meta.filename.clone(),
        mime: meta.file_type.clone(),
        size: meta.file_size,
        status: DocumentStatus::Completed,
        content: None,
        processed_data: None,
        preview_url: None,
        stored_in_database: true,
        uploaded_at: meta.created_at.unwrap_or_else(Utc::now),
        error: None,
        metadata: Some(meta),
    }
}

/// Fetch the authoritative document set for a conversation.
///
/// Returns `Ok(None)` when `cancelled()` reported the batch abandoned;
/// in-flight content fetches are aborted and nothing is surfaced.
pub async fn fetch_conversation_documents(
    transport: &Transport,
    token: &str,
    conversation_id: &str,
    page_size: u32,
    parallelism: usize,
    cancelled: impl Fn() -> bool,
) -> Result<Option<Vec<Document>>> {
    let mut documents = Vec::new();

    let mut page = 1u32;
    loop {
        let listing = transport
            .list_user_files(token, Some(conversation_id), page, page_size)
            .await?;
        documents.extend(
            listing
                .files
                .into_iter()
                .map(|meta| document_from_metadata(meta, conversation_id)),
        );

        if cancelled() {
            return Ok(None);
        }
        if !listing.has_next || page >= MAX_PAGES {
            break;
        }
        page += 1;
    }

    // Content fetches are per-document independent; run them in waves of
    // `parallelism` so neither the client's I/O nor the server is flooded.
    let mut pending: VecDeque<(usize, String)> = documents
        .iter()
        .enumerate()
        .filter(|(_, d)| classify::is_text_like(&d.name, &d.mime))
        .map(|(i, d)| (i, d.id.clone()))
        .collect();

    let mut in_flight: JoinSet<(usize, String)> = JoinSet::new();

    loop {
        while in_flight.len() < parallelism.max(1) {
            let Some((index, file_id)) = pending.pop_front() else {
                break;
            };
            let transport = transport.clone();
            let token = token.to_string();
            in_flight.spawn(async move {
                let content = match transport.get_content(&file_id, &token).await {
                    Ok(resp) => resp.content,
                    Err(_) => CONTENT_UNAVAILABLE.to_string(),
                };
                (index, content)
            });
        }

        if cancelled() {
            in_flight.abort_all();
            return Ok(None);
        }

        match in_flight.join_next().await {
            Some(Ok((index, content))) => {
                documents[index].content = Some(content);
            }
            Some(Err(_)) => {
                // A panicked or aborted fetch degrades to the sentinel.
            }
            None => break,
        }
    }

    if cancelled() {
        return Ok(None);
    }

    Ok(Some(documents))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_maps_to_completed_document() {
        let meta: FileMetadata = serde_json::from_value(serde_json::json!({
            "id": "f9",
            "filename": "notes.txt",
            "file_key": "u1/f9/notes.txt",
            "file_type": "text/plain",
            "file_size": 42,
            "tags": ["sidebar"],
            "download_url": "https://storage.example/u1/f9/notes.txt?sig=abc",
        }))
        .unwrap();

        let doc = document_from_metadata(meta, "c7");
        assert_eq!(doc.conversation_id, "c7");
        assert_eq!(doc.status, DocumentStatus::Completed);
        assert_eq!(doc.source, DocumentSource::Sidebar);
        assert!(doc.stored_in_database);
        assert_eq!(
            doc.url(),
            Some("https://storage.example/u1/f9/notes.txt?sig=abc")
        );
    }

    #[test]
    fn untagged_entries_map_to_chat() {
        let meta: FileMetadata = serde_json::from_value(serde_json::json!({
            "id": "f1",
            "filename": "photo.png",
            "file_key": "u1/f1/photo.png",
            "file_type": "image/png",
            "file_size": 2048,
        }))
        .unwrap();

        let doc = document_from_metadata(meta, "c1");
        assert_eq!(doc.source, DocumentSource::Chat);
        assert!(doc.content.is_none());
    }
}
