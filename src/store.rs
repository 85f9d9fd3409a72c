//! The Document Store.
//!
//! Owns the in-memory, per-conversation document map and everything that
//! touches it: upload orchestration, deduplication, the status state
//! machine, preview-blob lifetimes, reconciliation commits, and the
//! reactive view. All mutations go through one committed update so every
//! emission is a complete, consistent snapshot; observers never see an
//! intermediate sub-state.
//!
//! Status transitions are driven exclusively by this type. An invalid
//! transition is an internal bug: it is logged and ignored rather than
//! allowed to corrupt state.

use anyhow::Result;
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

use crate::classify;
use crate::config::Config;
use crate::models::{
    Document, DocumentSource, DocumentStatus, ViewSnapshot, CONTENT_UNAVAILABLE,
};
use crate::persist;
use crate::reconcile;
use crate::transport::{FilePayload, Transport};
use crate::upload::{UploadScope, UploadStrategy};

/// Prompt handed to server-side processing for structured files.
const PROCESS_FILE_PROMPT: &str =
    "Analyze the uploaded file and return a JSON summary of its structure and contents.";

struct StoreState {
    documents: HashMap<String, Document>,
    /// Insertion order, for stable views.
    order: Vec<String>,
    /// Dedup key -> document id.
    dedup: HashMap<String, String>,
    /// Preview URL -> in-memory blob. Entries are removed exactly once.
    previews: HashMap<String, Arc<Vec<u8>>>,
    current_conversation: Option<String>,
}

impl StoreState {
    fn view(&self) -> ViewSnapshot {
        let documents = match &self.current_conversation {
            Some(conversation) => self
                .order
                .iter()
                .filter_map(|id| self.documents.get(id))
                .filter(|d| d.conversation_id == *conversation)
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        ViewSnapshot {
            conversation_id: self.current_conversation.clone(),
            documents,
        }
    }

    /// Serializable projection across every conversation.
    fn projection(&self) -> Vec<Document> {
        self.order
            .iter()
            .filter_map(|id| self.documents.get(id))
            .cloned()
            .collect()
    }
}

pub struct DocumentStore {
    state: Mutex<StoreState>,
    events: broadcast::Sender<ViewSnapshot>,
    snapshots: watch::Sender<Vec<Document>>,
    /// Bumped on every conversation switch; in-flight reconciliations
    /// carry the epoch they started under and discard their batch when it
    /// no longer matches.
    epoch: AtomicU64,
    transport: Transport,
    strategy: UploadStrategy,
    content_parallelism: usize,
    page_size: u32,
    pool: Option<SqlitePool>,
}

fn dedup_key(name: &str, size: u64, conversation_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(size.to_le_bytes());
    hasher.update(conversation_id.as_bytes());
    format!("{:x}", hasher.finalize())
}

impl DocumentStore {
    /// Build a store, restoring the persisted projection when a database
    /// pool is supplied. A persister task mirrors every change back;
    /// writes scheduled within the same tick collapse into one.
    pub async fn new(
        config: &Config,
        transport: Transport,
        pool: Option<SqlitePool>,
    ) -> Result<Arc<Self>> {
        let restored = match &pool {
            Some(pool) => persist::load_documents(pool).await?,
            None => Vec::new(),
        };

        let mut state = StoreState {
            documents: HashMap::new(),
            order: Vec::new(),
            dedup: HashMap::new(),
            previews: HashMap::new(),
            current_conversation: None,
        };
        for doc in restored {
            state
                .dedup
                .insert(dedup_key(&doc.name, doc.size, &doc.conversation_id), doc.id.clone());
            state.order.push(doc.id.clone());
            state.documents.insert(doc.id.clone(), doc);
        }

        let (events, _) = broadcast::channel(256);
        let (snapshots, snapshot_rx) = watch::channel(state.projection());

        let strategy = UploadStrategy::new(transport.clone(), config.uploads.clone());
        let store = Arc::new(Self {
            state: Mutex::new(state),
            events,
            snapshots,
            epoch: AtomicU64::new(0),
            transport,
            strategy,
            content_parallelism: config.reconcile.content_parallelism,
            page_size: config.reconcile.page_size,
            pool: pool.clone(),
        });

        if let Some(pool) = pool {
            let mut rx = snapshot_rx;
            tokio::spawn(async move {
                while rx.changed().await.is_ok() {
                    // Collapse back-to-back writes scheduled in the same tick.
                    tokio::task::yield_now().await;
                    let docs = rx.borrow_and_update().clone();
                    if let Err(e) = persist::save_documents(&pool, &docs).await {
                        eprintln!("Warning: failed to persist document snapshot: {e}");
                    }
                }
            });
        }

        Ok(store)
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Observe view snapshots. Every status transition and slice
    /// replacement produces exactly one emission.
    pub fn subscribe(&self) -> broadcast::Receiver<ViewSnapshot> {
        self.events.subscribe()
    }

    /// The current conversation's documents as of now.
    pub fn current_view(&self) -> ViewSnapshot {
        self.state().view()
    }

    pub fn get(&self, document_id: &str) -> Option<Document> {
        self.state().documents.get(document_id).cloned()
    }

    pub fn documents_for(&self, conversation_id: &str) -> Vec<Document> {
        let st = self.state();
        st.order
            .iter()
            .filter_map(|id| st.documents.get(id))
            .filter(|d| d.conversation_id == conversation_id)
            .cloned()
            .collect()
    }

    /// Number of live preview blobs. Used to verify the release contract.
    pub fn preview_count(&self) -> usize {
        self.state().previews.len()
    }

    fn emit(&self) {
        let (view, projection) = {
            let st = self.state();
            (st.view(), st.projection())
        };
        let _ = self.events.send(view);
        self.snapshots.send_replace(projection);
    }

    /// Write the current projection through immediately, bypassing the
    /// debounce. Used at shutdown.
    pub async fn flush(&self) -> Result<()> {
        if let Some(pool) = &self.pool {
            let projection = self.state().projection();
            persist::save_documents(pool, &projection).await?;
        }
        Ok(())
    }

    /// Advance a document's status, emitting on success. Illegal
    /// transitions are logged and ignored.
    fn transition(&self, document_id: &str, next: DocumentStatus) {
        let advanced = {
            let mut st = self.state();
            match st.documents.get_mut(document_id) {
                Some(doc) => match doc.advance(next) {
                    Ok(()) => true,
                    Err(e) => {
                        eprintln!("Warning: {e}");
                        false
                    }
                },
                None => false,
            }
        };
        if advanced {
            self.emit();
        }
    }

    fn revoke_preview(st: &mut StoreState, document_id: &str) {
        let Some(doc) = st.documents.get_mut(document_id) else {
            return;
        };
        let Some(url) = doc.preview_url.take() else {
            return;
        };
        if st.previews.remove(&url).is_none() {
            eprintln!(
                "Warning: {}",
                crate::models::IntegrityError::PreviewAlreadyRevoked(url)
            );
        }
    }

    // ---- upload ----

    /// Upload a file into a conversation.
    ///
    /// Idempotent on the `(name, size, conversation)` triple: a second
    /// call observing a matching record returns it synchronously without
    /// emitting or contacting the server. Fatal upload errors land the
    /// document in `failed` (with the joined diagnosis on `error`); they
    /// are reported through the record, not an `Err`.
    pub async fn upload(
        &self,
        file: FilePayload,
        conversation_id: &str,
        source: DocumentSource,
        token: Option<&str>,
    ) -> Document {
        let size = file.bytes.len() as u64;
        let key = dedup_key(&file.name, size, conversation_id);

        // Registration is a single critical section: there is no window in
        // which two uploads for the same triple can both begin.
        let document = {
            let mut st = self.state();
            if let Some(existing) = st.dedup.get(&key).cloned() {
                if let Some(doc) = st.documents.get(&existing) {
                    return doc.clone();
                }
                // Index pointed at a removed record; fall through and rebuild.
                st.dedup.remove(&key);
            }

            let id = Uuid::new_v4().to_string();
            let preview_url = format!("blob:docsync/{}", Uuid::new_v4());
            st.previews
                .insert(preview_url.clone(), Arc::new(file.bytes.clone()));

            let doc = Document {
                id: id.clone(),
                conversation_id: conversation_id.to_string(),
                source,
                name: file.name.clone(),
                mime: file.mime.clone(),
                size,
                status: DocumentStatus::Pending,
                content: None,
                processed_data: None,
                metadata: None,
                preview_url: Some(preview_url),
                stored_in_database: false,
                uploaded_at: Utc::now(),
                error: None,
            };
            st.dedup.insert(key, id.clone());
            st.order.push(id.clone());
            st.documents.insert(id.clone(), doc.clone());
            doc
        };
        self.emit();

        let id = document.id.clone();
        self.transition(&id, DocumentStatus::Uploading);

        if let Some(token) = token {
            self.remote_upload(&id, &file, conversation_id, source, token)
                .await;
        } else {
            // Offline-style: the bytes stay local, the record completes.
            self.transition(&id, DocumentStatus::Completed);
        }

        self.get(&id).unwrap_or(document)
    }

    async fn remote_upload(
        &self,
        document_id: &str,
        file: &FilePayload,
        conversation_id: &str,
        source: DocumentSource,
        token: &str,
    ) {
        let tags = match source {
            DocumentSource::Chat => Vec::new(),
            other => vec![other.as_str().to_string()],
        };
        let scope = UploadScope::Conversation {
            chat_id: conversation_id.to_string(),
            description: None,
            tags,
            proxy_only: source == DocumentSource::KnowledgeBase,
        };

        let metadata = match self.strategy.upload(file, token, &scope).await {
            Ok(metadata) => metadata,
            Err(e) => {
                {
                    let mut st = self.state();
                    if let Some(doc) = st.documents.get_mut(document_id) {
                        doc.error = Some(e.to_string());
                    }
                    // The preview blob stays: a failed upload never loses
                    // the caller's bytes.
                }
                self.transition(document_id, DocumentStatus::Failed);
                return;
            }
        };

        let file_id = metadata.id.clone();
        let mut content: Option<String> = None;
        let mut content_inlined = false;

        if classify::is_text_like(&file.name, &file.mime) {
            match self.transport.get_content(&file_id, token).await {
                Ok(resp) => {
                    content = Some(resp.content);
                    content_inlined = true;
                }
                Err(_) => content = Some(CONTENT_UNAVAILABLE.to_string()),
            }
        }

        // Attach remote state silently; the next status transition carries
        // it out in one snapshot.
        {
            let mut st = self.state();
            Self::revoke_preview(&mut st, document_id);
            if let Some(doc) = st.documents.get_mut(document_id) {
                doc.metadata = Some(metadata);
                doc.stored_in_database = true;
                doc.content = content;
            }
        }

        // Structured files without inline text go through server-side
        // processing; its failure is non-fatal.
        if classify::is_structured_data(&file.name) && !content_inlined {
            self.transition(document_id, DocumentStatus::Processing);
            match self.transport.process_file(file, PROCESS_FILE_PROMPT).await {
                Ok(resp) if resp.success => {
                    let mut st = self.state();
                    if let Some(doc) = st.documents.get_mut(document_id) {
                        doc.processed_data = resp.processed_data;
                    }
                }
                Ok(_) | Err(_) => {}
            }
        }

        self.transition(document_id, DocumentStatus::Completed);
    }

    // ---- removal ----

    /// Drop a document, revoking its preview URL exactly once. Removing an
    /// unknown id is a no-op.
    pub fn remove(&self, document_id: &str) -> bool {
        let removed = {
            let mut st = self.state();
            Self::revoke_preview(&mut st, document_id);
            let Some(doc) = st.documents.remove(document_id) else {
                return false;
            };
            st.order.retain(|id| id != document_id);
            let key = dedup_key(&doc.name, doc.size, &doc.conversation_id);
            if st.dedup.get(&key).map(|id| id == document_id).unwrap_or(false) {
                st.dedup.remove(&key);
            }
            true
        };
        if removed {
            self.emit();
        }
        removed
    }

    // ---- reconciliation ----

    /// Select a conversation and reconcile its slice against the server.
    ///
    /// Without a token the slice is reset instead. Observers see a single
    /// emission establishing the new conversation's documents; a switch
    /// that lands while an earlier reconciliation is still in flight
    /// cancels that batch before it can emit.
    pub async fn set_current_conversation(
        &self,
        conversation_id: Option<&str>,
        token: Option<&str>,
    ) {
        let my_epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut st = self.state();
            st.current_conversation = conversation_id.map(str::to_string);
        }

        let Some(conversation_id) = conversation_id else {
            self.emit();
            return;
        };

        let Some(token) = token else {
            // Token-less entry resets the slice being entered.
            {
                let mut st = self.state();
                let stale: Vec<String> = st
                    .order
                    .iter()
                    .filter(|id| {
                        st.documents
                            .get(*id)
                            .map(|d| d.conversation_id == conversation_id)
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect();
                for id in &stale {
                    Self::revoke_preview(&mut st, id);
                    if let Some(doc) = st.documents.remove(id) {
                        let key = dedup_key(&doc.name, doc.size, &doc.conversation_id);
                        st.dedup.remove(&key);
                    }
                }
                st.order.retain(|id| !stale.contains(id));
            }
            self.emit();
            return;
        };

        self.reconcile(conversation_id, token, my_epoch).await;
    }

    /// Explicit reconciliation of a conversation; equivalent to selecting
    /// it with a token.
    pub async fn load_conversation(&self, conversation_id: &str, token: &str) {
        self.set_current_conversation(Some(conversation_id), Some(token))
            .await;
    }

    async fn reconcile(&self, conversation_id: &str, token: &str, my_epoch: u64) {
        let cancelled = || self.epoch.load(Ordering::SeqCst) != my_epoch;

        let batch = match reconcile::fetch_conversation_documents(
            &self.transport,
            token,
            conversation_id,
            self.page_size,
            self.content_parallelism,
            cancelled,
        )
        .await
        {
            Ok(Some(batch)) => batch,
            Ok(None) => return, // superseded by a later switch
            Err(e) => {
                eprintln!("Warning: reconciliation for {conversation_id} failed: {e}");
                return;
            }
        };

        // Replace only the target conversation's slice, atomically from
        // the observer's perspective.
        let committed = {
            let mut st = self.state();
            if self.epoch.load(Ordering::SeqCst) != my_epoch {
                false
            } else {
                let stale: Vec<String> = st
                    .order
                    .iter()
                    .filter(|id| {
                        st.documents
                            .get(*id)
                            .map(|d| d.conversation_id == conversation_id)
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect();
                for id in &stale {
                    Self::revoke_preview(&mut st, id);
                    if let Some(doc) = st.documents.remove(id) {
                        let key = dedup_key(&doc.name, doc.size, &doc.conversation_id);
                        st.dedup.remove(&key);
                    }
                }
                st.order.retain(|id| !stale.contains(id));

                for doc in batch {
                    st.dedup.insert(
                        dedup_key(&doc.name, doc.size, &doc.conversation_id),
                        doc.id.clone(),
                    );
                    st.order.push(doc.id.clone());
                    st.documents.insert(doc.id.clone(), doc);
                }
                true
            }
        };

        if committed {
            self.emit();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    async fn offline_store() -> Arc<DocumentStore> {
        let config = Config::minimal();
        let transport = Transport::new(&config.api, None).unwrap();
        DocumentStore::new(&config, transport, None).await.unwrap()
    }

    fn payload(name: &str, mime: &str, bytes: &[u8]) -> FilePayload {
        FilePayload {
            name: name.to_string(),
            mime: mime.to_string(),
            bytes: bytes.to_vec(),
        }
    }

    #[tokio::test]
    async fn offline_upload_completes_with_ordered_emissions() {
        let store = offline_store().await;
        let mut rx = store.subscribe();
        store
            .set_current_conversation(Some("c1"), None)
            .await;
        let _ = rx.recv().await.unwrap(); // conversation selected

        let doc = store
            .upload(
                payload("notes.txt", "text/plain", b"hello"),
                "c1",
                DocumentSource::Chat,
                None,
            )
            .await;
        assert_eq!(doc.status, DocumentStatus::Completed);
        assert!(!doc.stored_in_database);

        let statuses: Vec<DocumentStatus> = [
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
        ]
        .iter()
        .map(|snap| snap.documents[0].status)
        .collect();
        assert_eq!(
            statuses,
            vec![
                DocumentStatus::Pending,
                DocumentStatus::Uploading,
                DocumentStatus::Completed
            ]
        );
    }

    #[tokio::test]
    async fn duplicate_upload_returns_existing_without_emitting() {
        let store = offline_store().await;

        let first = store
            .upload(
                payload("notes.txt", "text/plain", b"hello"),
                "c1",
                DocumentSource::Chat,
                None,
            )
            .await;

        let mut rx = store.subscribe();
        let second = store
            .upload(
                payload("notes.txt", "text/plain", b"hello"),
                "c1",
                DocumentSource::Chat,
                None,
            )
            .await;

        assert_eq!(first.id, second.id);
        assert!(rx.try_recv().is_err(), "duplicate upload must not emit");
    }

    #[tokio::test]
    async fn same_name_different_conversation_is_a_new_document() {
        let store = offline_store().await;

        let a = store
            .upload(
                payload("notes.txt", "text/plain", b"hello"),
                "c1",
                DocumentSource::Chat,
                None,
            )
            .await;
        let b = store
            .upload(
                payload("notes.txt", "text/plain", b"hello"),
                "c2",
                DocumentSource::Chat,
                None,
            )
            .await;
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn remove_revokes_preview_and_forgets_document() {
        let store = offline_store().await;

        let doc = store
            .upload(
                payload("notes.txt", "text/plain", b"hello"),
                "c1",
                DocumentSource::Chat,
                None,
            )
            .await;
        assert_eq!(store.preview_count(), 1);

        assert!(store.remove(&doc.id));
        assert_eq!(store.preview_count(), 0);
        assert!(store.get(&doc.id).is_none());

        // Removing again is a no-op, not a double revoke.
        assert!(!store.remove(&doc.id));

        // The triple is free again after removal.
        let again = store
            .upload(
                payload("notes.txt", "text/plain", b"hello"),
                "c1",
                DocumentSource::Chat,
                None,
            )
            .await;
        assert_ne!(again.id, doc.id);
    }

    #[tokio::test]
    async fn view_contains_only_selected_conversation() {
        let store = offline_store().await;
        store
            .upload(
                payload("a.txt", "text/plain", b"a"),
                "c1",
                DocumentSource::Chat,
                None,
            )
            .await;
        store
            .upload(
                payload("b.txt", "text/plain", b"b"),
                "c2",
                DocumentSource::Chat,
                None,
            )
            .await;

        store.set_current_conversation(Some("c1"), None).await;
        let view = store.current_view();
        assert_eq!(view.conversation_id.as_deref(), Some("c1"));
        // Token-less selection resets the entered conversation's slice.
        assert!(view.documents.is_empty());

        store.set_current_conversation(None, None).await;
        assert!(store.current_view().documents.is_empty());
    }

    #[tokio::test]
    async fn tokenless_switch_drops_only_target_slice() {
        let store = offline_store().await;
        store
            .upload(
                payload("a.txt", "text/plain", b"a"),
                "c1",
                DocumentSource::Chat,
                None,
            )
            .await;
        store
            .upload(
                payload("b.txt", "text/plain", b"b"),
                "c2",
                DocumentSource::Chat,
                None,
            )
            .await;

        store.set_current_conversation(Some("c1"), None).await;
        assert!(store.documents_for("c1").is_empty());
        assert_eq!(store.documents_for("c2").len(), 1);
    }
}
