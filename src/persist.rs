//! Local durable state.
//!
//! The web client kept its state in browser storage under two keys; this
//! client mirrors that contract in a SQLite kv table. `chat-documents`
//! holds the serializable projection of the document map (preview URLs are
//! ephemeral and excluded by the model's serde attributes), `access_token`
//! holds the bearer issued at login.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::models::Document;

pub const DOCUMENTS_KEY: &str = "chat-documents";
pub const ACCESS_TOKEN_KEY: &str = "access_token";

pub async fn get(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM kv WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}

pub async fn put(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO kv (key, value, updated_at) VALUES (?, ?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
    )
    .bind(key)
    .bind(value)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete(pool: &SqlitePool, key: &str) -> Result<()> {
    sqlx::query("DELETE FROM kv WHERE key = ?")
        .bind(key)
        .execute(pool)
        .await?;
    Ok(())
}

/// Load the persisted document projection, or an empty set when nothing
/// was saved yet.
pub async fn load_documents(pool: &SqlitePool) -> Result<Vec<Document>> {
    match get(pool, DOCUMENTS_KEY).await? {
        Some(blob) => {
            let docs = serde_json::from_str(&blob)?;
            Ok(docs)
        }
        None => Ok(Vec::new()),
    }
}

pub async fn save_documents(pool: &SqlitePool, documents: &[Document]) -> Result<()> {
    let blob = serde_json::to_string(documents)?;
    put(pool, DOCUMENTS_KEY, &blob).await
}

pub async fn load_token(pool: &SqlitePool) -> Result<Option<String>> {
    get(pool, ACCESS_TOKEN_KEY).await
}

pub async fn save_token(pool: &SqlitePool, token: &str) -> Result<()> {
    put(pool, ACCESS_TOKEN_KEY, token).await
}

pub async fn clear_token(pool: &SqlitePool) -> Result<()> {
    delete(pool, ACCESS_TOKEN_KEY).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentSource, DocumentStatus};
    use crate::{db, migrate};
    use tempfile::TempDir;

    async fn test_pool() -> (TempDir, SqlitePool) {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect(&tmp.path().join("docsync.sqlite")).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        (tmp, pool)
    }

    fn sample_document(id: &str) -> Document {
        Document {
            id: id.to_string(),
            conversation_id: "c1".to_string(),
            source: DocumentSource::Chat,
            name: "notes.txt".to_string(),
            mime: "text/plain".to_string(),
            size: 12288,
            status: DocumentStatus::Completed,
            content: Some("hello world".to_string()),
            processed_data: None,
            metadata: None,
            preview_url: Some("blob:docsync/ephemeral".to_string()),
            stored_in_database: false,
            uploaded_at: chrono::Utc::now(),
            error: None,
        }
    }

    #[tokio::test]
    async fn kv_roundtrip_and_overwrite() {
        let (_tmp, pool) = test_pool().await;

        assert_eq!(get(&pool, "missing").await.unwrap(), None);

        put(&pool, ACCESS_TOKEN_KEY, "tok-1").await.unwrap();
        put(&pool, ACCESS_TOKEN_KEY, "tok-2").await.unwrap();
        assert_eq!(
            load_token(&pool).await.unwrap().as_deref(),
            Some("tok-2")
        );

        clear_token(&pool).await.unwrap();
        assert_eq!(load_token(&pool).await.unwrap(), None);
    }

    #[tokio::test]
    async fn persist_load_persist_is_stable() {
        let (_tmp, pool) = test_pool().await;

        let docs = vec![sample_document("d1"), sample_document("d2")];
        save_documents(&pool, &docs).await.unwrap();
        let first = get(&pool, DOCUMENTS_KEY).await.unwrap().unwrap();

        let loaded = load_documents(&pool).await.unwrap();
        assert_eq!(loaded.len(), 2);
        // Preview URLs are ephemeral and must not survive the round trip.
        assert!(loaded.iter().all(|d| d.preview_url.is_none()));

        save_documents(&pool, &loaded).await.unwrap();
        let second = get(&pool, DOCUMENTS_KEY).await.unwrap().unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn empty_store_loads_empty() {
        let (_tmp, pool) = test_pool().await;
        assert!(load_documents(&pool).await.unwrap().is_empty());
    }
}
