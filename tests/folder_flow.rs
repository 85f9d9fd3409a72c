//! Folder coordination against a mock backend.

use std::sync::Mutex;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use docsync::config::Config;
use docsync::folders::{FolderCoordinator, MemberResolution};
use docsync::progress::{ProgressEvent, ProgressReporter};
use docsync::transport::{FilePayload, Transport};

fn coordinator_for(server: &MockServer) -> FolderCoordinator {
    let mut cfg = Config::minimal();
    cfg.api.base_url = server.uri();
    // Zero backoff keeps the failing-path retries quick.
    cfg.uploads.backoff_base_secs = 0;
    cfg.uploads.backoff_cap_secs = 0;
    let transport = Transport::new(&cfg.api, None).unwrap();
    FolderCoordinator::new(transport, cfg.uploads)
}

fn folder_json(id: &str, name: &str, members: &[&str]) -> serde_json::Value {
    json!({
        "id": id,
        "name": name,
        "fileIds": members,
        "type": "documents",
        "user_id": "u1",
        "created_at": "2025-06-01T10:30:00",
        "updated_at": "2025-06-02T08:00:00",
    })
}

/// `createFolder` followed by `getFolders` returns the same member set.
#[tokio::test]
async fn create_then_list_roundtrip() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/folders/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(folder_json("fo1", "research", &["d1", "d2"])),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/folders/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([folder_json("fo1", "research", &["d1", "d2"])])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let coordinator = coordinator_for(&server);
    let created = coordinator
        .create_folder("research", None, vec!["d1".into(), "d2".into()], "tok")
        .await
        .unwrap();
    assert_eq!(created.member_count(), 2);

    let listed = coordinator.get_folders("tok").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, created.id);
    assert_eq!(listed[0].file_ids, created.file_ids);
}

/// Updating with the same member list twice is idempotent.
#[tokio::test]
async fn update_is_idempotent_for_same_members() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/folders/fo1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(folder_json("fo1", "research", &["d3"])),
        )
        .expect(2)
        .mount(&server)
        .await;

    let coordinator = coordinator_for(&server);
    let first = coordinator
        .update_folder("fo1", "research", None, vec!["d3".into()], "tok")
        .await
        .unwrap();
    let second = coordinator
        .update_folder("fo1", "research", None, vec!["d3".into()], "tok")
        .await
        .unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn empty_name_is_rejected_client_side() {
    let server = MockServer::start().await;
    let coordinator = coordinator_for(&server);
    assert!(coordinator
        .create_folder("   ", None, vec![], "tok")
        .await
        .is_err());
}

/// Orphaned member ids resolve to `Unresolved` instead of failing the
/// whole lookup.
#[tokio::test]
async fn members_resolve_with_tolerated_orphans() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/files/metadata/d1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "d1",
            "filename": "kept.txt",
            "file_key": "u1/d1/kept.txt",
            "file_size": 10,
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/metadata/dx"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"detail": "File not found"})))
        .mount(&server)
        .await;

    let coordinator = coordinator_for(&server);
    let folder: docsync::models::Folder =
        serde_json::from_value(folder_json("fo1", "research", &["d1", "dx"])).unwrap();

    let resolutions = coordinator.resolve_members(&folder, "tok").await;
    assert_eq!(resolutions.len(), 2);
    assert!(matches!(
        &resolutions[0],
        MemberResolution::Resolved(meta) if meta.filename == "kept.txt"
    ));
    assert!(matches!(
        &resolutions[1],
        MemberResolution::Unresolved(id) if id == "dx"
    ));
}

/// Records the order of bulk-upload progress events.
#[derive(Default)]
struct RecordingProgress {
    lines: Mutex<Vec<String>>,
}

impl ProgressReporter for RecordingProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match event {
            ProgressEvent::UploadStarted { filename, .. } => format!("start {filename}"),
            ProgressEvent::UploadFinished { filename, ok } => {
                format!("finish {filename} {}", if ok { "ok" } else { "failed" })
            }
            ProgressEvent::ReportPolling { .. } => return,
        };
        self.lines.lock().unwrap().push(line);
    }
}

/// Bulk uploads run sequentially with per-file progress; one failure does
/// not stop the rest.
#[tokio::test]
async fn bulk_upload_reports_per_file_outcomes() {
    let server = MockServer::start().await;

    // First file succeeds via the folder proxy; afterwards the proxy is down.
    Mock::given(method("POST"))
        .and(path("/folders/fo1/files/proxy-upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "d-a",
            "filename": "a.csv",
            "file_key": "u1/d-a/a.csv",
            "file_type": "text/csv",
            "file_size": 4,
            "folder_id": "fo1",
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/folders/fo1/files/proxy-upload"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    // The direct fallback for the second file dies at the ticket step.
    Mock::given(method("POST"))
        .and(path("/folders/fo1/files/upload-url"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let coordinator = coordinator_for(&server);
    let progress = RecordingProgress::default();

    let files = vec![
        FilePayload {
            name: "a.csv".to_string(),
            mime: "text/csv".to_string(),
            bytes: b"1,2\n".to_vec(),
        },
        FilePayload {
            name: "b.csv".to_string(),
            mime: "text/csv".to_string(),
            bytes: b"3,4\n".to_vec(),
        },
    ];

    let summary = coordinator
        .upload_files(files, "fo1", "tok", &progress)
        .await;

    assert_eq!(summary.succeeded.len(), 1);
    assert_eq!(summary.succeeded[0].filename, "a.csv");
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0, "b.csv");
    assert!(!summary.all_succeeded());

    assert_eq!(
        *progress.lines.lock().unwrap(),
        vec![
            "start a.csv".to_string(),
            "finish a.csv ok".to_string(),
            "start b.csv".to_string(),
            "finish b.csv failed".to_string(),
        ]
    );
}

/// Deleting a folder removes the aggregate only.
#[tokio::test]
async fn delete_folder_succeeds() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/folders/fo1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"message": "Folder deleted"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let coordinator = coordinator_for(&server);
    coordinator.delete_folder("fo1", "tok").await.unwrap();
}
