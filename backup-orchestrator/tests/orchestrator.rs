//! End-to-end operation flows with a scripted engine.

use backup_orchestrator::config::{EngineConfig, SpaceConfig};
use backup_orchestrator::location::{SpaceResolver, StaticResolver};
use backup_orchestrator::ops::{BackupRequest, RestoreRequest};
use backup_orchestrator::repository::credentials::{ENV_ACCESS_KEY, ENV_REPOSITORY, ENV_SESSION_TOKEN};
use backup_orchestrator::snapshot::{self, BackupType};
use backup_orchestrator::space::{SpaceClient, TokenManager};
use backup_orchestrator::test_support::{EngineScript, ScriptedSpawner};
use backup_orchestrator::utils::BackoffPolicy;
use backup_orchestrator::{
    Engine, FailureKind, OperationContext, Orchestrator, OrchestratorError, ProgressCallback, ProgressEvent,
    StorageLocation,
};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const EXPIRED: &str = "Fatal: unable to open config file: Stat: The provided token has expired.";
const EXISTS: &str = "Fatal: create repository failed: config file already exists";
const MISSING: &str = "Fatal: repository does not exist: unable to open config file";

const SNAPSHOT_ID: &str = "4f2c1a9be0d34c8f9a1b2c3d4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f6071";

fn initialized() -> EngineScript {
    EngineScript::stdout(&[r#"{"message_type":"initialized","id":"8a7f","repository":"repo"}"#])
}

fn backup_done() -> EngineScript {
    let summary = json!({
        "message_type": "summary",
        "files_new": 2,
        "files_changed": 1,
        "data_added": 4096,
        "total_files_processed": 3,
        "total_bytes_processed": 8192,
        "snapshot_id": SNAPSHOT_ID
    });
    EngineScript {
        stdout: vec![
            r#"{"message_type":"status","percent_done":0,"total_files":3}"#.to_string(),
            r#"{"message_type":"status","percent_done":0.5,"total_files":3,"files_done":1}"#.to_string(),
            r#"{"message_type":"status","percent_done":0.5,"total_files":3,"files_done":1}"#.to_string(),
            r#"{"message_type":"status","percent_done":1,"total_files":3,"files_done":3}"#.to_string(),
            summary.to_string(),
        ],
        ..EngineScript::default()
    }
}

fn restore_done(bytes: u64) -> EngineScript {
    let summary = json!({
        "message_type": "summary",
        "seconds_elapsed": 1,
        "total_files": 2,
        "files_restored": 2,
        "total_bytes": bytes,
        "bytes_restored": bytes
    });
    EngineScript::stdout(&[&summary.to_string()])
}

fn listing(tags: Vec<String>, paths: &[&str]) -> EngineScript {
    let snapshots = json!([{
        "id": SNAPSHOT_ID,
        "short_id": &SNAPSHOT_ID[..8],
        "time": "2024-05-01T10:00:00Z",
        "hostname": "node-1",
        "tags": tags,
        "paths": paths
    }]);
    EngineScript::stdout(&[&snapshots.to_string()])
}

fn app_listing() -> EngineScript {
    let prefix = snapshot::encode_prefix_paths(&["/appdata/db".to_string(), "/appdata/conf".to_string()]).unwrap();
    listing(
        vec!["backup-type=app".to_string(), format!("files-prefix-path={}", prefix)],
        &["/appdata"],
    )
}

fn recording() -> (ProgressCallback, Arc<Mutex<Vec<ProgressEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let callback: ProgressCallback = Arc::new(move |event| sink.lock().unwrap().push(event));
    (callback, events)
}

fn silent() -> ProgressCallback {
    Arc::new(|_| {})
}

fn filesystem_orchestrator(spawner: &ScriptedSpawner, temp: &TempDir) -> Orchestrator<ScriptedSpawner, StaticResolver> {
    let resolver = StaticResolver::new(
        StorageLocation::Filesystem {
            base_dir: temp.path().to_path_buf(),
        },
        "pw",
        "",
    )
    .unwrap();
    Orchestrator::new(
        Engine::new(spawner.clone(), EngineConfig::default()),
        resolver,
        BackoffPolicy::immediate(3),
        3,
    )
}

fn token_body(ak: &str) -> Value {
    json!({
        "code": 200,
        "data": {
            "cloud": "aws",
            "bucket": "terminus-us-east-1",
            "st": format!("{}-session", ak),
            "prefix": "did:key:alice",
            "sk": format!("{}-secret", ak),
            "ak": ak,
            "expiration": (Utc::now() + Duration::hours(12)).timestamp_millis(),
            "region": "us-east-1"
        }
    })
}

async fn space_orchestrator(
    spawner: &ScriptedSpawner,
    server: &MockServer,
) -> Orchestrator<ScriptedSpawner, SpaceResolver> {
    let client = SpaceClient::new(SpaceConfig {
        api_url: server.uri(),
        user_token: "user-token".to_string(),
        user_id: "alice".to_string(),
        cluster_id: "cluster".to_string(),
        ..SpaceConfig::default()
    })
    .unwrap();
    let tokens = TokenManager::new(client, BackoffPolicy::immediate(1));
    let resolver = SpaceResolver::new(tokens, "aws", "us-east-1", "pw");
    Orchestrator::new(
        Engine::new(spawner.clone(), EngineConfig::default()),
        resolver,
        BackoffPolicy::immediate(3),
        3,
    )
}

async fn mount_tokens(server: &MockServer, refreshes: u64) {
    Mock::given(method("POST"))
        .and(path("/v1/resource/backup/v2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("AK1")))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/resource/backup/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("AK2")))
        .expect(refreshes)
        .mount(server)
        .await;
}

fn env_of(spawner: &ScriptedSpawner, index: usize, key: &str) -> Option<String> {
    spawner.invocations()[index].env.get(key).cloned()
}

fn args_of(spawner: &ScriptedSpawner, index: usize) -> Vec<String> {
    spawner.invocations()[index]
        .args
        .iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect()
}

#[tokio::test]
async fn test_backup_into_fresh_repository() {
    let temp = TempDir::new().unwrap();
    let spawner = ScriptedSpawner::new();
    spawner.push(initialized()).push(backup_done());
    let mut orchestrator = filesystem_orchestrator(&spawner, &temp);
    let (progress, events) = recording();

    let mut request = BackupRequest::file("photos", "/data/photos");
    request.metadata = Some("{\"owner\":\"alice\"}".to_string());
    let outcome = orchestrator
        .backup(&request, &OperationContext::new(), progress)
        .await
        .unwrap();

    assert_eq!(outcome.snapshot_id, SNAPSHOT_ID);
    assert_eq!(outcome.summary.files_new, 2);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(spawner.verbs(), vec!["init", "backup"]);

    let args = args_of(&spawner, 1);
    assert!(args.contains(&"backup-type=file".to_string()));
    assert_eq!(args.last().map(String::as_str), Some("/data/photos"));
    assert_eq!(
        env_of(&spawner, 1, ENV_REPOSITORY),
        Some(temp.path().join("photos").display().to_string())
    );

    let events = events.lock().unwrap();
    assert_eq!(events.first(), Some(&ProgressEvent::Started));
    assert_eq!(events.iter().filter(|e| **e == ProgressEvent::Finished).count(), 1);
    // 0.5 is reported once even though the engine repeated it.
    assert_eq!(events.len(), 5);
}

#[tokio::test]
async fn test_backup_with_unreadable_items_still_succeeds() {
    let temp = TempDir::new().unwrap();
    let spawner = ScriptedSpawner::new();
    let mut backup = backup_done();
    backup.stdout.insert(
        1,
        r#"{"message_type":"error","error":{"message":"permission denied"},"during":"archival","item":"/data/secret"}"#
            .to_string(),
    );
    spawner.push(initialized()).push(backup.with_exit_code(3));
    let mut orchestrator = filesystem_orchestrator(&spawner, &temp);

    let outcome = orchestrator
        .backup(&BackupRequest::file("photos", "/data"), &OperationContext::new(), silent())
        .await
        .unwrap();

    assert_eq!(outcome.item_errors.len(), 1);
    assert_eq!(outcome.item_errors[0].item, "/data/secret");
}

#[tokio::test]
async fn test_backup_refreshes_expired_credentials_once() {
    let server = MockServer::start().await;
    mount_tokens(&server, 1).await;
    let spawner = ScriptedSpawner::new();
    spawner
        .push(initialized())
        .push(EngineScript::failing(EXPIRED, 1))
        .push(EngineScript::failing(EXISTS, 1))
        .push(EngineScript::ok())
        .push(backup_done());
    let mut orchestrator = space_orchestrator(&spawner, &server).await;

    let outcome = orchestrator
        .backup(&BackupRequest::file("photos", "/data"), &OperationContext::new(), silent())
        .await
        .unwrap();

    assert_eq!(outcome.attempts, 2);
    assert_eq!(spawner.verbs(), vec!["init", "backup", "init", "repair index", "backup"]);
    assert_eq!(env_of(&spawner, 1, ENV_ACCESS_KEY).as_deref(), Some("AK1"));
    assert_eq!(env_of(&spawner, 4, ENV_ACCESS_KEY).as_deref(), Some("AK2"));
    assert_eq!(env_of(&spawner, 4, ENV_SESSION_TOKEN).as_deref(), Some("AK2-session"));
    assert_eq!(
        env_of(&spawner, 4, ENV_REPOSITORY).as_deref(),
        Some("s3:s3.us-east-1.amazonaws.com/terminus-us-east-1/did:key:alice/restic/photos")
    );
    assert!(args_of(&spawner, 4).contains(&"--insecure-tls".to_string()));
}

#[tokio::test]
async fn test_backup_gives_up_after_refresh_limit() {
    let server = MockServer::start().await;
    mount_tokens(&server, 3).await;
    let spawner = ScriptedSpawner::new();
    spawner.push(initialized()).push(EngineScript::failing(EXPIRED, 1));
    for _ in 0..3 {
        spawner
            .push(EngineScript::failing(EXISTS, 1))
            .push(EngineScript::ok())
            .push(EngineScript::failing(EXPIRED, 1));
    }
    let mut orchestrator = space_orchestrator(&spawner, &server).await;

    let err = orchestrator
        .backup(&BackupRequest::file("photos", "/data"), &OperationContext::new(), silent())
        .await
        .unwrap_err();

    assert_eq!(err.failure_kind(), Some(FailureKind::CredentialExpired));
    assert_eq!(spawner.remaining(), 0);
}

#[tokio::test]
async fn test_static_location_cannot_refresh() {
    let temp = TempDir::new().unwrap();
    let spawner = ScriptedSpawner::new();
    spawner.push(initialized()).push(EngineScript::failing(EXPIRED, 1));
    let mut orchestrator = filesystem_orchestrator(&spawner, &temp);

    let err = orchestrator
        .backup(&BackupRequest::file("photos", "/data"), &OperationContext::new(), silent())
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::NotRefreshable(_)));
}

#[tokio::test]
async fn test_backup_cancellation_stops_engine() {
    let temp = TempDir::new().unwrap();
    let spawner = ScriptedSpawner::new();
    spawner.push(initialized()).push(EngineScript::hanging());
    let mut orchestrator = filesystem_orchestrator(&spawner, &temp);

    let ctx = OperationContext::new();
    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let err = orchestrator
        .backup(&BackupRequest::file("photos", "/data"), &ctx, silent())
        .await
        .unwrap_err();

    assert!(err.is_canceled());
    assert_eq!(spawner.verbs(), vec!["init", "backup"]);
}

#[tokio::test]
async fn test_restore_app_snapshot_by_prefix_path() {
    let temp = TempDir::new().unwrap();
    let spawner = ScriptedSpawner::new();
    spawner
        .push(app_listing())
        .push(restore_done(100))
        .push(restore_done(250));
    let mut orchestrator = filesystem_orchestrator(&spawner, &temp);

    let request = RestoreRequest {
        repo_name: "apps".to_string(),
        snapshot_id: SNAPSHOT_ID[..8].to_string(),
        target: "/restore".to_string(),
    };
    let outcome = orchestrator
        .restore(&request, &OperationContext::new(), silent())
        .await
        .unwrap();

    assert_eq!(outcome.snapshot_id, SNAPSHOT_ID);
    assert_eq!(outcome.backup_type, BackupType::App);
    assert_eq!(outcome.total_bytes, 350);
    assert_eq!(
        outcome.results.keys().collect::<Vec<_>>(),
        vec!["/appdata/conf", "/appdata/db"]
    );
    assert_eq!(spawner.verbs(), vec!["snapshots", "restore", "restore"]);

    let first = args_of(&spawner, 1);
    assert!(first.ends_with(&[
        "-t".to_string(),
        "/restore/appdata/db".to_string(),
        format!("{}:/appdata/db", SNAPSHOT_ID),
    ]));
}

#[tokio::test]
async fn test_restore_file_snapshot() {
    let temp = TempDir::new().unwrap();
    let spawner = ScriptedSpawner::new();
    spawner
        .push(listing(vec!["backup-type=file".to_string()], &["/data/photos"]))
        .push(restore_done(42));
    let mut orchestrator = filesystem_orchestrator(&spawner, &temp);

    let request = RestoreRequest {
        repo_name: "photos".to_string(),
        snapshot_id: SNAPSHOT_ID.to_string(),
        target: "/restore".to_string(),
    };
    let outcome = orchestrator
        .restore(&request, &OperationContext::new(), silent())
        .await
        .unwrap();

    assert_eq!(outcome.backup_type, BackupType::File);
    assert_eq!(outcome.total_bytes, 42);
    assert!(args_of(&spawner, 1).ends_with(&[
        "-t".to_string(),
        "/restore".to_string(),
        format!("{}:/data/photos", SNAPSHOT_ID),
    ]));
}

#[tokio::test]
async fn test_restore_unknown_snapshot() {
    let temp = TempDir::new().unwrap();
    let spawner = ScriptedSpawner::new();
    spawner.push(listing(vec![], &["/data"]));
    let mut orchestrator = filesystem_orchestrator(&spawner, &temp);

    let request = RestoreRequest {
        repo_name: "photos".to_string(),
        snapshot_id: "deadbeef".to_string(),
        target: "/restore".to_string(),
    };
    let err = orchestrator
        .restore(&request, &OperationContext::new(), silent())
        .await
        .unwrap_err();

    assert_eq!(err.failure_kind(), Some(FailureKind::SnapshotNotFound));
}

#[tokio::test]
async fn test_restore_rejects_ambiguous_prefix() {
    let temp = TempDir::new().unwrap();
    let spawner = ScriptedSpawner::new();
    let snapshots = json!([
        { "id": "4f2c1a9b00000001", "short_id": "4f2c1a9b", "time": "2024-05-01T10:00:00Z",
          "tags": ["backup-type=file"], "paths": ["/data/a"] },
        { "id": "4f2c77aa00000002", "short_id": "4f2c77aa", "time": "2024-05-02T10:00:00Z",
          "tags": ["backup-type=file"], "paths": ["/data/b"] }
    ]);
    spawner.push(EngineScript::stdout(&[&snapshots.to_string()]));
    let mut orchestrator = filesystem_orchestrator(&spawner, &temp);

    let request = RestoreRequest {
        repo_name: "photos".to_string(),
        snapshot_id: "4f2c".to_string(),
        target: "/restore".to_string(),
    };
    let err = orchestrator
        .restore(&request, &OperationContext::new(), silent())
        .await
        .unwrap_err();

    assert_eq!(err.failure_kind(), Some(FailureKind::SnapshotNotFound));
    assert_eq!(spawner.verbs(), vec!["snapshots"]);
}

#[tokio::test]
async fn test_restore_resumes_after_refresh_without_repeating_paths() {
    let server = MockServer::start().await;
    mount_tokens(&server, 1).await;
    let spawner = ScriptedSpawner::new();
    spawner
        .push(app_listing())
        .push(restore_done(100))
        .push(EngineScript::failing(EXPIRED, 1))
        .push(app_listing())
        .push(restore_done(250));
    let mut orchestrator = space_orchestrator(&spawner, &server).await;

    let request = RestoreRequest {
        repo_name: "apps".to_string(),
        snapshot_id: SNAPSHOT_ID.to_string(),
        target: "/restore".to_string(),
    };
    let outcome = orchestrator
        .restore(&request, &OperationContext::new(), silent())
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 2);
    assert_eq!(outcome.total_bytes, 350);
    assert_eq!(spawner.verbs(), vec!["snapshots", "restore", "restore", "snapshots", "restore"]);
    assert!(args_of(&spawner, 4).contains(&format!("{}:/appdata/conf", SNAPSHOT_ID)));
}

#[tokio::test]
async fn test_snapshots_of_missing_repository_is_empty() {
    let temp = TempDir::new().unwrap();
    let spawner = ScriptedSpawner::new();
    spawner.push(EngineScript::failing(MISSING, 10));
    let mut orchestrator = filesystem_orchestrator(&spawner, &temp);

    let snapshots = orchestrator
        .snapshots("photos", &[], &OperationContext::new())
        .await
        .unwrap();

    assert!(snapshots.is_empty());
}

#[tokio::test]
async fn test_snapshots_filtered_by_tag() {
    let temp = TempDir::new().unwrap();
    let spawner = ScriptedSpawner::new();
    spawner.push(listing(vec!["backup-type=file".to_string()], &["/data"]));
    let mut orchestrator = filesystem_orchestrator(&spawner, &temp);

    let snapshots = orchestrator
        .snapshots("photos", &["backup-type=file".to_string()], &OperationContext::new())
        .await
        .unwrap();

    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].backup_type(), BackupType::File);
    assert!(args_of(&spawner, 0).ends_with(&["--tag".to_string(), "backup-type=file".to_string()]));
}

#[tokio::test]
async fn test_stats_and_tag() {
    let temp = TempDir::new().unwrap();
    let spawner = ScriptedSpawner::new();
    spawner
        .push(EngineScript::stdout(&[
            r#"{"total_size":1048576,"total_file_count":12,"snapshots_count":3}"#,
        ]))
        .push(EngineScript::ok());
    let mut orchestrator = filesystem_orchestrator(&spawner, &temp);
    let ctx = OperationContext::new();

    let stats = orchestrator.stats("photos", &ctx).await.unwrap();
    assert_eq!(stats.total_size, 1_048_576);
    assert_eq!(stats.snapshots_count, 3);

    orchestrator
        .tag_snapshot("photos", &SNAPSHOT_ID[..8], "pinned=true", &ctx)
        .await
        .unwrap();
    let args = args_of(&spawner, 1);
    assert_eq!(args[0], "tag");
    assert!(!args.contains(&"--json".to_string()));
    assert!(args.ends_with(&[
        "--add".to_string(),
        "pinned=true".to_string(),
        SNAPSHOT_ID[..8].to_string(),
    ]));
}

#[tokio::test]
async fn test_space_acquire_uses_configured_region() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/resource/backup/v2"))
        .and(body_string_contains("cloudName=aws"))
        .and(body_string_contains("region=us-east-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("AK1")))
        .expect(1)
        .mount(&server)
        .await;
    let spawner = ScriptedSpawner::new();
    spawner
        .push(EngineScript::stdout(&["[]"]))
        .push(EngineScript::stdout(&["[]"]));
    let mut orchestrator = space_orchestrator(&spawner, &server).await;
    let ctx = OperationContext::new();

    // The second listing reuses the cached token.
    assert!(orchestrator.snapshots("photos", &[], &ctx).await.unwrap().is_empty());
    assert!(orchestrator.snapshots("photos", &[], &ctx).await.unwrap().is_empty());
}
