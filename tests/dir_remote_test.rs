//! Push and pull through the `dir` provider with real `tar` processes.

use serde_json::json;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use volsync::progress::{ProgressKind, ProgressLog};
use volsync::remote::DirRemote;
use volsync::{
    Properties, RemoteServer, SyncEngine, SyncRequest, TagFilter, TokioRunner, Volume,
};

fn remote_at(root: &Path) -> Properties {
    json!({ "path": root.to_string_lossy() })
        .as_object()
        .cloned()
        .unwrap()
}

fn write_tree(root: &Path) {
    fs::create_dir_all(root.join("nested/deeper")).unwrap();
    fs::write(root.join("top.txt"), "top level").unwrap();
    fs::write(root.join("nested/deeper/data.bin"), vec![7u8; 64 * 1024]).unwrap();
}

#[tokio::test]
async fn test_push_then_pull_restores_volume() {
    let remote_root = TempDir::new().unwrap();
    let source = TempDir::new().unwrap();
    let restore = TempDir::new().unwrap();
    write_tree(source.path());

    let server = Arc::new(DirRemote::new(Arc::new(TokioRunner::new())));
    let engine = SyncEngine::new(server.clone());
    let remote = remote_at(remote_root.path());

    let log = ProgressLog::new();
    let metadata = json!({"tags": {"env": "test"}}).as_object().cloned().unwrap();
    engine
        .push(
            SyncRequest::new("c1", remote.clone())
                .volume(Volume::new("data", "data volume", source.path()))
                .metadata(metadata)
                .progress(Arc::new(log.clone())),
        )
        .await
        .unwrap();

    assert!(remote_root.path().join("c1/data.tar.gz").is_file());
    assert!(remote_root.path().join("c1/metadata.json").is_file());
    let starts = log
        .events()
        .iter()
        .filter(|e| e.kind == ProgressKind::Start)
        .count();
    assert_eq!(starts, 2);

    let commits = server
        .list_commits(&remote, &Properties::new(), &[TagFilter::equals("env", "test")])
        .await
        .unwrap();
    assert_eq!(commits.len(), 1);
    assert!(commits[0].timestamp().is_some());

    let target = restore.path().join("data");
    engine
        .pull(SyncRequest::new("c1", remote).volume(Volume::new("data", "data volume", &target)))
        .await
        .unwrap();

    assert_eq!(fs::read_to_string(target.join("top.txt")).unwrap(), "top level");
    assert_eq!(
        fs::read(target.join("nested/deeper/data.bin")).unwrap(),
        vec![7u8; 64 * 1024]
    );
}

#[tokio::test]
async fn test_failed_push_leaves_no_commit() {
    let remote_root = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let server = Arc::new(DirRemote::new(Arc::new(TokioRunner::new())));

    let err = SyncEngine::new(server.clone())
        .with_scratch_root(scratch.path())
        .push(
            SyncRequest::new("c1", remote_at(remote_root.path()))
                .volume(Volume::new("data", "data", remote_root.path().join("missing"))),
        )
        .await
        .unwrap_err();

    // tar cannot enter a missing directory
    assert!(err.exit_code().is_some() || matches!(err, volsync::RemoteError::Spawn { .. }));
    assert!(!remote_root.path().join("c1").exists());
    assert_eq!(fs::read_dir(scratch.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_pull_unknown_commit_fails() {
    let remote_root = TempDir::new().unwrap();
    let restore = TempDir::new().unwrap();
    let server = Arc::new(DirRemote::new(Arc::new(TokioRunner::new())));

    let err = SyncEngine::new(server)
        .pull(
            SyncRequest::new("nope", remote_at(remote_root.path()))
                .volume(Volume::new("data", "data", restore.path())),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, volsync::RemoteError::Io(_)));
}

#[tokio::test]
async fn test_repush_keeps_existing_commit() {
    let remote_root = TempDir::new().unwrap();
    let source = TempDir::new().unwrap();
    write_tree(source.path());

    let server = Arc::new(DirRemote::new(Arc::new(TokioRunner::new())));
    let engine = SyncEngine::new(server.clone());
    let remote = remote_at(remote_root.path());

    engine
        .push(
            SyncRequest::new("c1", remote.clone())
                .volume(Volume::new("data", "data", source.path())),
        )
        .await
        .unwrap();

    let err = engine
        .push(
            SyncRequest::new("c1", remote.clone())
                .volume(Volume::new("data", "data", remote_root.path().join("missing"))),
        )
        .await
        .unwrap_err();
    assert!(err.is_config(), "{:?}", err);
    assert!(remote_root.path().join("c1/metadata.json").is_file());
    assert!(remote_root.path().join("c1/data.tar.gz").is_file());
}
