//! Mirror database updater against local HTTP and socket fixtures.

use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use vigil_core::update::Updater;
use vigil_core::{MirrorDbConfig, MirrorDbUpdater};

const HEADER_SIZE: usize = 512;

/// Build a database blob with a valid `ClamAV-VDB` header.
fn database_bytes(version: u64, body: &[u8]) -> Vec<u8> {
    let header =
        format!("ClamAV-VDB:21 Jul 2025 08-51 -0400:{version}:2000000:90:X:X:builder:1690000000");
    let mut bytes = header.into_bytes();
    bytes.resize(HEADER_SIZE, b' ');
    bytes.extend_from_slice(body);
    bytes
}

/// Serve the same byte blob for every request on a loopback port.
async fn serve_bytes(bytes: Vec<u8>) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let bytes = bytes.clone();
            tokio::spawn(async move {
                let mut request = [0u8; 1024];
                let _ = socket.read(&mut request).await;
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    bytes.len()
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(&bytes).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    (format!("http://{addr}"), handle)
}

fn updater(dir: &Path, mirror: String, databases: Vec<&str>) -> MirrorDbUpdater {
    MirrorDbUpdater::new(MirrorDbConfig {
        database_dir: dir.to_path_buf(),
        mirrors: vec![mirror],
        databases: databases.into_iter().map(String::from).collect(),
        reload_address: None,
        reload_fallback: None,
        download_timeout: Duration::from_secs(5),
    })
    .unwrap()
}

#[tokio::test]
async fn identical_remote_version_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = database_bytes(100, b"signatures");
    std::fs::write(dir.path().join("daily.cvd"), &bytes).unwrap();

    let (mirror, server) = serve_bytes(bytes.clone()).await;
    let updater = updater(dir.path(), mirror, vec!["daily.cvd"]);

    let result = updater.update(&CancellationToken::new()).await.unwrap();
    assert!(result.success);
    assert_eq!(result.downloaded, 0);
    assert_eq!(result.skipped, 1);
    assert_eq!(result.file_versions["daily.cvd"], 100);
    assert!(result.error.is_none());

    // The live file is untouched and no temp file lingers.
    assert_eq!(std::fs::read(dir.path().join("daily.cvd")).unwrap(), bytes);
    assert!(!dir.path().join("daily.cvd.tmp").exists());

    server.abort();
}

#[tokio::test]
async fn newer_remote_version_is_applied_atomically() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("daily.cvd"),
        database_bytes(100, b"old signatures"),
    )
    .unwrap();

    let fresh = database_bytes(101, b"new signatures");
    let (mirror, server) = serve_bytes(fresh.clone()).await;
    let updater = updater(dir.path(), mirror, vec!["daily.cvd"]);

    let result = updater.update(&CancellationToken::new()).await.unwrap();
    assert!(result.success);
    assert_eq!(result.downloaded, 1);
    assert_eq!(result.skipped, 0);
    assert_eq!(result.file_versions["daily.cvd"], 101);

    assert_eq!(std::fs::read(dir.path().join("daily.cvd")).unwrap(), fresh);
    assert!(!dir.path().join("daily.cvd.tmp").exists());
    assert!(updater.is_ready().await);

    server.abort();
}

#[tokio::test]
async fn absent_local_copy_is_downloaded() {
    let dir = tempfile::tempdir().unwrap();
    let fresh = database_bytes(7, b"first fetch");
    let (mirror, server) = serve_bytes(fresh.clone()).await;
    let updater = updater(dir.path(), mirror, vec!["daily.cvd"]);

    assert!(!updater.is_ready().await);
    let result = updater.update(&CancellationToken::new()).await.unwrap();
    assert_eq!(result.downloaded, 1);
    assert!(updater.is_ready().await);

    server.abort();
}

#[tokio::test]
async fn truncated_download_fails_that_database_only() {
    let dir = tempfile::tempdir().unwrap();
    // Smaller than the fixed header: must be rejected.
    let (bad_mirror, bad_server) = serve_bytes(b"way too short".to_vec()).await;
    let updater = updater(dir.path(), bad_mirror, vec!["daily.cvd"]);

    let result = updater.update(&CancellationToken::new()).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.failed, 1);
    assert!(result.error.unwrap().contains("truncated"));
    assert!(!dir.path().join("daily.cvd").exists());

    bad_server.abort();
}

#[tokio::test]
async fn check_for_updates_never_writes() {
    let dir = tempfile::tempdir().unwrap();
    let local = database_bytes(100, b"old");
    std::fs::write(dir.path().join("daily.cvd"), &local).unwrap();

    let (mirror, server) = serve_bytes(database_bytes(105, b"new")).await;
    let updater = updater(dir.path(), mirror, vec!["daily.cvd"]);

    let check = updater
        .check_for_updates(&CancellationToken::new())
        .await
        .unwrap();
    assert!(check.update_available);
    assert_eq!(check.current_version, 100);
    assert_eq!(check.available_version, 105);

    // Read-only: the local copy is exactly as before.
    assert_eq!(std::fs::read(dir.path().join("daily.cvd")).unwrap(), local);

    server.abort();
}

/// Fake clamd control socket answering RELOAD.
async fn serve_reload(reply: &'static str) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut command = [0u8; 64];
                let n = socket.read(&mut command).await.unwrap_or(0);
                if String::from_utf8_lossy(&command[..n]).starts_with("RELOAD") {
                    let _ = socket.write_all(reply.as_bytes()).await;
                }
                let _ = socket.shutdown().await;
            });
        }
    });
    (format!("tcp://{addr}"), handle)
}

#[tokio::test]
async fn successful_reload_leaves_no_annotation() {
    let dir = tempfile::tempdir().unwrap();
    let (mirror, mirror_server) = serve_bytes(database_bytes(5, b"sigs")).await;
    let (reload_addr, reload_server) = serve_reload("RELOADING\n").await;

    let updater = MirrorDbUpdater::new(MirrorDbConfig {
        database_dir: dir.path().to_path_buf(),
        mirrors: vec![mirror],
        databases: vec!["daily.cvd".to_string()],
        reload_address: Some(reload_addr),
        reload_fallback: None,
        download_timeout: Duration::from_secs(5),
    })
    .unwrap();

    let result = updater.update(&CancellationToken::new()).await.unwrap();
    assert!(result.success);
    assert_eq!(result.downloaded, 1);
    assert!(result.error.is_none());

    mirror_server.abort();
    reload_server.abort();
}

#[tokio::test]
async fn failed_reload_annotates_but_does_not_fail() {
    let dir = tempfile::tempdir().unwrap();
    let (mirror, mirror_server) = serve_bytes(database_bytes(5, b"sigs")).await;
    let (reload_addr, reload_server) = serve_reload("NO SUCH COMMAND\n").await;

    let updater = MirrorDbUpdater::new(MirrorDbConfig {
        database_dir: dir.path().to_path_buf(),
        mirrors: vec![mirror],
        databases: vec!["daily.cvd".to_string()],
        reload_address: Some(reload_addr),
        reload_fallback: None,
        download_timeout: Duration::from_secs(5),
    })
    .unwrap();

    let result = updater.update(&CancellationToken::new()).await.unwrap();
    assert!(result.success, "reload trouble must not fail the update");
    assert_eq!(result.downloaded, 1);
    assert!(result.error.unwrap().contains("reload"));

    mirror_server.abort();
    reload_server.abort();
}

#[tokio::test]
async fn second_mirror_is_tried_after_first_fails() {
    let dir = tempfile::tempdir().unwrap();
    let good = database_bytes(9, b"sigs");
    let (mirror, server) = serve_bytes(good.clone()).await;

    let updater = MirrorDbUpdater::new(MirrorDbConfig {
        database_dir: dir.path().to_path_buf(),
        // First mirror refuses connections; the second serves.
        mirrors: vec!["http://127.0.0.1:9".to_string(), mirror],
        databases: vec!["daily.cvd".to_string()],
        reload_address: None,
        reload_fallback: None,
        download_timeout: Duration::from_secs(5),
    })
    .unwrap();

    let result = updater.update(&CancellationToken::new()).await.unwrap();
    assert!(result.success);
    assert_eq!(result.downloaded, 1);
    assert_eq!(std::fs::read(dir.path().join("daily.cvd")).unwrap(), good);

    server.abort();
}
