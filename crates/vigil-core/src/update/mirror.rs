//! On-disk signature database updater (CVD-style mirrors).
//!
//! Each managed database file carries a fixed-size ASCII header whose
//! colon-separated fields include a monotonically increasing version. The
//! updater downloads from mirrors in order, compares header versions, and
//! replaces files atomically via a same-directory temp + rename. A scanner
//! daemon can be told to reload over its control socket; reload trouble is
//! annotated, never fatal.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, VigilError};
use crate::update::{CheckResult, UpdateResult, Updater, VersionInfo};

/// Fixed header length of a database file.
const HEADER_SIZE: usize = 512;
/// Every valid header starts with this format identifier.
const HEADER_PREFIX: &str = "ClamAV-VDB";
/// 0-based index of the version field in the colon-separated header.
const VERSION_FIELD: usize = 2;

const RELOAD_COMMAND: &[u8] = b"RELOAD\n";
const RELOAD_EXPECTED: &str = "RELOADING";
const RELOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for [`MirrorDbUpdater`].
#[derive(Debug, Clone)]
pub struct MirrorDbConfig {
    /// Directory holding the live database files.
    pub database_dir: PathBuf,
    /// Mirror base URLs, tried in order.
    pub mirrors: Vec<String>,
    /// Database file names (e.g. "daily.cvd", "main.cvd").
    pub databases: Vec<String>,
    /// Scanner daemon reload target: `unix:///run/clamd.sock` or
    /// `tcp://127.0.0.1:3310`. None disables socket reload.
    pub reload_address: Option<String>,
    /// Fallback reload subprocess (argv), tried when the socket fails.
    pub reload_fallback: Option<Vec<String>>,
    /// Per-request download deadline.
    pub download_timeout: Duration,
}

impl Default for MirrorDbConfig {
    fn default() -> Self {
        MirrorDbConfig {
            database_dir: PathBuf::from("/var/lib/clamav"),
            mirrors: vec!["https://database.clamav.net".to_string()],
            databases: vec!["daily.cvd".to_string(), "main.cvd".to_string()],
            reload_address: None,
            reload_fallback: None,
            download_timeout: Duration::from_secs(120),
        }
    }
}

/// Updater that keeps a directory of header-versioned database files
/// current from a list of mirrors.
pub struct MirrorDbUpdater {
    config: MirrorDbConfig,
    client: reqwest::Client,
}

impl MirrorDbUpdater {
    pub const NAME: &'static str = "clamav-mirror";

    pub fn new(config: MirrorDbConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.download_timeout)
            .build()
            .map_err(|e| VigilError::InvalidConfig(format!("http client: {e}")))?;
        Ok(MirrorDbUpdater { config, client })
    }

    /// Parse the version out of a database header.
    fn parse_header_version(bytes: &[u8]) -> Result<u64> {
        if bytes.len() < HEADER_SIZE {
            return Err(VigilError::Download(format!(
                "database truncated: {} bytes is smaller than the {HEADER_SIZE}-byte header",
                bytes.len()
            )));
        }
        let header = String::from_utf8_lossy(&bytes[..HEADER_SIZE]);
        if !header.starts_with(HEADER_PREFIX) {
            return Err(VigilError::Download(format!(
                "unrecognized database header (expected {HEADER_PREFIX} prefix)"
            )));
        }
        let fields: Vec<&str> = header.split(':').collect();
        let raw = fields.get(VERSION_FIELD).ok_or_else(|| {
            VigilError::Download("database header has no version field".to_string())
        })?;
        raw.trim().parse::<u64>().map_err(|_| {
            VigilError::Download(format!("database header version is not a number: '{raw}'"))
        })
    }

    /// Version of the local copy, if present and well-formed.
    fn local_version(&self, name: &str) -> Option<u64> {
        let path = self.config.database_dir.join(name);
        let mut header = vec![0u8; HEADER_SIZE];
        let mut file = std::fs::File::open(path).ok()?;
        std::io::Read::read_exact(&mut file, &mut header).ok()?;
        Self::parse_header_version(&header).ok()
    }

    /// Fetch one database from the first mirror that serves it intact.
    async fn download(&self, name: &str) -> Result<(Vec<u8>, u64)> {
        let mut last_error = String::new();
        for mirror in &self.config.mirrors {
            let url = format!("{}/{}", mirror.trim_end_matches('/'), name);
            debug!(%url, "downloading database");
            let attempt: Result<(Vec<u8>, u64)> = async {
                let response = self
                    .client
                    .get(url.as_str())
                    .send()
                    .await
                    .map_err(|e| VigilError::Download(e.to_string()))?
                    .error_for_status()
                    .map_err(|e| VigilError::Download(e.to_string()))?;
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| VigilError::Download(e.to_string()))?
                    .to_vec();
                let version = Self::parse_header_version(&bytes)?;
                Ok((bytes, version))
            }
            .await;

            match attempt {
                Ok(found) => return Ok(found),
                Err(err) => {
                    warn!(%url, %err, "mirror attempt failed");
                    last_error = format!("{url}: {err}");
                }
            }
        }
        Err(VigilError::Download(format!(
            "all mirrors failed for {name}: {last_error}"
        )))
    }

    /// Write a database atomically: temp file in the same directory, then
    /// rename over the live name. The temp is removed on any failure.
    async fn write_atomically(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let live = self.config.database_dir.join(name);
        let temp = self.config.database_dir.join(format!("{name}.tmp"));

        if let Err(err) = tokio::fs::write(&temp, bytes).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(VigilError::Io(err));
        }
        if let Err(err) = tokio::fs::rename(&temp, &live).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(VigilError::Io(err));
        }
        Ok(())
    }

    /// Tell the scanner daemon to reload, socket first, subprocess second.
    async fn reload_scanner(&self) -> std::result::Result<(), String> {
        let socket_err = match &self.config.reload_address {
            Some(address) => match self.reload_via_socket(address).await {
                Ok(()) => return Ok(()),
                Err(err) => err,
            },
            None => "no reload address configured".to_string(),
        };

        if let Some(argv) = &self.config.reload_fallback {
            return self
                .reload_via_subprocess(argv)
                .await
                .map_err(|e| format!("socket: {socket_err}; fallback: {e}"));
        }
        Err(socket_err)
    }

    async fn reload_via_socket(&self, address: &str) -> std::result::Result<(), String> {
        let reply = tokio::time::timeout(RELOAD_TIMEOUT, async {
            if let Some(path) = address.strip_prefix("unix://") {
                #[cfg(unix)]
                {
                    let mut stream = tokio::net::UnixStream::connect(path)
                        .await
                        .map_err(|e| format!("connect {path}: {e}"))?;
                    exchange_reload(&mut stream).await
                }
                #[cfg(not(unix))]
                {
                    Err(format!("unix sockets unsupported on this platform: {path}"))
                }
            } else if let Some(addr) = address.strip_prefix("tcp://") {
                let mut stream = tokio::net::TcpStream::connect(addr)
                    .await
                    .map_err(|e| format!("connect {addr}: {e}"))?;
                exchange_reload(&mut stream).await
            } else {
                Err(format!("unsupported reload address scheme: {address}"))
            }
        })
        .await
        .map_err(|_| "reload timed out".to_string())??;

        if reply.contains(RELOAD_EXPECTED) {
            info!("scanner daemon reloading");
            Ok(())
        } else {
            Err(format!("unexpected reload reply: '{}'", reply.trim()))
        }
    }

    async fn reload_via_subprocess(&self, argv: &[String]) -> std::result::Result<(), String> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| "empty reload fallback command".to_string())?;
        let output = tokio::process::Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| format!("spawn {program}: {e}"))?;
        if output.status.success() {
            info!(program = %program, "scanner reloaded via subprocess");
            Ok(())
        } else {
            Err(format!(
                "{program} exited with {:?}",
                output.status.code()
            ))
        }
    }
}

async fn exchange_reload<S>(stream: &mut S) -> std::result::Result<String, String>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    stream
        .write_all(RELOAD_COMMAND)
        .await
        .map_err(|e| format!("send: {e}"))?;
    let mut reply = vec![0u8; 256];
    let n = stream
        .read(&mut reply)
        .await
        .map_err(|e| format!("recv: {e}"))?;
    Ok(String::from_utf8_lossy(&reply[..n]).into_owned())
}

#[async_trait]
impl Updater for MirrorDbUpdater {
    fn name(&self) -> &str {
        Self::NAME
    }

    /// Refresh every configured database. A single database failing does
    /// not abort its peers; reload trouble only annotates the result.
    async fn update(&self, cancel: &CancellationToken) -> Result<UpdateResult> {
        let started = Instant::now();
        tokio::fs::create_dir_all(&self.config.database_dir).await?;

        let mut result = UpdateResult::default();
        let mut errors: Vec<String> = Vec::new();

        for name in &self.config.databases {
            if cancel.is_cancelled() {
                return Err(VigilError::Cancelled);
            }

            let local = self.local_version(name);
            let (bytes, remote) = match self.download(name).await {
                Ok(found) => found,
                Err(err) => {
                    result.failed += 1;
                    errors.push(err.to_string());
                    continue;
                }
            };

            if let Some(local) = local {
                if remote <= local {
                    debug!(database = %name, local, remote, "database already current");
                    result.skipped += 1;
                    result.file_versions.insert(name.clone(), local);
                    continue;
                }
            }

            match self.write_atomically(name, &bytes).await {
                Ok(()) => {
                    info!(database = %name, version = remote, "database updated");
                    result.downloaded += 1;
                    result.file_versions.insert(name.clone(), remote);
                }
                Err(err) => {
                    result.failed += 1;
                    errors.push(format!("{name}: {err}"));
                }
            }
        }

        if result.downloaded > 0
            && (self.config.reload_address.is_some() || self.config.reload_fallback.is_some())
        {
            if let Err(err) = self.reload_scanner().await {
                warn!(%err, "scanner reload failed");
                errors.push(format!("reload: {err}"));
            }
        }

        result.success = result.failed == 0;
        result.duration = started.elapsed();
        if !errors.is_empty() {
            result.error = Some(errors.join("; "));
        }
        Ok(result)
    }

    /// Compare local header versions against the mirrors without writing
    /// anything.
    async fn check_for_updates(&self, cancel: &CancellationToken) -> Result<CheckResult> {
        let mut check = CheckResult::default();

        for name in &self.config.databases {
            if cancel.is_cancelled() {
                return Err(VigilError::Cancelled);
            }
            let local = self.local_version(name).unwrap_or(0);
            check.current_version = check.current_version.max(local);

            match self.download(name).await {
                Ok((_, remote)) => {
                    check.available_version = check.available_version.max(remote);
                    if remote > local {
                        check.update_available = true;
                    }
                    check
                        .details
                        .insert(name.clone(), format!("local={local} remote={remote}"));
                }
                Err(err) => {
                    check
                        .details
                        .insert(name.clone(), format!("local={local} check failed: {err}"));
                }
            }
        }
        Ok(check)
    }

    async fn version_info(&self) -> VersionInfo {
        let mut info = VersionInfo::default();
        for name in &self.config.databases {
            if let Some(version) = self.local_version(name) {
                info.version = info.version.max(version);
                info.file_versions.insert(name.clone(), version);
            }
        }
        info
    }

    /// Usable when every configured database file exists on disk.
    async fn is_ready(&self) -> bool {
        self.config
            .databases
            .iter()
            .all(|name| self.config.database_dir.join(name).is_file())
    }
}
