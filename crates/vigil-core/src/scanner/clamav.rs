//! ClamAV subprocess driver.
//!
//! Invokes `clamscan` (or a configured binary) per file, parses its textual
//! verdict lines, and classifies detections. The subprocess inherits the
//! configured deadline and is killed when the caller's token fires.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use vigil_store::{ScanResult, ScanStatus};

use crate::error::{Result, VigilError};
use crate::scanner::{classify_detection, Scanner};

/// clamscan exit codes: 0 = no threat, 1 = threat found (not an error).
const EXIT_CLEAN: i32 = 0;
const EXIT_INFECTED: i32 = 1;

const ENGINE: &str = "clamav";
const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for [`ClamAvScanner`].
#[derive(Debug, Clone)]
pub struct ClamAvConfig {
    /// Binary name or absolute path.
    pub binary: String,
    /// Files larger than this are rejected without invoking the scanner.
    pub max_file_size: u64,
    /// Deadline for one scan subprocess.
    pub scan_timeout: Duration,
    /// Optional signature database directory (`--database`).
    pub database_dir: Option<PathBuf>,
}

impl Default for ClamAvConfig {
    fn default() -> Self {
        ClamAvConfig {
            binary: "clamscan".to_string(),
            max_file_size: 100 * 1024 * 1024,
            scan_timeout: Duration::from_secs(60),
            database_dir: None,
        }
    }
}

/// Driver for the external ClamAV scanner.
pub struct ClamAvScanner {
    config: ClamAvConfig,
}

impl ClamAvScanner {
    pub fn new(config: ClamAvConfig) -> Self {
        ClamAvScanner { config }
    }

    fn error_result(&self, path: &Path, error: impl Into<String>) -> ScanResult {
        ScanResult::failed(ENGINE, path.to_string_lossy(), error)
    }

    /// Streaming SHA-256 of the file content.
    async fn hash_file(path: &Path) -> std::io::Result<String> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    /// Classify the scanner's combined output.
    ///
    /// Expects one verdict line per file: `<path>: OK`,
    /// `<path>: <detection> FOUND`, or `<path>: <text> ERROR`. The first
    /// classified line wins; a verdict-free output defaults to clean.
    fn parse_output(output: &str) -> (ScanStatus, String) {
        for line in output.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('-') {
                continue;
            }
            let Some((_, rest)) = line.split_once(": ") else {
                continue;
            };
            let rest = rest.trim();

            if rest == "OK" {
                return (ScanStatus::Clean, String::new());
            }
            if let Some(detection) = rest.strip_suffix(" FOUND") {
                return (ScanStatus::Infected, detection.trim().to_string());
            }
            if let Some(cause) = rest.strip_suffix(" ERROR") {
                return (ScanStatus::Error, cause.trim().to_string());
            }
        }
        (ScanStatus::Clean, String::new())
    }

    /// Pull the engine version out of a summary block, if present.
    fn parse_engine_version(output: &str) -> String {
        output
            .lines()
            .filter_map(|line| line.trim().strip_prefix("Engine version:"))
            .map(|v| v.trim().to_string())
            .next()
            .unwrap_or_default()
    }

    fn command_for(&self, path: &Path) -> Command {
        let mut cmd = Command::new(&self.config.binary);
        cmd.arg("--stdout");
        if let Some(db) = &self.config.database_dir {
            cmd.arg("--database").arg(db);
        }
        cmd.arg(path);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Scanner for ClamAvScanner {
    fn name(&self) -> &str {
        ENGINE
    }

    async fn scan_file(&self, path: &Path, cancel: &CancellationToken) -> ScanResult {
        let start = Instant::now();

        let meta = match tokio::fs::metadata(path).await {
            Ok(meta) => meta,
            Err(err) => return self.error_result(path, format!("cannot stat file: {err}")),
        };
        let size_bytes = meta.len();
        if size_bytes > self.config.max_file_size {
            return self.error_result(
                path,
                format!(
                    "file too large: {size_bytes} bytes (limit {})",
                    self.config.max_file_size
                ),
            );
        }

        let sha256 = match Self::hash_file(path).await {
            Ok(hash) => hash,
            Err(err) => return self.error_result(path, format!("cannot hash file: {err}")),
        };

        let child = match self.command_for(path).spawn() {
            Ok(child) => child,
            Err(err) => {
                return self.error_result(
                    path,
                    format!("cannot launch scanner '{}': {err}", self.config.binary),
                )
            }
        };

        // Dropping the in-flight future (cancellation) drops the child,
        // which kill_on_drop turns into a kill.
        let waited = tokio::select! {
            _ = cancel.cancelled() => {
                return self.error_result(path, "scan cancelled");
            }
            waited = tokio::time::timeout(self.config.scan_timeout, child.wait_with_output()) => waited,
        };

        let output = match waited {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => return self.error_result(path, format!("scanner failed: {err}")),
            Err(_) => {
                return self.error_result(
                    path,
                    format!(
                        "scan timed out after {}s",
                        self.config.scan_timeout.as_secs()
                    ),
                )
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        let exit_code = output.status.code();
        match exit_code {
            Some(EXIT_CLEAN) | Some(EXIT_INFECTED) => {}
            Some(code) => {
                let tail: String = combined.chars().take(512).collect();
                return self.error_result(path, format!("scanner exited with code {code}: {tail}"));
            }
            None => return self.error_result(path, "scanner terminated by signal"),
        }

        let (status, label) = Self::parse_output(&combined);
        let engine_version = Self::parse_engine_version(&combined);
        let duration_ms = start.elapsed().as_millis() as u64;

        debug!(
            path = %path.display(),
            %status,
            duration_ms,
            "scan finished"
        );

        let mut result = match status {
            ScanStatus::Clean => ScanResult::clean(ENGINE, path.to_string_lossy()),
            ScanStatus::Infected => {
                let (kind, severity) = classify_detection(&label);
                ScanResult::infected(ENGINE, path.to_string_lossy(), label, kind, severity)
            }
            ScanStatus::Error => self.error_result(path, label),
        };
        result.engine_version = engine_version;
        result.sha256 = sha256;
        result.size_bytes = size_bytes;
        result.duration_ms = duration_ms;
        result
    }

    async fn scan_dir(
        &self,
        path: &Path,
        recursive: bool,
        cancel: &CancellationToken,
    ) -> Vec<ScanResult> {
        let mut results = Vec::new();
        let mut pending = vec![path.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(dir = %dir.display(), %err, "cannot read directory");
                    results.push(self.error_result(&dir, format!("cannot read directory: {err}")));
                    continue;
                }
            };

            while let Ok(Some(entry)) = entries.next_entry().await {
                if cancel.is_cancelled() {
                    return results;
                }
                let entry_path = entry.path();
                match entry.file_type().await {
                    Ok(ft) if ft.is_dir() => {
                        if recursive {
                            pending.push(entry_path);
                        }
                    }
                    Ok(ft) if ft.is_file() => {
                        results.push(self.scan_file(&entry_path, cancel).await);
                    }
                    // Symlinks and specials are skipped.
                    Ok(_) => {}
                    Err(err) => {
                        warn!(path = %entry_path.display(), %err, "cannot stat entry");
                    }
                }
            }
        }
        results
    }

    async fn engine_version(&self) -> Result<String> {
        let mut cmd = Command::new(&self.config.binary);
        cmd.arg("--version");
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let child = cmd.spawn().map_err(VigilError::Io)?;
        let output = tokio::time::timeout(VERSION_PROBE_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| {
                VigilError::update(ENGINE, "version probe timed out")
            })?
            .map_err(VigilError::Io)?;

        if !output.status.success() {
            return Err(VigilError::update(
                ENGINE,
                format!("version probe exited with {:?}", output.status.code()),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ok_line() {
        let (status, label) = ClamAvScanner::parse_output("/tmp/upload.bin: OK\n");
        assert_eq!(status, ScanStatus::Clean);
        assert!(label.is_empty());
    }

    #[test]
    fn test_parse_found_line() {
        let (status, label) =
            ClamAvScanner::parse_output("/tmp/upload.bin: Eicar-Test-Signature FOUND\n");
        assert_eq!(status, ScanStatus::Infected);
        assert_eq!(label, "Eicar-Test-Signature");
    }

    #[test]
    fn test_parse_error_line() {
        let (status, label) =
            ClamAvScanner::parse_output("/tmp/upload.bin: Can't access file ERROR\n");
        assert_eq!(status, ScanStatus::Error);
        assert_eq!(label, "Can't access file");
    }

    #[test]
    fn test_parse_skips_noise_and_separators() {
        let output = "\n----------- SCAN SUMMARY -----------\nKnown viruses: 8000000\n/tmp/a: OK\n";
        let (status, _) = ClamAvScanner::parse_output(output);
        assert_eq!(status, ScanStatus::Clean);
    }

    #[test]
    fn test_parse_first_classified_line_wins() {
        let output = "/tmp/a: Win.Trojan.Agent FOUND\n/tmp/a: OK\n";
        let (status, label) = ClamAvScanner::parse_output(output);
        assert_eq!(status, ScanStatus::Infected);
        assert_eq!(label, "Win.Trojan.Agent");
    }

    #[test]
    fn test_parse_empty_output_defaults_clean() {
        let (status, _) = ClamAvScanner::parse_output("");
        assert_eq!(status, ScanStatus::Clean);
    }

    #[test]
    fn test_parse_engine_version() {
        let output = "/tmp/a: OK\n\nEngine version: 1.2.1\nScanned files: 1\n";
        assert_eq!(ClamAvScanner::parse_engine_version(output), "1.2.1");
        assert_eq!(ClamAvScanner::parse_engine_version("/tmp/a: OK\n"), "");
    }

    #[tokio::test]
    async fn test_scan_missing_file_is_error_result() {
        let scanner = ClamAvScanner::new(ClamAvConfig::default());
        let cancel = CancellationToken::new();
        let result = scanner
            .scan_file(Path::new("/nonexistent/upload.bin"), &cancel)
            .await;
        assert!(result.is_error());
        assert!(result.error.contains("cannot stat file"));
    }

    #[tokio::test]
    async fn test_scan_oversized_file_is_error_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.bin");
        std::fs::write(&path, vec![0u8; 1024]).unwrap();

        let scanner = ClamAvScanner::new(ClamAvConfig {
            max_file_size: 16,
            ..ClamAvConfig::default()
        });
        let result = scanner.scan_file(&path, &CancellationToken::new()).await;
        assert!(result.is_error());
        assert!(result.error.contains("file too large"));
    }

    #[tokio::test]
    async fn test_scan_missing_binary_is_error_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.bin");
        std::fs::write(&path, b"content").unwrap();

        let scanner = ClamAvScanner::new(ClamAvConfig {
            binary: "/nonexistent/clamscan".to_string(),
            ..ClamAvConfig::default()
        });
        let result = scanner.scan_file(&path, &CancellationToken::new()).await;
        assert!(result.is_error());
        assert!(result.error.contains("cannot launch scanner"));
    }
}
