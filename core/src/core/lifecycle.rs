//! Scan lifecycle manager: assigns scan identifiers, dispatches each scan
//! onto its own tokio task, tracks per-identifier status through an
//! injectable store, and persists the final report exactly once.

use chrono::Utc;
use log::{error, info};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use url::Url;

use crate::core::orchestrator::Orchestrator;
use crate::core::report::{ScanReport, ScanStatus};
use crate::{FanoutSink, ScanConfig, ScanEventSink, SinkRef};

/// Global wall-clock budget for one scan. Exceeding it is recorded as
/// `timeout`, distinct from `failed`.
const SCAN_BUDGET: Duration = Duration::from_secs(3600);

/// Injectable scan registry keyed by scan_id. Replaces hidden process-wide
/// state: the manager owns one and hands it to the presentation layer by
/// reference.
pub trait ScanStore: Send + Sync {
    fn put(&self, report: ScanReport);
    fn get(&self, scan_id: &str) -> Option<ScanReport>;
    fn list(&self) -> Vec<ScanReport>;
}

#[derive(Default)]
pub struct InMemoryScanStore {
    inner: RwLock<HashMap<String, ScanReport>>,
}

impl InMemoryScanStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_ref() -> Arc<dyn ScanStore> {
        Arc::new(Self::new())
    }
}

impl ScanStore for InMemoryScanStore {
    fn put(&self, report: ScanReport) {
        let mut inner = self.inner.write().expect("scan store poisoned");
        inner.insert(report.scan_id.clone(), report);
    }

    fn get(&self, scan_id: &str) -> Option<ScanReport> {
        let inner = self.inner.read().expect("scan store poisoned");
        inner.get(scan_id).cloned()
    }

    fn list(&self) -> Vec<ScanReport> {
        let inner = self.inner.read().expect("scan store poisoned");
        inner.values().cloned().collect()
    }
}

/// Line-oriented execution log, one file per scan.
struct FileLogSink {
    file: Mutex<fs::File>,
}

impl FileLogSink {
    fn create(path: &Path) -> std::io::Result<SinkRef> {
        let file = fs::File::create(path)?;
        Ok(Arc::new(Self {
            file: Mutex::new(file),
        }))
    }

    fn write_line(&self, level: &str, message: &str) {
        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(
                file,
                "{} - {} - {}",
                Utc::now().format("%Y-%m-%d %H:%M:%S"),
                level.to_uppercase(),
                message
            );
        }
    }
}

impl ScanEventSink for FileLogSink {
    fn on_log(&self, level: &str, message: &str) {
        self.write_line(level, message);
    }

    fn on_finding(&self, finding: &crate::Finding) {
        self.write_line(
            "finding",
            &format!(
                "{} [{}] {}",
                finding.vuln_type, finding.severity, finding.description
            ),
        );
    }

    fn on_phase(&self, phase: &str, status: &str) {
        self.write_line("phase", &format!("{}: {}", phase, status));
    }
}

pub struct ScanManager {
    store: Arc<dyn ScanStore>,
    output_dir: PathBuf,
    handles: Mutex<HashMap<String, JoinHandle<()>>>,
    seq: AtomicU64,
}

impl ScanManager {
    pub fn new(store: Arc<dyn ScanStore>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            output_dir: output_dir.into(),
            handles: Mutex::new(HashMap::new()),
            seq: AtomicU64::new(1),
        }
    }

    pub fn store(&self) -> Arc<dyn ScanStore> {
        Arc::clone(&self.store)
    }

    /// Time-derived identifier at second granularity plus a process-local
    /// counter, so identifiers are never reused within a process lifetime.
    fn next_scan_id(&self) -> String {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let seq = self.seq.fetch_add(1, Relaxed);
        format!("{}_{}", stamp, seq)
    }

    fn report_path(&self, scan_id: &str) -> PathBuf {
        self.output_dir.join(format!("summary_{}.json", scan_id))
    }

    /// Validates the target, registers a running record and dispatches the
    /// orchestrator onto its own task. Returns immediately with the scan id.
    pub fn start(
        &self,
        target: &str,
        config: ScanConfig,
        sink: SinkRef,
    ) -> anyhow::Result<String> {
        let target_url = Url::parse(target)
            .map_err(|e| anyhow::anyhow!("invalid target URL '{}': {}", target, e))?;
        if !matches!(target_url.scheme(), "http" | "https") {
            anyhow::bail!(
                "unsupported scheme '{}': target must be http or https",
                target_url.scheme()
            );
        }

        fs::create_dir_all(&self.output_dir)?;

        let scan_id = self.next_scan_id();
        let report = ScanReport::new(&scan_id, target);
        self.store.put(report.clone());

        let log_path = self.output_dir.join(format!("scan_{}.log", scan_id));
        let sink = match FileLogSink::create(&log_path) {
            Ok(log_sink) => FanoutSink::new_ref(vec![sink, log_sink]),
            Err(e) => {
                error!("failed to create scan log {}: {}", log_path.display(), e);
                sink
            }
        };

        let store = Arc::clone(&self.store);
        let report_path = self.report_path(&scan_id);
        let mut config = config;
        config.output_dir = self.output_dir.to_string_lossy().to_string();

        let task_scan_id = scan_id.clone();
        let handle = tokio::spawn(async move {
            sink.on_log(
                "phase",
                &format!("[*] Scan {} started on {}", task_scan_id, target_url),
            );

            let orchestrator = Orchestrator::new(target_url, config, Arc::clone(&sink));
            let timeout_fallback = report.clone();
            let final_report =
                match tokio::time::timeout(SCAN_BUDGET, orchestrator.run(report)).await {
                    Ok(finished) => finished,
                    Err(_) => {
                        sink.on_log("error", "[!] Scan exceeded the 1 hour budget");
                        let mut timed_out = timeout_fallback;
                        timed_out.error = Some("scan exceeded global wall-clock budget".into());
                        timed_out.finalize(ScanStatus::Timeout, 0);
                        timed_out
                    }
                };

            persist_report(&final_report, &report_path);
            sink.on_log(
                "success",
                &format!(
                    "[+] Scan {} finished: {} ({} findings)",
                    task_scan_id,
                    final_report.status,
                    final_report.vulnerabilities.len()
                ),
            );
            store.put(final_report);
        });

        if let Ok(mut handles) = self.handles.lock() {
            handles.insert(scan_id.clone(), handle);
        }

        info!("scan {} dispatched", scan_id);
        Ok(scan_id)
    }

    /// Awaits a dispatched scan. Used by the CLI, which runs one scan to
    /// completion; the polling surface never needs this.
    pub async fn wait(&self, scan_id: &str) -> anyhow::Result<()> {
        let handle = {
            let mut handles = self
                .handles
                .lock()
                .map_err(|_| anyhow::anyhow!("handle registry poisoned"))?;
            handles.remove(scan_id)
        };
        match handle {
            Some(handle) => {
                handle.await?;
                Ok(())
            }
            // The handle may already be pruned for a scan that finished.
            None if self.status(scan_id).is_terminal() => Ok(()),
            None => anyhow::bail!("no in-flight scan with id '{}'", scan_id),
        }
    }

    /// Drops join handles of scans whose task has finished. Long-lived
    /// embedders poll `status` without ever calling `wait`, so the registry
    /// must not grow with every completed scan.
    fn prune_finished(&self) {
        if let Ok(mut handles) = self.handles.lock() {
            handles.retain(|_, handle| !handle.is_finished());
        }
    }

    /// Status for an identifier. Falls back to the persisted report, and
    /// returns `Unknown` (storing nothing) when neither exists, so repeated
    /// polls are side-effect-free.
    pub fn status(&self, scan_id: &str) -> ScanStatus {
        self.prune_finished();
        if let Some(report) = self.store.get(scan_id) {
            return report.status;
        }
        match self.load_persisted(scan_id) {
            Some(report) => report.status,
            None => ScanStatus::Unknown,
        }
    }

    /// Full report once terminal; `None` for never-issued identifiers.
    pub fn result(&self, scan_id: &str) -> Option<ScanReport> {
        self.store
            .get(scan_id)
            .or_else(|| self.load_persisted(scan_id))
    }

    fn load_persisted(&self, scan_id: &str) -> Option<ScanReport> {
        let data = fs::read_to_string(self.report_path(scan_id)).ok()?;
        serde_json::from_str(&data).ok()
    }
}

/// Atomic write: serialize to .tmp, then rename over the real file. The
/// report for a scan id is written exactly once and never edited in place.
fn persist_report(report: &ScanReport, path: &Path) {
    let json = match serde_json::to_string_pretty(report) {
        Ok(j) => j,
        Err(e) => {
            error!("failed to serialize report {}: {}", report.scan_id, e);
            return;
        }
    };
    let tmp = path.with_extension("json.tmp");
    let written = fs::write(&tmp, &json).and_then(|_| fs::rename(&tmp, path));
    if let Err(e) = written {
        error!("failed to persist report {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NullSink;

    #[test]
    fn test_store_put_get_list() {
        let store = InMemoryScanStore::new();
        assert!(store.get("nope").is_none());

        store.put(ScanReport::new("id_1", "http://a.example"));
        store.put(ScanReport::new("id_2", "http://b.example"));

        assert_eq!(store.get("id_1").unwrap().target, "http://a.example");
        assert_eq!(store.list().len(), 2);
    }

    #[test]
    fn test_scan_ids_are_unique_within_a_second() {
        let manager = ScanManager::new(InMemoryScanStore::new_ref(), "scan_results");
        let a = manager.next_scan_id();
        let b = manager.next_scan_id();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_start_rejects_non_http_targets() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ScanManager::new(InMemoryScanStore::new_ref(), dir.path());

        let err = manager
            .start("ftp://example.com", ScanConfig::default(), NullSink::new_ref())
            .unwrap_err();
        assert!(err.to_string().contains("unsupported scheme"));

        let err = manager
            .start("not a url", ScanConfig::default(), NullSink::new_ref())
            .unwrap_err();
        assert!(err.to_string().contains("invalid target URL"));
    }

    #[test]
    fn test_unknown_scan_id_returns_unknown_without_storing() {
        let store = InMemoryScanStore::new_ref();
        let manager = ScanManager::new(Arc::clone(&store), "scan_results");

        assert_eq!(manager.status("never_issued"), ScanStatus::Unknown);
        assert!(manager.result("never_issued").is_none());
        assert!(store.list().is_empty());
    }

    #[tokio::test]
    async fn test_status_polling_prunes_finished_handles() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ScanManager::new(InMemoryScanStore::new_ref(), dir.path());

        // Nothing listens on the discard port, so every probe fails fast
        // and the scan finishes without network traffic.
        let config = ScanConfig {
            http_timeout: 1,
            enable_webapp: false,
            enable_auth: false,
            enable_infrastructure: false,
            ..ScanConfig::default()
        };
        let id = manager
            .start("http://127.0.0.1:9", config, NullSink::new_ref())
            .unwrap();

        let mut pruned = false;
        for _ in 0..200 {
            let _ = manager.status(&id);
            if manager.handles.lock().unwrap().is_empty() {
                pruned = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(pruned);
        assert!(manager.status(&id).is_terminal());

        // A finished and pruned scan can still be awaited without error.
        manager.wait(&id).await.unwrap();
    }

    #[test]
    fn test_persist_report_round_trips_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ScanManager::new(InMemoryScanStore::new_ref(), dir.path());

        let mut report = ScanReport::new("persisted_1", "http://example.com");
        report.finalize(ScanStatus::Completed, 0);
        persist_report(&report, &manager.report_path("persisted_1"));

        // Not in the store, so this exercises the persisted-file fallback.
        assert_eq!(manager.status("persisted_1"), ScanStatus::Completed);
        let loaded = manager.result("persisted_1").unwrap();
        assert_eq!(loaded.scan_id, "persisted_1");
        assert!(loaded.end_time.is_some());
    }
}
