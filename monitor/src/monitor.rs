//! The monitor facade: owns the host store, the advisory scan markers, the
//! directory watch and the scan dispatcher, and exposes the read and write
//! operations the CLI and HTTP layers call.

use crate::config::Settings;
use anyhow::Result;
use dir_watch::{DirWatch, FileEvent, WatchOptions};
use host_store::query::{self, PortGroup};
use host_store::{FilterRequest, HostRecord, HostStore, MergeSummary, ScanMarkers, Snapshot};
use monitor_core::{MonitorError, PortKey, ScanHandle};
use serde::Serialize;
use service_scan::Dispatcher;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use time::OffsetDateTime;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

/// A host as presented to readers, with the advisory scan flag.
#[derive(Debug, Clone, Serialize)]
pub struct HostView {
    #[serde(flatten)]
    pub host: HostRecord,
    pub scanning: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    #[serde(flatten)]
    pub handle: ScanHandle,
    pub command: String,
    pub dispatched: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilterResult {
    pub hosts: Vec<HostView>,
    pub groups: Vec<PortGroup>,
}

pub struct Monitor {
    store: HostStore,
    markers: ScanMarkers,
    dispatcher: Dispatcher,
    watch_options: WatchOptions,
    events: UnboundedSender<FileEvent>,
    watch: Mutex<Option<DirWatch>>,
}

impl Monitor {
    /// The receiver carries watcher events; hand it to [`run_pipeline`].
    pub fn new(settings: &Settings) -> Result<(Arc<Monitor>, UnboundedReceiver<FileEvent>)> {
        let (events, rx) = mpsc::unbounded_channel();
        let monitor = Monitor {
            store: HostStore::new(),
            markers: ScanMarkers::new(settings.marker_ttl),
            dispatcher: Dispatcher::new(settings.policy.clone(), settings.max_concurrent, settings.dispatch),
            watch_options: WatchOptions::new(&settings.pattern, settings.debounce)?,
            events,
            watch: Mutex::new(None),
        };
        Ok((Arc::new(monitor), rx))
    }

    pub fn snapshot(&self) -> Snapshot {
        self.store.snapshot()
    }

    pub fn host_views(&self) -> Vec<HostView> {
        let now = OffsetDateTime::now_utc();
        self.snapshot().hosts().map(|h| self.view(h, now)).collect()
    }

    fn view(&self, host: &HostRecord, now: OffsetDateTime) -> HostView {
        HostView { host: host.clone(), scanning: self.markers.is_scanning(&host.address, now) }
    }

    pub fn available_ports(&self) -> Vec<String> {
        query::available_ports(&self.snapshot())
    }

    pub fn available_services(&self) -> Vec<String> {
        query::available_services(&self.snapshot())
    }

    pub fn evaluate_filters(&self, filters: &FilterRequest) -> Vec<String> {
        query::evaluate_filters(&self.snapshot(), filters)
    }

    /// Passing hosts and their port groups, both taken from one snapshot.
    pub fn filter(&self, filters: &FilterRequest) -> FilterResult {
        let snapshot = self.snapshot();
        let now = OffsetDateTime::now_utc();
        let hosts = query::evaluate_filters(&snapshot, filters)
            .iter()
            .filter_map(|a| snapshot.get(a))
            .map(|h| self.view(h, now))
            .collect();
        FilterResult { hosts, groups: query::group_filtered(&snapshot, filters) }
    }

    pub fn groups(&self) -> Vec<PortGroup> {
        query::group_by_open_port(&self.snapshot())
    }

    /// `(file name, newline-separated addresses)` for the group of `key`.
    pub fn export_group(&self, key: &PortKey) -> Option<(String, String)> {
        let group = self.groups().into_iter().find(|g| &g.key() == key)?;
        Some((host_store::host_list_file_name(&group), host_store::host_list(&group)))
    }

    /// Switch the watch to `path`. A rejected path leaves the current watch running.
    pub fn set_watched_directory(&self, path: &Path) -> Result<PathBuf, MonitorError> {
        let watch = DirWatch::start(path, &self.watch_options, self.events.clone())?;
        let dir = watch.directory().to_path_buf();
        let previous = self.lock_watch().replace(watch);
        if let Some(old) = previous {
            info!(from = %old.directory().display(), to = %dir.display(), "watched directory changed");
        }
        Ok(dir)
    }

    pub fn watched_directory(&self) -> Option<PathBuf> {
        self.lock_watch().as_ref().map(|w| w.directory().to_path_buf())
    }

    /// Ask for a service scan of `address`. Without explicit ports the host's
    /// currently open ports are scanned. Repeat requests are never refused.
    pub fn request_service_scan(&self, address: &str, ports: &[u16]) -> Result<ScanRequest, MonitorError> {
        let address = address.trim();
        let dir = self
            .watched_directory()
            .ok_or_else(|| MonitorError::InvalidScanRequest("no directory is being watched".into()))?;
        let ports = if ports.is_empty() {
            let snapshot = self.snapshot();
            let host = snapshot.get(address).ok_or_else(|| MonitorError::UnknownHost(address.to_string()))?;
            host.open_ports().map(|p| p.port_id).collect()
        } else {
            ports.to_vec()
        };
        let now = OffsetDateTime::now_utc();
        let handle = service_scan::plan_scan(address, &ports, &dir, self.dispatcher.policy(), now)?;
        let submission = self.dispatcher.submit(&handle)?;
        self.markers.mark(&handle.address, now);
        Ok(ScanRequest {
            command: submission.invocation.command_line(),
            dispatched: submission.task.is_some(),
            handle,
        })
    }

    /// Decode one report file and merge it.
    pub fn ingest_file(&self, path: &Path) -> Result<MergeSummary, MonitorError> {
        let file = nmap_report::read_report(path)?;
        let summary = self.store.apply_report(&file.report, file.observed_at);
        for skipped in &summary.skipped {
            warn!(file = %path.display(), error = %skipped, "host skipped");
        }
        for address in &summary.service_merged {
            self.markers.clear(address);
        }
        Ok(summary)
    }

    /// Ingest files, or the matching files of directories, in order.
    pub fn ingest_paths(&self, paths: &[PathBuf]) -> Result<usize> {
        let mut merged = 0;
        for path in paths {
            let files = if path.is_dir() {
                dir_watch::initial_files(path, &self.watch_options)?
            } else {
                vec![path.clone()]
            };
            for file in files {
                match self.ingest_file(&file) {
                    Ok(_) => merged += 1,
                    Err(e) => warn!(file = %file.display(), error = %e, "report not merged"),
                }
            }
        }
        Ok(merged)
    }

    fn lock_watch(&self) -> MutexGuard<'_, Option<DirWatch>> {
        self.watch.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Apply watcher events one at a time, in arrival order.
pub async fn run_pipeline(monitor: Arc<Monitor>, mut rx: UnboundedReceiver<FileEvent>) {
    while let Some(event) = rx.recv().await {
        let m = monitor.clone();
        let path = event.path.clone();
        let outcome = tokio::task::spawn_blocking(move || m.ingest_file(&path)).await;
        match outcome {
            Ok(Ok(summary)) => debug!(file = %event.path.display(), kind = ?event.kind, ?summary, "ingested"),
            Ok(Err(MonitorError::IncompleteReport(name))) => debug!(file = %name, "report still being written"),
            Ok(Err(e)) => warn!(file = %event.path.display(), error = %e, "report not merged"),
            Err(e) => warn!(file = %event.path.display(), error = %e, "ingest task failed"),
        }
    }
    debug!("event stream closed");
}
