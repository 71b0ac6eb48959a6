use crate::models::{validate_host, validate_parts, HostRecord};
use crate::HostStore;
use monitor_core::{DecodedHost, DecodedReport, MonitorError, ReportKind, ServicePortInfo};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

/// What a single merge did to the store.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergeSummary {
    pub hosts_created: usize,
    pub hosts_updated: usize,
    /// Observations older than what the host already reflects.
    pub hosts_stale: usize,
    pub ports_added: usize,
    pub state_changes: usize,
    /// Hosts rejected from the batch (malformed or unknown); the rest applied.
    pub skipped: Vec<MonitorError>,
    /// Addresses that had a service report merged.
    pub service_merged: Vec<String>,
}

impl MergeSummary {
    fn absorb(&mut self, other: MergeSummary) {
        self.hosts_created += other.hosts_created;
        self.hosts_updated += other.hosts_updated;
        self.hosts_stale += other.hosts_stale;
        self.ports_added += other.ports_added;
        self.state_changes += other.state_changes;
        self.skipped.extend(other.skipped);
        self.service_merged.extend(other.service_merged);
    }
}

impl HostStore {
    /// Merge a discovery sweep. Each host is reconciled independently; a
    /// malformed host is skipped without affecting the others.
    pub fn merge_discovery_report(&self, hosts: &[DecodedHost], observed_at: OffsetDateTime) -> MergeSummary {
        let summary = self.write(|table| {
            let mut summary = MergeSummary::default();
            for host in hosts {
                let valid = match validate_host(host) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(error = %e, "skipping host in discovery report");
                        summary.skipped.push(e);
                        continue;
                    }
                };
                let stale = match table.get(valid.address) {
                    None => {
                        table.insert(HostRecord::discovered(&valid, observed_at));
                        summary.hosts_created += 1;
                        summary.ports_added += valid.ports.len();
                        continue;
                    }
                    Some(existing) => existing.last_discovery_time.is_some_and(|t| observed_at < t),
                };
                if stale {
                    debug!(address = valid.address, "discovery observation older than current state");
                    summary.hosts_stale += 1;
                    continue;
                }
                if let Some(record) = table.get_mut(valid.address) {
                    let delta = record.reconcile_discovery(&valid, observed_at);
                    summary.hosts_updated += 1;
                    summary.ports_added += delta.added;
                    summary.state_changes += delta.changed;
                }
            }
            Some(summary)
        });
        summary.unwrap_or_default()
    }

    /// Overlay a service report on a host that discovery has already produced.
    ///
    /// Fails with `UnknownHost` when no record exists for `address`; the store
    /// is left untouched in that case. A report older than the host's last
    /// merged service report is counted as stale and not applied.
    pub fn merge_service_report(
        &self,
        address: &str,
        ports: &[ServicePortInfo],
        observed_at: OffsetDateTime,
    ) -> Result<MergeSummary, MonitorError> {
        let valid = validate_parts(address, None, ports)?;
        let mut outcome = Err(MonitorError::UnknownHost(valid.address.to_string()));
        self.write(|table| {
            let record = table.get_mut(valid.address)?;
            if record.last_service_scan_time.is_some_and(|t| observed_at < t) {
                debug!(address = valid.address, "service observation older than current state");
                outcome = Ok(MergeSummary { hosts_stale: 1, ..Default::default() });
                return None;
            }
            let delta = record.overlay_service(&valid, observed_at);
            outcome = Ok(MergeSummary {
                hosts_updated: 1,
                ports_added: delta.added,
                state_changes: delta.changed,
                service_merged: vec![valid.address.to_string()],
                ..Default::default()
            });
            Some(())
        });
        outcome
    }

    /// Apply a whole decoded report. Service reports may name several hosts;
    /// each is merged on its own and failures land in `skipped`.
    pub fn apply_report(&self, report: &DecodedReport, observed_at: OffsetDateTime) -> MergeSummary {
        let summary = match report.kind {
            ReportKind::Discovery => self.merge_discovery_report(&report.hosts, observed_at),
            ReportKind::Service => {
                let mut total = MergeSummary::default();
                for host in &report.hosts {
                    match self.merge_service_report(&host.address, &host.ports, observed_at) {
                        Ok(s) => total.absorb(s),
                        Err(e) => {
                            warn!(error = %e, "service report not merged");
                            total.skipped.push(e);
                        }
                    }
                }
                total
            }
        };
        info!(
            kind = ?report.kind,
            created = summary.hosts_created,
            updated = summary.hosts_updated,
            changes = summary.state_changes,
            skipped = summary.skipped.len(),
            "merged report"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monitor_core::{DecodedPort, PortKey};
    use time::macros::datetime;

    fn host(address: &str, open: &[&str]) -> DecodedHost {
        DecodedHost::new(address, open.iter().map(|p| DecodedPort::new(*p, "open")).collect())
    }

    fn svc(port: &str, product: Option<&str>) -> ServicePortInfo {
        let mut p = DecodedPort::new(port, "open").with_service("http");
        p.product = product.map(str::to_string);
        p
    }

    const T1: OffsetDateTime = datetime!(2024-03-01 10:00 UTC);
    const T2: OffsetDateTime = datetime!(2024-03-01 11:00 UTC);
    const T3: OffsetDateTime = datetime!(2024-03-01 12:00 UTC);

    #[test]
    fn first_discovery_creates_records() {
        let store = HostStore::new();
        let s = store.merge_discovery_report(&[host("10.0.0.1", &["80", "443"])], T1);
        assert_eq!(s.hosts_created, 1);
        assert_eq!(s.ports_added, 2);
        let snap = store.snapshot();
        let h = snap.get("10.0.0.1").unwrap();
        assert_eq!(h.status, "up");
        assert_eq!(h.last_discovery_time, Some(T1));
        for p in &h.ports {
            assert_eq!(p.state_history.len(), 1);
            assert_eq!(p.state_history[0].timestamp, T1);
        }
    }

    #[test]
    fn same_discovery_twice_is_idempotent() {
        let store = HostStore::new();
        let report = [host("10.0.0.1", &["80", "443"]), host("10.0.0.2", &["22"])];
        store.merge_discovery_report(&report, T1);
        let first: Vec<HostRecord> = store.snapshot().hosts().cloned().collect();
        let s = store.merge_discovery_report(&report, T1);
        assert_eq!(s.state_changes, 0);
        assert_eq!(s.ports_added, 0);
        assert_eq!(store.snapshot().hosts().cloned().collect::<Vec<_>>(), first);
    }

    #[test]
    fn missing_port_is_inferred_closed() {
        let store = HostStore::new();
        store.merge_discovery_report(&[host("10.0.0.1", &["80", "443"])], T1);
        store.merge_discovery_report(&[host("10.0.0.1", &["80"])], T2);
        let snap = store.snapshot();
        let h = snap.get("10.0.0.1").unwrap();
        let p443 = h.port(&PortKey::tcp(443)).unwrap();
        assert_eq!(p443.state, "closed");
        let hist: Vec<_> = p443.state_history.iter().map(|c| (c.state.as_str(), c.timestamp)).collect();
        assert_eq!(hist, vec![("open", T1), ("closed", T2)]);
        let p80 = h.port(&PortKey::tcp(80)).unwrap();
        assert_eq!(p80.state, "open");
        assert_eq!(p80.state_history.len(), 1);
        assert_eq!(p80.previous_state, None);
    }

    #[test]
    fn flapping_port_keeps_full_history() {
        let store = HostStore::new();
        store.merge_discovery_report(&[host("10.0.0.1", &["22", "80"])], T1);
        store.merge_discovery_report(&[host("10.0.0.1", &["22"])], T2);
        store.merge_discovery_report(&[host("10.0.0.1", &["22", "80"])], T3);
        let snap = store.snapshot();
        let p = snap.get("10.0.0.1").unwrap().port(&PortKey::tcp(80)).unwrap().clone();
        let states: Vec<_> = p.state_history.iter().map(|c| c.state.as_str()).collect();
        assert_eq!(states, vec!["open", "closed", "open"]);
        assert_eq!(p.previous_state.as_deref(), Some("closed"));
        assert_eq!(p.previous_state_timestamp, Some(T2));
        assert!(p.state_history.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn stale_discovery_is_skipped() {
        let store = HostStore::new();
        store.merge_discovery_report(&[host("10.0.0.1", &["80"])], T2);
        let s = store.merge_discovery_report(&[host("10.0.0.1", &[])], T1);
        assert_eq!(s.hosts_stale, 1);
        let snap = store.snapshot();
        assert_eq!(snap.get("10.0.0.1").unwrap().port(&PortKey::tcp(80)).unwrap().state, "open");
    }

    #[test]
    fn malformed_host_does_not_abort_batch() {
        let store = HostStore::new();
        let report = [host("", &["80"]), host("10.0.0.2", &["22"]), host("10.0.0.3", &["http"])];
        let s = store.merge_discovery_report(&report, T1);
        assert_eq!(s.hosts_created, 1);
        assert_eq!(s.skipped.len(), 2);
        assert!(store.snapshot().get("10.0.0.2").is_some());
        assert!(store.snapshot().get("10.0.0.3").is_none());
    }

    #[test]
    fn service_report_for_unknown_host_is_rejected() {
        let store = HostStore::new();
        let err = store.merge_service_report("10.9.9.9", &[svc("80", Some("nginx"))], T1).unwrap_err();
        assert_eq!(err, MonitorError::UnknownHost("10.9.9.9".into()));
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn service_overlay_is_additive() {
        let store = HostStore::new();
        store.merge_discovery_report(&[host("10.0.0.1", &["80", "443"])], T1);
        let before_443 = store.snapshot().get("10.0.0.1").unwrap().port(&PortKey::tcp(443)).cloned();

        store.merge_service_report("10.0.0.1", &[svc("80", Some("nginx"))], T2).unwrap();
        store.merge_service_report("10.0.0.1", &[svc("80", Some(""))], T3).unwrap();

        let snap = store.snapshot();
        let h = snap.get("10.0.0.1").unwrap();
        assert!(h.service_scanned);
        assert_eq!(h.last_service_scan_time, Some(T3));
        let p80 = h.port(&PortKey::tcp(80)).unwrap();
        assert_eq!(p80.product.as_deref(), Some("nginx"));
        assert_eq!(p80.service.as_deref(), Some("http"));
        assert_eq!(p80.state_history.len(), 1);
        assert_eq!(h.port(&PortKey::tcp(443)).cloned(), before_443);
    }

    #[test]
    fn discovery_keeps_service_scan_status() {
        let store = HostStore::new();
        store.merge_discovery_report(&[host("10.0.0.1", &["80"])], T1);
        store.merge_service_report("10.0.0.1", &[svc("80", Some("nginx"))], T2).unwrap();
        store.merge_discovery_report(&[host("10.0.0.1", &["80"])], T3);
        let snap = store.snapshot();
        let h = snap.get("10.0.0.1").unwrap();
        assert!(h.service_scanned);
        assert_eq!(h.last_service_scan_time, Some(T2));
        assert_eq!(h.last_discovery_time, Some(T3));
    }

    #[test]
    fn service_report_changes_listed_port_state() {
        let store = HostStore::new();
        store.merge_discovery_report(&[host("10.0.0.1", &["80", "8080"])], T1);
        let mut closed = DecodedPort::new("8080", "closed");
        closed.service = Some("http-proxy".into());
        let s = store.merge_service_report("10.0.0.1", &[closed, svc("9000", None)], T2).unwrap();
        assert_eq!(s.state_changes, 1);
        assert_eq!(s.ports_added, 1);
        let snap = store.snapshot();
        let h = snap.get("10.0.0.1").unwrap();
        assert_eq!(h.port(&PortKey::tcp(8080)).unwrap().state, "closed");
        assert_eq!(h.port(&PortKey::tcp(80)).unwrap().state, "open");
        assert!(h.port(&PortKey::tcp(9000)).is_some());
    }

    #[test]
    fn apply_report_collects_unknown_service_hosts() {
        let store = HostStore::new();
        store.merge_discovery_report(&[host("10.0.0.1", &["80"])], T1);
        let report = DecodedReport {
            kind: ReportKind::Service,
            hosts: vec![host("10.0.0.1", &["80"]), host("10.0.0.7", &["22"])],
            finished_at: None,
        };
        let s = store.apply_report(&report, T2);
        assert_eq!(s.service_merged, vec!["10.0.0.1".to_string()]);
        assert_eq!(s.skipped, vec![MonitorError::UnknownHost("10.0.0.7".into())]);
    }

    #[test]
    fn older_service_report_does_not_overwrite_newer() {
        let store = HostStore::new();
        store.merge_discovery_report(&[host("10.0.0.1", &["80"])], T1);
        let mut newer = svc("80", Some("nginx"));
        newer.version = Some("1.25".into());
        store.merge_service_report("10.0.0.1", &[newer], T3).unwrap();
        let mut older = svc("80", Some("nginx"));
        older.version = Some("1.18".into());
        let s = store.merge_service_report("10.0.0.1", &[older], T2).unwrap();
        assert_eq!(s.hosts_stale, 1);
        assert!(s.service_merged.is_empty());
        let snap = store.snapshot();
        let h = snap.get("10.0.0.1").unwrap();
        assert_eq!(h.last_service_scan_time, Some(T3));
        assert_eq!(h.port(&PortKey::tcp(80)).unwrap().version.as_deref(), Some("1.25"));
    }

    #[test]
    fn same_second_discovery_still_closes_missing_port() {
        let store = HostStore::new();
        store.merge_discovery_report(&[host("10.0.0.1", &["80", "443"])], T1);
        let s = store.merge_discovery_report(&[host("10.0.0.1", &["80"])], T1);
        assert_eq!(s.hosts_stale, 0);
        assert_eq!(s.state_changes, 1);
        let snap = store.snapshot();
        let p443 = snap.get("10.0.0.1").unwrap().port(&PortKey::tcp(443)).unwrap().clone();
        assert_eq!(p443.state, "closed");
        assert_eq!(p443.previous_state.as_deref(), Some("open"));
        assert!(p443.state_history.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn snapshot_never_sees_half_applied_port() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(HostStore::new());
        store.merge_discovery_report(&[host("10.0.0.1", &["80"])], T1);
        let writer = {
            let store = store.clone();
            thread::spawn(move || {
                for i in 1..200i64 {
                    let at = T1 + time::Duration::minutes(i);
                    let open: &[&str] = if i % 2 == 0 { &["80"] } else { &[] };
                    store.merge_discovery_report(&[host("10.0.0.1", open)], at);
                }
            })
        };
        for _ in 0..500 {
            let snap = store.snapshot();
            let p = snap.get("10.0.0.1").unwrap().port(&PortKey::tcp(80)).unwrap();
            assert_eq!(p.state_history.last().map(|c| c.state.as_str()), Some(p.state.as_str()));
        }
        writer.join().unwrap();
    }
}
