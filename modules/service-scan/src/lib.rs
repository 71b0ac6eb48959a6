//! Service-scan triggering: turns a request for one host into an allow-listed
//! nmap invocation whose XML output lands in the watched directory, and runs
//! those invocations with bounded concurrency.

mod dispatch;
mod policy;

pub use dispatch::{Dispatcher, Submission};
pub use policy::{Invocation, ScanPolicy, ALLOWED_FLAGS, DEFAULT_EXTRA_ARGS, DEFAULT_PROGRAM};

use monitor_core::{service_report_file_name, MonitorError, ScanHandle};
use std::path::Path;
use time::OffsetDateTime;
use uuid::Uuid;

/// Parse a comma-separated list of ports/ranges (e.g., "22,80,443", "1-1024,8080").
pub fn parse_ports(spec: &str) -> Result<Vec<u16>, MonitorError> {
    let bad = |part: &str| MonitorError::InvalidScanRequest(format!("invalid port: {part}"));
    let mut ports = Vec::new();
    for part in spec.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()) {
        if let Some((start, end)) = part.split_once('-') {
            let s: u16 = start.trim().parse().map_err(|_| bad(part))?;
            let e: u16 = end.trim().parse().map_err(|_| bad(part))?;
            if s == 0 || e == 0 || s > e {
                return Err(MonitorError::InvalidScanRequest(format!("invalid port range: {part}")));
            }
            ports.extend(s..=e);
        } else {
            let p: u16 = part.parse().map_err(|_| bad(part))?;
            if p == 0 {
                return Err(bad(part));
            }
            ports.push(p);
        }
    }
    ports.sort_unstable();
    ports.dedup();
    Ok(ports)
}

/// `[22, 80, 443]` -> `22,80,443`
pub fn format_ports(ports: &[u16]) -> String {
    ports.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(",")
}

/// Build the handle for a service scan of `address`, writing into `watch_dir`.
pub fn plan_scan(
    address: &str,
    ports: &[u16],
    watch_dir: &Path,
    policy: &ScanPolicy,
    now: OffsetDateTime,
) -> Result<ScanHandle, MonitorError> {
    let address = address.trim();
    policy.check_address(address)?;
    let mut ports: Vec<u16> = ports.iter().copied().filter(|&p| p != 0).collect();
    ports.sort_unstable();
    ports.dedup();
    if ports.is_empty() {
        return Err(MonitorError::InvalidScanRequest(format!("no ports to scan on {address}")));
    }
    Ok(ScanHandle {
        id: Uuid::now_v7(),
        address: address.to_string(),
        ports,
        output: watch_dir.join(service_report_file_name(address)),
        requested_at: now,
    })
}
