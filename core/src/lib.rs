//! Core shared types for the scan monitor: decoded reports, port keys,
//! scan handles and the error taxonomy used across the workspace.

pub mod error;
pub mod port;
pub mod report;
pub mod scan;

pub use error::MonitorError;
pub use port::{PortKey, DEFAULT_PROTOCOL, STATE_CLOSED, STATE_OPEN};
pub use report::{DecodedHost, DecodedPort, DecodedReport, ReportKind, ServicePortInfo};
pub use scan::{service_report_file_name, ScanHandle, SERVICE_SCAN_TAG};

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
