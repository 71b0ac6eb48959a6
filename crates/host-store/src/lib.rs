//! In-memory reconciliation of scan reports into per-host, per-port state
//! with history, plus the read-side queries built on its snapshots.

mod export;
mod markers;
mod merge;
mod models;
pub mod query;
mod store;

pub use export::{host_list, host_list_file_name, write_snapshot_csv};
pub use markers::{ScanMarkers, DEFAULT_MARKER_TTL};
pub use merge::MergeSummary;
pub use models::{HostRecord, PortRecord, StateChange};
pub use query::{FilterOp, FilterRequest, PortFilter, PortGroup, Selector, ServiceFilter};
pub use store::{HostStore, Snapshot};
