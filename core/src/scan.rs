use serde::Serialize;
use std::path::PathBuf;
use time::OffsetDateTime;
use uuid::Uuid;

/// File-name tag that marks a result file as a service report.
pub const SERVICE_SCAN_TAG: &str = "-ServiceScan";

/// What a caller needs to launch a service scan whose output re-enters the
/// watched directory as a service report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanHandle {
    pub id: Uuid,
    pub address: String,
    pub ports: Vec<u16>,
    pub output: PathBuf,
    #[serde(with = "time::serde::rfc3339")]
    pub requested_at: OffsetDateTime,
}

/// `10.0.0.1` -> `10_0_0_1-ServiceScan.xml`
pub fn service_report_file_name(address: &str) -> String {
    let stem: String = address.chars().map(|c| if c == '.' || c == ':' { '_' } else { c }).collect();
    format!("{stem}{SERVICE_SCAN_TAG}.xml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_replaces_separators() {
        assert_eq!(service_report_file_name("10.0.0.1"), "10_0_0_1-ServiceScan.xml");
        assert_eq!(service_report_file_name("fe80::1"), "fe80__1-ServiceScan.xml");
    }
}
