use crate::port::{normalize_protocol, parse_port_id};
use crate::{MonitorError, PortKey};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Discovery reports sweep many hosts; service reports carry version detail
/// for one previously discovered host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    Discovery,
    Service,
}

/// One port as decoded from a report, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedPort {
    pub port_id: String,
    pub protocol: Option<String>,
    pub state: String,
    pub service: Option<String>,
    pub product: Option<String>,
    pub version: Option<String>,
    pub extra_info: Option<String>,
    pub os_type: Option<String>,
    /// Output of the first NSE script nmap ran against the port.
    pub script_output: Option<String>,
}

/// Service reports use the same shape; only the descriptive fields differ in
/// how they are merged.
pub type ServicePortInfo = DecodedPort;

impl DecodedPort {
    pub fn new(port_id: impl Into<String>, state: impl Into<String>) -> Self {
        DecodedPort { port_id: port_id.into(), state: state.into(), ..Default::default() }
    }

    pub fn with_service(mut self, service: &str) -> Self {
        self.service = Some(service.to_string());
        self
    }

    pub fn key(&self) -> Result<PortKey, MonitorError> {
        let port = parse_port_id(&self.port_id)?;
        Ok(PortKey { protocol: normalize_protocol(self.protocol.as_deref()), port })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedHost {
    pub address: String,
    pub status: Option<String>,
    pub ports: Vec<DecodedPort>,
}

impl DecodedHost {
    pub fn new(address: impl Into<String>, ports: Vec<DecodedPort>) -> Self {
        DecodedHost { address: address.into(), status: Some("up".into()), ports }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedReport {
    pub kind: ReportKind,
    pub hosts: Vec<DecodedHost>,
    /// Completion time recorded by the scanner, when the report carries one.
    pub finished_at: Option<OffsetDateTime>,
}
