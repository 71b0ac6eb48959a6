use monitor_core::{DecodedHost, DecodedPort, MonitorError, PortKey, STATE_CLOSED, STATE_OPEN};
use serde::Serialize;
use std::collections::BTreeMap;
use time::{Duration, OffsetDateTime};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateChange {
    pub state: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortRecord {
    pub port_id: u16,
    pub protocol: String,
    pub state: String,
    pub previous_state: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub previous_state_timestamp: Option<OffsetDateTime>,
    /// Oldest first; one entry per observed change.
    pub state_history: Vec<StateChange>,
    pub service: Option<String>,
    pub product: Option<String>,
    pub version: Option<String>,
    pub extra_info: Option<String>,
    pub os_type: Option<String>,
    pub script_output: Option<String>,
}

impl PortRecord {
    pub(crate) fn fresh(key: &PortKey, decoded: &DecodedPort, at: OffsetDateTime) -> Self {
        let mut port = PortRecord {
            port_id: key.port,
            protocol: key.protocol.clone(),
            state: decoded.state.clone(),
            previous_state: None,
            previous_state_timestamp: None,
            state_history: vec![StateChange { state: decoded.state.clone(), timestamp: at }],
            service: None,
            product: None,
            version: None,
            extra_info: None,
            os_type: None,
            script_output: None,
        };
        port.overlay(decoded);
        port
    }

    pub fn key(&self) -> PortKey {
        PortKey { protocol: self.protocol.clone(), port: self.port_id }
    }

    pub fn is_open(&self) -> bool {
        self.state == STATE_OPEN
    }

    pub fn last_observed(&self) -> Option<OffsetDateTime> {
        self.state_history.last().map(|c| c.timestamp)
    }

    /// Record `state` as observed at `at`. Returns true when the state changed.
    ///
    /// Re-observing the current state is a no-op. A change stamped before the
    /// newest history entry is ignored. One stamped exactly at it comes from a
    /// report finished in the same second and applied after it, so it is kept
    /// and recorded one nanosecond later to keep the history strictly ordered.
    pub(crate) fn observe_state(&mut self, state: &str, at: OffsetDateTime) -> bool {
        if state.is_empty() || self.state == state {
            return false;
        }
        let last = self.last_observed();
        let at = match last {
            Some(last) if at < last => {
                debug!(port = %self.key(), state, "ignoring out-of-order state change");
                return false;
            }
            Some(last) if at == last => last + Duration::nanoseconds(1),
            _ => at,
        };
        self.previous_state = Some(std::mem::replace(&mut self.state, state.to_string()));
        self.previous_state_timestamp = last;
        self.state_history.push(StateChange { state: state.to_string(), timestamp: at });
        true
    }

    /// Non-empty incoming descriptive fields overwrite, absent ones keep what we had.
    pub(crate) fn overlay(&mut self, decoded: &DecodedPort) {
        overlay_field(&mut self.service, &decoded.service);
        overlay_field(&mut self.product, &decoded.product);
        overlay_field(&mut self.version, &decoded.version);
        overlay_field(&mut self.extra_info, &decoded.extra_info);
        overlay_field(&mut self.os_type, &decoded.os_type);
        overlay_field(&mut self.script_output, &decoded.script_output);
    }

    /// Discovery sweeps only guess the service name; never replace a known one.
    pub(crate) fn fill_service(&mut self, decoded: &DecodedPort) {
        if self.service.is_none() {
            overlay_field(&mut self.service, &decoded.service);
        }
    }
}

fn overlay_field(slot: &mut Option<String>, incoming: &Option<String>) {
    if let Some(v) = incoming.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        *slot = Some(v.to_string());
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostRecord {
    pub address: String,
    pub status: String,
    /// Sorted by port key.
    pub ports: Vec<PortRecord>,
    pub service_scanned: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_service_scan_time: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_discovery_time: Option<OffsetDateTime>,
}

impl HostRecord {
    pub(crate) fn bare(address: &str) -> Self {
        HostRecord {
            address: address.to_string(),
            status: "unknown".into(),
            ports: Vec::new(),
            service_scanned: false,
            last_service_scan_time: None,
            last_discovery_time: None,
        }
    }

    pub(crate) fn discovered(host: &ValidHost<'_>, at: OffsetDateTime) -> Self {
        let mut record = HostRecord::bare(host.address);
        if let Some(status) = host.status {
            record.status = status.to_string();
        }
        record.ports = host.ports.iter().map(|(key, p)| PortRecord::fresh(key, p, at)).collect();
        record.last_discovery_time = Some(at);
        record
    }

    pub fn port(&self, key: &PortKey) -> Option<&PortRecord> {
        self.find(key).ok().map(|i| &self.ports[i])
    }

    pub fn open_ports(&self) -> impl Iterator<Item = &PortRecord> {
        self.ports.iter().filter(|p| p.is_open())
    }

    pub fn has_open_port(&self, key: &PortKey) -> bool {
        self.port(key).is_some_and(PortRecord::is_open)
    }

    pub fn has_open_service(&self, service: &str) -> bool {
        self.open_ports().any(|p| p.service.as_deref() == Some(service))
    }

    fn find(&self, key: &PortKey) -> Result<usize, usize> {
        self.ports.binary_search_by(|p| {
            (p.protocol.as_str(), p.port_id).cmp(&(key.protocol.as_str(), key.port))
        })
    }

    /// Existing record for `key`, or a freshly inserted one built from `decoded`.
    /// The flag is true when the record was created.
    pub(crate) fn port_entry(
        &mut self,
        key: &PortKey,
        decoded: &DecodedPort,
        at: OffsetDateTime,
    ) -> (&mut PortRecord, bool) {
        match self.find(key) {
            Ok(i) => (&mut self.ports[i], false),
            Err(i) => {
                self.ports.insert(i, PortRecord::fresh(key, decoded, at));
                (&mut self.ports[i], true)
            }
        }
    }

    /// Apply a discovery observation. Ports missing from it are inferred closed.
    pub(crate) fn reconcile_discovery(&mut self, host: &ValidHost<'_>, at: OffsetDateTime) -> PortDelta {
        let mut delta = PortDelta::default();
        if let Some(status) = host.status {
            self.status = status.to_string();
        }
        for port in self.ports.iter_mut() {
            if !host.ports.contains_key(&port.key()) && port.observe_state(STATE_CLOSED, at) {
                delta.changed += 1;
            }
        }
        for (key, decoded) in &host.ports {
            let (port, created) = self.port_entry(key, decoded, at);
            if created {
                delta.added += 1;
                continue;
            }
            if port.observe_state(&decoded.state, at) {
                delta.changed += 1;
            }
            port.fill_service(decoded);
        }
        self.last_discovery_time = Some(self.last_discovery_time.map_or(at, |t| t.max(at)));
        delta
    }

    /// Overlay a service observation on the ports it lists; others are untouched.
    pub(crate) fn overlay_service(&mut self, host: &ValidHost<'_>, at: OffsetDateTime) -> PortDelta {
        let mut delta = PortDelta::default();
        for (key, decoded) in &host.ports {
            let (port, created) = self.port_entry(key, decoded, at);
            if created {
                delta.added += 1;
                continue;
            }
            if port.observe_state(&decoded.state, at) {
                delta.changed += 1;
            }
            port.overlay(decoded);
        }
        self.service_scanned = true;
        self.last_service_scan_time = Some(self.last_service_scan_time.map_or(at, |t| t.max(at)));
        delta
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PortDelta {
    pub added: usize,
    pub changed: usize,
}

/// A decoded host that passed validation, ports keyed and deduplicated.
#[derive(Debug)]
pub(crate) struct ValidHost<'a> {
    pub address: &'a str,
    pub status: Option<&'a str>,
    pub ports: BTreeMap<PortKey, &'a DecodedPort>,
}

pub(crate) fn validate_host(host: &DecodedHost) -> Result<ValidHost<'_>, MonitorError> {
    validate_parts(&host.address, host.status.as_deref(), &host.ports)
}

pub(crate) fn validate_parts<'a>(
    address: &'a str,
    status: Option<&'a str>,
    decoded: &'a [DecodedPort],
) -> Result<ValidHost<'a>, MonitorError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(MonitorError::malformed("", "missing address"));
    }
    let mut ports = BTreeMap::new();
    for port in decoded {
        let key = port
            .key()
            .map_err(|e| MonitorError::malformed(address, e.to_string()))?;
        if port.state.trim().is_empty() {
            return Err(MonitorError::malformed(address, format!("port {key} has no state")));
        }
        ports.insert(key, port);
    }
    let status = status.map(str::trim).filter(|s| !s.is_empty());
    Ok(ValidHost { address, status, ports })
}
