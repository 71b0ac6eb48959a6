use crate::MonitorError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_PROTOCOL: &str = "tcp";
pub const STATE_OPEN: &str = "open";
pub const STATE_CLOSED: &str = "closed";

/// Identity of a port within a host: `(protocol, port)`.
///
/// Ordering is by protocol name first, then numeric port, which is the order
/// ports are kept in inside a host record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PortKey {
    pub protocol: String,
    pub port: u16,
}

impl PortKey {
    pub fn new(protocol: &str, port: u16) -> Self {
        PortKey { protocol: normalize_protocol(Some(protocol)), port }
    }

    pub fn tcp(port: u16) -> Self {
        PortKey::new(DEFAULT_PROTOCOL, port)
    }
}

/// Lowercased protocol, `tcp` when absent or blank.
pub fn normalize_protocol(protocol: Option<&str>) -> String {
    match protocol.map(str::trim) {
        Some(p) if !p.is_empty() => p.to_ascii_lowercase(),
        _ => DEFAULT_PROTOCOL.to_string(),
    }
}

/// Parse a port id as carried by reports (`"80"`). Zero is rejected.
pub fn parse_port_id(raw: &str) -> Result<u16, MonitorError> {
    match raw.trim().parse::<u16>() {
        Ok(0) | Err(_) => Err(MonitorError::InvalidPortKey(raw.to_string())),
        Ok(p) => Ok(p),
    }
}

impl fmt::Display for PortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.protocol, self.port)
    }
}

/// Accepts `tcp/80`, `UDP/53` or a bare `80` (tcp).
impl FromStr for PortKey {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once('/') {
            Some((proto, port)) => {
                if proto.trim().is_empty() {
                    return Err(MonitorError::InvalidPortKey(s.to_string()));
                }
                Ok(PortKey::new(proto, parse_port_id(port)?))
            }
            None => Ok(PortKey::tcp(parse_port_id(s)?)),
        }
    }
}

impl TryFrom<String> for PortKey {
    type Error = MonitorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PortKey> for String {
    fn from(key: PortKey) -> Self {
        key.to_string()
    }
}
