//! Read-side projections over a [`Snapshot`]: port grouping, selector-chain
//! filtering and the available port/service lists.

use crate::models::HostRecord;
use crate::Snapshot;
use monitor_core::{MonitorError, PortKey};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::str::FromStr;

/// How an extra selector combines with the running result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FilterOp {
    And,
    Or,
    Not,
}

impl FromStr for FilterOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AND" => Ok(FilterOp::And),
            "OR" => Ok(FilterOp::Or),
            "NOT" => Ok(FilterOp::Not),
            other => Err(format!("unknown filter operation: {other}")),
        }
    }
}

/// Matches a host with at least one open port satisfying the predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Port(PortKey),
    Service(String),
}

impl Selector {
    pub fn port(spec: &str) -> Result<Self, MonitorError> {
        Ok(Selector::Port(spec.parse()?))
    }

    pub fn matches(&self, host: &HostRecord) -> bool {
        match self {
            Selector::Port(key) => host.has_open_port(key),
            Selector::Service(name) => host.has_open_service(name),
        }
    }
}

/// Evaluate `base` then each extra strictly left to right as set operations
/// over `candidates`. There is no precedence: `a AND b OR c` is `(a ∩ b) ∪ c`.
///
/// With no base and no extras every candidate passes. With extras but no base
/// the running set starts empty, so only OR extras can contribute.
pub fn evaluate_selector_chain<'a>(
    snapshot: &'a Snapshot,
    base: Option<&Selector>,
    extras: &[(Selector, FilterOp)],
    candidates: &HashSet<&'a str>,
) -> HashSet<&'a str> {
    if base.is_none() && extras.is_empty() {
        return candidates.clone();
    }
    let matching = |selector: &Selector| -> HashSet<&'a str> {
        snapshot
            .hosts()
            .filter(|h| candidates.contains(h.address.as_str()) && selector.matches(h))
            .map(|h| h.address.as_str())
            .collect()
    };
    let mut result = base.map(|b| matching(b)).unwrap_or_default();
    for (selector, op) in extras {
        let hits = matching(selector);
        match op {
            FilterOp::And => result.retain(|a| hits.contains(a)),
            FilterOp::Or => result.extend(hits),
            FilterOp::Not => result.retain(|a| !hits.contains(a)),
        }
    }
    result
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortFilter {
    pub port: PortKey,
    pub operation: FilterOp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceFilter {
    pub service: String,
    pub operation: FilterOp,
}

/// The two independent selector chains the dashboard builds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterRequest {
    pub base_port: Option<PortKey>,
    pub port_filters: Vec<PortFilter>,
    pub base_service: Option<String>,
    pub service_filters: Vec<ServiceFilter>,
}

impl FilterRequest {
    pub fn port_chain_active(&self) -> bool {
        self.base_port.is_some() || !self.port_filters.is_empty()
    }

    pub fn service_chain_active(&self) -> bool {
        self.base_service.is_some() || !self.service_filters.is_empty()
    }

    fn port_chain(&self) -> (Option<Selector>, Vec<(Selector, FilterOp)>) {
        let base = self.base_port.clone().map(Selector::Port);
        let extras = self
            .port_filters
            .iter()
            .map(|f| (Selector::Port(f.port.clone()), f.operation))
            .collect();
        (base, extras)
    }

    fn service_chain(&self) -> (Option<Selector>, Vec<(Selector, FilterOp)>) {
        let base = self.base_service.clone().map(Selector::Service);
        let extras = self
            .service_filters
            .iter()
            .map(|f| (Selector::Service(f.service.clone()), f.operation))
            .collect();
        (base, extras)
    }
}

/// Addresses passing both chains, in snapshot order. Chains combine by
/// intersection when both are active; an inactive chain passes everything.
pub fn evaluate_filters(snapshot: &Snapshot, filters: &FilterRequest) -> Vec<String> {
    let all: HashSet<&str> = snapshot.hosts().map(|h| h.address.as_str()).collect();
    let mut passing = all.clone();
    if filters.port_chain_active() {
        let (base, extras) = filters.port_chain();
        passing = evaluate_selector_chain(snapshot, base.as_ref(), &extras, &passing);
    }
    if filters.service_chain_active() {
        let (base, extras) = filters.service_chain();
        let by_service = evaluate_selector_chain(snapshot, base.as_ref(), &extras, &all);
        passing.retain(|a| by_service.contains(a));
    }
    snapshot
        .hosts()
        .map(|h| h.address.as_str())
        .filter(|a| passing.contains(a))
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupMember {
    pub address: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortGroup {
    pub protocol: String,
    pub port_id: u16,
    /// Service name on the first host (snapshot order) with this port open.
    pub service: Option<String>,
    pub hosts: Vec<GroupMember>,
}

impl PortGroup {
    pub fn key(&self) -> PortKey {
        PortKey { protocol: self.protocol.clone(), port: self.port_id }
    }
}

/// Every open port across all hosts, grouped by port key in first-seen order.
pub fn group_by_open_port(snapshot: &Snapshot) -> Vec<PortGroup> {
    group_hosts(snapshot.hosts(), |_| true)
}

/// Grouping restricted to the hosts passing `filters` and, when a base port is
/// set, to the base port plus every OR-ed extra port.
pub fn group_filtered(snapshot: &Snapshot, filters: &FilterRequest) -> Vec<PortGroup> {
    let passing: HashSet<String> = evaluate_filters(snapshot, filters).into_iter().collect();
    let allowed: Option<HashSet<&PortKey>> = filters.base_port.as_ref().map(|base| {
        std::iter::once(base)
            .chain(filters.port_filters.iter().filter(|f| f.operation == FilterOp::Or).map(|f| &f.port))
            .collect()
    });
    let hosts = snapshot.hosts().filter(|h| passing.contains(&h.address));
    group_hosts(hosts, |key| allowed.as_ref().map_or(true, |a| a.contains(key)))
}

fn group_hosts<'a>(
    hosts: impl Iterator<Item = &'a HostRecord>,
    include: impl Fn(&PortKey) -> bool,
) -> Vec<PortGroup> {
    let mut groups: Vec<PortGroup> = Vec::new();
    let mut index: HashMap<PortKey, usize> = HashMap::new();
    for host in hosts {
        for port in host.open_ports() {
            let key = port.key();
            if !include(&key) {
                continue;
            }
            let i = *index.entry(key).or_insert_with(|| {
                groups.push(PortGroup {
                    protocol: port.protocol.clone(),
                    port_id: port.port_id,
                    service: port.service.clone(),
                    hosts: Vec::new(),
                });
                groups.len() - 1
            });
            groups[i].hosts.push(GroupMember { address: host.address.clone(), status: host.status.clone() });
        }
    }
    groups
}

/// Distinct `protocol/port` keys of open ports, sorted as strings.
pub fn available_ports(snapshot: &Snapshot) -> Vec<String> {
    let keys: BTreeSet<String> = snapshot
        .hosts()
        .flat_map(|h| h.open_ports())
        .map(|p| p.key().to_string())
        .collect();
    keys.into_iter().collect()
}

/// Distinct service names on open ports, skipping blank and `unknown`.
pub fn available_services(snapshot: &Snapshot) -> Vec<String> {
    let names: BTreeSet<String> = snapshot
        .hosts()
        .flat_map(|h| h.open_ports())
        .filter_map(|p| p.service.as_deref())
        .filter(|s| !s.is_empty() && *s != "unknown")
        .map(str::to_string)
        .collect();
    names.into_iter().collect()
}
