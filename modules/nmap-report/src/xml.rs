//! Partial serde model of nmap's `-oX` output. Only the elements the monitor
//! reads are modelled; everything else is skipped by the deserializer.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(crate) struct NmapRun {
    #[serde(rename = "host", default)]
    pub hosts: Vec<Host>,
    #[serde(default)]
    pub runstats: Option<RunStats>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Host {
    #[serde(rename = "address", default)]
    pub addresses: Vec<Address>,
    #[serde(default)]
    pub status: Option<Status>,
    #[serde(default)]
    pub ports: Option<Ports>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Address {
    #[serde(rename = "@addr", default)]
    pub addr: String,
    #[serde(rename = "@addrtype", default)]
    pub addr_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Status {
    #[serde(rename = "@state", default)]
    pub state: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Ports {
    #[serde(rename = "port", default)]
    pub ports: Vec<Port>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Port {
    // kept as text so a bad id rejects the host instead of the whole file
    #[serde(rename = "@portid", default)]
    pub portid: String,
    #[serde(rename = "@protocol", default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub state: Option<PortState>,
    #[serde(default)]
    pub service: Option<Service>,
    #[serde(rename = "script", default)]
    pub scripts: Vec<Script>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PortState {
    #[serde(rename = "@state", default)]
    pub state: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Service {
    #[serde(rename = "@name", default)]
    pub name: Option<String>,
    #[serde(rename = "@product", default)]
    pub product: Option<String>,
    #[serde(rename = "@version", default)]
    pub version: Option<String>,
    #[serde(rename = "@extrainfo", default)]
    pub extra_info: Option<String>,
    #[serde(rename = "@ostype", default)]
    pub os_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Script {
    #[serde(rename = "@output", default)]
    pub output: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RunStats {
    #[serde(default)]
    pub finished: Option<Finished>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Finished {
    #[serde(rename = "@time", default)]
    pub time: Option<String>,
}
