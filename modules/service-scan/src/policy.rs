use crate::format_ports;
use ipnet::IpNet;
use monitor_core::{MonitorError, ScanHandle};
use regex::Regex;
use serde::Serialize;
use std::net::IpAddr;
use std::sync::OnceLock;

pub const DEFAULT_PROGRAM: &str = "nmap";
pub const DEFAULT_EXTRA_ARGS: &[&str] = &["-sV", "-Pn"];

/// Flags an operator may add to the service-scan command line. Timing
/// templates (`-T0`..`-T5`) are accepted separately.
pub const ALLOWED_FLAGS: &[&str] = &[
    "-sV", "-Pn", "-sC", "-sT", "-sS", "-sU", "-n", "-6", "-v", "--open", "--reason", "--version-light",
    "--version-all",
];

fn hostname_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]{0,62})(\.[A-Za-z0-9]([A-Za-z0-9-]{0,62}))*$").ok())
        .as_ref()
}

fn timing_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^-T[0-5]$").ok()).as_ref()
}

fn reject(msg: String) -> MonitorError {
    MonitorError::InvalidScanRequest(msg)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPolicy {
    pub program: String,
    pub allowed_programs: Vec<String>,
    pub extra_args: Vec<String>,
    /// Empty means any address.
    pub allowed_networks: Vec<IpNet>,
}

impl Default for ScanPolicy {
    fn default() -> Self {
        ScanPolicy {
            program: DEFAULT_PROGRAM.to_string(),
            allowed_programs: vec![DEFAULT_PROGRAM.to_string()],
            extra_args: DEFAULT_EXTRA_ARGS.iter().map(|s| s.to_string()).collect(),
            allowed_networks: Vec::new(),
        }
    }
}

impl ScanPolicy {
    /// Check the program and flag allow-lists.
    pub fn validate(&self) -> Result<(), MonitorError> {
        if !self.allowed_programs.iter().any(|p| p == &self.program) {
            return Err(reject(format!("program {:?} is not allowed", self.program)));
        }
        for arg in &self.extra_args {
            let timing = timing_re().is_some_and(|re| re.is_match(arg));
            if !timing && !ALLOWED_FLAGS.contains(&arg.as_str()) {
                return Err(reject(format!("argument {arg:?} is not allowed")));
            }
        }
        Ok(())
    }

    /// An IP address, or a DNS name when no networks are configured.
    pub fn check_address(&self, address: &str) -> Result<(), MonitorError> {
        match address.parse::<IpAddr>() {
            Ok(ip) => {
                if self.allowed_networks.is_empty() || self.allowed_networks.iter().any(|n| n.contains(&ip)) {
                    Ok(())
                } else {
                    Err(reject(format!("{address} is outside the allowed networks")))
                }
            }
            Err(_) => {
                let is_name = address.len() <= 253 && hostname_re().is_some_and(|re| re.is_match(address));
                if !is_name {
                    Err(reject(format!("invalid address {address:?}")))
                } else if !self.allowed_networks.is_empty() {
                    Err(reject(format!("{address} is not an IP address inside the allowed networks")))
                } else {
                    Ok(())
                }
            }
        }
    }

    pub fn invocation(&self, handle: &ScanHandle) -> Result<Invocation, MonitorError> {
        self.validate()?;
        self.check_address(&handle.address)?;
        if handle.ports.is_empty() {
            return Err(reject(format!("no ports to scan on {}", handle.address)));
        }
        let mut args = self.extra_args.clone();
        args.push("-p".into());
        args.push(format_ports(&handle.ports));
        args.push(handle.address.clone());
        args.push("-oX".into());
        args.push(handle.output.display().to_string());
        Ok(Invocation { program: self.program.clone(), args })
    }
}

/// A fully checked command, passed to the OS without a shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str)).collect::<Vec<_>>().join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use time::macros::datetime;
    use uuid::Uuid;

    fn handle(address: &str, ports: Vec<u16>) -> ScanHandle {
        ScanHandle {
            id: Uuid::nil(),
            address: address.into(),
            ports,
            output: PathBuf::from("/watch/10_0_0_1-ServiceScan.xml"),
            requested_at: datetime!(2024-05-01 09:00 UTC),
        }
    }

    #[test]
    fn builds_default_command() {
        let inv = ScanPolicy::default().invocation(&handle("10.0.0.1", vec![22, 80])).unwrap();
        assert_eq!(inv.command_line(), "nmap -sV -Pn -p 22,80 10.0.0.1 -oX /watch/10_0_0_1-ServiceScan.xml");
    }

    #[test]
    fn program_and_flags_are_allow_listed() {
        let mut p = ScanPolicy { program: "bash".into(), ..Default::default() };
        assert!(p.validate().is_err());
        p.program = "nmap".into();
        p.extra_args = vec!["-sV".into(), "-T4".into()];
        assert!(p.validate().is_ok());
        p.extra_args.push("--script=exploit".into());
        assert!(p.validate().is_err());
        p.extra_args = vec!["-T9".into()];
        assert!(p.validate().is_err());
    }

    #[test]
    fn addresses_are_checked() {
        let p = ScanPolicy::default();
        assert!(p.check_address("10.0.0.1").is_ok());
        assert!(p.check_address("fe80::1").is_ok());
        assert!(p.check_address("db01.lab.example").is_ok());
        assert!(p.check_address("-oN/tmp/x").is_err());
        assert!(p.check_address("a b").is_err());
        assert!(p.check_address("").is_err());
    }

    #[test]
    fn allowed_networks_restrict_targets() {
        let p = ScanPolicy { allowed_networks: vec!["10.0.0.0/24".parse().unwrap()], ..Default::default() };
        assert!(p.check_address("10.0.0.7").is_ok());
        assert!(p.check_address("10.0.1.7").is_err());
        assert!(p.check_address("db01.lab.example").is_err());
    }

    #[test]
    fn empty_port_list_is_rejected() {
        assert!(ScanPolicy::default().invocation(&handle("10.0.0.1", vec![])).is_err());
    }
}
