use anyhow::{Context, Result};
use ipnet::IpNet;
use serde::Deserialize;
use service_scan::ScanPolicy;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_CONFIG_FILE: &str = "monitor.yaml";
pub const DEFAULT_PATTERN: &str = "*.xml";
pub const DEFAULT_DEBOUNCE_MS: u64 = 2000;
pub const DEFAULT_LISTEN: &str = "0.0.0.0:3000";
pub const DEFAULT_MAX_CONCURRENT: usize = 4;
pub const DEFAULT_MARKER_TTL_SECS: u64 = 300;

#[derive(Debug, Default, Deserialize, Clone)]
pub struct WatchConfig {
    pub directory: Option<PathBuf>,
    pub pattern: Option<String>,
    pub debounce_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct ServerConfig {
    pub listen: Option<String>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct ScanConfig {
    pub program: Option<String>,
    pub allowed_programs: Option<Vec<String>>,
    pub extra_args: Option<Vec<String>>,
    pub allowed_networks: Option<Vec<String>>,
    pub max_concurrent: Option<usize>,
    pub dispatch: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct MarkerConfig {
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct Config {
    pub watch: Option<WatchConfig>,
    pub server: Option<ServerConfig>,
    pub scan: Option<ScanConfig>,
    pub markers: Option<MarkerConfig>,
}

pub fn load_config(path: Option<&Path>) -> Option<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new(DEFAULT_CONFIG_FILE);
            if p.exists() { p.to_path_buf() } else { return None; }
        }
    };
    let s = match fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read config file");
            return None;
        }
    };
    match serde_yaml::from_str(&s) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unparsable config file");
            None
        }
    }
}

/// Effective runtime settings after defaults, config file and environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub watch_dir: Option<PathBuf>,
    pub pattern: String,
    pub debounce: Duration,
    pub listen: SocketAddr,
    pub policy: ScanPolicy,
    pub max_concurrent: usize,
    pub dispatch: bool,
    pub marker_ttl: time::Duration,
}

impl Settings {
    /// `env` is consulted for `WATCH_DIR` and `PORT`.
    pub fn resolve(cfg: Option<&Config>, env: impl Fn(&str) -> Option<String>) -> Result<Settings> {
        let watch = cfg.and_then(|c| c.watch.clone()).unwrap_or_default();
        let server = cfg.and_then(|c| c.server.clone()).unwrap_or_default();
        let scan = cfg.and_then(|c| c.scan.clone()).unwrap_or_default();
        let markers = cfg.and_then(|c| c.markers.clone()).unwrap_or_default();

        let mut watch_dir = watch.directory;
        if let Some(dir) = env("WATCH_DIR").filter(|d| !d.trim().is_empty()) {
            watch_dir = Some(PathBuf::from(dir));
        }

        let listen_spec = server.listen.unwrap_or_else(|| DEFAULT_LISTEN.to_string());
        let mut listen: SocketAddr = listen_spec.parse().with_context(|| format!("invalid listen address {listen_spec:?}"))?;
        if let Some(port) = env("PORT") {
            let port: u16 = port.trim().parse().with_context(|| format!("invalid PORT {port:?}"))?;
            listen.set_port(port);
        }

        let mut policy = ScanPolicy::default();
        if let Some(p) = scan.program { policy.program = p; }
        if let Some(p) = scan.allowed_programs { policy.allowed_programs = p; }
        if let Some(a) = scan.extra_args { policy.extra_args = a; }
        if let Some(nets) = scan.allowed_networks {
            policy.allowed_networks = nets
                .iter()
                .map(|n| n.parse::<IpNet>().with_context(|| format!("invalid network {n:?}")))
                .collect::<Result<_>>()?;
        }
        policy.validate()?;

        Ok(Settings {
            watch_dir,
            pattern: watch.pattern.unwrap_or_else(|| DEFAULT_PATTERN.to_string()),
            debounce: Duration::from_millis(watch.debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS)),
            listen,
            policy,
            max_concurrent: scan.max_concurrent.unwrap_or(DEFAULT_MAX_CONCURRENT).max(1),
            dispatch: scan.dispatch.unwrap_or(true),
            marker_ttl: time::Duration::seconds(markers.ttl_secs.unwrap_or(DEFAULT_MARKER_TTL_SECS) as i64),
        })
    }
}
