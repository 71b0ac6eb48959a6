use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use host_store::query::PortGroup;
use host_store::{FilterOp, FilterRequest, PortFilter, ServiceFilter};
use monitor_core::PortKey;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "http")]
mod api;
mod config;
mod monitor;

use crate::monitor::{HostView, Monitor};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat { Text, Json, Jsonl }

#[derive(Debug, Parser)]
#[command(name = "scan-monitor", version, about = "Watches nmap XML output and reconciles it into per-host port state")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./monitor.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Verbose logging (debug); RUST_LOG takes precedence
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Watch a directory and serve the HTTP API
    #[cfg(feature = "http")]
    Serve {
        /// Directory to watch (overrides config and WATCH_DIR)
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Listen address, e.g. 127.0.0.1:3000
        #[arg(long)]
        listen: Option<String>,
        /// Log scan commands instead of running them
        #[arg(long, default_value_t = false)]
        no_dispatch: bool,
    },
    /// Merge report files (or directories of them) and print the resulting hosts
    Ingest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
        /// Also write one CSV row per host port to this file
        #[arg(long, value_name = "FILE")]
        csv: Option<PathBuf>,
    },
    /// List distinct open ports
    Ports {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// List distinct service names
    Services {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Group hosts by open port
    Groups {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Evaluate port and service selector chains
    Filter {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Base port, e.g. 80 or udp/53
        #[arg(long)]
        base_port: Option<PortKey>,
        /// Extra port as OP:PORT, applied left to right (e.g. AND:443, NOT:tcp/22)
        #[arg(long = "port", value_parser = parse_extra)]
        ports: Vec<(FilterOp, String)>,
        /// Base service name
        #[arg(long)]
        base_service: Option<String>,
        /// Extra service as OP:NAME
        #[arg(long = "service", value_parser = parse_extra)]
        services: Vec<(FilterOp, String)>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Write the host list of one port group
    Export {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Port key, e.g. tcp/80
        #[arg(long)]
        port: PortKey,
        /// Output directory; prints to stdout when omitted
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
    },
    /// Print the service-scan command for a host
    ScanCommand {
        address: String,
        /// Ports: comma/range list (e.g., 22,80,443)
        #[arg(long)]
        ports: String,
        /// Directory the report should be written to
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
}

fn parse_extra(s: &str) -> Result<(FilterOp, String), String> {
    let (op, value) = s.split_once(':').ok_or_else(|| format!("expected OP:VALUE, got {s:?}"))?;
    let op: FilterOp = op.parse()?;
    let value = value.trim();
    if value.is_empty() {
        return Err(format!("missing value in {s:?}"));
    }
    Ok((op, value.to_string()))
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}

fn host_line(v: &HostView) -> String {
    let h = &v.host;
    let ports = h
        .ports
        .iter()
        .map(|p| {
            let svc = p.service.as_deref().unwrap_or("-");
            match &p.previous_state {
                Some(prev) => format!("{}/{} {} {} (was {})", p.protocol, p.port_id, p.state, svc, prev),
                None => format!("{}/{} {} {}", p.protocol, p.port_id, p.state, svc),
            }
        })
        .collect::<Vec<_>>()
        .join(", ");
    let scanned = if h.service_scanned { " [service-scanned]" } else { "" };
    format!("{} ({}){}: {}", h.address, h.status, scanned, ports)
}

fn print_hosts(hosts: &[HostView], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            for v in hosts { println!("{}", host_line(v)); }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(hosts)?),
        OutputFormat::Jsonl => {
            for v in hosts { println!("{}", serde_json::to_string(v)?); }
        }
    }
    Ok(())
}

fn print_groups(groups: &[PortGroup], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            for g in groups {
                let hosts = g.hosts.iter().map(|m| m.address.as_str()).collect::<Vec<_>>().join(",");
                println!("{} {} [{}]", g.key(), g.service.as_deref().unwrap_or("-"), hosts);
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(groups)?),
        OutputFormat::Jsonl => {
            for g in groups { println!("{}", serde_json::to_string(g)?); }
        }
    }
    Ok(())
}

fn loaded(settings: &config::Settings, paths: &[PathBuf]) -> Result<std::sync::Arc<Monitor>> {
    let (m, _events) = Monitor::new(settings)?;
    let merged = m.ingest_paths(paths)?;
    tracing::debug!(files = merged, hosts = m.snapshot().len(), "loaded reports");
    Ok(m)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let loaded_cfg = config::load_config(cli.config.as_deref());
    let mut settings = config::Settings::resolve(loaded_cfg.as_ref(), |k| std::env::var(k).ok())?;
    match cli.command {
        Commands::Version => {
            println!("scan-monitor {} (core {})", env!("CARGO_PKG_VERSION"), monitor_core::version());
        }
        #[cfg(feature = "http")]
        Commands::Serve { dir, listen, no_dispatch } => {
            if dir.is_some() { settings.watch_dir = dir; }
            if let Some(l) = listen { settings.listen = l.parse().map_err(|e| anyhow!("invalid --listen {l:?}: {e}"))?; }
            if no_dispatch { settings.dispatch = false; }
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(async move {
                let (m, events) = Monitor::new(&settings)?;
                let pipeline = tokio::spawn(monitor::run_pipeline(m.clone(), events));
                if let Some(dir) = &settings.watch_dir {
                    if let Err(e) = m.set_watched_directory(dir) {
                        tracing::warn!(error = %e, "initial watch directory rejected; set one via /api/watch");
                    }
                }
                let served = api::serve(m, settings.listen).await;
                pipeline.abort();
                served
            })?;
        }
        Commands::Ingest { paths, format, csv } => {
            let m = loaded(&settings, &paths)?;
            if let Some(path) = csv {
                let file = std::fs::File::create(&path)?;
                host_store::write_snapshot_csv(&m.snapshot(), file)?;
            }
            print_hosts(&m.host_views(), format)?;
        }
        Commands::Ports { paths } => {
            for p in loaded(&settings, &paths)?.available_ports() { println!("{p}"); }
        }
        Commands::Services { paths } => {
            for s in loaded(&settings, &paths)?.available_services() { println!("{s}"); }
        }
        Commands::Groups { paths, format } => {
            print_groups(&loaded(&settings, &paths)?.groups(), format)?;
        }
        Commands::Filter { paths, base_port, ports, base_service, services, format } => {
            let port_filters = ports
                .into_iter()
                .map(|(operation, p)| -> Result<PortFilter> { Ok(PortFilter { port: p.parse()?, operation }) })
                .collect::<Result<Vec<_>>>()?;
            let service_filters = services.into_iter().map(|(operation, service)| ServiceFilter { service, operation }).collect();
            let req = FilterRequest { base_port, port_filters, base_service, service_filters };
            let result = loaded(&settings, &paths)?.filter(&req);
            print_hosts(&result.hosts, format)?;
            if format == OutputFormat::Text && !result.groups.is_empty() {
                println!();
                print_groups(&result.groups, format)?;
            }
        }
        Commands::Export { paths, port, out } => {
            let m = loaded(&settings, &paths)?;
            let (name, body) = m.export_group(&port).ok_or_else(|| anyhow!("no hosts with {port} open"))?;
            match out {
                Some(dir) => {
                    let path = dir.join(name);
                    std::fs::write(&path, format!("{body}\n"))?;
                    println!("{}", path.display());
                }
                None => println!("{body}"),
            }
        }
        Commands::ScanCommand { address, ports, dir } => {
            let ports = service_scan::parse_ports(&ports)?;
            let handle = service_scan::plan_scan(&address, &ports, &dir, &settings.policy, time::OffsetDateTime::now_utc())?;
            println!("{}", settings.policy.invocation(&handle)?.command_line());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_filter_extras() {
        assert_eq!(parse_extra("and:443").unwrap(), (FilterOp::And, "443".to_string()));
        assert_eq!(parse_extra("NOT:tcp/22").unwrap(), (FilterOp::Not, "tcp/22".to_string()));
        assert!(parse_extra("443").is_err());
        assert!(parse_extra("XOR:443").is_err());
        assert!(parse_extra("OR:").is_err());
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["scan-monitor", "filter", "scans/", "--base-port", "80", "--port", "AND:443"]).unwrap();
        match cli.command {
            Commands::Filter { base_port, ports, .. } => {
                assert_eq!(base_port, Some(PortKey::tcp(80)));
                assert_eq!(ports, vec![(FilterOp::And, "443".to_string())]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(Cli::try_parse_from(["scan-monitor", "ingest"]).is_err());
    }
}
