//! Decoding of nmap XML reports into [`DecodedReport`]s.
//!
//! A file is only decoded once nmap has finished writing it (the closing
//! `</nmaprun>` tag is present). Files whose name carries the service-scan tag
//! are treated as service reports, everything else as discovery.

mod xml;

use monitor_core::{DecodedHost, DecodedPort, DecodedReport, MonitorError, ReportKind, SERVICE_SCAN_TAG};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::debug;

const CLOSING_TAG: &str = "</nmaprun>";

pub fn is_complete(content: &str) -> bool {
    content.contains(CLOSING_TAG)
}

pub fn classify(path: &Path) -> ReportKind {
    let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    if name.contains(SERVICE_SCAN_TAG) {
        ReportKind::Service
    } else {
        ReportKind::Discovery
    }
}

/// Decode report text. `source_name` only labels errors.
pub fn decode(kind: ReportKind, source_name: &str, content: &str) -> Result<DecodedReport, MonitorError> {
    if !is_complete(content) {
        return Err(MonitorError::IncompleteReport(source_name.to_string()));
    }
    let run: xml::NmapRun = quick_xml::de::from_str(content).map_err(|e| MonitorError::decode(source_name, e))?;
    let finished_at = run
        .runstats
        .and_then(|r| r.finished)
        .and_then(|f| f.time)
        .and_then(|t| t.trim().parse::<i64>().ok())
        .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok());
    let hosts = run.hosts.into_iter().map(host_from_xml).collect();
    Ok(DecodedReport { kind, hosts, finished_at })
}

/// A decoded file together with the time its observations are stamped with.
#[derive(Debug, Clone)]
pub struct ReportFile {
    pub path: PathBuf,
    pub report: DecodedReport,
    pub observed_at: OffsetDateTime,
}

/// Read, classify and decode one report file. The observation time is the
/// scanner's finish time when recorded, else the file's modification time.
pub fn read_report(path: &Path) -> Result<ReportFile, MonitorError> {
    let name = path.display().to_string();
    let content = std::fs::read_to_string(path).map_err(|e| MonitorError::decode(&name, e))?;
    let report = decode(classify(path), &name, &content)?;
    let observed_at = match report.finished_at {
        Some(at) => at,
        None => modified_time(path).unwrap_or_else(OffsetDateTime::now_utc),
    };
    debug!(file = %name, kind = ?report.kind, hosts = report.hosts.len(), "decoded report");
    Ok(ReportFile { path: path.to_path_buf(), report, observed_at })
}

fn modified_time(path: &Path) -> Option<OffsetDateTime> {
    let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(OffsetDateTime::from(modified))
}

fn host_from_xml(host: xml::Host) -> DecodedHost {
    // a MAC entry is only used when nmap recorded nothing else
    let address = host
        .addresses
        .iter()
        .find(|a| a.addr_type.as_deref() != Some("mac"))
        .or_else(|| host.addresses.first())
        .map(|a| a.addr.trim().to_string())
        .unwrap_or_default();
    let status = host.status.and_then(|s| s.state).and_then(non_empty);
    let ports = host.ports.map(|p| p.ports).unwrap_or_default().into_iter().map(port_from_xml).collect();
    DecodedHost { address, status, ports }
}

fn port_from_xml(port: xml::Port) -> DecodedPort {
    let svc = port.service.as_ref();
    let text = |v: &Option<String>| v.clone().and_then(non_empty);
    DecodedPort {
        port_id: port.portid.trim().to_string(),
        protocol: port.protocol.and_then(non_empty),
        state: port.state.map(|s| s.state.trim().to_string()).unwrap_or_default(),
        service: svc.and_then(|s| text(&s.name)),
        product: svc.and_then(|s| text(&s.product)),
        version: svc.and_then(|s| text(&s.version)),
        extra_info: svc.and_then(|s| text(&s.extra_info)),
        os_type: svc.and_then(|s| text(&s.os_type)),
        script_output: port.scripts.into_iter().find_map(|s| s.output.and_then(non_empty)),
    }
}

fn non_empty(s: String) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DISCOVERY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE nmaprun>
<nmaprun scanner="nmap" args="nmap -oX sweep.xml 10.0.0.0/30" start="1714554000" version="7.94">
<scaninfo type="syn" protocol="tcp" numservices="1000" services="1-1000"/>
<verbose level="0"/>
<hosthint><status state="up" reason="arp-response"/><address addr="10.0.0.1" addrtype="ipv4"/></hosthint>
<host starttime="1714554001" endtime="1714554002"><status state="up" reason="arp-response" reason_ttl="0"/>
<address addr="10.0.0.1" addrtype="ipv4"/>
<address addr="00:11:22:33:44:55" addrtype="mac" vendor="Acme"/>
<hostnames></hostnames>
<ports><extraports state="closed" count="997"/>
<port protocol="tcp" portid="22"><state state="open" reason="syn-ack" reason_ttl="64"/><service name="ssh" method="table" conf="3"/></port>
<port protocol="tcp" portid="80"><state state="open" reason="syn-ack" reason_ttl="64"/><service name="http" method="table" conf="3"/></port>
<port protocol="udp" portid="53"><state state="open|filtered" reason="no-response" reason_ttl="0"/></port>
</ports>
</host>
<hosthint><status state="up" reason="arp-response"/><address addr="10.0.0.2" addrtype="ipv4"/></hosthint>
<host><status state="up" reason="echo-reply"/>
<address addr="10.0.0.2" addrtype="ipv4"/>
<ports><port protocol="tcp" portid="443"><state state="filtered" reason="no-response"/></port></ports>
</host>
<runstats><finished time="1714554010" timestr="Wed May  1 09:00:10 2024" elapsed="10.0" exit="success"/><hosts up="2" down="2" total="4"/></runstats>
</nmaprun>
"#;

    const SERVICE: &str = r#"<?xml version="1.0"?>
<nmaprun scanner="nmap" args="nmap -sV -Pn -p 22,80 10.0.0.1">
<host><status state="up" reason="user-set"/>
<address addr="10.0.0.1" addrtype="ipv4"/>
<ports>
<port protocol="tcp" portid="22"><state state="open"/><service name="ssh" product="OpenSSH" version="9.6p1" extrainfo="Ubuntu 3ubuntu13" ostype="Linux" method="probed" conf="10"/></port>
<port protocol="tcp" portid="80"><state state="open"/><service name="http" product="nginx" version="" method="probed" conf="10"/><script id="http-title" output="Welcome to nginx!"><elem key="title">Welcome to nginx!</elem></script><script id="http-server-header" output="nginx"/></port>
</ports>
</host>
</nmaprun>
"#;

    #[test]
    fn decodes_discovery_report() {
        let report = decode(ReportKind::Discovery, "sweep.xml", DISCOVERY).unwrap();
        assert_eq!(report.kind, ReportKind::Discovery);
        assert_eq!(report.hosts.len(), 2);
        let first = &report.hosts[0];
        assert_eq!(first.address, "10.0.0.1");
        assert_eq!(first.status.as_deref(), Some("up"));
        assert_eq!(first.ports.len(), 3);
        assert_eq!(first.ports[0].port_id, "22");
        assert_eq!(first.ports[0].service.as_deref(), Some("ssh"));
        assert_eq!(first.ports[2].protocol.as_deref(), Some("udp"));
        assert_eq!(first.ports[2].state, "open|filtered");
        assert_eq!(first.ports[2].service, None);
        assert_eq!(report.hosts[1].ports[0].state, "filtered");
        assert_eq!(report.finished_at.map(|t| t.unix_timestamp()), Some(1714554010));
    }

    #[test]
    fn decodes_service_detail() {
        let report = decode(ReportKind::Service, "svc.xml", SERVICE).unwrap();
        let ssh = &report.hosts[0].ports[0];
        assert_eq!(ssh.product.as_deref(), Some("OpenSSH"));
        assert_eq!(ssh.version.as_deref(), Some("9.6p1"));
        assert_eq!(ssh.extra_info.as_deref(), Some("Ubuntu 3ubuntu13"));
        assert_eq!(ssh.os_type.as_deref(), Some("Linux"));
        // empty attributes read as absent
        assert_eq!(report.hosts[0].ports[1].version, None);
        assert_eq!(ssh.script_output, None);
        assert_eq!(report.hosts[0].ports[1].script_output.as_deref(), Some("Welcome to nginx!"));
        assert_eq!(report.finished_at, None);
    }

    #[test]
    fn incomplete_report_is_not_decoded() {
        let partial = &DISCOVERY[..DISCOVERY.find("<runstats>").unwrap()];
        assert!(!is_complete(partial));
        assert_eq!(
            decode(ReportKind::Discovery, "sweep.xml", partial),
            Err(MonitorError::IncompleteReport("sweep.xml".into()))
        );
    }

    #[test]
    fn broken_xml_is_a_decode_error() {
        let err = decode(ReportKind::Discovery, "bad.xml", "<nmaprun><host></ports></nmaprun>").unwrap_err();
        assert!(matches!(err, MonitorError::Decode { ref source_name, .. } if source_name == "bad.xml"));
    }

    #[test]
    fn empty_run_has_no_hosts() {
        let report = decode(ReportKind::Discovery, "empty.xml", "<nmaprun></nmaprun>").unwrap();
        assert!(report.hosts.is_empty());
    }

    #[test]
    fn classifies_by_file_name() {
        assert_eq!(classify(Path::new("/w/10_0_0_1-ServiceScan.xml")), ReportKind::Service);
        assert_eq!(classify(Path::new("/w/sweep.xml")), ReportKind::Discovery);
        assert_eq!(classify(Path::new("/ServiceScan/sweep.xml")), ReportKind::Discovery);
    }

    #[test]
    fn read_report_falls_back_to_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("10_0_0_1-ServiceScan.xml");
        std::fs::write(&path, SERVICE).unwrap();
        let file = read_report(&path).unwrap();
        assert_eq!(file.report.kind, ReportKind::Service);
        let mtime = OffsetDateTime::from(std::fs::metadata(&path).unwrap().modified().unwrap());
        assert_eq!(file.observed_at, mtime);

        let sweep = dir.path().join("sweep.xml");
        std::fs::write(&sweep, DISCOVERY).unwrap();
        assert_eq!(read_report(&sweep).unwrap().observed_at.unix_timestamp(), 1714554010);
    }
}
