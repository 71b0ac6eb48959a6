use crate::query::PortGroup;
use crate::Snapshot;
use anyhow::Result;
use std::io::Write;

/// Newline-separated addresses of a port group, no trailing newline.
pub fn host_list(group: &PortGroup) -> String {
    group.hosts.iter().map(|m| m.address.as_str()).collect::<Vec<_>>().join("\n")
}

/// `hosts_tcp_80.txt`
pub fn host_list_file_name(group: &PortGroup) -> String {
    format!("hosts_{}_{}.txt", group.protocol, group.port_id)
}

/// One row per (host, port).
pub fn write_snapshot_csv<W: Write>(snapshot: &Snapshot, out: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(out);
    wtr.write_record([
        "address", "status", "protocol", "port", "state", "previous_state", "service", "product", "version",
        "changes",
    ])?;
    for host in snapshot.hosts() {
        for p in &host.ports {
            wtr.write_record([
                host.address.as_str(),
                host.status.as_str(),
                p.protocol.as_str(),
                &p.port_id.to_string(),
                p.state.as_str(),
                p.previous_state.as_deref().unwrap_or_default(),
                p.service.as_deref().unwrap_or_default(),
                p.product.as_deref().unwrap_or_default(),
                p.version.as_deref().unwrap_or_default(),
                &p.state_history.len().saturating_sub(1).to_string(),
            ])?;
        }
    }
    wtr.flush()?;
    Ok(())
}
