use anyhow::{bail, Context, Result};
use ipnet::IpNet;
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};

/// Expand a host expression into an ordered, deduplicated list of host strings.
///
/// Supported entries, comma separated:
/// - single IP or hostname: `192.168.1.5`, `db.example.org`
/// - CIDR: `10.0.0.0/30` (network and broadcast excluded)
/// - full range: `192.168.1.10-192.168.1.12`
/// - short range: `192.168.1.10-12`
///
/// Entries the parser cannot make sense of are kept verbatim as opaque host
/// names; insertion order is preserved.
pub fn target_str_to_list(expr: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut seen = HashSet::new();

    for raw in expr.split(',') {
        let entry = raw.trim();
        if entry.is_empty() {
            continue;
        }
        for host in expand_entry(entry) {
            if seen.insert(host.clone()) {
                out.push(host);
            }
        }
    }

    out
}

fn expand_entry(entry: &str) -> Vec<String> {
    if entry.contains('/') {
        if let Ok(net) = entry.parse::<IpNet>() {
            return expand_net_hosts(net);
        }
    }

    if let Some((start, end)) = entry.split_once('-') {
        if let Some(hosts) = expand_range(start.trim(), end.trim()) {
            return hosts;
        }
    }

    vec![entry.to_string()]
}

/// Expand a CIDR into individual host addresses. For IPv4 the network and
/// broadcast addresses are excluded; IPv6 networks are not expanded and yield
/// the expression unchanged.
fn expand_net_hosts(net: IpNet) -> Vec<String> {
    match net {
        IpNet::V4(n4) => {
            let start = u32::from(n4.network());
            let end = u32::from(n4.broadcast());
            if end <= start + 1 {
                return Vec::new();
            }
            (start + 1..end)
                .map(|n| Ipv4Addr::from(n).to_string())
                .collect()
        }
        IpNet::V6(_) => vec![net.to_string()],
    }
}

/// Expand `a.b.c.d-a.b.c.e` or the short form `a.b.c.d-e`. Returns `None`
/// when either side is not an IPv4 address, so the caller can fall back to
/// treating the entry as a plain hostname.
fn expand_range(start: &str, end: &str) -> Option<Vec<String>> {
    let start_ip: Ipv4Addr = match start.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => v4,
        _ => return None,
    };

    let end_ip: Ipv4Addr = if let Ok(IpAddr::V4(v4)) = end.parse::<IpAddr>() {
        v4
    } else if let Ok(last_octet) = end.parse::<u8>() {
        let o = start_ip.octets();
        Ipv4Addr::new(o[0], o[1], o[2], last_octet)
    } else {
        return None;
    };

    let lo = u32::from(start_ip);
    let hi = u32::from(end_ip);
    if hi < lo {
        return None;
    }

    Some((lo..=hi).map(|n| Ipv4Addr::from(n).to_string()).collect())
}

/// Parse a ports expression into a deduplicated list of TCP ports (1..=65535).
///
/// Supported formats, comma separated: single port (`80`), inclusive range
/// (`8000-8010`). An optional `T:`/`U:` protocol prefix is accepted and
/// stripped; whitespace is ignored.
pub fn parse_ports(expr: &str) -> Result<Vec<u16>> {
    let mut out: Vec<u16> = Vec::new();
    let mut seen = HashSet::new();

    for raw in expr.split(',') {
        let mut part = raw.trim();
        if part.is_empty() {
            continue;
        }
        if let Some(rest) = part
            .strip_prefix("T:")
            .or_else(|| part.strip_prefix("U:"))
        {
            part = rest.trim();
            if part.is_empty() {
                continue;
            }
        }

        if let Some((a, b)) = part.split_once('-') {
            let start = parse_port(a.trim())
                .with_context(|| format!("invalid start in port range: {part}"))?;
            let end = parse_port(b.trim())
                .with_context(|| format!("invalid end in port range: {part}"))?;
            if start > end {
                bail!("invalid port range {start}-{end} (start > end)");
            }
            for p in start..=end {
                if seen.insert(p) {
                    out.push(p);
                }
            }
            continue;
        }

        let p = parse_port(part).with_context(|| format!("invalid port value: {part}"))?;
        if seen.insert(p) {
            out.push(p);
        }
    }

    Ok(out)
}

fn parse_port(s: &str) -> Result<u16> {
    let val: u32 = s.parse::<u32>().map_err(|e| anyhow::anyhow!(e))?;
    if val == 0 || val > 65535 {
        bail!("port out of range: {val}");
    }
    Ok(val as u16)
}
