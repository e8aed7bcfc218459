//! Network scan source: TCP connect probes across a subnet.
//!
//! Deliberately light-touch: a host counts as alive when any probed
//! port accepts a connection within the probe timeout.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use nbagent_connector::prelude::*;
use tracing::debug;

const MAX_HOSTS: u32 = 4096;

/// Required options: `subnet` (CIDR, e.g. `192.168.1.0/24`).
/// Optional: `ports` (default `[22, 80, 443]`), `probe_timeout_ms`
/// (default 500), `concurrency` (default 64), `site`.
pub struct NetworkScanSource {
    settings: SourceSettings,
    hosts: Vec<Ipv4Addr>,
    ports: Vec<u16>,
    probe_timeout: Duration,
    concurrency: usize,
}

impl NetworkScanSource {
    pub fn new(settings: SourceSettings) -> SourceResult<Self> {
        settings.validate()?;
        let subnet = settings.require_str("subnet")?;
        let hosts = expand_subnet(subnet)?;

        let ports = match settings.options.get("ports") {
            None => vec![22, 80, 443],
            Some(value) => value
                .as_array()
                .map(|ports| {
                    ports
                        .iter()
                        .filter_map(|p| p.as_u64())
                        .filter(|p| *p > 0 && *p <= u64::from(u16::MAX))
                        .map(|p| p as u16)
                        .collect::<Vec<u16>>()
                })
                .filter(|ports| !ports.is_empty())
                .ok_or_else(|| {
                    SourceError::invalid_configuration(format!(
                        "source '{}': 'ports' must be a non-empty list of port numbers",
                        settings.name
                    ))
                })?,
        };

        let probe_timeout = Duration::from_millis(settings.opt_u64("probe_timeout_ms", 500));
        let concurrency = settings.opt_u64("concurrency", 64).max(1) as usize;

        Ok(Self {
            settings,
            hosts,
            ports,
            probe_timeout,
            concurrency,
        })
    }

    async fn probe_host(&self, addr: Ipv4Addr) -> Option<DiscoveredRecord> {
        for port in &self.ports {
            let socket = SocketAddr::from((addr, *port));
            let connect = tokio::net::TcpStream::connect(socket);
            if let Ok(Ok(_)) = tokio::time::timeout(self.probe_timeout, connect).await {
                debug!(source = %self.name(), %addr, port, "host responded");
                let name = format!("host-{}", addr.to_string().replace('.', "-"));
                let mut record = DiscoveredRecord::new(name, self.name())
                    .with_primary_ip(addr.to_string())
                    .with_attribute("open_port", serde_json::json!(port));
                if let Some(site) = self.settings.opt_str("site") {
                    record = record.with_site(site);
                }
                return Some(record);
            }
        }
        None
    }
}

#[async_trait]
impl Source for NetworkScanSource {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn kind(&self) -> &str {
        "network_scan"
    }

    fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    async fn test_connection(&self) -> SourceResult<()> {
        // Nothing to authenticate against; configuration was already
        // validated at construction.
        Ok(())
    }

    async fn discover(&self) -> SourceResult<Vec<DiscoveredRecord>> {
        let records: Vec<DiscoveredRecord> = stream::iter(self.hosts.iter().copied())
            .map(|addr| self.probe_host(addr))
            .buffer_unordered(self.concurrency)
            .filter_map(|record| async move { record })
            .collect()
            .await;

        debug!(
            source = %self.name(),
            scanned = self.hosts.len(),
            alive = records.len(),
            "subnet scan complete"
        );
        Ok(records)
    }
}

/// Expand an IPv4 CIDR into its host addresses.
fn expand_subnet(subnet: &str) -> SourceResult<Vec<Ipv4Addr>> {
    let (addr, prefix) = subnet
        .split_once('/')
        .ok_or_else(|| SourceError::invalid_configuration(format!("'{subnet}' is not CIDR notation")))?;
    let addr: Ipv4Addr = addr
        .parse()
        .map_err(|_| SourceError::invalid_configuration(format!("'{addr}' is not an IPv4 address")))?;
    let prefix: u8 = prefix
        .parse()
        .map_err(|_| SourceError::invalid_configuration(format!("'{prefix}' is not a prefix length")))?;
    if prefix > 32 {
        return Err(SourceError::invalid_configuration(
            "prefix length must be at most 32",
        ));
    }

    let base = u32::from(addr);
    let host_bits = 32 - u32::from(prefix);
    let size: u64 = 1u64 << host_bits;
    if size > u64::from(MAX_HOSTS) {
        return Err(SourceError::invalid_configuration(format!(
            "subnet '{subnet}' has {size} addresses, the limit is {MAX_HOSTS}"
        )));
    }

    let mask = if host_bits == 32 { 0 } else { u32::MAX << host_bits };
    let network = base & mask;
    let hosts = match prefix {
        32 => vec![Ipv4Addr::from(network)],
        31 => vec![Ipv4Addr::from(network), Ipv4Addr::from(network + 1)],
        // Skip the network and broadcast addresses.
        _ => (u64::from(network) + 1..u64::from(network) + size - 1)
            .map(|v| Ipv4Addr::from(v as u32))
            .collect(),
    };
    Ok(hosts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn expands_a_slash_29() {
        let hosts = expand_subnet("10.0.0.0/29").unwrap();
        assert_eq!(hosts.len(), 6);
        assert_eq!(hosts[0], Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(hosts[5], Ipv4Addr::new(10, 0, 0, 6));
    }

    #[test]
    fn single_host_prefixes() {
        assert_eq!(expand_subnet("10.0.0.5/32").unwrap().len(), 1);
        assert_eq!(expand_subnet("10.0.0.4/31").unwrap().len(), 2);
    }

    #[test]
    fn normalizes_to_the_network_address() {
        let hosts = expand_subnet("192.168.1.77/24").unwrap();
        assert_eq!(hosts[0], Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(hosts.len(), 254);
    }

    #[test]
    fn oversized_subnets_are_rejected() {
        let err = expand_subnet("10.0.0.0/8").unwrap_err();
        assert!(err.is_permanent());
    }

    #[test]
    fn malformed_cidr_is_rejected() {
        assert!(expand_subnet("not-a-subnet").is_err());
        assert!(expand_subnet("10.0.0.0/40").is_err());
        assert!(expand_subnet("10.0.0/24").is_err());
    }

    #[test]
    fn invalid_ports_option_is_rejected() {
        let settings = SourceSettings::new("scan", "network_scan")
            .with_option("subnet", json!("10.0.0.0/30"))
            .with_option("ports", json!("22"));
        assert!(NetworkScanSource::new(settings).is_err());
    }

    #[tokio::test]
    async fn probe_finds_a_listening_port() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let settings = SourceSettings::new("scan", "network_scan")
            .with_option("subnet", json!("127.0.0.1/32"))
            .with_option("ports", json!([port]));
        let source = NetworkScanSource::new(settings).unwrap();

        let records = source.discover().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].primary_ip.as_deref(), Some("127.0.0.1"));
        assert_eq!(records[0].name, "host-127-0-0-1");
    }
}
