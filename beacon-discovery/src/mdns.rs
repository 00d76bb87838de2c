//! mDNS-based service discovery.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Instant;

use beacon_core::{ConfigError, DiscoveryError, Endpoint, EntryError, QueryError};
use mdns_sd::{IfKind, ServiceDaemon, ServiceEvent, ServiceInfo};

use crate::resolver::{Interface, Lookup, Query};

/// A reply address, resolved to one family at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryAddr {
    V4(Ipv4Addr),
    V6(Ipv6Addr),
}

/// One resolved reply, independent of the protocol library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ServiceEntry {
    pub(crate) name: String,
    pub(crate) port: u16,
    pub(crate) addr_v4: Option<Ipv4Addr>,
    pub(crate) addr_v6: Option<Ipv6Addr>,
}

impl ServiceEntry {
    fn from_info(info: &ServiceInfo) -> Self {
        let addresses = info.get_addresses();
        // HashSet order is arbitrary; pick the lowest of each family.
        let addr_v4 = addresses
            .iter()
            .filter_map(|ip| match ip {
                IpAddr::V4(v4) => Some(*v4),
                IpAddr::V6(_) => None,
            })
            .min();
        let addr_v6 = addresses
            .iter()
            .filter_map(|ip| match ip {
                IpAddr::V4(_) => None,
                IpAddr::V6(v6) => Some(*v6),
            })
            .min();

        Self {
            name: info.get_fullname().to_string(),
            port: info.get_port(),
            addr_v4,
            addr_v6,
        }
    }

    fn addr(&self) -> Result<EntryAddr, EntryError> {
        match (self.addr_v4, self.addr_v6) {
            (Some(v4), _) => Ok(EntryAddr::V4(v4)),
            (None, Some(v6)) => Ok(EntryAddr::V6(v6)),
            (None, None) => Err(EntryError::NoAddress {
                name: self.name.clone(),
            }),
        }
    }

    /// Normalize into an endpoint, preferring IPv4.
    pub(crate) fn endpoint(&self) -> Result<Endpoint, EntryError> {
        let ip = match self.addr()? {
            EntryAddr::V4(v4) => IpAddr::V4(v4),
            EntryAddr::V6(v6) => IpAddr::V6(v6),
        };
        Ok(Endpoint::new(SocketAddr::new(ip, self.port)).with_instance(self.name.clone()))
    }
}

/// Collects endpoints for one round, one per instance name.
#[derive(Debug, Default)]
pub(crate) struct Collector {
    endpoints: Vec<Endpoint>,
}

impl Collector {
    pub(crate) fn push(&mut self, entry: &ServiceEntry) {
        match entry.endpoint() {
            Ok(endpoint) => {
                let existing = self
                    .endpoints
                    .iter_mut()
                    .find(|e| e.instance == endpoint.instance);
                match existing {
                    Some(slot) => *slot = endpoint,
                    None => self.endpoints.push(endpoint),
                }
            }
            Err(err) => {
                tracing::warn!(action = "lookup", error = %err, "skipping mdns entry");
            }
        }
    }

    pub(crate) fn finish(self) -> Vec<Endpoint> {
        self.endpoints
    }
}

/// mDNS (DNS-SD over multicast) lookup backend.
///
/// Every lookup starts a short-lived `mdns-sd` daemon, browses the
/// service type until the query timeout, and shuts the daemon down. The
/// browse is blocking and runs on tokio's blocking pool.
///
/// The want-unicast-response flag is accepted but not forwarded: `mdns-sd`
/// does not expose the QU bit, so replies arrive by multicast.
///
/// `mdns-sd` never binds loopback interfaces, so selecting one by address
/// fails the lookup with [`QueryError::Interface`].
///
/// ## Example
///
/// ```rust,no_run
/// use beacon_discovery::{Lookup, MdnsResolver, Query};
/// use std::time::Duration;
///
/// # async fn run() -> Result<(), beacon_core::DiscoveryError> {
/// let query = Query {
///     service: "_http._tcp".to_string(),
///     domain: "local".to_string(),
///     timeout: Duration::from_secs(1),
///     interface: None,
///     want_unicast_response: false,
/// };
/// let endpoints = MdnsResolver::new().lookup(&query).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct MdnsResolver {
    _private: (),
}

impl MdnsResolver {
    /// Create an mDNS resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Lookup for MdnsResolver {
    async fn lookup(&self, query: &Query) -> Result<Vec<Endpoint>, DiscoveryError> {
        if let Some(interface) = &query.interface {
            check_interface(interface)?;
        }
        let query = query.clone();
        tokio::task::spawn_blocking(move || browse(&query))
            .await
            .map_err(|e| QueryError::Task(e.to_string()))?
    }

    fn validate(&self, query: &Query) -> Result<(), ConfigError> {
        validate_service(&query.service)
    }
}

/// Check that a service name is a DNS-SD service type (`_name._tcp`).
pub(crate) fn validate_service(service: &str) -> Result<(), ConfigError> {
    let service = service.trim_end_matches('.');
    if service.is_empty() {
        return Err(ConfigError::EmptyService);
    }

    let Some((name, proto)) = service.rsplit_once('.') else {
        return Err(ConfigError::invalid_service(
            service,
            "expected _name._tcp or _name._udp",
        ));
    };
    if proto != "_tcp" && proto != "_udp" {
        return Err(ConfigError::invalid_service(
            service,
            "protocol label must be _tcp or _udp",
        ));
    }
    // Sub-types look like `_printer._sub._http._tcp`; only the last label matters.
    let label = name.rsplit('.').next().unwrap_or(name);
    if !label.starts_with('_') || label.len() < 2 {
        return Err(ConfigError::invalid_service(
            service,
            "service label must start with an underscore",
        ));
    }
    Ok(())
}

/// Reject interface selections `mdns-sd` can never bind.
fn check_interface(interface: &Interface) -> Result<(), QueryError> {
    match interface {
        Interface::Addr(addr) if addr.is_loopback() || addr.is_unspecified() => {
            Err(QueryError::Interface {
                interface: interface.to_string(),
                reason: "mdns is not served on loopback or unspecified addresses".into(),
            })
        }
        _ => Ok(()),
    }
}

pub(crate) fn if_kind(interface: &Interface) -> IfKind {
    match interface {
        Interface::Name(name) => IfKind::Name(name.clone()),
        Interface::Addr(addr) => IfKind::Addr(*addr),
    }
}

fn browse(query: &Query) -> Result<Vec<Endpoint>, DiscoveryError> {
    let deadline = Instant::now() + query.timeout;
    let service_type = query.service_type();

    let daemon = ServiceDaemon::new().map_err(|e| QueryError::Daemon(e.to_string()))?;
    let result = collect(&daemon, query, &service_type, deadline);

    if let Err(err) = daemon.shutdown().map(|_status| ()) {
        tracing::debug!(action = "shutdown", error = %err, "mdns daemon shutdown failed");
    }
    result
}

fn collect(
    daemon: &ServiceDaemon,
    query: &Query,
    service_type: &str,
    deadline: Instant,
) -> Result<Vec<Endpoint>, DiscoveryError> {
    if let Some(interface) = &query.interface {
        let select = daemon
            .disable_interface(IfKind::All)
            .and_then(|()| daemon.enable_interface(if_kind(interface)));
        select.map_err(|e| QueryError::Interface {
            interface: interface.to_string(),
            reason: e.to_string(),
        })?;
    }
    if query.want_unicast_response {
        tracing::trace!("unicast responses not supported by mdns-sd, using multicast");
    }

    let receiver = daemon.browse(service_type).map_err(|e| QueryError::Browse {
        service: service_type.to_string(),
        reason: e.to_string(),
    })?;

    let mut collector = Collector::default();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match receiver.recv_timeout(remaining) {
            Ok(ServiceEvent::ServiceResolved(info)) => {
                collector.push(&ServiceEntry::from_info(&info));
            }
            Ok(event) => tracing::trace!(?event, "ignoring mdns event"),
            // Timed out, or the daemon went away.
            Err(_) => break,
        }
    }

    if let Err(err) = daemon.stop_browse(service_type) {
        tracing::debug!(action = "stop_browse", error = %err, "failed to stop browse");
    }

    let endpoints = collector.finish();
    tracing::debug!(service = %service_type, count = endpoints.len(), "mdns lookup finished");
    Ok(endpoints)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn entry(name: &str, v4: Option<[u8; 4]>, v6: Option<Ipv6Addr>) -> ServiceEntry {
        ServiceEntry {
            name: name.to_string(),
            port: 8080,
            addr_v4: v4.map(Ipv4Addr::from),
            addr_v6: v6,
        }
    }

    #[test]
    fn test_entry_prefers_ipv4() {
        let e = entry("a._web._tcp.local.", Some([10, 0, 0, 1]), Some(Ipv6Addr::LOCALHOST));
        let endpoint = e.endpoint().unwrap();
        assert_eq!(endpoint.to_string(), "10.0.0.1:8080");
        assert_eq!(endpoint.instance.as_deref(), Some("a._web._tcp.local."));
    }

    #[test]
    fn test_entry_falls_back_to_ipv6() {
        let e = entry("b._web._tcp.local.", None, Some(Ipv6Addr::LOCALHOST));
        assert_eq!(e.endpoint().unwrap().to_string(), "[::1]:8080");
    }

    #[test]
    fn test_entry_without_address_is_rejected() {
        let e = entry("c._web._tcp.local.", None, None);
        assert_eq!(
            e.endpoint(),
            Err(EntryError::NoAddress {
                name: "c._web._tcp.local.".to_string()
            })
        );
    }

    #[test]
    fn test_collector_skips_bad_entries_and_dedupes() {
        let mut collector = Collector::default();
        collector.push(&entry("a._web._tcp.local.", Some([10, 0, 0, 1]), None));
        collector.push(&entry("bad._web._tcp.local.", None, None));
        collector.push(&entry("b._web._tcp.local.", Some([10, 0, 0, 2]), None));
        collector.push(&entry("a._web._tcp.local.", Some([10, 0, 0, 3]), None));

        let endpoints: Vec<String> = collector.finish().iter().map(ToString::to_string).collect();
        assert_eq!(endpoints, vec!["10.0.0.3:8080", "10.0.0.2:8080"]);
    }

    #[test]
    fn test_validate_service() {
        assert!(validate_service("_http._tcp").is_ok());
        assert!(validate_service("_dns._udp.").is_ok());
        assert!(validate_service("_printer._sub._http._tcp").is_ok());

        assert_eq!(validate_service(""), Err(ConfigError::EmptyService));
        assert!(matches!(
            validate_service("test.instancer.kit"),
            Err(ConfigError::InvalidService { .. })
        ));
        assert!(matches!(
            validate_service("http._tcp"),
            Err(ConfigError::InvalidService { .. })
        ));
        assert!(matches!(
            validate_service("_http._sctp"),
            Err(ConfigError::InvalidService { .. })
        ));
    }

    #[test]
    fn test_resolver_validates_service_type() {
        let mut query = Query {
            service: "_http._tcp".to_string(),
            domain: "local".to_string(),
            timeout: Duration::from_secs(1),
            interface: None,
            want_unicast_response: false,
        };
        assert!(MdnsResolver::new().validate(&query).is_ok());

        query.service = "plain-name".to_string();
        assert!(MdnsResolver::new().validate(&query).is_err());
    }

    #[tokio::test]
    async fn test_loopback_interface_is_a_query_error() {
        let query = Query {
            service: "_http._tcp".to_string(),
            domain: "local".to_string(),
            timeout: Duration::from_secs(1),
            interface: Some(Interface::Addr(IpAddr::V4(Ipv4Addr::LOCALHOST))),
            want_unicast_response: false,
        };

        let err = MdnsResolver::new().lookup(&query).await.unwrap_err();
        assert!(matches!(
            err,
            DiscoveryError::Query(QueryError::Interface { ref interface, .. })
                if interface == "127.0.0.1"
        ));
        assert!(check_interface(&Interface::Addr(IpAddr::V6(Ipv6Addr::UNSPECIFIED))).is_err());
        assert!(check_interface(&Interface::Addr(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)))).is_ok());
        assert!(check_interface(&Interface::Name("lo".into())).is_ok());
    }

    #[test]
    fn test_if_kind() {
        assert!(matches!(
            if_kind(&Interface::Name("eth0".into())),
            IfKind::Name(name) if name == "eth0"
        ));
        assert!(matches!(
            if_kind(&Interface::Addr(IpAddr::V4(Ipv4Addr::LOCALHOST))),
            IfKind::Addr(_)
        ));
    }
}
