//! mDNS service announcement.
//!
//! A [`Registrar`] answers discovery queries for one locally hosted
//! instance so that other processes' instancers can find it.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use beacon_core::{ConfigError, DiscoveryError};
use mdns_sd::{ServiceDaemon, ServiceInfo};
use parking_lot::Mutex;

use crate::instancer::DEFAULT_DOMAIN;
use crate::mdns::validate_service;

/// How long to wait for goodbye packets on deregistration.
const UNREGISTER_TIMEOUT: Duration = Duration::from_secs(1);

/// Description of a local instance to announce.
#[derive(Debug, Clone, Default)]
pub struct Service {
    /// Instance name, unique within the service. Required.
    pub instance: String,

    /// Service type, e.g. `_http._tcp`. Required.
    pub service: String,

    /// Discovery domain. Empty means `local`.
    pub domain: String,

    /// Host name to answer for. Empty derives one from the instance name.
    pub host_name: String,

    /// Port the instance listens on. Required.
    pub port: u16,

    /// Addresses to announce. Empty announces every interface address.
    ///
    /// Each address must belong to a local, non-loopback interface's
    /// subnet; `mdns-sd` silently drops any other address from its answers.
    pub ips: Vec<IpAddr>,

    /// TXT record entries, `key=value` or a bare `key`.
    pub txt: Vec<String>,
}

impl Service {
    /// Create a service description with the required fields.
    #[must_use]
    pub fn new(instance: impl Into<String>, service: impl Into<String>, port: u16) -> Self {
        Self {
            instance: instance.into(),
            service: service.into(),
            port,
            ..Default::default()
        }
    }

    /// Set the discovery domain.
    #[must_use]
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    /// Set the host name.
    #[must_use]
    pub fn host_name(mut self, host_name: impl Into<String>) -> Self {
        self.host_name = host_name.into();
        self
    }

    /// Announce a specific address.
    #[must_use]
    pub fn ip(mut self, ip: IpAddr) -> Self {
        self.ips.push(ip);
        self
    }

    /// Add a TXT entry.
    #[must_use]
    pub fn txt(mut self, entry: impl Into<String>) -> Self {
        self.txt.push(entry.into());
        self
    }

    fn domain_or_default(&self) -> &str {
        match self.domain.trim_matches('.') {
            "" => DEFAULT_DOMAIN,
            domain => domain,
        }
    }

    fn host_name_or_default(&self) -> String {
        if !self.host_name.is_empty() {
            let host = self.host_name.trim_end_matches('.');
            return format!("{host}.");
        }
        let label: String = self
            .instance
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        format!("{label}.{}.", self.domain_or_default())
    }

    fn properties(&self) -> HashMap<String, String> {
        self.txt
            .iter()
            .map(|entry| match entry.split_once('=') {
                Some((key, value)) => (key.to_string(), value.to_string()),
                None => (entry.clone(), String::new()),
            })
            .collect()
    }

    /// Build the announcement record.
    fn record(&self) -> Result<ServiceInfo, ConfigError> {
        if self.instance.is_empty() {
            return Err(ConfigError::InvalidRecord("instance name is empty".into()));
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidRecord("port is zero".into()));
        }
        validate_service(&self.service)?;
        if let Some(ip) = self.ips.iter().find(|ip| !announceable(ip)) {
            return Err(ConfigError::InvalidRecord(format!(
                "{ip} is never announced by mdns; use an interface address"
            )));
        }

        let service_type = format!(
            "{}.{}.",
            self.service.trim_end_matches('.'),
            self.domain_or_default()
        );
        let ips = self
            .ips
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");

        let info = ServiceInfo::new(
            &service_type,
            &self.instance,
            &self.host_name_or_default(),
            ips.as_str(),
            self.port,
            self.properties(),
        )
        .map_err(|e| ConfigError::InvalidRecord(e.to_string()))?;

        Ok(if self.ips.is_empty() {
            info.enable_addr_auto()
        } else {
            info
        })
    }
}

/// Loopback, unspecified and multicast addresses never leave the host's
/// mDNS responder.
fn announceable(ip: &IpAddr) -> bool {
    !(ip.is_loopback() || ip.is_unspecified() || ip.is_multicast())
}

/// Answers mDNS queries for one local instance.
///
/// ## Example
///
/// ```rust,no_run
/// use beacon_discovery::{Registrar, Service};
///
/// let service = Service::new("web-1", "_http._tcp", 8080);
/// let registrar = Registrar::new(service).unwrap();
///
/// registrar.register();
/// // ... serve traffic ...
/// registrar.deregister();
/// ```
pub struct Registrar {
    info: ServiceInfo,
    daemon: Mutex<Option<ServiceDaemon>>,
}

impl Registrar {
    /// Create a registrar for `service`. Does not announce anything yet.
    pub fn new(service: Service) -> Result<Self, DiscoveryError> {
        let info = service.record()?;
        Ok(Self {
            info,
            daemon: Mutex::new(None),
        })
    }

    /// Fully qualified instance name being announced.
    #[must_use]
    pub fn fullname(&self) -> &str {
        self.info.get_fullname()
    }

    /// Check if the instance is currently announced.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.daemon.lock().is_some()
    }

    /// Start answering queries for the instance.
    ///
    /// Failures are logged and leave the registrar unregistered.
    pub fn register(&self) {
        let mut slot = self.daemon.lock();
        if slot.is_some() {
            tracing::warn!(action = "register", instance = self.fullname(), "already registered");
            return;
        }

        let daemon = match ServiceDaemon::new() {
            Ok(daemon) => daemon,
            Err(err) => {
                tracing::error!(action = "register", error = %err, "failed to start mdns daemon");
                return;
            }
        };

        if let Err(err) = daemon.register(self.info.clone()) {
            tracing::error!(
                action = "register",
                instance = self.fullname(),
                error = %err,
                "registration failed"
            );
            shutdown(&daemon);
            return;
        }

        tracing::info!(
            instance = self.fullname(),
            port = self.info.get_port(),
            "registered service"
        );
        *slot = Some(daemon);
    }

    /// Stop answering queries and announce the instance's departure.
    pub fn deregister(&self) {
        let Some(daemon) = self.daemon.lock().take() else {
            tracing::warn!(action = "deregister", instance = self.fullname(), "not registered");
            return;
        };

        match daemon.unregister(self.fullname()) {
            Ok(status) => {
                if status.recv_timeout(UNREGISTER_TIMEOUT).is_err() {
                    tracing::debug!(instance = self.fullname(), "no unregister confirmation");
                }
            }
            Err(err) => {
                tracing::error!(
                    action = "deregister",
                    instance = self.fullname(),
                    error = %err,
                    "unregister failed"
                );
            }
        }
        shutdown(&daemon);

        tracing::info!(instance = self.fullname(), "deregistered service");
    }
}

impl Drop for Registrar {
    fn drop(&mut self) {
        if self.is_registered() {
            self.deregister();
        }
    }
}

fn shutdown(daemon: &ServiceDaemon) {
    if let Err(err) = daemon.shutdown().map(|_status| ()) {
        tracing::debug!(action = "shutdown", error = %err, "mdns daemon shutdown failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_record_defaults() {
        let service = Service::new("192.0.2.10:8080", "_kit._tcp", 8080)
            .ip(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10)));

        assert_eq!(service.domain_or_default(), "local");
        assert_eq!(service.host_name_or_default(), "192-0-2-10-8080.local.");

        let registrar = Registrar::new(service).unwrap();
        assert_eq!(registrar.fullname(), "192.0.2.10:8080._kit._tcp.local.");
        assert!(!registrar.is_registered());
    }

    #[test]
    fn test_explicit_host_name() {
        let service = Service::new("db", "_pg._tcp", 5432).host_name("db-host.local");
        assert_eq!(service.host_name_or_default(), "db-host.local.");
    }

    #[test]
    fn test_txt_properties() {
        let service = Service::new("web", "_http._tcp", 80)
            .txt("path=/api")
            .txt("secure");

        let props = service.properties();
        assert_eq!(props.get("path").map(String::as_str), Some("/api"));
        assert_eq!(props.get("secure").map(String::as_str), Some(""));
    }

    #[test]
    fn test_invalid_records() {
        let missing_instance = Service::new("", "_http._tcp", 80);
        assert!(matches!(
            Registrar::new(missing_instance),
            Err(DiscoveryError::Config(ConfigError::InvalidRecord(_)))
        ));

        let zero_port = Service::new("web", "_http._tcp", 0);
        assert!(matches!(
            Registrar::new(zero_port),
            Err(DiscoveryError::Config(ConfigError::InvalidRecord(_)))
        ));

        let bad_type = Service::new("web", "http", 80);
        assert!(matches!(
            Registrar::new(bad_type),
            Err(DiscoveryError::Config(ConfigError::InvalidService { .. }))
        ));
    }

    #[test]
    fn test_unannounceable_addresses_are_rejected() {
        let rejected = [
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(Ipv6Addr::LOCALHOST),
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V4(Ipv4Addr::new(224, 0, 0, 251)),
        ];
        for ip in rejected {
            let service = Service::new("web", "_http._tcp", 80).ip(ip);
            assert!(
                matches!(
                    Registrar::new(service),
                    Err(DiscoveryError::Config(ConfigError::InvalidRecord(_)))
                ),
                "{ip} accepted"
            );
        }

        let routable =
            Service::new("web", "_http._tcp", 80).ip(IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3)));
        assert!(Registrar::new(routable).is_ok());
    }

    #[test]
    fn test_deregister_without_register_is_noop() {
        let registrar = Registrar::new(Service::new("web", "_http._tcp", 80)).unwrap();
        registrar.deregister();
        assert!(!registrar.is_registered());
    }
}
