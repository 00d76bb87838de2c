//! Error types for beacon service discovery.

use std::time::Duration;

/// Main error type for discovery operations.
///
/// Errors are `Clone + Eq` because a failed refresh is cached and handed to
/// every subscriber as part of a [`DiscoveryEvent`](crate::DiscoveryEvent).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscoveryError {
    /// The discovery query could not be issued or collected.
    #[error("query error: {0}")]
    Query(#[from] QueryError),

    /// Invalid construction parameters.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// A single reply could not be turned into an endpoint.
    #[error("entry error: {0}")]
    Entry(#[from] EntryError),
}

/// Transport-level failures of a discovery round.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    /// The protocol daemon could not be started (usually a socket bind failure).
    #[error("failed to start discovery daemon: {0}")]
    Daemon(String),

    /// The multicast interface selection was rejected.
    #[error("failed to select interface {interface}: {reason}")]
    Interface {
        /// Interface the caller asked for
        interface: String,
        /// Why it was rejected
        reason: String,
    },

    /// The browse request failed.
    #[error("failed to browse {service}: {reason}")]
    Browse {
        /// Fully qualified service type
        service: String,
        /// Underlying failure
        reason: String,
    },

    /// The lookup task died before producing a result.
    #[error("lookup task failed: {0}")]
    Task(String),

    /// Lookup failure reported by a non-network backend.
    #[error("lookup failed: {0}")]
    Backend(String),
}

/// Invalid construction parameters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// No service name was given.
    #[error("service name is empty")]
    EmptyService,

    /// No discovery domain was given.
    #[error("discovery domain is empty")]
    EmptyDomain,

    /// The service name is not one the backend can browse.
    #[error("invalid service type {service:?}: {reason}")]
    InvalidService {
        /// Offending service name
        service: String,
        /// What is wrong with it
        reason: String,
    },

    /// A refresh interval of zero would spin the scheduler.
    #[error("refresh interval must be greater than zero")]
    ZeroRefreshInterval,

    /// A lookup timeout of zero would never collect a reply.
    #[error("lookup timeout must be greater than zero")]
    ZeroLookupTimeout,

    /// The announcement record could not be built.
    #[error("invalid service record: {0}")]
    InvalidRecord(String),
}

/// A malformed reply inside an otherwise successful lookup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntryError {
    /// The reply carried neither an IPv4 nor an IPv6 address.
    #[error("invalid mdns entry {name}: no IPv4 or IPv6 address")]
    NoAddress {
        /// Instance name from the reply
        name: String,
    },
}

impl ConfigError {
    /// Create an invalid-service error.
    #[must_use]
    pub fn invalid_service(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidService {
            service: service.into(),
            reason: reason.into(),
        }
    }

    /// Check a duration parameter, mapping zero to the given error.
    pub fn require_nonzero(value: Duration, err: Self) -> Result<Duration, Self> {
        if value.is_zero() { Err(err) } else { Ok(value) }
    }
}

impl DiscoveryError {
    /// Check if this error came from a failed query.
    ///
    /// Query errors are transient: the scheduler publishes them and tries
    /// again on the next tick.
    #[must_use]
    pub fn is_query(&self) -> bool {
        matches!(self, Self::Query(_))
    }

    /// Check if this error came from invalid construction parameters.
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DiscoveryError::from(QueryError::Daemon("address in use".into()));
        assert_eq!(
            err.to_string(),
            "query error: failed to start discovery daemon: address in use"
        );

        let err = EntryError::NoAddress {
            name: "web._http._tcp.local.".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid mdns entry web._http._tcp.local.: no IPv4 or IPv6 address"
        );
    }

    #[test]
    fn test_classification() {
        assert!(DiscoveryError::from(QueryError::Task("panicked".into())).is_query());
        assert!(DiscoveryError::from(ConfigError::EmptyService).is_config());
        assert!(!DiscoveryError::from(ConfigError::EmptyDomain).is_query());
    }

    #[test]
    fn test_require_nonzero() {
        let ok =
            ConfigError::require_nonzero(Duration::from_secs(1), ConfigError::ZeroLookupTimeout);
        assert_eq!(ok, Ok(Duration::from_secs(1)));

        let err = ConfigError::require_nonzero(Duration::ZERO, ConfigError::ZeroRefreshInterval);
        assert_eq!(err, Err(ConfigError::ZeroRefreshInterval));
    }
}
