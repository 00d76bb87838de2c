//! Endpoints and discovery events.

use std::fmt;
use std::net::SocketAddr;

use crate::error::DiscoveryError;

/// A resolved, dialable service instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    /// Socket address of the instance.
    pub addr: SocketAddr,

    /// DNS-SD instance name the address was resolved from, if known.
    pub instance: Option<String>,
}

impl Endpoint {
    /// Create an endpoint with no instance name.
    #[must_use]
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            instance: None,
        }
    }

    /// Attach the instance name.
    #[must_use]
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.addr.fmt(f)
    }
}

/// One outcome of a discovery refresh.
///
/// Either the full instance list of a successful round or the error of a
/// failed one, never both. An error does not carry the previous list: a
/// consumer reading it during an outage sees the outage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// Instances found by a successful refresh, in discovery order.
    Instances(Vec<Endpoint>),

    /// The refresh failed.
    Err(DiscoveryError),
}

impl DiscoveryEvent {
    /// The instance list, if this is a successful outcome.
    #[must_use]
    pub fn instances(&self) -> Option<&[Endpoint]> {
        match self {
            Self::Instances(instances) => Some(instances.as_slice()),
            Self::Err(_) => None,
        }
    }

    /// The error, if this is a failed outcome.
    #[must_use]
    pub fn err(&self) -> Option<&DiscoveryError> {
        match self {
            Self::Instances(_) => None,
            Self::Err(err) => Some(err),
        }
    }

    /// Check if this is a failed outcome.
    #[must_use]
    pub fn is_err(&self) -> bool {
        matches!(self, Self::Err(_))
    }

    /// Convert into a `Result`.
    pub fn into_result(self) -> Result<Vec<Endpoint>, DiscoveryError> {
        match self {
            Self::Instances(instances) => Ok(instances),
            Self::Err(err) => Err(err),
        }
    }
}

/// The empty sentinel: no instances and no error.
impl Default for DiscoveryEvent {
    fn default() -> Self {
        Self::Instances(Vec::new())
    }
}

impl From<Result<Vec<Endpoint>, DiscoveryError>> for DiscoveryEvent {
    fn from(result: Result<Vec<Endpoint>, DiscoveryError>) -> Self {
        match result {
            Ok(instances) => Self::Instances(instances),
            Err(err) => Self::Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryError;

    #[test]
    fn test_endpoint_display() {
        let v4 = Endpoint::new("127.0.0.1:8080".parse().unwrap());
        assert_eq!(v4.to_string(), "127.0.0.1:8080");

        let v6 = Endpoint::new("[fe80::1]:9000".parse().unwrap()).with_instance("db");
        assert_eq!(v6.to_string(), "[fe80::1]:9000");
        assert_eq!(v6.instance.as_deref(), Some("db"));
    }

    #[test]
    fn test_default_is_empty() {
        let event = DiscoveryEvent::default();
        assert_eq!(event.instances(), Some(&[][..]));
        assert!(event.err().is_none());
    }

    #[test]
    fn test_from_result() {
        let err = DiscoveryError::from(QueryError::Backend("down".into()));
        let event = DiscoveryEvent::from(Err(err.clone()));
        assert!(event.is_err());
        assert!(event.instances().is_none());
        assert_eq!(event.into_result(), Err(err));

        let addr: SocketAddr = "10.0.0.1:80".parse().unwrap();
        let event = DiscoveryEvent::from(Ok(vec![Endpoint::from(addr)]));
        assert_eq!(event.instances().map(<[Endpoint]>::len), Some(1));
    }
}
