//! Lookup trait and common types.

use std::fmt;
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use beacon_core::{ConfigError, DiscoveryError, Endpoint, QueryError};
use dashmap::DashMap;

/// Network interface to send discovery queries on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interface {
    /// Interface by OS name, e.g. `eth0`.
    Name(String),
    /// Interface owning the given address.
    Addr(IpAddr),
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Addr(addr) => addr.fmt(f),
        }
    }
}

/// Parameters of a single discovery round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// Service name, e.g. `_http._tcp`.
    pub service: String,

    /// Discovery domain, e.g. `local`.
    pub domain: String,

    /// How long to collect replies.
    pub timeout: Duration,

    /// Interface to query on. `None` queries on every interface.
    pub interface: Option<Interface>,

    /// Ask responders for a unicast reply (RFC 6762, section 5.4).
    pub want_unicast_response: bool,
}

impl Query {
    /// Fully qualified service type, e.g. `_http._tcp.local.`.
    #[must_use]
    pub fn service_type(&self) -> String {
        format!(
            "{}.{}.",
            self.service.trim_end_matches('.'),
            self.domain.trim_matches('.')
        )
    }
}

/// Performs one discovery round.
///
/// Implementations must return once `query.timeout` has elapsed, with
/// whatever was collected so far. A malformed reply is logged and skipped;
/// only a failure of the query itself is an error.
///
/// ## Example
///
/// ```rust
/// use beacon_discovery::{Lookup, StaticResolver};
/// use std::net::SocketAddr;
///
/// let resolver = StaticResolver::new();
/// let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
/// resolver.add_endpoint("_web._tcp", addr);
///
/// // Lookups are async:
/// // let endpoints = resolver.lookup(&query).await?;
/// ```
pub trait Lookup: Send + Sync + 'static {
    /// Run one discovery round.
    fn lookup(
        &self,
        query: &Query,
    ) -> impl Future<Output = Result<Vec<Endpoint>, DiscoveryError>> + Send;

    /// Reject query parameters this backend cannot serve.
    fn validate(&self, _query: &Query) -> Result<(), ConfigError> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum Outcome {
    Endpoints(Vec<Endpoint>),
    Failure(QueryError),
}

/// An in-memory lookup returning pre-configured outcomes.
///
/// Useful for testing or when instances are known at configuration time.
/// Clones share the same table, so outcomes can be changed while an
/// [`Instancer`](crate::Instancer) owns one of the clones. Services with
/// nothing configured resolve to an empty list, like a network with no
/// responders.
#[derive(Clone, Default)]
pub struct StaticResolver {
    services: Arc<DashMap<String, Outcome>>,
}

impl StaticResolver {
    /// Create a new empty static resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the endpoints of a service.
    pub fn set_endpoints(&self, service: impl Into<String>, endpoints: Vec<Endpoint>) {
        self.services
            .insert(service.into(), Outcome::Endpoints(endpoints));
    }

    /// Add a single endpoint to a service, clearing any configured failure.
    pub fn add_endpoint(&self, service: impl Into<String>, endpoint: impl Into<Endpoint>) {
        let mut entry = self
            .services
            .entry(service.into())
            .or_insert_with(|| Outcome::Endpoints(Vec::new()));
        match entry.value_mut() {
            Outcome::Endpoints(endpoints) => endpoints.push(endpoint.into()),
            failed => *failed = Outcome::Endpoints(vec![endpoint.into()]),
        }
    }

    /// Make every lookup of a service fail.
    pub fn set_error(&self, service: impl Into<String>, err: QueryError) {
        self.services.insert(service.into(), Outcome::Failure(err));
    }

    /// Forget a service.
    pub fn remove(&self, service: &str) {
        self.services.remove(service);
    }
}

impl Lookup for StaticResolver {
    async fn lookup(&self, query: &Query) -> Result<Vec<Endpoint>, DiscoveryError> {
        match self.services.get(&query.service).map(|o| o.clone()) {
            Some(Outcome::Endpoints(endpoints)) => Ok(endpoints),
            Some(Outcome::Failure(err)) => Err(err.into()),
            None => Ok(Vec::new()),
        }
    }
}
