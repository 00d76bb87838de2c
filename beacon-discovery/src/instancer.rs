//! Periodic-refresh instancer.
//!
//! An [`Instancer`] resolves one service on a fixed interval and keeps the
//! outcome in a [`Cache`] that any number of consumers can read or
//! subscribe to.

use std::sync::Arc;
use std::time::Duration;

use beacon_core::{ConfigError, DiscoveryError, DiscoveryEvent};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::cache::Cache;
use crate::resolver::{Interface, Lookup, Query};

/// Default interval between refreshes.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(3);

/// Default discovery domain.
pub const DEFAULT_DOMAIN: &str = "local";

/// Default time to collect replies per lookup.
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration for an [`Instancer`].
#[derive(Debug, Clone)]
pub struct InstancerOptions {
    /// Interval between refreshes.
    pub refresh_interval: Duration,

    /// Discovery domain.
    pub domain: String,

    /// Time to collect replies per lookup.
    pub lookup_timeout: Duration,

    /// Interface to query on. `None` queries on every interface.
    pub interface: Option<Interface>,

    /// Ask responders for unicast replies.
    pub want_unicast_response: bool,
}

impl Default for InstancerOptions {
    fn default() -> Self {
        Self {
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            domain: DEFAULT_DOMAIN.to_string(),
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
            interface: None,
            want_unicast_response: false,
        }
    }
}

impl InstancerOptions {
    /// Create options with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the refresh interval.
    #[must_use]
    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Set the discovery domain.
    #[must_use]
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    /// Set the per-lookup timeout.
    #[must_use]
    pub fn lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Query on a single interface.
    #[must_use]
    pub fn interface(mut self, interface: Interface) -> Self {
        self.interface = Some(interface);
        self
    }

    /// Ask responders for unicast replies.
    #[must_use]
    pub fn want_unicast_response(mut self, enabled: bool) -> Self {
        self.want_unicast_response = enabled;
        self
    }

    /// Validate the options and build the query for `service`.
    pub fn query(&self, service: &str) -> Result<Query, ConfigError> {
        if service.trim_end_matches('.').is_empty() {
            return Err(ConfigError::EmptyService);
        }
        if self.domain.trim_matches('.').is_empty() {
            return Err(ConfigError::EmptyDomain);
        }
        ConfigError::require_nonzero(self.refresh_interval, ConfigError::ZeroRefreshInterval)?;
        let timeout =
            ConfigError::require_nonzero(self.lookup_timeout, ConfigError::ZeroLookupTimeout)?;

        Ok(Query {
            service: service.to_string(),
            domain: self.domain.clone(),
            timeout,
            interface: self.interface.clone(),
            want_unicast_response: self.want_unicast_response,
        })
    }
}

struct Shared<R> {
    query: Query,
    resolver: R,
    cache: Cache,
}

impl<R: Lookup> Shared<R> {
    /// One discovery round, published whole.
    async fn refresh(&self) {
        let result = self.resolver.lookup(&self.query).await;
        match &result {
            Ok(instances) => tracing::debug!(
                service = %self.query.service,
                count = instances.len(),
                "refresh succeeded"
            ),
            Err(err) => tracing::warn!(
                service = %self.query.service,
                error = %err,
                "refresh failed"
            ),
        }
        self.cache.update(DiscoveryEvent::from(result)).await;
    }
}

/// Keeps a live view of the instances of one service.
///
/// Construction runs one lookup and waits for it, so [`Instancer::state`]
/// reflects a real attempt as soon as `new` returns. A background task then
/// refreshes on every interval tick; refreshes may overlap and publish in
/// completion order. A failed refresh replaces the instance list with the
/// error until a later refresh succeeds.
///
/// A tick is skipped while a finished refresh is still queued behind a
/// stalled subscriber, so a slow consumer does not pile up lookups.
///
/// ## Example
///
/// ```rust
/// use beacon_discovery::{Instancer, InstancerOptions, StaticResolver};
/// use std::net::SocketAddr;
/// use std::time::Duration;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let resolver = StaticResolver::new();
/// let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
/// resolver.add_endpoint("_web._tcp", addr);
///
/// let options = InstancerOptions::new().refresh_interval(Duration::from_secs(3));
/// let instancer = Instancer::with_resolver("_web._tcp", options, resolver)
///     .await
///     .unwrap();
///
/// let state = instancer.state();
/// assert_eq!(state.instances().map(<[_]>::len), Some(1));
///
/// instancer.stop().await;
/// # });
/// ```
pub struct Instancer<R: Lookup> {
    shared: Arc<Shared<R>>,
    options: InstancerOptions,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl<R: Lookup> Instancer<R> {
    /// Create an instancer that resolves `service` through `resolver`.
    ///
    /// Fails with a [`ConfigError`] before any lookup if the options are
    /// invalid or the resolver rejects the query.
    pub async fn with_resolver(
        service: impl Into<String>,
        options: InstancerOptions,
        resolver: R,
    ) -> Result<Self, DiscoveryError> {
        let service = service.into();
        let query = options.query(&service)?;
        resolver.validate(&query)?;

        let shared = Arc::new(Shared {
            query,
            resolver,
            cache: Cache::new(),
        });

        // First lookup, before anyone can observe the cache.
        shared.refresh().await;

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        tracker.spawn(run(
            shared.clone(),
            options.refresh_interval,
            cancel.clone(),
            tracker.clone(),
        ));

        tracing::info!(
            service = %service,
            interval = ?options.refresh_interval,
            "instancer started"
        );

        Ok(Self {
            shared,
            options,
            cancel,
            tracker,
        })
    }

    /// Subscribe a channel to every future state change.
    ///
    /// The current state is not replayed; call [`Instancer::state`] after
    /// registering if it is needed.
    pub fn register(&self, tx: mpsc::Sender<DiscoveryEvent>) {
        self.shared.cache.register(tx);
    }

    /// Unsubscribe a channel.
    pub fn deregister(&self, tx: &mpsc::Sender<DiscoveryEvent>) {
        self.shared.cache.deregister(tx);
    }

    /// The current state of discovery (instances or error).
    #[must_use]
    pub fn state(&self) -> DiscoveryEvent {
        self.shared.cache.state()
    }

    /// The service being resolved.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.shared.query.service
    }

    /// The options this instancer was built with.
    #[must_use]
    pub fn options(&self) -> &InstancerOptions {
        &self.options
    }

    /// Stop refreshing and wait for in-flight refreshes to finish.
    ///
    /// Stops the cache, which releases blocked deliveries and drops every
    /// subscriber. Safe to call more than once.
    pub async fn stop(&self) {
        self.cancel.cancel();
        self.shared.cache.stop();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::debug!(service = %self.shared.query.service, "instancer stopped");
    }
}

#[cfg(feature = "mdns")]
impl Instancer<crate::mdns::MdnsResolver> {
    /// Create an instancer that resolves `service` over mDNS.
    pub async fn new(
        service: impl Into<String>,
        options: InstancerOptions,
    ) -> Result<Self, DiscoveryError> {
        Self::with_resolver(service, options, crate::mdns::MdnsResolver::new()).await
    }
}

/// Dropping without `stop` ends the loop but does not wait for it.
impl<R: Lookup> Drop for Instancer<R> {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.shared.cache.stop();
    }
}

async fn run<R: Lookup>(
    shared: Arc<Shared<R>>,
    period: Duration,
    cancel: CancellationToken,
    tracker: TaskTracker,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let queued = shared.cache.queued_updates();
                if queued > 0 {
                    tracing::debug!(
                        service = %shared.query.service,
                        queued,
                        "previous update still queued, skipping refresh"
                    );
                    continue;
                }
                let shared = shared.clone();
                tracker.spawn(async move { shared.refresh().await });
            }
        }
    }
}
