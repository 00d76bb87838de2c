//! # Beacon
//!
//! Live service discovery for the local network.
//!
//! Beacon provides:
//! - **Instancers** that re-resolve a service on a fixed interval and keep
//!   the latest instance list (or the latest error) in a cache
//! - **Fan-out** of every state change to any number of subscriber channels
//! - **mDNS / DNS-SD** lookups and announcements via `mdns-sd`
//!
//! ## Quick Start
//!
//! ```rust
//! use beacon::{Instancer, InstancerOptions, StaticResolver};
//! use std::net::SocketAddr;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! // A resolver with known instances (use `Instancer::new` for mDNS)
//! let resolver = StaticResolver::new();
//! let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
//! resolver.add_endpoint("_api._tcp", addr);
//!
//! let instancer = Instancer::with_resolver("_api._tcp", InstancerOptions::default(), resolver)
//!     .await
//!     .unwrap();
//!
//! // Subscribe before reading the state so no change is missed
//! let (tx, _rx) = tokio::sync::mpsc::channel(16);
//! instancer.register(tx);
//! let instances = instancer.state().into_result().unwrap();
//! assert_eq!(instances[0].addr, addr);
//!
//! instancer.stop().await;
//! # });
//! ```
//!
//! ## Features
//!
//! - `mdns` (default) - mDNS resolver, `Registrar` and `Instancer::new`
//!
//! ## Architecture
//!
//! Beacon is composed of several crates:
//!
//! - [`beacon-core`] - Endpoint, event and error types
//! - [`beacon-discovery`] - Lookup backends, cache, instancer and registrar

// Re-export core types
pub use beacon_core::{
    ConfigError, DiscoveryError, DiscoveryEvent, Endpoint, EntryError, QueryError,
};

// Re-export discovery
pub use beacon_discovery::{
    Cache, DEFAULT_DOMAIN, DEFAULT_LOOKUP_TIMEOUT, DEFAULT_REFRESH_INTERVAL, Instancer,
    InstancerOptions, Interface, Lookup, Query, StaticResolver,
};

#[cfg(feature = "mdns")]
pub use beacon_discovery::{MdnsInstancer, MdnsResolver, Registrar, Service};

/// Prelude module for convenient imports.
///
/// ```rust
/// use beacon::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        DiscoveryError, DiscoveryEvent, Endpoint, Instancer, InstancerOptions, Lookup,
        StaticResolver,
    };

    #[cfg(feature = "mdns")]
    pub use crate::{MdnsResolver, Registrar, Service};
}

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
