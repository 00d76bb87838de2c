//! # beacon-discovery
//!
//! Live service-instance discovery over mDNS.
//!
//! This crate provides:
//! - `Lookup` trait for discovery backends, with `StaticResolver` for tests
//! - `MdnsResolver` for mDNS / DNS-SD lookups (with `mdns` feature)
//! - `Cache`, the latest discovery state with multi-subscriber fan-out
//! - `Instancer`, which refreshes a `Cache` on a fixed interval
//! - `Registrar` for announcing a local instance (with `mdns` feature)
//!
//! ## Features
//!
//! - `mdns` (default) - mDNS backend and registrar via `mdns-sd`

mod cache;
mod instancer;
mod resolver;

#[cfg(feature = "mdns")]
mod mdns;

#[cfg(feature = "mdns")]
mod registrar;

pub use cache::Cache;
pub use instancer::{
    DEFAULT_DOMAIN, DEFAULT_LOOKUP_TIMEOUT, DEFAULT_REFRESH_INTERVAL, Instancer, InstancerOptions,
};
pub use resolver::{Interface, Lookup, Query, StaticResolver};

#[cfg(feature = "mdns")]
pub use mdns::MdnsResolver;

#[cfg(feature = "mdns")]
pub use registrar::{Registrar, Service};

/// An instancer resolving over mDNS.
#[cfg(feature = "mdns")]
pub type MdnsInstancer = Instancer<MdnsResolver>;
