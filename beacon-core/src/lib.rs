//! # beacon-core
//!
//! Core types and error definitions for beacon service discovery.
//!
//! This crate provides:
//! - Error types (`DiscoveryError`, `QueryError`, `ConfigError`, `EntryError`)
//! - The resolved `Endpoint` type
//! - `DiscoveryEvent`, the outcome of one refresh

mod error;
mod event;

pub use error::{ConfigError, DiscoveryError, EntryError, QueryError};
pub use event::{DiscoveryEvent, Endpoint};
