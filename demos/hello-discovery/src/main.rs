//! Hello Discovery example for Beacon.
//!
//! This example demonstrates basic usage of Beacon:
//! - Announcing local instances with a `Registrar`
//! - Watching them through an mDNS `Instancer`
//! - Subscribing to state changes and reading the current state
//!
//! Set `RUST_LOG=beacon_discovery=debug` to see every refresh.
//! Multicast must be allowed on the local network.

use std::time::Duration;

use beacon::{DiscoveryEvent, Instancer, InstancerOptions, Registrar, Service};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

const SERVICE: &str = "_hello-beacon._tcp";
const INSTANCES: u16 = 3;

fn describe(event: &DiscoveryEvent) -> String {
    match event {
        DiscoveryEvent::Instances(instances) => {
            let mut addrs: Vec<String> = instances.iter().map(ToString::to_string).collect();
            addrs.sort();
            format!("{} instance(s): [{}]", addrs.len(), addrs.join(", "))
        }
        DiscoveryEvent::Err(err) => format!("error: {err}"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("Beacon Hello Discovery Example");
    println!("==============================\n");

    // Announce a few local instances on every interface address.
    // mdns-sd does not serve loopback, so 127.0.0.1 would never be found.
    let mut registrars = Vec::new();
    for i in 0..INSTANCES {
        let port = 18080 + i;
        let service = Service::new(format!("hello-{i}"), SERVICE, port).txt(format!("index={i}"));
        let registrar = Registrar::new(service)?;
        registrar.register();
        println!("  announced {}", registrar.fullname());
        registrars.push(registrar);
    }

    // Watch them
    let options = InstancerOptions::new()
        .refresh_interval(Duration::from_secs(2))
        .lookup_timeout(Duration::from_millis(800));
    let instancer = Instancer::new(SERVICE, options).await?;

    let (tx, mut rx) = mpsc::channel(8);
    instancer.register(tx);
    println!("\nInitial state: {}", describe(&instancer.state()));

    // Withdraw one instance and watch the cache follow
    if let Some(registrar) = registrars.pop() {
        registrar.deregister();
        println!("  withdrew {}", registrar.fullname());
    }

    for _ in 0..3 {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(event)) => println!("Update: {}", describe(&event)),
            Ok(None) => break,
            Err(_) => println!("No update within 5s"),
        }
    }

    instancer.stop().await;
    for registrar in &registrars {
        registrar.deregister();
    }

    println!("\nExample completed successfully!");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon::{DiscoveryError, Endpoint, QueryError};

    #[test]
    fn test_describe_sorts_instances() {
        let event = DiscoveryEvent::Instances(vec![
            Endpoint::new("127.0.0.1:2".parse().unwrap()),
            Endpoint::new("127.0.0.1:1".parse().unwrap()),
        ]);
        assert_eq!(describe(&event), "2 instance(s): [127.0.0.1:1, 127.0.0.1:2]");
    }

    #[test]
    fn test_describe_error() {
        let event = DiscoveryEvent::Err(DiscoveryError::from(QueryError::Backend("down".into())));
        assert_eq!(describe(&event), "error: query error: lookup failed: down");
    }
}
