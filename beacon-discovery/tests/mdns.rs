//! Discovery over a real multicast network.
//!
//! These tests bind the mDNS port and need a multicast-capable, non-loopback
//! interface, which most CI sandboxes do not provide. Run them with
//! `cargo test -- --ignored`.
//!
//! Instances are announced on every interface address, so discovered
//! endpoints are matched by port.

#![cfg(feature = "mdns")]

use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};

use beacon_discovery::{
    Instancer, InstancerOptions, Lookup, MdnsResolver, Query, Registrar, Service,
};

fn announce(service: &str, port: u16) -> Registrar {
    let service = Service::new(format!("instance-{port}"), service, port);
    Registrar::new(service).unwrap()
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires multicast networking"]
async fn test_instancer_discovers_registered_instances() {
    let service = "_instancer-test._tcp";

    let mut registrars = Vec::new();
    let mut want = Vec::new();
    let mut port = 20000;
    for i in 0..10u16 {
        port += 37 * (i + 1);
        let registrar = announce(service, port);
        registrar.register();
        assert!(registrar.is_registered());
        registrars.push(registrar);
        want.push(port);
    }

    let options = InstancerOptions::new()
        .refresh_interval(Duration::from_secs(3))
        .lookup_timeout(Duration::from_secs(2));
    let instancer = Instancer::new(service, options).await.unwrap();

    let event = instancer.state();
    assert!(event.err().is_none(), "unexpected error: {:?}", event.err());
    let endpoints = event.instances().unwrap();
    assert!(endpoints.iter().all(|e| !e.addr.ip().is_loopback()));
    let mut have: Vec<u16> = endpoints.iter().map(|e| e.addr.port()).collect();

    want.sort();
    have.sort();
    assert_eq!(want, have);

    instancer.stop().await;
    for registrar in &registrars {
        registrar.deregister();
    }
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires multicast networking"]
async fn test_lookup_without_responders_honors_timeout() {
    let timeout = Duration::from_millis(500);
    let query = Query {
        service: "_nobody-home._tcp".to_string(),
        domain: "local".to_string(),
        timeout,
        interface: None,
        want_unicast_response: false,
    };

    let start = Instant::now();
    let endpoints = MdnsResolver::new().lookup(&query).await.unwrap();
    let elapsed = start.elapsed();

    assert!(endpoints.is_empty());
    assert!(elapsed < timeout + Duration::from_millis(750), "took {elapsed:?}");
}

#[test]
#[ignore = "requires multicast networking"]
fn test_register_twice_is_noop() {
    let registrar = announce("_registrar-test._tcp", 31000);
    registrar.register();
    registrar.register();
    assert!(registrar.is_registered());

    registrar.deregister();
    assert!(!registrar.is_registered());
    registrar.deregister();
}

#[test]
fn test_loopback_announcement_is_rejected() {
    let service =
        Service::new("lo", "_registrar-test._tcp", 31001).ip(IpAddr::V4(Ipv4Addr::LOCALHOST));
    assert!(Registrar::new(service).is_err());
}
