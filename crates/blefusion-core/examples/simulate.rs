//! Example: Fusing Advertisements from Two Sources
//!
//! This example feeds synthetic advertisements from a local adapter and a
//! remote proxy into the fusion engine and prints which source wins, which
//! discovery rules fire, and when devices expire.
//!
//! Run with: `cargo run --example simulate`

use std::time::{Duration, Instant};

use blefusion_core::{BluetoothManager, IntegrationMatcher};
use blefusion_types::{DiscoveryRule, MatcherCriteria, Sighting};

fn main() {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let rules = vec![
        DiscoveryRule::new("acme_kettle", MatcherCriteria::new().local_name("Kettle*")),
        DiscoveryRule::new("acme_sensor", MatcherCriteria::new().manufacturer_id(0x0499)),
    ];
    let mut manager = BluetoothManager::new(
        IntegrationMatcher::new(rules),
        Box::new(|domain, sighting| {
            println!("  discovery: {} matched {}", domain, sighting.address);
        }),
    );

    let base = Instant::now();

    println!("Local adapter hears the kettle at -60 dBm:");
    let mut local = Sighting::new("AA:BB:CC:DD:EE:FF", "hci0", true, base);
    local.local_name = Some("Kettle 3000".to_string());
    local.rssi = Some(-60);
    manager.scanner_adv_received(local);

    println!("Proxy hears the same kettle slightly weaker (stays with hci0):");
    let mut proxy = Sighting::new(
        "AA:BB:CC:DD:EE:FF",
        "proxy-kitchen",
        true,
        base + Duration::from_secs(1),
    );
    proxy.local_name = Some("Kettle 3000".to_string());
    proxy.rssi = Some(-64);
    manager.scanner_adv_received(proxy);

    println!("Proxy hears it decisively stronger (takes over):");
    let mut proxy = Sighting::new(
        "AA:BB:CC:DD:EE:FF",
        "proxy-kitchen",
        true,
        base + Duration::from_secs(2),
    );
    proxy.local_name = Some("Kettle 3000".to_string());
    proxy.rssi = Some(-48);
    manager.scanner_adv_received(proxy);

    let winner = manager
        .last_service_info("AA:BB:CC:DD:EE:FF", true)
        .expect("kettle should be in history");
    println!(
        "Authoritative sighting now comes from {} at {:?} dBm",
        winner.source, winner.rssi
    );

    println!();
    println!("A passive beacon shows up on the proxy:");
    let mut beacon = Sighting::new("11:22:33:44:55:66", "proxy-kitchen", false, base);
    beacon.manufacturer_data.insert(0x0499, vec![0x05, 0x01]);
    manager.scanner_adv_received(beacon);

    println!(
        "Connectable devices: {}, all devices: {}",
        manager.discovered_service_info(true).count(),
        manager.discovered_service_info(false).count(),
    );

    println!();
    println!("Sweeping with no scanners reporting anything:");
    manager.check_unavailable(base + Duration::from_secs(120));
    println!(
        "Devices remaining after the sweep: {}",
        manager.discovered_service_info(false).count(),
    );
}
