//! Advertisement fusion and discovery matching for Bluetooth Low Energy.
//!
//! This crate fuses BLE advertisements from any number of scanners (local
//! adapters, remote proxies) into one authoritative view per device address,
//! and routes changed sightings to discovery rules and subscriber callbacks.
//!
//! # Features
//!
//! - **Cross-source arbitration**: One winning sighting per address, with
//!   RSSI hysteresis and staleness override
//! - **Deduplication**: Identical repeat payloads produce zero fan-out
//! - **Interval learning**: Per-address advertising cadence learned from
//!   observed timings
//! - **Discovery matching**: Static rule sets matched per sighting, with
//!   per-address suppression of repeat notifications
//! - **Subscriptions**: Structural callbacks with typed criteria, raw
//!   passthrough callbacks, unavailability tracking
//! - **Glob local names**: Shell-style name patterns with an anti-collision
//!   minimum prefix rule
//!
//! # Quick Start
//!
//! ```
//! use blefusion_core::{BluetoothManager, IntegrationMatcher};
//! use blefusion_types::{DiscoveryRule, MatcherCriteria, Sighting};
//! use std::time::Instant;
//!
//! let rules = vec![DiscoveryRule::new(
//!     "acme_ble",
//!     MatcherCriteria::new().manufacturer_id(0x0499),
//! )];
//! let mut manager = BluetoothManager::new(
//!     IntegrationMatcher::new(rules),
//!     Box::new(|domain, sighting| {
//!         println!("discovered {} for {domain}", sighting.address);
//!     }),
//! );
//!
//! let mut sighting = Sighting::new("AA:BB:CC:DD:EE:FF", "hci0", true, Instant::now());
//! sighting.manufacturer_data.insert(0x0499, vec![0x05, 0x01]);
//! manager.scanner_adv_received(sighting);
//! assert!(manager.address_present("AA:BB:CC:DD:EE:FF", true));
//! ```

pub mod error;
pub mod manager;
pub mod matcher;
pub mod mock;
pub mod pattern;
pub mod scanner;
pub mod tracker;

mod lru;

// Re-export the vocabulary types so most users only need this crate.
pub use blefusion_types::{
    DiscoveryRule, MatcherCriteria, NO_RSSI_VALUE, Sighting, SightingChange,
};

pub use error::{CallbackError, CallbackResult, Error, Result};
pub use manager::{
    BluetoothManager, CallbackId, DiscoveryHandler, FALLBACK_STALE_INTERVAL, ManagerConfig,
    RSSI_SWITCH_THRESHOLD, RawCallback, RawCallbackFilter, RawCallbackId, ScannerId,
    SightingCallback, UNAVAILABLE_TRACK_INTERVAL, UnavailableCallback, UnavailableId,
    start_unavailable_tracking,
};
pub use matcher::{IntegrationMatcher, sighting_matches};
pub use scanner::{DiscoveredDevice, Scanner};
pub use tracker::AdvertisementTracker;
