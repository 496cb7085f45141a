//! Per-address advertising-interval learning.
//!
//! Each address's typical gap between advertisements is learned from observed
//! timings and later used to distinguish "hasn't sent its next beacon yet"
//! from "actually gone", both for non-connectable expiry and for
//! cross-source switch decisions. The tracker also remembers which source
//! last reported each address; a source change invalidates the learned
//! interval, since different physical receivers have different timing
//! characteristics.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;

use blefusion_types::Sighting;

/// Samples buffered per address before an interval is learned.
///
/// The learned interval is the maximum gap between consecutive sightings in
/// this lookback window; taking the maximum avoids under-estimating the true
/// advertising period when some beacons are missed.
const ADVERTISING_TIMES_NEEDED: usize = 16;

/// Learns advertising intervals and tracks reporting sources per address.
///
/// Never fails: an address without a learned interval simply means callers
/// fall back to the fixed staleness constant.
#[derive(Debug, Default)]
pub struct AdvertisementTracker {
    intervals: HashMap<String, Duration>,
    sources: HashMap<String, String>,
    timings: HashMap<String, Vec<Instant>>,
}

impl AdvertisementTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sighting's timing and source.
    ///
    /// Buffers timestamps until enough samples exist, then learns the
    /// interval as the maximum observed gap and drops the buffer. The
    /// manager stops calling this once an interval is learned, so buffering
    /// cost is bounded per address.
    pub fn collect(&mut self, sighting: &Sighting) {
        self.sources
            .insert(sighting.address.clone(), sighting.source.clone());

        let timings = self.timings.entry(sighting.address.clone()).or_default();
        timings.push(sighting.time);
        if timings.len() < ADVERTISING_TIMES_NEEDED {
            return;
        }

        let max_gap = timings
            .windows(2)
            .map(|pair| pair[1].saturating_duration_since(pair[0]))
            .max()
            .unwrap_or_default();
        debug!(
            "Learned advertising interval {:?} for {}",
            max_gap, sighting.address
        );
        self.intervals.insert(sighting.address.clone(), max_gap);
        self.timings.remove(&sighting.address);
    }

    /// Learned advertising interval for an address, if known.
    #[must_use]
    pub fn interval(&self, address: &str) -> Option<Duration> {
        self.intervals.get(address).copied()
    }

    /// Source that last reported an address, if known.
    #[must_use]
    pub fn last_source(&self, address: &str) -> Option<&str> {
        self.sources.get(address).map(String::as_str)
    }

    /// Drop all state for an address.
    ///
    /// Called when the reporting source changes (forcing a relearn) and when
    /// an address disappears from every history partition.
    pub fn remove_address(&mut self, address: &str) {
        self.intervals.remove(address);
        self.sources.remove(address);
        self.timings.remove(address);
    }

    /// Drop state for every address last reported by `source`.
    ///
    /// Called when a scanner unregisters; its timing assumptions no longer
    /// apply to the addresses it was reporting.
    pub fn remove_source(&mut self, source: &str) {
        let addresses: Vec<String> = self
            .sources
            .iter()
            .filter(|(_, last)| last.as_str() == source)
            .map(|(address, _)| address.clone())
            .collect();
        for address in addresses {
            self.remove_address(&address);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sighting_at(address: &str, source: &str, time: Instant) -> Sighting {
        Sighting::new(address, source, true, time)
    }

    #[test]
    fn test_no_interval_before_enough_samples() {
        let mut tracker = AdvertisementTracker::new();
        let base = Instant::now();
        for i in 0..(ADVERTISING_TIMES_NEEDED - 1) {
            tracker.collect(&sighting_at(
                "aa",
                "hci0",
                base + Duration::from_secs(i as u64),
            ));
        }
        assert_eq!(tracker.interval("aa"), None);
        assert_eq!(tracker.last_source("aa"), Some("hci0"));
    }

    #[test]
    fn test_learns_maximum_gap() {
        let mut tracker = AdvertisementTracker::new();
        let base = Instant::now();
        let mut offset = Duration::ZERO;
        for i in 0..ADVERTISING_TIMES_NEEDED {
            // One missed beacon in the middle doubles a single gap.
            offset += if i == 8 {
                Duration::from_secs(4)
            } else {
                Duration::from_secs(2)
            };
            tracker.collect(&sighting_at("aa", "hci0", base + offset));
        }
        assert_eq!(tracker.interval("aa"), Some(Duration::from_secs(4)));
    }

    #[test]
    fn test_remove_address_forces_relearn() {
        let mut tracker = AdvertisementTracker::new();
        let base = Instant::now();
        for i in 0..ADVERTISING_TIMES_NEEDED {
            tracker.collect(&sighting_at(
                "aa",
                "hci0",
                base + Duration::from_secs(i as u64),
            ));
        }
        assert!(tracker.interval("aa").is_some());
        tracker.remove_address("aa");
        assert_eq!(tracker.interval("aa"), None);
        assert_eq!(tracker.last_source("aa"), None);
    }

    #[test]
    fn test_remove_source_only_drops_its_addresses() {
        let mut tracker = AdvertisementTracker::new();
        let base = Instant::now();
        tracker.collect(&sighting_at("aa", "hci0", base));
        tracker.collect(&sighting_at("bb", "proxy-1", base));
        tracker.remove_source("proxy-1");
        assert_eq!(tracker.last_source("aa"), Some("hci0"));
        assert_eq!(tracker.last_source("bb"), None);
    }

    #[test]
    fn test_remove_missing_address_is_harmless() {
        let mut tracker = AdvertisementTracker::new();
        tracker.remove_address("absent");
        tracker.remove_source("absent");
    }
}
