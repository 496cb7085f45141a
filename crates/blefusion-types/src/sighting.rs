//! Advertisement sighting value type.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use uuid::Uuid;

/// RSSI value used when a sighting carries no signal strength.
///
/// Chosen below any physically plausible reading so that a sighting without
/// RSSI always loses a signal-strength comparison.
pub const NO_RSSI_VALUE: i16 = -127;

/// One decoded BLE advertisement observation from one scanner.
///
/// A sighting is immutable after creation: the manager compares each new
/// sighting against the previously stored one for the same address and
/// partition, and never mutates either.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sighting {
    /// Stable or randomized hardware address of the advertising device.
    pub address: String,
    /// Identity of the scanner that reported this sighting.
    ///
    /// This is a property of the reporting path, not of the device; the same
    /// device can be sighted via several sources concurrently.
    pub source: String,
    /// Whether the reporting source can also open a connection to the device.
    pub connectable: bool,
    /// Signal strength in dBm, if the source reported one.
    pub rssi: Option<i16>,
    /// Monotonic receipt timestamp. Used only for interval and staleness
    /// arithmetic, never interpreted as wall-clock time.
    pub time: Instant,
    /// Local name carried in the advertisement payload, if any.
    pub local_name: Option<String>,
    /// Name reported by the device itself (e.g. from a previous connection).
    pub device_name: Option<String>,
    /// Manufacturer data keyed by company identifier.
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    /// Service data keyed by service UUID.
    pub service_data: HashMap<Uuid, Vec<u8>>,
    /// Advertised service UUIDs.
    pub service_uuids: HashSet<Uuid>,
}

impl Sighting {
    /// Create a sighting with empty payload fields.
    ///
    /// Payload fields are public; fill them in with struct update syntax or
    /// direct assignment before handing the sighting to the manager.
    pub fn new(
        address: impl Into<String>,
        source: impl Into<String>,
        connectable: bool,
        time: Instant,
    ) -> Self {
        Self {
            address: address.into(),
            source: source.into(),
            connectable,
            rssi: None,
            time,
            local_name: None,
            device_name: None,
            manufacturer_data: HashMap::new(),
            service_data: HashMap::new(),
            service_uuids: HashSet::new(),
        }
    }

    /// Best available device name.
    ///
    /// Falls back from the advertised local name to the device-reported name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.local_name.as_deref().or(self.device_name.as_deref())
    }

    /// RSSI with the no-signal sentinel substituted for a missing value.
    #[must_use]
    pub fn rssi_or_default(&self) -> i16 {
        self.rssi.unwrap_or(NO_RSSI_VALUE)
    }

    /// Whether two sightings carry an identical advertisement payload.
    ///
    /// Compares manufacturer data, service data, service UUIDs, and name.
    /// Source, timing, and RSSI are deliberately excluded: a repeat packet
    /// from a stationary beacon differs only in those fields and must not
    /// trigger downstream fan-out.
    #[must_use]
    pub fn same_payload(&self, other: &Self) -> bool {
        self.manufacturer_data == other.manufacturer_data
            && self.service_data == other.service_data
            && self.service_uuids == other.service_uuids
            && self.name() == other.name()
    }
}

/// Kind of change delivered to a structural subscriber.
///
/// Marked `#[non_exhaustive]` so further change kinds can be added without
/// breaking downstream code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum SightingChange {
    /// A new or changed advertisement was observed.
    Advertisement,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sighting(name: Option<&str>) -> Sighting {
        let mut s = Sighting::new("AA:BB:CC:DD:EE:FF", "hci0", true, Instant::now());
        s.local_name = name.map(str::to_string);
        s
    }

    #[test]
    fn test_name_falls_back_to_device_name() {
        let mut s = sighting(None);
        assert_eq!(s.name(), None);
        s.device_name = Some("Kettle".to_string());
        assert_eq!(s.name(), Some("Kettle"));
        s.local_name = Some("Kettle Pro".to_string());
        assert_eq!(s.name(), Some("Kettle Pro"));
    }

    #[test]
    fn test_rssi_default_sentinel() {
        let mut s = sighting(None);
        assert_eq!(s.rssi_or_default(), NO_RSSI_VALUE);
        s.rssi = Some(-60);
        assert_eq!(s.rssi_or_default(), -60);
    }

    #[test]
    fn test_same_payload_ignores_rssi_and_time() {
        let a = sighting(Some("Beacon"));
        let mut b = a.clone();
        b.rssi = Some(-40);
        b.time = Instant::now();
        b.source = "proxy-1".to_string();
        assert!(a.same_payload(&b));
    }

    #[test]
    fn test_same_payload_detects_data_change() {
        let a = sighting(Some("Beacon"));
        let mut b = a.clone();
        b.manufacturer_data.insert(76, vec![0x02, 0x15]);
        assert!(!a.same_payload(&b));
    }
}
