//! Scanner façade contract.
//!
//! The engine never drives a radio itself; scanner façades decode transport
//! traffic elsewhere and feed the manager already-formed [`Sighting`] values.
//! The trait below is the only thing the core needs from a scanner: its
//! identity and a live view of what it currently sees, which the
//! unavailability sweep uses to re-derive ground truth instead of trusting
//! the history maps.
//!
//! [`Sighting`]: blefusion_types::Sighting

/// A device currently visible to a scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// Device address.
    pub address: String,
    /// Device name, if the scanner knows one.
    pub name: Option<String>,
    /// Most recent signal strength.
    pub rssi: Option<i16>,
}

impl DiscoveredDevice {
    /// Create a discovered-device entry.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
            rssi: None,
        }
    }
}

/// One physical or remote advertisement source.
///
/// Implementations deliver sightings to the manager out-of-band (by calling
/// [`scanner_adv_received`] from the event-loop context); the manager only
/// calls back into the scanner during the periodic unavailability sweep.
///
/// [`scanner_adv_received`]: crate::manager::BluetoothManager::scanner_adv_received
pub trait Scanner: Send + Sync {
    /// Stable identity of this scanner, recorded as the `source` of every
    /// sighting it reports.
    fn source(&self) -> &str;

    /// Devices this scanner currently considers visible.
    ///
    /// Queried only by the unavailability sweep; a cheap snapshot is fine.
    fn discovered_devices(&self) -> Vec<DiscoveredDevice>;
}
