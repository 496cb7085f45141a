//! Mock scanner for testing without radio hardware.

use std::sync::RwLock;

use crate::scanner::{DiscoveredDevice, Scanner};

/// In-memory [`Scanner`] whose discovered-device set is set by the test.
///
/// # Example
///
/// ```
/// use blefusion_core::mock::MockScanner;
/// use blefusion_core::scanner::{DiscoveredDevice, Scanner};
///
/// let scanner = MockScanner::new("hci0");
/// scanner.set_discovered(vec![DiscoveredDevice::new("AA:BB:CC:DD:EE:FF")]);
/// assert_eq!(scanner.discovered_devices().len(), 1);
/// ```
#[derive(Debug)]
pub struct MockScanner {
    source: String,
    discovered: RwLock<Vec<DiscoveredDevice>>,
}

impl MockScanner {
    /// Create a mock scanner with the given source identity.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            discovered: RwLock::new(Vec::new()),
        }
    }

    /// Replace the set of devices this scanner currently sees.
    pub fn set_discovered(&self, devices: Vec<DiscoveredDevice>) {
        *self.discovered.write().expect("mock scanner lock poisoned") = devices;
    }

    /// Drop every device from the live view, simulating all devices going
    /// out of range.
    pub fn clear_discovered(&self) {
        self.set_discovered(Vec::new());
    }
}

impl Scanner for MockScanner {
    fn source(&self) -> &str {
        &self.source
    }

    fn discovered_devices(&self) -> Vec<DiscoveredDevice> {
        self.discovered
            .read()
            .expect("mock scanner lock poisoned")
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_scanner_live_view() {
        let scanner = MockScanner::new("proxy-1");
        assert_eq!(scanner.source(), "proxy-1");
        assert!(scanner.discovered_devices().is_empty());

        scanner.set_discovered(vec![DiscoveredDevice::new("aa:bb")]);
        assert_eq!(scanner.discovered_devices()[0].address, "aa:bb");

        scanner.clear_discovered();
        assert!(scanner.discovered_devices().is_empty());
    }
}
