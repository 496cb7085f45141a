//! Advertisement fusion manager.
//!
//! This module is the central fusion point for every scanner façade: it
//! arbitrates which sighting is authoritative per address, maintains the
//! connectable and all-sightings history partitions, learns advertising
//! intervals, expires unavailable devices, and fans out changed sightings to
//! raw subscribers, structural subscribers, and the discovery handler.
//!
//! # Concurrency model
//!
//! The manager is single-threaded and lock-free: every mutation goes through
//! `&mut self` and nothing inside blocks or awaits. Scanners deliver
//! sightings by scheduling calls onto the owning task rather than calling in
//! from other threads. The only async surface is
//! [`start_unavailable_tracking`], which drives the periodic sweep from a
//! tokio interval and takes the manager behind an `Arc<Mutex<_>>` owned by
//! the composition root.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use blefusion_types::{MatcherCriteria, Sighting, SightingChange};

use crate::error::{CallbackResult, Result};
use crate::matcher::{CallbackMatcherIndex, IntegrationMatcher, sighting_matches};
use crate::pattern::{self, PatternCache};
use crate::scanner::{DiscoveredDevice, Scanner};
use crate::tracker::AdvertisementTracker;

/// How much stronger (dBm) a new source's signal must be to displace a fresh
/// reading from the current source. Prevents flapping between two scanners
/// that hear the same beacon at marginally different strengths.
pub const RSSI_SWITCH_THRESHOLD: i16 = 6;

/// Staleness threshold used when no advertising interval has been learned
/// for an address.
pub const FALLBACK_STALE_INTERVAL: Duration = Duration::from_secs(60);

/// Interval between unavailability sweeps: roughly half the common
/// aggressive advertising interval, keeping false-unavailable latency low
/// without excessive CPU.
pub const UNAVAILABLE_TRACK_INTERVAL: Duration = Duration::from_millis(12_500);

/// Apple's company identifier.
const APPLE_MFR_ID: u16 = 76;

/// First manufacturer-data bytes of Apple traffic anyone downstream cares
/// about: iBeacon, HomeKit, and device-id frames.
const APPLE_START_BYTES_WANTED: [u8; 3] = [0x02, 0x06, 0x10];

/// Structural subscriber callback.
pub type SightingCallback = Box<dyn FnMut(&Sighting, SightingChange) -> CallbackResult + Send>;

/// Raw passthrough subscriber callback.
pub type RawCallback = Box<dyn FnMut(&Sighting) -> CallbackResult + Send>;

/// Unavailability subscriber callback, invoked with the last known sighting.
pub type UnavailableCallback = Box<dyn FnMut(&Sighting) -> CallbackResult + Send>;

/// Discovery-flow trigger, invoked once per matched domain per changed
/// sighting. Injected by the composition root.
pub type DiscoveryHandler = Box<dyn FnMut(&str, &Sighting) + Send>;

/// Handle for removing a structural callback registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

/// Handle for removing a raw passthrough registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawCallbackId(u64);

/// Handle for removing a scanner registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScannerId(u64);

/// Handle for removing an unavailability registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnavailableId {
    id: u64,
    address: String,
    connectable: bool,
}

/// Filter for raw passthrough callbacks.
///
/// An empty UUID set passes every sighting; otherwise at least one advertised
/// service UUID must intersect the set.
#[derive(Debug, Clone, Default)]
pub struct RawCallbackFilter {
    /// Service UUIDs of interest.
    pub uuids: HashSet<Uuid>,
}

/// Configuration for the fusion manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// RSSI margin required for a cross-source switch.
    pub rssi_switch_threshold: i16,
    /// Staleness threshold for addresses with no learned interval.
    pub fallback_stale_interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            rssi_switch_threshold: RSSI_SWITCH_THRESHOLD,
            fallback_stale_interval: FALLBACK_STALE_INTERVAL,
        }
    }
}

struct CallbackEntry {
    criteria: MatcherCriteria,
    callback: SightingCallback,
}

struct RawEntry {
    id: u64,
    filter: RawCallbackFilter,
    callback: RawCallback,
}

/// The advertisement fusion and matching engine.
///
/// Owns the history partitions, the advertisement tracker, the matcher memo,
/// and every callback registration; no other component writes this state.
/// Query methods return live references that are immediately stale.
pub struct BluetoothManager {
    config: ManagerConfig,
    integration_matcher: IntegrationMatcher,
    discovery: DiscoveryHandler,
    tracker: AdvertisementTracker,
    patterns: PatternCache,
    callbacks: HashMap<u64, CallbackEntry>,
    callback_index: CallbackMatcherIndex,
    raw_callbacks: Vec<RawEntry>,
    unavailable_callbacks: HashMap<String, Vec<(u64, UnavailableCallback)>>,
    connectable_unavailable_callbacks: HashMap<String, Vec<(u64, UnavailableCallback)>>,
    /// Authoritative sighting per address across every source.
    history: HashMap<String, Sighting>,
    /// Subset view of `history` restricted to connectable sightings.
    connectable_history: HashMap<String, Sighting>,
    scanners: Vec<(u64, Arc<dyn Scanner>)>,
    connectable_scanners: Vec<(u64, Arc<dyn Scanner>)>,
    next_id: u64,
}

impl BluetoothManager {
    /// Create a manager with the default configuration.
    pub fn new(integration_matcher: IntegrationMatcher, discovery: DiscoveryHandler) -> Self {
        Self::with_config(ManagerConfig::default(), integration_matcher, discovery)
    }

    /// Create a manager with full configuration.
    pub fn with_config(
        config: ManagerConfig,
        integration_matcher: IntegrationMatcher,
        discovery: DiscoveryHandler,
    ) -> Self {
        Self {
            config,
            integration_matcher,
            discovery,
            tracker: AdvertisementTracker::new(),
            patterns: PatternCache::new(),
            callbacks: HashMap::new(),
            callback_index: CallbackMatcherIndex::default(),
            raw_callbacks: Vec::new(),
            unavailable_callbacks: HashMap::new(),
            connectable_unavailable_callbacks: HashMap::new(),
            history: HashMap::new(),
            connectable_history: HashMap::new(),
            scanners: Vec::new(),
            connectable_scanners: Vec::new(),
            next_id: 0,
        }
    }

    /// Seed the history partitions from an external snapshot.
    ///
    /// A best-effort bulk insert only, not a persistence contract. Snapshot
    /// entries come from the host system, which can only provide connectable
    /// devices, so every entry lands in both partitions.
    pub fn seed_history(&mut self, sightings: Vec<Sighting>) {
        for sighting in sightings {
            self.history
                .insert(sighting.address.clone(), sighting.clone());
            self.connectable_history
                .insert(sighting.address.clone(), sighting);
        }
    }

    /// Handle a new advertisement from any scanner.
    ///
    /// Infallible and non-blocking; scanner façades treat this call as
    /// fire-and-forget.
    pub fn scanner_adv_received(&mut self, sighting: Sighting) {
        // Pre-filter noisy Apple frames; they can account for 20-35% of the
        // traffic in a typical environment and nothing downstream wants them.
        if Self::is_apple_noise(&sighting) {
            return;
        }

        let address = sighting.address.clone();
        let connectable = sighting.connectable;

        let partition = if connectable {
            &self.connectable_history
        } else {
            &self.history
        };
        let old = partition.get(&address);
        if let Some(old) = old
            && old.source != sighting.source
            && self.prefer_previous(old, &sighting)
        {
            return;
        }
        let changed = old.is_none_or(|old| !old.same_payload(&sighting));

        self.history.insert(address.clone(), sighting.clone());
        if connectable {
            self.connectable_history
                .insert(address.clone(), sighting.clone());
        }

        // A source change invalidates the learned interval; a different
        // receiver's timing assumptions no longer apply.
        let source_changed = self
            .tracker
            .last_source(&address)
            .is_some_and(|last| last != sighting.source);
        if source_changed {
            self.tracker.remove_address(&address);
        }
        if self.tracker.interval(&address).is_none() {
            self.tracker.collect(&sighting);
        }

        // Most packets from a stationary beacon are identical repeats; skip
        // all fan-out when nothing in the payload changed.
        if !changed {
            return;
        }

        if connectable {
            // Raw subscribers must only ever see connectable sightings.
            for entry in &mut self.raw_callbacks {
                if !entry.filter.uuids.is_empty()
                    && entry.filter.uuids.is_disjoint(&sighting.service_uuids)
                {
                    continue;
                }
                if let Err(err) = (entry.callback)(&sighting) {
                    warn!("Error in raw advertisement callback: {err}");
                }
            }
        }

        let matched_domains = self
            .integration_matcher
            .match_domains(&sighting, &mut self.patterns);
        debug!(
            "{}: {} connectable: {} match: {:?} rssi: {:?}",
            sighting.source, address, connectable, matched_domains, sighting.rssi
        );

        for id in self.callback_index.candidates(&sighting) {
            let Some(entry) = self.callbacks.get_mut(&id) else {
                continue;
            };
            if !sighting_matches(&entry.criteria, &sighting, &mut self.patterns) {
                continue;
            }
            if let Err(err) = (entry.callback)(&sighting, SightingChange::Advertisement) {
                warn!("Error in bluetooth callback: {err}");
            }
        }

        for domain in &matched_domains {
            (self.discovery)(domain, &sighting);
        }
    }

    /// Register a structural callback.
    ///
    /// `criteria` of `None` subscribes to every connectable sighting. A
    /// local-name glob with fewer than three fixed leading characters is
    /// rejected. If the criteria names an address that already has matching
    /// history, the callback fires synchronously with the last known sighting
    /// before this returns.
    pub fn register_callback(
        &mut self,
        callback: SightingCallback,
        criteria: Option<MatcherCriteria>,
    ) -> Result<CallbackId> {
        let mut criteria = criteria.unwrap_or_default();
        if let Some(glob) = &criteria.local_name {
            pattern::validate_pattern(glob)?;
        }
        criteria.connectable = Some(criteria.require_connectable());

        let id = self.take_id();
        self.callback_index.add(id, &criteria);
        let mut entry = CallbackEntry { criteria, callback };

        if let Some(address) = entry.criteria.address.clone() {
            let history = if entry.criteria.require_connectable() {
                &self.connectable_history
            } else {
                &self.history
            };
            if let Some(sighting) = history.get(&address)
                && sighting_matches(&entry.criteria, sighting, &mut self.patterns)
                && let Err(err) = (entry.callback)(sighting, SightingChange::Advertisement)
            {
                warn!("Error in bluetooth callback: {err}");
            }
        }

        self.callbacks.insert(id, entry);
        Ok(CallbackId(id))
    }

    /// Remove a structural callback. Tolerates an already-removed handle.
    pub fn unregister_callback(&mut self, id: CallbackId) {
        if let Some(entry) = self.callbacks.remove(&id.0) {
            self.callback_index.remove(id.0, &entry.criteria);
        }
    }

    /// Register a raw passthrough callback.
    ///
    /// The current connectable history is replayed synchronously so the
    /// subscriber sees devices discovered before it registered.
    pub fn register_raw_callback(
        &mut self,
        mut callback: RawCallback,
        filter: RawCallbackFilter,
    ) -> RawCallbackId {
        for sighting in self.connectable_history.values() {
            if !filter.uuids.is_empty() && filter.uuids.is_disjoint(&sighting.service_uuids) {
                continue;
            }
            if let Err(err) = callback(sighting) {
                warn!("Error in raw advertisement callback: {err}");
            }
        }
        let id = self.take_id();
        self.raw_callbacks.push(RawEntry {
            id,
            filter,
            callback,
        });
        RawCallbackId(id)
    }

    /// Remove a raw passthrough callback. Tolerates an already-removed handle.
    pub fn unregister_raw_callback(&mut self, id: RawCallbackId) {
        self.raw_callbacks.retain(|entry| entry.id != id.0);
    }

    /// Register a callback fired when an address becomes unavailable in the
    /// given partition.
    pub fn track_unavailable(
        &mut self,
        callback: UnavailableCallback,
        address: impl Into<String>,
        connectable: bool,
    ) -> UnavailableId {
        let address = address.into();
        let id = self.take_id();
        let callbacks = if connectable {
            &mut self.connectable_unavailable_callbacks
        } else {
            &mut self.unavailable_callbacks
        };
        callbacks
            .entry(address.clone())
            .or_default()
            .push((id, callback));
        UnavailableId {
            id,
            address,
            connectable,
        }
    }

    /// Remove an unavailability callback. Tolerates an already-removed handle.
    pub fn untrack_unavailable(&mut self, id: UnavailableId) {
        let callbacks = if id.connectable {
            &mut self.connectable_unavailable_callbacks
        } else {
            &mut self.unavailable_callbacks
        };
        if let Some(list) = callbacks.get_mut(&id.address) {
            list.retain(|(entry_id, _)| *entry_id != id.id);
            if list.is_empty() {
                callbacks.remove(&id.address);
            }
        }
    }

    /// Register a scanner façade.
    pub fn register_scanner(&mut self, scanner: Arc<dyn Scanner>, connectable: bool) -> ScannerId {
        let id = self.take_id();
        if connectable {
            self.connectable_scanners.push((id, scanner));
        } else {
            self.scanners.push((id, scanner));
        }
        ScannerId(id)
    }

    /// Remove a scanner and drop the tracker state its source contributed.
    pub fn unregister_scanner(&mut self, id: ScannerId) {
        for list in [&mut self.connectable_scanners, &mut self.scanners] {
            if let Some(pos) = list.iter().position(|(entry_id, _)| *entry_id == id.0) {
                let (_, scanner) = list.remove(pos);
                self.tracker.remove_source(scanner.source());
            }
        }
    }

    /// Number of registered scanners.
    ///
    /// With `connectable: false`, scanners of both kinds are counted.
    #[must_use]
    pub fn scanner_count(&self, connectable: bool) -> usize {
        if connectable {
            self.connectable_scanners.len()
        } else {
            self.connectable_scanners.len() + self.scanners.len()
        }
    }

    /// Devices currently visible across scanners, including duplicates.
    ///
    /// Connectable scanners count for both partitions; non-connectable
    /// scanners only contribute to the "all" view.
    #[must_use]
    pub fn all_discovered_devices(&self, connectable: bool) -> Vec<DiscoveredDevice> {
        let mut devices: Vec<DiscoveredDevice> = self
            .connectable_scanners
            .iter()
            .flat_map(|(_, scanner)| scanner.discovered_devices())
            .collect();
        if !connectable {
            devices.extend(
                self.scanners
                    .iter()
                    .flat_map(|(_, scanner)| scanner.discovered_devices()),
            );
        }
        devices
    }

    /// Sweep for unavailable devices and clean up state history.
    ///
    /// Ground truth is re-derived from the scanners' live device sets, not
    /// from the history maps. Non-connectable addresses get a grace period of
    /// their learned advertising interval, since a sleeping device can only
    /// be judged by the absence of advertisements.
    pub fn check_unavailable(&mut self, now: Instant) {
        let mut removed_addresses: HashSet<String> = HashSet::new();

        for connectable in [true, false] {
            let live_addresses: HashSet<String> = self
                .all_discovered_devices(connectable)
                .into_iter()
                .map(|device| device.address)
                .collect();

            let Self {
                history,
                connectable_history,
                tracker,
                unavailable_callbacks,
                connectable_unavailable_callbacks,
                ..
            } = self;
            let history = if connectable {
                connectable_history
            } else {
                history
            };
            let callbacks = if connectable {
                connectable_unavailable_callbacks
            } else {
                unavailable_callbacks
            };

            let disappeared: Vec<String> = history
                .keys()
                .filter(|address| !live_addresses.contains(*address))
                .cloned()
                .collect();
            for address in disappeared {
                if !connectable
                    && let Some(advertising_interval) = tracker.interval(&address)
                    && let Some(last) = history.get(&address)
                    && now.saturating_duration_since(last.time) <= advertising_interval
                {
                    // Possibly just sleeping between advertisements.
                    continue;
                }
                let Some(sighting) = history.remove(&address) else {
                    continue;
                };
                debug!(
                    "{} is no longer available (connectable: {})",
                    address, connectable
                );
                removed_addresses.insert(address.clone());
                if let Some(list) = callbacks.get_mut(&address) {
                    for (_, callback) in list.iter_mut() {
                        if let Err(err) = callback(&sighting) {
                            warn!("Error in unavailable callback: {err}");
                        }
                    }
                }
            }
        }

        // Tracker entries are only useful while the address is in at least
        // one partition.
        for address in removed_addresses {
            if !self.history.contains_key(&address)
                && !self.connectable_history.contains_key(&address)
            {
                self.tracker.remove_address(&address);
            }
        }
    }

    /// All sightings in the given history partition.
    pub fn discovered_service_info(&self, connectable: bool) -> impl Iterator<Item = &Sighting> {
        self.history_for(connectable).values()
    }

    /// Last authoritative sighting for an address, if present.
    #[must_use]
    pub fn last_service_info(&self, address: &str, connectable: bool) -> Option<&Sighting> {
        self.history_for(connectable).get(address)
    }

    /// Whether an address is currently present in a partition.
    #[must_use]
    pub fn address_present(&self, address: &str, connectable: bool) -> bool {
        self.history_for(connectable).contains_key(address)
    }

    /// Device view of an address's history entry, if present.
    #[must_use]
    pub fn device_from_address(&self, address: &str, connectable: bool) -> Option<DiscoveredDevice> {
        self.history_for(connectable)
            .get(address)
            .map(|sighting| DiscoveredDevice {
                address: sighting.address.clone(),
                name: sighting.name().map(str::to_string),
                rssi: sighting.rssi,
            })
    }

    /// Forget that an address was already matched so the next sighting
    /// re-triggers discovery.
    pub fn rediscover_address(&mut self, address: &str) {
        self.integration_matcher.clear_address(address);
    }

    fn history_for(&self, connectable: bool) -> &HashMap<String, Sighting> {
        if connectable {
            &self.connectable_history
        } else {
            &self.history
        }
    }

    fn take_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Whether to keep the previous sighting from a different source.
    fn prefer_previous(&self, old: &Sighting, new: &Sighting) -> bool {
        let stale_interval = self
            .tracker
            .interval(&new.address)
            .unwrap_or(self.config.fallback_stale_interval);
        if new.time.saturating_duration_since(old.time) > stale_interval {
            // Stale data never wins: any new advertisement is preferred.
            debug!(
                "{}: switching from {} to {} (previous reading older than {:?})",
                new.address, old.source, new.source, stale_interval
            );
            return false;
        }
        if new.rssi_or_default() - self.config.rssi_switch_threshold > old.rssi_or_default() {
            debug!(
                "{}: switching from {} to {} (rssi {:?} decisively above {:?})",
                new.address, old.source, new.source, new.rssi, old.rssi
            );
            return false;
        }
        true
    }

    fn is_apple_noise(sighting: &Sighting) -> bool {
        sighting.manufacturer_data.len() == 1
            && sighting.service_data.is_empty()
            && sighting
                .manufacturer_data
                .get(&APPLE_MFR_ID)
                .is_some_and(|data| {
                    data.first()
                        .is_none_or(|byte| !APPLE_START_BYTES_WANTED.contains(byte))
                })
    }
}

/// Drive the unavailability sweep on a fixed interval.
///
/// Spawns a task that calls [`BluetoothManager::check_unavailable`] every
/// [`UNAVAILABLE_TRACK_INTERVAL`] until the cancellation token fires.
///
/// # Example
///
/// ```ignore
/// use tokio_util::sync::CancellationToken;
///
/// let manager = Arc::new(Mutex::new(manager));
/// let cancel = CancellationToken::new();
/// let handle = start_unavailable_tracking(Arc::clone(&manager), cancel.clone());
///
/// // Later, at shutdown:
/// cancel.cancel();
/// handle.await.unwrap();
/// ```
pub fn start_unavailable_tracking(
    manager: Arc<Mutex<BluetoothManager>>,
    cancel_token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut sweep_interval = interval(UNAVAILABLE_TRACK_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    debug!("Unavailable tracking cancelled, shutting down");
                    break;
                }
                _ = sweep_interval.tick() => {
                    manager.lock().await.check_unavailable(Instant::now());
                }
            }
        }
    })
}
