//! Rule matching for discovery and structural callbacks.
//!
//! Two consumers share the matching predicate: the [`IntegrationMatcher`],
//! which decides per sighting which integration domains get a discovery flow,
//! and the manager's structural callback subscriptions. The integration
//! matcher additionally memoizes which advertisement field categories it has
//! already seen per address, so a device whose rules are fully satisfied is
//! never rematched until it shows a previously-unseen field category.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use blefusion_types::{DiscoveryRule, MatcherCriteria, Sighting};

use crate::lru::LruCache;
use crate::pattern::PatternCache;

/// Addresses remembered per partition before least-recently-matched entries
/// are evicted. Bounds memory under randomized-address churn.
const MAX_REMEMBER_ADDRESSES: usize = 2048;

/// Whether a sighting satisfies every populated field of a criteria value.
///
/// Pure predicate: absent fields are wildcards, populated fields must all
/// match. A `manufacturer_data_start` prefix longer than every advertised
/// payload is simply no match, never an error.
pub fn sighting_matches(
    criteria: &MatcherCriteria,
    sighting: &Sighting,
    patterns: &mut PatternCache,
) -> bool {
    if !criteria.accepts_connectable(sighting) {
        return false;
    }
    if let Some(address) = &criteria.address
        && *address != sighting.address
    {
        return false;
    }
    if let Some(uuid) = &criteria.service_uuid
        && !sighting.service_uuids.contains(uuid)
    {
        return false;
    }
    if let Some(uuid) = &criteria.service_data_uuid
        && !sighting.service_data.contains_key(uuid)
    {
        return false;
    }
    if let Some(id) = criteria.manufacturer_id
        && !sighting.manufacturer_data.contains_key(&id)
    {
        return false;
    }
    if let Some(prefix) = &criteria.manufacturer_data_start
        && !sighting
            .manufacturer_data
            .values()
            .any(|data| data.starts_with(prefix))
    {
        return false;
    }
    if let Some(pattern) = &criteria.local_name {
        let Some(name) = sighting.name() else {
            return false;
        };
        if !patterns.matches(name, pattern) {
            return false;
        }
    }
    true
}

/// Cumulative union of field categories ever observed for an address.
#[derive(Debug, Default)]
struct MatchHistory {
    manufacturer_data: bool,
    service_data_uuids: HashSet<Uuid>,
    service_uuids: HashSet<Uuid>,
}

impl MatchHistory {
    fn of(sighting: &Sighting) -> Self {
        let mut history = Self::default();
        history.absorb(sighting);
        history
    }

    fn absorb(&mut self, sighting: &Sighting) {
        self.manufacturer_data |= !sighting.manufacturer_data.is_empty();
        self.service_data_uuids
            .extend(sighting.service_data.keys().copied());
        self.service_uuids
            .extend(sighting.service_uuids.iter().copied());
    }

    /// Whether the sighting carries no field category beyond what was already
    /// recorded. When true, re-running the rules cannot change the outcome.
    fn seen_all_fields(&self, sighting: &Sighting) -> bool {
        if !sighting.manufacturer_data.is_empty() && !self.manufacturer_data {
            return false;
        }
        if !sighting.service_data.is_empty()
            && !sighting
                .service_data
                .keys()
                .all(|uuid| self.service_data_uuids.contains(uuid))
        {
            return false;
        }
        if !sighting.service_uuids.is_empty()
            && !sighting.service_uuids.is_subset(&self.service_uuids)
        {
            return false;
        }
        true
    }
}

/// Matches sightings against the static discovery rule set.
///
/// Suppresses repeat notifications: once a domain's rule has matched an
/// address and no new field category has appeared since, subsequent sightings
/// return an empty set without re-evaluating any rule. Only addresses that
/// matched at least one rule consume memo capacity, so devices nothing is
/// interested in are never tracked here.
#[derive(Debug)]
pub struct IntegrationMatcher {
    rules: Vec<DiscoveryRule>,
    matched: LruCache<String, MatchHistory>,
    matched_connectable: LruCache<String, MatchHistory>,
}

impl IntegrationMatcher {
    /// Create a matcher over a static rule set.
    ///
    /// Rule-set local-name globs are intentionally not length-validated;
    /// the minimum-prefix rule applies only to runtime callbacks.
    pub fn new(rules: Vec<DiscoveryRule>) -> Self {
        Self {
            rules,
            matched: LruCache::new(MAX_REMEMBER_ADDRESSES),
            matched_connectable: LruCache::new(MAX_REMEMBER_ADDRESSES),
        }
    }

    /// Domains whose rules match this sighting, minus already-satisfied ones.
    pub fn match_domains(
        &mut self,
        sighting: &Sighting,
        patterns: &mut PatternCache,
    ) -> HashSet<String> {
        let memo = if sighting.connectable {
            &mut self.matched_connectable
        } else {
            &mut self.matched
        };
        if let Some(previous) = memo.get_mut(&sighting.address)
            && previous.seen_all_fields(sighting)
        {
            return HashSet::new();
        }

        let domains: HashSet<String> = self
            .rules
            .iter()
            .filter(|rule| sighting_matches(&rule.criteria, sighting, patterns))
            .map(|rule| rule.domain.clone())
            .collect();
        if domains.is_empty() {
            // No rule cared; do not spend memo capacity on this address.
            return domains;
        }

        let memo = if sighting.connectable {
            &mut self.matched_connectable
        } else {
            &mut self.matched
        };
        if let Some(previous) = memo.get_mut(&sighting.address) {
            previous.absorb(sighting);
        } else {
            memo.insert(sighting.address.clone(), MatchHistory::of(sighting));
        }
        domains
    }

    /// Forget everything seen for an address, in both partitions.
    ///
    /// The next sighting from the address re-evaluates the full rule set.
    pub fn clear_address(&mut self, address: &str) {
        self.matched.remove(&address.to_string());
        self.matched_connectable.remove(&address.to_string());
    }

    /// Number of addresses currently memoized in one partition.
    #[must_use]
    pub fn remembered_addresses(&self, connectable: bool) -> usize {
        if connectable {
            self.matched_connectable.len()
        } else {
            self.matched.len()
        }
    }
}

/// Index of structural callback criteria for fast per-sighting lookup.
///
/// Each registration lands in exactly one bucket, chosen by its most
/// selective populated field; criteria with none of the indexable fields go
/// to a linear catch-all. Candidates still run through the full predicate,
/// the index only prunes the candidate set.
#[derive(Debug, Default)]
pub(crate) struct CallbackMatcherIndex {
    address: HashMap<String, Vec<u64>>,
    service_uuid: HashMap<Uuid, Vec<u64>>,
    service_data_uuid: HashMap<Uuid, Vec<u64>>,
    manufacturer_id: HashMap<u16, Vec<u64>>,
    others: Vec<u64>,
}

impl CallbackMatcherIndex {
    pub(crate) fn add(&mut self, id: u64, criteria: &MatcherCriteria) {
        if let Some(address) = &criteria.address {
            self.address.entry(address.clone()).or_default().push(id);
        } else if let Some(uuid) = criteria.service_uuid {
            self.service_uuid.entry(uuid).or_default().push(id);
        } else if let Some(uuid) = criteria.service_data_uuid {
            self.service_data_uuid.entry(uuid).or_default().push(id);
        } else if let Some(mfr_id) = criteria.manufacturer_id {
            self.manufacturer_id.entry(mfr_id).or_default().push(id);
        } else {
            self.others.push(id);
        }
    }

    pub(crate) fn remove(&mut self, id: u64, criteria: &MatcherCriteria) {
        if let Some(address) = &criteria.address {
            if let Some(bucket) = self.address.get_mut(address) {
                bucket.retain(|entry| *entry != id);
                if bucket.is_empty() {
                    self.address.remove(address);
                }
            }
        } else if let Some(uuid) = criteria.service_uuid {
            if let Some(bucket) = self.service_uuid.get_mut(&uuid) {
                bucket.retain(|entry| *entry != id);
                if bucket.is_empty() {
                    self.service_uuid.remove(&uuid);
                }
            }
        } else if let Some(uuid) = criteria.service_data_uuid {
            if let Some(bucket) = self.service_data_uuid.get_mut(&uuid) {
                bucket.retain(|entry| *entry != id);
                if bucket.is_empty() {
                    self.service_data_uuid.remove(&uuid);
                }
            }
        } else if let Some(mfr_id) = criteria.manufacturer_id {
            if let Some(bucket) = self.manufacturer_id.get_mut(&mfr_id) {
                bucket.retain(|entry| *entry != id);
                if bucket.is_empty() {
                    self.manufacturer_id.remove(&mfr_id);
                }
            }
        } else {
            self.others.retain(|entry| *entry != id);
        }
    }

    /// Registration ids whose bucket key appears in this sighting.
    pub(crate) fn candidates(&self, sighting: &Sighting) -> Vec<u64> {
        let mut ids = Vec::new();
        if let Some(bucket) = self.address.get(&sighting.address) {
            ids.extend_from_slice(bucket);
        }
        for uuid in &sighting.service_uuids {
            if let Some(bucket) = self.service_uuid.get(uuid) {
                ids.extend_from_slice(bucket);
            }
        }
        for uuid in sighting.service_data.keys() {
            if let Some(bucket) = self.service_data_uuid.get(uuid) {
                ids.extend_from_slice(bucket);
            }
        }
        for mfr_id in sighting.manufacturer_data.keys() {
            if let Some(bucket) = self.manufacturer_id.get(mfr_id) {
                ids.extend_from_slice(bucket);
            }
        }
        ids.extend_from_slice(&self.others);
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    const SWITCHBOT_UUID: &str = "cba20d00-224d-11e6-9fb8-0002a5d5c51b";

    fn uuid(text: &str) -> Uuid {
        Uuid::parse_str(text).unwrap()
    }

    fn sighting(address: &str, connectable: bool) -> Sighting {
        Sighting::new(address, "hci0", connectable, Instant::now())
    }

    #[test]
    fn test_predicate_address_and_connectable() {
        let mut patterns = PatternCache::new();
        let s = sighting("aa:bb", true);
        assert!(sighting_matches(
            &MatcherCriteria::new().address("aa:bb"),
            &s,
            &mut patterns
        ));
        assert!(!sighting_matches(
            &MatcherCriteria::new().address("cc:dd"),
            &s,
            &mut patterns
        ));

        let non_connectable = sighting("aa:bb", false);
        // Default criteria require a connectable sighting.
        assert!(!sighting_matches(
            &MatcherCriteria::new(),
            &non_connectable,
            &mut patterns
        ));
        // connectable=false accepts either.
        assert!(sighting_matches(
            &MatcherCriteria::new().connectable(false),
            &non_connectable,
            &mut patterns
        ));
        assert!(sighting_matches(
            &MatcherCriteria::new().connectable(false),
            &s,
            &mut patterns
        ));
    }

    #[test]
    fn test_predicate_uuid_and_manufacturer_fields() {
        let mut patterns = PatternCache::new();
        let mut s = sighting("aa:bb", true);
        s.service_uuids.insert(uuid(SWITCHBOT_UUID));
        s.service_data
            .insert(uuid("0000fd3d-0000-1000-8000-00805f9b34fb"), vec![0x48]);
        s.manufacturer_data.insert(76, vec![0x02, 0x15, 0xAA]);

        assert!(sighting_matches(
            &MatcherCriteria::new().service_uuid(uuid(SWITCHBOT_UUID)),
            &s,
            &mut patterns
        ));
        assert!(sighting_matches(
            &MatcherCriteria::new()
                .service_data_uuid(uuid("0000fd3d-0000-1000-8000-00805f9b34fb")),
            &s,
            &mut patterns
        ));
        assert!(sighting_matches(
            &MatcherCriteria::new()
                .manufacturer_id(76)
                .manufacturer_data_start(vec![0x02, 0x15]),
            &s,
            &mut patterns
        ));
        assert!(!sighting_matches(
            &MatcherCriteria::new().manufacturer_id(117),
            &s,
            &mut patterns
        ));
        assert!(!sighting_matches(
            &MatcherCriteria::new().manufacturer_data_start(vec![0xFF]),
            &s,
            &mut patterns
        ));
    }

    #[test]
    fn test_predicate_overlong_prefix_is_no_match() {
        let mut patterns = PatternCache::new();
        let mut s = sighting("aa:bb", true);
        s.manufacturer_data.insert(21, vec![0x01]);
        // Prefix longer than every advertised payload: clean no-match.
        assert!(!sighting_matches(
            &MatcherCriteria::new().manufacturer_data_start(vec![0x01, 0x02, 0x03]),
            &s,
            &mut patterns
        ));
    }

    #[test]
    fn test_predicate_local_name_requires_a_name() {
        let mut patterns = PatternCache::new();
        let criteria = MatcherCriteria::new().local_name("Thermo*");
        let mut s = sighting("aa:bb", true);
        assert!(!sighting_matches(&criteria, &s, &mut patterns));
        s.device_name = Some("ThermoBeacon 12345".to_string());
        assert!(sighting_matches(&criteria, &s, &mut patterns));
        s.local_name = Some("Other".to_string());
        // Local name takes precedence over the device-reported name.
        assert!(!sighting_matches(&criteria, &s, &mut patterns));
    }

    #[test]
    fn test_match_domains_memoizes_full_matches() {
        let mut patterns = PatternCache::new();
        let rules = vec![DiscoveryRule::new(
            "acme",
            MatcherCriteria::new().manufacturer_id(21),
        )];
        let mut matcher = IntegrationMatcher::new(rules);

        let mut s = sighting("aa:bb", true);
        s.manufacturer_data.insert(21, vec![0x01]);
        let first = matcher.match_domains(&s, &mut patterns);
        assert_eq!(first, HashSet::from(["acme".to_string()]));

        // Same field categories again: suppressed without rule evaluation.
        let repeat = matcher.match_domains(&s, &mut patterns);
        assert!(repeat.is_empty());

        // A new category forces re-evaluation and re-notifies.
        s.service_data
            .insert(uuid("0000fd3d-0000-1000-8000-00805f9b34fb"), vec![0x01]);
        let rematch = matcher.match_domains(&s, &mut patterns);
        assert_eq!(rematch, HashSet::from(["acme".to_string()]));
    }

    #[test]
    fn test_match_domains_ignores_unmatched_addresses() {
        let mut patterns = PatternCache::new();
        let mut matcher = IntegrationMatcher::new(vec![DiscoveryRule::new(
            "acme",
            MatcherCriteria::new().manufacturer_id(21),
        )]);
        let mut s = sighting("aa:bb", true);
        s.manufacturer_data.insert(99, vec![0x01]);
        assert!(matcher.match_domains(&s, &mut patterns).is_empty());
        // Unmatched sightings must not consume memo capacity.
        assert_eq!(matcher.remembered_addresses(true), 0);
    }

    #[test]
    fn test_clear_address_forces_rematch() {
        let mut patterns = PatternCache::new();
        let mut matcher = IntegrationMatcher::new(vec![DiscoveryRule::new(
            "acme",
            MatcherCriteria::new().manufacturer_id(21),
        )]);
        let mut s = sighting("aa:bb", true);
        s.manufacturer_data.insert(21, vec![0x01]);
        assert!(!matcher.match_domains(&s, &mut patterns).is_empty());
        assert!(matcher.match_domains(&s, &mut patterns).is_empty());
        matcher.clear_address("aa:bb");
        assert!(!matcher.match_domains(&s, &mut patterns).is_empty());
    }

    #[test]
    fn test_partitions_are_independent() {
        let mut patterns = PatternCache::new();
        let mut matcher = IntegrationMatcher::new(vec![DiscoveryRule::new(
            "acme",
            MatcherCriteria::new().connectable(false).manufacturer_id(21),
        )]);
        let mut connectable = sighting("aa:bb", true);
        connectable.manufacturer_data.insert(21, vec![0x01]);
        let mut passive = connectable.clone();
        passive.connectable = false;

        assert!(!matcher.match_domains(&connectable, &mut patterns).is_empty());
        // Same address via the other partition still notifies once.
        assert!(!matcher.match_domains(&passive, &mut patterns).is_empty());
        assert!(matcher.match_domains(&passive, &mut patterns).is_empty());
    }

    #[test]
    fn test_index_buckets_and_candidates() {
        let mut index = CallbackMatcherIndex::default();
        index.add(1, &MatcherCriteria::new().address("aa:bb"));
        index.add(2, &MatcherCriteria::new().service_uuid(uuid(SWITCHBOT_UUID)));
        index.add(3, &MatcherCriteria::new().manufacturer_id(76));
        index.add(4, &MatcherCriteria::new().local_name("Thermo*"));

        let mut s = sighting("aa:bb", true);
        s.manufacturer_data.insert(76, vec![0x02]);
        let candidates = index.candidates(&s);
        // Address and manufacturer buckets hit; catch-all always included.
        assert!(candidates.contains(&1));
        assert!(!candidates.contains(&2));
        assert!(candidates.contains(&3));
        assert!(candidates.contains(&4));

        index.remove(1, &MatcherCriteria::new().address("aa:bb"));
        assert!(!index.candidates(&s).contains(&1));
        // Double removal is harmless.
        index.remove(1, &MatcherCriteria::new().address("aa:bb"));
    }
}
