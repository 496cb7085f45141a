//! Matcher criteria and static discovery rules.

use uuid::Uuid;

use crate::sighting::Sighting;

/// Optional-field constraints against a [`Sighting`].
///
/// All populated fields must match for the criteria to match (logical AND);
/// absent fields are wildcards. An empty criteria value therefore matches
/// every connectable sighting, because [`MatcherCriteria::require_connectable`]
/// defaults to `true` when `connectable` is unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MatcherCriteria {
    /// Exact device address.
    pub address: Option<String>,
    /// Required connectability. Unset means "connectable required"; an
    /// explicit `false` accepts both connectable and non-connectable
    /// sightings.
    pub connectable: Option<bool>,
    /// Service UUID that must be advertised.
    pub service_uuid: Option<Uuid>,
    /// Service UUID that must be present as a service-data key.
    pub service_data_uuid: Option<Uuid>,
    /// Company identifier that must be present in manufacturer data.
    pub manufacturer_id: Option<u16>,
    /// Byte prefix that some manufacturer-data payload must start with.
    pub manufacturer_data_start: Option<Vec<u8>>,
    /// Shell-style glob (`*`, `?`, `[seq]`) matched against the device name.
    pub local_name: Option<String>,
}

impl MatcherCriteria {
    /// Create empty criteria (matches any connectable sighting).
    pub fn new() -> Self {
        Self::default()
    }

    /// Require an exact address.
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Set the connectability requirement explicitly.
    pub fn connectable(mut self, connectable: bool) -> Self {
        self.connectable = Some(connectable);
        self
    }

    /// Require an advertised service UUID.
    pub fn service_uuid(mut self, uuid: Uuid) -> Self {
        self.service_uuid = Some(uuid);
        self
    }

    /// Require a service-data UUID.
    pub fn service_data_uuid(mut self, uuid: Uuid) -> Self {
        self.service_data_uuid = Some(uuid);
        self
    }

    /// Require a manufacturer id.
    pub fn manufacturer_id(mut self, id: u16) -> Self {
        self.manufacturer_id = Some(id);
        self
    }

    /// Require a manufacturer-data byte prefix.
    pub fn manufacturer_data_start(mut self, prefix: impl Into<Vec<u8>>) -> Self {
        self.manufacturer_data_start = Some(prefix.into());
        self
    }

    /// Require a local-name glob match.
    pub fn local_name(mut self, pattern: impl Into<String>) -> Self {
        self.local_name = Some(pattern.into());
        self
    }

    /// Effective connectability requirement (`true` when unspecified).
    #[must_use]
    pub fn require_connectable(&self) -> bool {
        self.connectable.unwrap_or(true)
    }

    /// Whether the sighting's connectability satisfies this criteria.
    ///
    /// A criteria requiring connectable rejects non-connectable sightings; a
    /// criteria with `connectable: Some(false)` accepts either.
    #[must_use]
    pub fn accepts_connectable(&self, sighting: &Sighting) -> bool {
        !self.require_connectable() || sighting.connectable
    }
}

/// A static discovery rule owned by an integration domain.
///
/// When a sighting matches the rule's criteria, the owning domain is offered
/// a discovery flow for that device.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiscoveryRule {
    /// Integration domain to notify on a match.
    pub domain: String,
    /// Criteria the sighting must satisfy.
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub criteria: MatcherCriteria,
}

impl DiscoveryRule {
    /// Create a rule for a domain.
    pub fn new(domain: impl Into<String>, criteria: MatcherCriteria) -> Self {
        Self {
            domain: domain.into(),
            criteria,
        }
    }
}
