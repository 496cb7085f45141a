//! Shared types for the blefusion advertisement fusion engine.
//!
//! This crate holds the plain data types exchanged between scanner façades,
//! the fusion manager, and downstream subscribers:
//!
//! - [`Sighting`] — one decoded BLE advertisement observation from one
//!   scanner at one point in time.
//! - [`MatcherCriteria`] / [`DiscoveryRule`] — optional-field constraints
//!   used to decide whether a sighting is interesting to a consumer or an
//!   integration domain.
//!
//! Nothing in this crate talks to a radio; these are value types only.
//!
//! # Feature flags
//!
//! - `serde` (default): `Serialize`/`Deserialize` on criteria and rule types
//!   so static rule sets can be loaded from generated manifests.

pub mod criteria;
pub mod sighting;

pub use criteria::{DiscoveryRule, MatcherCriteria};
pub use sighting::{NO_RSSI_VALUE, Sighting, SightingChange};
