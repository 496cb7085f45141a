//! Error types for blefusion-core.
//!
//! The fusion engine is a pure in-memory layer, so its own error surface is
//! small: the only fallible operation is callback registration with an
//! over-broad local-name glob. Subscriber callbacks report their failures as
//! boxed errors which the manager logs and swallows at the dispatch site;
//! they never become an [`Error`] of this crate.

use thiserror::Error;

/// Errors produced by the fusion engine.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error types
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A runtime callback was registered with a local-name glob whose fixed
    /// prefix is too short to be a useful filter.
    #[error(
        "local name pattern \"{pattern}\" is too broad: at least {min_length} \
         non-wildcard leading characters are required"
    )]
    PatternTooBroad {
        /// The rejected pattern.
        pattern: String,
        /// Minimum required fixed-prefix length.
        min_length: usize,
    },
}

/// Result type alias for blefusion-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type subscriber callbacks may return.
///
/// Callback failures are isolated per delivery: the manager logs them and
/// continues with the remaining subscribers.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Result type subscriber callbacks return.
pub type CallbackResult = std::result::Result<(), CallbackError>;
