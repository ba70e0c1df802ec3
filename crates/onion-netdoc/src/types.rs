//! Various types that can occur in router descriptors and relay
//! configuration.
//!
//! NOTE: The policy types may eventually move into their own crate.

pub(crate) mod misc;
pub mod policy;

pub use misc::{BandwidthHistory, Fingerprint, Nickname};
