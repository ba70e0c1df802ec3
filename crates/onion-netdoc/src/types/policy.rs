//! Exit policies: deciding which destinations a relay will connect to.
//!
//! A relay's exit policy has two parts:
//!
//!  * An ordered list of [`ExitRule`]s, each of which says to accept or
//!    reject connections to some set of addresses on some set of ports.
//!    These are evaluated for IPv4 destinations.
//!
//!  * A [`PortPolicy`], which says which ports the relay will connect to
//!    on IPv6.
//!
//! The two parts are combined in an [`ExitPolicy`], whose
//! [`decide`](ExitPolicy::decide) method is the exit decision engine.
//!
//! Every pattern type in this module is checked when it is constructed, so
//! deciding on a destination can never fail.

mod addrpolicy;
mod exitpolicy;
mod portpolicy;

pub use addrpolicy::{matches_address, AddrSpec, AddrSpecKind, ExitRule, RuleKind};
pub use exitpolicy::{decide, ExitPolicy};
pub use portpolicy::PortPolicy;

use std::fmt::Display;
use std::str::FromStr;
use thiserror::Error;

/// Error from an unparsable or invalid policy.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PolicyError {
    /// A port was not a number in the range 0..65535.
    #[error("Invalid port")]
    InvalidPort,
    /// A port range had its starting-point higher than its ending point.
    #[error("Invalid port range")]
    InvalidRange,
    /// An address could not be interpreted.
    #[error("Invalid address")]
    InvalidAddress,
    /// Tried to use a bitmask with the address "*".
    #[error("mask with star")]
    MaskWithStar,
    /// A bit mask was out of range, or a netmask was unparsable.
    #[error("invalid mask")]
    InvalidMask,
    /// A rule or port policy had a bad keyword, or was otherwise unparsable.
    #[error("Invalid policy")]
    InvalidPolicy,
}

/// Broad classification of a [`PolicyError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
#[non_exhaustive]
pub enum PolicyErrorKind {
    /// Malformed address text, or an out-of-range prefix or mask.
    #[display("invalid address specification")]
    InvalidAddressSpec,
    /// A port outside 0..65535, or a range whose low end exceeds its high end.
    #[display("invalid port specification")]
    InvalidPortSpec,
    /// A rule whose overall shape was wrong.
    #[display("invalid rule")]
    InvalidRule,
}

impl PolicyError {
    /// Return the broad category of this error.
    pub fn kind(&self) -> PolicyErrorKind {
        use PolicyError as E;
        use PolicyErrorKind as K;
        match self {
            E::InvalidAddress | E::MaskWithStar | E::InvalidMask => K::InvalidAddressSpec,
            E::InvalidPort | E::InvalidRange => K::InvalidPortSpec,
            E::InvalidPolicy => K::InvalidRule,
        }
    }
}

/// A pattern matching zero or more TCP ports.
///
/// A `PortSpec` is either every port (`*`), a single port (`80`), or an
/// inclusive range (`8000-8999`).  Ranges are checked on construction, so
/// the low end is never above the high end.
///
/// A range whose ends are equal matches exactly like a single port, but it
/// is kept in the shape it was written in, so that rules print the same way
/// they were given.
///
/// # Examples
/// ```
/// use onion_netdoc::types::policy::PortSpec;
/// let web: PortSpec = "80-443".parse().unwrap();
/// assert!(web.matches(80));
/// assert!(web.matches(443));
/// assert!(! web.matches(8080));
/// assert!("443-80".parse::<PortSpec>().is_err());
/// ```
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    serde_with::DeserializeFromStr,
    serde_with::SerializeDisplay,
)]
pub struct PortSpec(PortSpecInner);

/// Implementation type for `PortSpec`.
///
/// (This is a separate type so that we can enforce well-formedness.)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum PortSpecInner {
    /// Match all ports.
    All,
    /// Match a single port.
    Single(u16),
    /// Match an inclusive range of ports.  Always `lo <= hi`.
    Range(u16, u16),
}

impl PortSpec {
    /// Return a pattern matching every port.
    pub fn all() -> Self {
        PortSpec(PortSpecInner::All)
    }

    /// Return a pattern matching only `port`.
    pub fn single(port: u16) -> Self {
        PortSpec(PortSpecInner::Single(port))
    }

    /// Return a pattern matching every port from `lo` through `hi`
    /// inclusive.
    ///
    /// Gives an error if `lo > hi`.
    pub fn range(lo: u16, hi: u16) -> Result<Self, PolicyError> {
        if lo <= hi {
            Ok(PortSpec(PortSpecInner::Range(lo, hi)))
        } else {
            Err(PolicyError::InvalidRange)
        }
    }

    /// Return true iff `port` is included in this pattern.
    pub fn matches(&self, port: u16) -> bool {
        let (lo, hi) = self.bounds();
        lo <= port && port <= hi
    }

    /// Return the lowest and highest ports (inclusive) matched by this
    /// pattern.
    pub fn bounds(&self) -> (u16, u16) {
        match self.0 {
            PortSpecInner::All => (0, u16::MAX),
            PortSpecInner::Single(p) => (p, p),
            PortSpecInner::Range(lo, hi) => (lo, hi),
        }
    }

    /// Return true if this pattern matches every port.
    pub fn is_all(&self) -> bool {
        self.bounds() == (0, u16::MAX)
    }
}

/// Return true iff `port` is included in `spec`.
pub fn matches_port(spec: &PortSpec, port: u16) -> bool {
    spec.matches(port)
}

impl Display for PortSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            PortSpecInner::All => write!(f, "*"),
            PortSpecInner::Single(p) => write!(f, "{}", p),
            PortSpecInner::Range(lo, hi) => write!(f, "{}-{}", lo, hi),
        }
    }
}

impl FromStr for PortSpec {
    type Err = PolicyError;
    fn from_str(s: &str) -> Result<Self, PolicyError> {
        /// Parse a single port number.
        fn port(s: &str) -> Result<u16, PolicyError> {
            s.parse().map_err(|_| PolicyError::InvalidPort)
        }
        if s == "*" {
            Ok(PortSpec::all())
        } else if let Some((lo, hi)) = s.split_once('-') {
            PortSpec::range(port(lo)?, port(hi)?)
        } else {
            Ok(PortSpec::single(port(s)?))
        }
    }
}

#[cfg(test)]
mod test {
    // @@ begin test lint list maintained by maint/add_warning @@
    #![allow(clippy::bool_assert_comparison)]
    #![allow(clippy::clone_on_copy)]
    #![allow(clippy::dbg_macro)]
    #![allow(clippy::mixed_attributes_style)]
    #![allow(clippy::print_stderr)]
    #![allow(clippy::print_stdout)]
    #![allow(clippy::single_char_pattern)]
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::unchecked_duration_subtraction)]
    #![allow(clippy::useless_vec)]
    #![allow(clippy::needless_pass_by_value)]
    //! <!-- @@ end test lint list maintained by maint/add_warning @@ -->
    use super::*;

    #[test]
    fn port_spec_ok() {
        use PortSpecInner as I;
        assert_eq!("*".parse::<PortSpec>().unwrap(), PortSpec(I::All));
        assert_eq!("0".parse::<PortSpec>().unwrap(), PortSpec(I::Single(0)));
        assert_eq!("80".parse::<PortSpec>().unwrap(), PortSpec(I::Single(80)));
        assert_eq!(
            "100-200".parse::<PortSpec>().unwrap(),
            PortSpec(I::Range(100, 200))
        );
        assert_eq!(
            "65535-65535".parse::<PortSpec>().unwrap(),
            PortSpec(I::Range(65535, 65535))
        );
    }

    #[test]
    fn port_spec_display() {
        for s in ["*", "0", "22", "100-200", "7-7", "0-65535"] {
            assert_eq!(s.parse::<PortSpec>().unwrap().to_string(), s);
        }
    }

    #[test]
    fn port_spec_err() {
        use PolicyError as PE;
        assert_eq!(PortSpec::range(100, 50), Err(PE::InvalidRange));
        assert_eq!("100-50".parse::<PortSpec>(), Err(PE::InvalidRange));
        assert_eq!("65536".parse::<PortSpec>(), Err(PE::InvalidPort));
        assert_eq!("1-70000".parse::<PortSpec>(), Err(PE::InvalidPort));
        assert_eq!("fred".parse::<PortSpec>(), Err(PE::InvalidPort));
        assert_eq!("".parse::<PortSpec>(), Err(PE::InvalidPort));
        assert_eq!("-5".parse::<PortSpec>(), Err(PE::InvalidPort));
        assert_eq!("**".parse::<PortSpec>(), Err(PE::InvalidPort));

        assert_eq!(PE::InvalidRange.kind(), PolicyErrorKind::InvalidPortSpec);
        assert_eq!(PE::InvalidMask.kind(), PolicyErrorKind::InvalidAddressSpec);
    }

    #[test]
    fn range_matches_exactly_its_bounds() {
        let cases = [(0, 0), (1, 1), (22, 80), (443, 443), (1000, 65535)];
        for (lo, hi) in cases {
            let r = PortSpec::range(lo, hi).unwrap();
            for x in 0..=u16::MAX {
                assert_eq!(r.matches(x), lo <= x && x <= hi, "{}-{} vs {}", lo, hi, x);
            }
        }
    }

    #[test]
    fn degenerate_range_is_single() {
        for p in [0, 1, 80, 8080, 65535] {
            let range = PortSpec::range(p, p).unwrap();
            let single = PortSpec::single(p);
            for x in 0..=u16::MAX {
                assert_eq!(range.matches(x), single.matches(x));
            }
            assert_eq!(range.bounds(), single.bounds());
        }
    }

    #[test]
    fn all_ports() {
        let all = PortSpec::all();
        assert!(all.is_all());
        assert!(PortSpec::range(0, 65535).unwrap().is_all());
        assert!(!PortSpec::range(1, 65535).unwrap().is_all());
        assert!(all.matches(0));
        assert!(all.matches(65535));
        assert!(matches_port(&all, 9374));
    }
}
