//! Implements address policies, based on a series of accept/reject
//! rules.

use std::fmt::Display;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use super::{PolicyError, PortSpec};

/// What action to take when a rule matches.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[allow(clippy::exhaustive_enums)]
pub enum RuleKind {
    /// The traffic is allowed.
    Accept,
    /// The traffic is rejected.
    Reject,
}

impl RuleKind {
    /// Return true if this is `Accept`.
    pub fn is_accept(self) -> bool {
        self == RuleKind::Accept
    }

    /// Return the keyword used for this kind of rule.
    fn keyword(self) -> &'static str {
        match self {
            RuleKind::Accept => "accept",
            RuleKind::Reject => "reject",
        }
    }
}

impl Display for RuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.keyword())
    }
}

/// A pattern that may or may not match an IP address.
///
/// Addresses are stored in binary form: any textual address is parsed
/// exactly once, when the pattern is constructed.  Prefix lengths are
/// checked against the width of their address family, and out-of-range
/// lengths are rejected rather than clamped.
///
/// An IPv4 pattern never matches an IPv6 address, and vice versa.  Only
/// [`AddrSpec::all`] matches addresses of both families.
///
/// # Examples
/// ```
/// use onion_netdoc::types::policy::AddrSpec;
/// let net: AddrSpec = "192.0.2.0/24".parse().unwrap();
/// assert!(net.matches(&"192.0.2.77".parse().unwrap()));
/// assert!(! net.matches(&"192.0.3.1".parse().unwrap()));
/// assert!(! net.matches(&"::ffff:192.0.2.77".parse().unwrap()));
/// ```
#[derive(
    Clone,
    Debug,
    Eq,
    PartialEq,
    Hash,
    serde_with::DeserializeFromStr,
    serde_with::SerializeDisplay,
)]
pub struct AddrSpec(AddrSpecInner);

/// Implementation type for [`AddrSpec`].
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
enum AddrSpecInner {
    /// Match all addresses, of either family.
    All,
    /// Match exactly one IPv4 address.
    V4(Ipv4Addr),
    /// Match IPv4 addresses that agree with `addr` on every bit set in
    /// `mask`.
    V4Masked(Ipv4Addr, Ipv4Addr),
    /// Match IPv4 addresses that agree with the address on the first
    /// `bits` bits.  `bits` is at most 32.
    V4Bits(Ipv4Addr, u8),
    /// Match exactly one IPv6 address.
    V6(Ipv6Addr),
    /// Match IPv6 addresses that agree with the address on the first
    /// `bits` bits.  `bits` is at most 128.
    V6Bits(Ipv6Addr, u8),
}

/// The shape of an [`AddrSpec`], without its addresses.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[allow(clippy::exhaustive_enums)]
pub enum AddrSpecKind {
    /// Every address.
    All,
    /// One IPv4 address.
    Ipv4,
    /// An IPv4 address with an explicit netmask.
    Ipv4Masked,
    /// An IPv4 network given by prefix length.
    Ipv4Bits,
    /// One IPv6 address.
    Ipv6,
    /// An IPv6 network given by prefix length.
    Ipv6Bits,
}

/// Return a u32 with the high `bits` bits set.  `bits` must be at most 32.
fn v4_prefix_mask(bits: u8) -> u32 {
    u32::MAX.checked_shl(32 - u32::from(bits)).unwrap_or(0)
}

/// Return a u128 with the high `bits` bits set.  `bits` must be at most 128.
fn v6_prefix_mask(bits: u8) -> u128 {
    u128::MAX.checked_shl(128 - u32::from(bits)).unwrap_or(0)
}

impl AddrSpec {
    /// Return a pattern that matches every address.
    pub fn all() -> Self {
        AddrSpec(AddrSpecInner::All)
    }

    /// Return a pattern matching exactly `addr`.
    pub fn ipv4(addr: Ipv4Addr) -> Self {
        AddrSpec(AddrSpecInner::V4(addr))
    }

    /// Return a pattern matching every IPv4 address `a` such that
    /// `a & mask == addr & mask`.
    ///
    /// The mask does not need to be contiguous.
    pub fn ipv4_masked(addr: Ipv4Addr, mask: Ipv4Addr) -> Self {
        AddrSpec(AddrSpecInner::V4Masked(addr, mask))
    }

    /// Return a pattern matching the IPv4 network `addr/bits`.
    ///
    /// Gives an error if `bits` is greater than 32.
    pub fn ipv4_bits(addr: Ipv4Addr, bits: u8) -> Result<Self, PolicyError> {
        if bits > 32 {
            return Err(PolicyError::InvalidMask);
        }
        Ok(AddrSpec(AddrSpecInner::V4Bits(addr, bits)))
    }

    /// Return a pattern matching exactly `addr`.
    pub fn ipv6(addr: Ipv6Addr) -> Self {
        AddrSpec(AddrSpecInner::V6(addr))
    }

    /// Return a pattern matching the IPv6 network `addr/bits`.
    ///
    /// Gives an error if `bits` is greater than 128.
    pub fn ipv6_bits(addr: Ipv6Addr, bits: u8) -> Result<Self, PolicyError> {
        if bits > 128 {
            return Err(PolicyError::InvalidMask);
        }
        Ok(AddrSpec(AddrSpecInner::V6Bits(addr, bits)))
    }

    /// Return the shape of this pattern.
    pub fn kind(&self) -> AddrSpecKind {
        use AddrSpecInner as I;
        use AddrSpecKind as K;
        match self.0 {
            I::All => K::All,
            I::V4(_) => K::Ipv4,
            I::V4Masked(..) => K::Ipv4Masked,
            I::V4Bits(..) => K::Ipv4Bits,
            I::V6(_) => K::Ipv6,
            I::V6Bits(..) => K::Ipv6Bits,
        }
    }

    /// Return true iff this pattern matches every address of at least one
    /// family.
    pub fn is_wildcard(&self) -> bool {
        matches!(
            self.0,
            AddrSpecInner::All | AddrSpecInner::V4Bits(_, 0) | AddrSpecInner::V6Bits(_, 0)
        ) || matches!(self.0, AddrSpecInner::V4Masked(_, m) if m.is_unspecified())
    }

    /// Return this pattern as an IPv4 `(address, mask)` pair: it matches
    /// the IPv4 addresses that agree with `address` on every bit of `mask`.
    ///
    /// Returns None for a pattern that matches no IPv4 address.
    pub(crate) fn ipv4_mask(&self) -> Option<(u32, u32)> {
        let (addr, mask) = match &self.0 {
            AddrSpecInner::All => (0, 0),
            AddrSpecInner::V4(a) => (u32::from(*a), u32::MAX),
            AddrSpecInner::V4Masked(a, m) => (u32::from(*a), u32::from(*m)),
            AddrSpecInner::V4Bits(a, bits) => (u32::from(*a), v4_prefix_mask(*bits)),
            AddrSpecInner::V6(_) | AddrSpecInner::V6Bits(..) => return None,
        };
        Some((addr & mask, mask))
    }

    /// Return true iff `addr` is matched by this pattern.
    pub fn matches(&self, addr: &IpAddr) -> bool {
        match addr {
            IpAddr::V4(a) => self.matches_v4(a),
            IpAddr::V6(a) => self.matches_v6(a),
        }
    }

    /// Return true iff the IPv4 address `addr` is matched by this pattern.
    pub fn matches_v4(&self, addr: &Ipv4Addr) -> bool {
        let candidate = u32::from(*addr);
        match &self.0 {
            AddrSpecInner::All => true,
            AddrSpecInner::V4(a) => a == addr,
            AddrSpecInner::V4Masked(a, mask) => {
                let mask = u32::from(*mask);
                candidate & mask == u32::from(*a) & mask
            }
            AddrSpecInner::V4Bits(a, bits) => {
                let mask = v4_prefix_mask(*bits);
                candidate & mask == u32::from(*a) & mask
            }
            AddrSpecInner::V6(_) | AddrSpecInner::V6Bits(..) => false,
        }
    }

    /// Return true iff the IPv6 address `addr` is matched by this pattern.
    pub fn matches_v6(&self, addr: &Ipv6Addr) -> bool {
        let candidate = u128::from(*addr);
        match &self.0 {
            AddrSpecInner::All => true,
            AddrSpecInner::V6(a) => a == addr,
            AddrSpecInner::V6Bits(a, bits) => {
                let mask = v6_prefix_mask(*bits);
                candidate & mask == u128::from(*a) & mask
            }
            AddrSpecInner::V4(_) | AddrSpecInner::V4Masked(..) | AddrSpecInner::V4Bits(..) => {
                false
            }
        }
    }
}

/// Return true iff `addr` is matched by `spec`.
pub fn matches_address(spec: &AddrSpec, addr: &IpAddr) -> bool {
    spec.matches(addr)
}

impl Display for AddrSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            AddrSpecInner::All => write!(f, "*"),
            AddrSpecInner::V4(a) => write!(f, "{}", a),
            AddrSpecInner::V4Masked(a, mask) => write!(f, "{}/{}", a, mask),
            AddrSpecInner::V4Bits(a, bits) => write!(f, "{}/{}", a, bits),
            AddrSpecInner::V6(a) => write!(f, "[{}]", a),
            AddrSpecInner::V6Bits(a, bits) => write!(f, "[{}]/{}", a, bits),
        }
    }
}

impl FromStr for AddrSpec {
    type Err = PolicyError;
    fn from_str(s: &str) -> Result<Self, PolicyError> {
        let (addr_part, mask_part) = match s.split_once('/') {
            Some((a, m)) => (a, Some(m)),
            None => (s, None),
        };

        if addr_part == "*" {
            return match mask_part {
                Some(_) => Err(PolicyError::MaskWithStar),
                None => Ok(AddrSpec::all()),
            };
        }

        if let Some(bracketed) = addr_part.strip_prefix('[') {
            let inner = bracketed
                .strip_suffix(']')
                .ok_or(PolicyError::InvalidAddress)?;
            let addr: Ipv6Addr = inner.parse().map_err(|_| PolicyError::InvalidAddress)?;
            return match mask_part {
                None => Ok(AddrSpec::ipv6(addr)),
                Some(m) => {
                    let bits: u8 = m.parse().map_err(|_| PolicyError::InvalidMask)?;
                    AddrSpec::ipv6_bits(addr, bits)
                }
            };
        }

        let addr: Ipv4Addr = addr_part
            .parse()
            .map_err(|_| PolicyError::InvalidAddress)?;
        match mask_part {
            None => Ok(AddrSpec::ipv4(addr)),
            Some(m) if m.contains('.') => {
                let mask: Ipv4Addr = m.parse().map_err(|_| PolicyError::InvalidMask)?;
                Ok(AddrSpec::ipv4_masked(addr, mask))
            }
            Some(m) => {
                let bits: u8 = m.parse().map_err(|_| PolicyError::InvalidMask)?;
                AddrSpec::ipv4_bits(addr, bits)
            }
        }
    }
}

/// A single rule in an exit policy: an action, and the addresses and
/// ports that it applies to.
///
/// Rules are written as `accept ADDR:PORTS` or `reject ADDR:PORTS`, for
/// example `reject 10.0.0.0/8:*` or `accept [2001:db8::]/32:443`.
///
/// # Examples
/// ```
/// use onion_netdoc::types::policy::{ExitRule, RuleKind};
/// let rule: ExitRule = "reject 127.0.0.0/8:*".parse().unwrap();
/// assert_eq!(rule.kind(), RuleKind::Reject);
/// assert!(rule.matches(&"127.0.0.1".parse().unwrap(), 22));
/// assert_eq!(rule.to_string(), "reject 127.0.0.0/8:*");
/// ```
#[derive(
    Clone,
    Debug,
    Eq,
    PartialEq,
    Hash,
    serde_with::DeserializeFromStr,
    serde_with::SerializeDisplay,
)]
pub struct ExitRule {
    /// What do we do with traffic that matches this rule?
    kind: RuleKind,
    /// Which addresses does this rule cover?
    addr: AddrSpec,
    /// Which ports does this rule cover?
    ports: PortSpec,
}

impl ExitRule {
    /// Construct a new rule.
    pub fn new(kind: RuleKind, addr: AddrSpec, ports: PortSpec) -> Self {
        ExitRule { kind, addr, ports }
    }

    /// Construct a rule accepting traffic to `addr` on `ports`.
    pub fn accept(addr: AddrSpec, ports: PortSpec) -> Self {
        Self::new(RuleKind::Accept, addr, ports)
    }

    /// Construct a rule rejecting traffic to `addr` on `ports`.
    pub fn reject(addr: AddrSpec, ports: PortSpec) -> Self {
        Self::new(RuleKind::Reject, addr, ports)
    }

    /// Return the action this rule takes when it matches.
    pub fn kind(&self) -> RuleKind {
        self.kind
    }

    /// Return the address pattern of this rule.
    pub fn addr(&self) -> &AddrSpec {
        &self.addr
    }

    /// Return the port pattern of this rule.
    pub fn ports(&self) -> &PortSpec {
        &self.ports
    }

    /// Return true iff both the address and the port patterns of this rule
    /// match.
    pub fn matches(&self, addr: &IpAddr, port: u16) -> bool {
        self.addr.matches(addr) && self.ports.matches(port)
    }
}

impl Display for ExitRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}:{}", self.kind, self.addr, self.ports)
    }
}

impl FromStr for ExitRule {
    type Err = PolicyError;
    fn from_str(s: &str) -> Result<Self, PolicyError> {
        let (keyword, pattern) = s
            .trim()
            .split_once(char::is_whitespace)
            .ok_or(PolicyError::InvalidPolicy)?;
        let kind = match keyword {
            "accept" => RuleKind::Accept,
            "reject" => RuleKind::Reject,
            _ => return Err(PolicyError::InvalidPolicy),
        };
        // The port is always after the last colon, even for IPv6 addresses,
        // since those are bracketed.
        let (addr, ports) = pattern
            .trim()
            .rsplit_once(':')
            .ok_or(PolicyError::InvalidPolicy)?;
        if addr.starts_with('[') != addr.contains(']') {
            return Err(PolicyError::InvalidAddress);
        }
        Ok(ExitRule::new(kind, addr.parse()?, ports.parse()?))
    }
}
