//! Implement port-based policies
//!
//! These are also known as "short policies" or "policy summaries".  A
//! relay uses one to describe the ports it will connect to on IPv6.

use std::fmt::Display;
use std::str::FromStr;

use super::{PolicyError, PortSpec};

/// A policy to match zero or more TCP ports, regardless of address.
///
/// A port policy comes in exactly one of two shapes, and the difference
/// matters for ports that are not listed:
///
///  * `accept 22,80-81`: only the listed ports are allowed; anything
///    unlisted is rejected.
///  * `reject 25`: the listed ports are rejected; anything unlisted is
///    allowed.
///
/// The listed port patterns are kept in the order they were given.
///
/// An empty list displays as its opposite wildcard: `AcceptOnly([])` is
/// `reject *` and `RejectOnly([])` is `accept *`, and those texts parse back
/// to the empty lists.  A list made of `*` alone is therefore never the
/// result of parsing.
///
/// # Examples
/// ```
/// use onion_netdoc::types::policy::PortPolicy;
/// let policy: PortPolicy = "accept 1-1023,8000-8999,60000-65535".parse().unwrap();
///
/// assert!(policy.allows_port(22));
/// assert!(policy.allows_port(8000));
/// assert!(! policy.allows_port(1024));
/// assert!(! policy.allows_port(9000));
///
/// let policy: PortPolicy = "reject 25".parse().unwrap();
/// assert!(policy.allows_port(80));
/// assert!(! policy.allows_port(25));
/// ```
#[derive(
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    serde_with::DeserializeFromStr,
    serde_with::SerializeDisplay,
)]
#[allow(clippy::exhaustive_enums)]
pub enum PortPolicy {
    /// Reject every port except the listed ones.
    AcceptOnly(Vec<PortSpec>),
    /// Accept every port except the listed ones.
    RejectOnly(Vec<PortSpec>),
}

impl Display for PortPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (keyword, ports) = match self {
            PortPolicy::AcceptOnly(ports) if ports.is_empty() => return write!(f, "reject *"),
            PortPolicy::RejectOnly(ports) if ports.is_empty() => return write!(f, "accept *"),
            PortPolicy::AcceptOnly(ports) => ("accept", ports),
            PortPolicy::RejectOnly(ports) => ("reject", ports),
        };
        write!(f, "{} ", keyword)?;
        let mut comma = "";
        for range in ports {
            write!(f, "{}{}", comma, range)?;
            comma = ",";
        }
        Ok(())
    }
}

impl Default for PortPolicy {
    fn default() -> Self {
        Self::new_reject_all()
    }
}

impl PortPolicy {
    /// Return a new PortPolicy that rejects all ports.
    pub fn new_reject_all() -> Self {
        PortPolicy::AcceptOnly(Vec::new())
    }

    /// Return a new PortPolicy that accepts all ports.
    pub fn new_accept_all() -> Self {
        PortPolicy::RejectOnly(Vec::new())
    }

    /// Create a PortPolicy from a list of allowed ports. All other ports will be rejected. The
    /// ports in the list may be in any order.
    ///
    /// Adjacent ports are merged into ranges.
    pub fn from_allowed_port_list(mut ports: Vec<u16>) -> Self {
        ports.sort_unstable();
        ports.dedup();
        Self::from_allowed_runs(ports.into_iter().map(|p| (p, p)))
    }

    /// Create a PortPolicy that allows the inclusive runs of ports in
    /// `runs`, which must be sorted and must not overlap.
    ///
    /// Adjacent runs are merged.
    pub(crate) fn from_allowed_runs(runs: impl IntoIterator<Item = (u16, u16)>) -> Self {
        let mut allowed: Vec<PortSpec> = Vec::new();
        let mut run: Option<(u16, u16)> = None;
        for (lo, hi) in runs {
            run = match run {
                Some((prev_lo, prev_hi)) if prev_hi.checked_add(1) == Some(lo) => {
                    Some((prev_lo, hi))
                }
                Some(prev) => {
                    allowed.push(spec_for_run(prev));
                    Some((lo, hi))
                }
                None => Some((lo, hi)),
            };
        }
        if let Some(last) = run {
            allowed.push(spec_for_run(last));
        }

        PortPolicy::AcceptOnly(allowed)
    }

    /// Return the listed port patterns, whichever shape this policy has.
    pub fn listed(&self) -> &[PortSpec] {
        match self {
            PortPolicy::AcceptOnly(ports) | PortPolicy::RejectOnly(ports) => ports,
        }
    }

    /// Return true iff `port` is allowed by this policy.
    pub fn allows_port(&self, port: u16) -> bool {
        match self {
            PortPolicy::AcceptOnly(ports) => ports.iter().any(|p| p.matches(port)),
            PortPolicy::RejectOnly(ports) => !ports.iter().any(|p| p.matches(port)),
        }
    }

    /// Return true if this policy allows any ports at all.
    ///
    /// # Example
    /// ```
    /// use onion_netdoc::types::policy::PortPolicy;
    ///
    /// let policy: PortPolicy = "accept 22".parse().unwrap();
    /// assert!(policy.allows_some_port());
    /// let policy2: PortPolicy = "reject 1-65535,0".parse().unwrap();
    /// assert!(! policy2.allows_some_port());
    /// ```
    pub fn allows_some_port(&self) -> bool {
        match self {
            PortPolicy::AcceptOnly(ports) => !ports.is_empty(),
            PortPolicy::RejectOnly(ports) => !covers_every_port(ports),
        }
    }
}

/// Helper: turn an inclusive run of ports into a PortSpec.
fn spec_for_run((lo, hi): (u16, u16)) -> PortSpec {
    if lo == hi {
        PortSpec::single(lo)
    } else {
        // lo < hi here, so this can't fail; fall back to all ports just in case.
        PortSpec::range(lo, hi).unwrap_or_else(|_| PortSpec::all())
    }
}

/// Return true if the union of `ports` is every port from 0 through 65535.
fn covers_every_port(ports: &[PortSpec]) -> bool {
    let mut bounds: Vec<(u16, u16)> = ports.iter().map(PortSpec::bounds).collect();
    bounds.sort_unstable();
    // The lowest port not yet known to be covered.
    let mut next: u32 = 0;
    for (lo, hi) in bounds {
        if u32::from(lo) > next {
            return false;
        }
        next = next.max(u32::from(hi) + 1);
    }
    next > u32::from(u16::MAX)
}

impl FromStr for PortPolicy {
    type Err = PolicyError;
    fn from_str(s: &str) -> Result<Self, PolicyError> {
        let (keyword, list) = s
            .trim()
            .split_once(' ')
            .ok_or(PolicyError::InvalidPolicy)?;
        // These are how the empty lists display.
        match (keyword, list.trim()) {
            ("reject", "*") => return Ok(PortPolicy::new_reject_all()),
            ("accept", "*") => return Ok(PortPolicy::new_accept_all()),
            _ => {}
        }
        let ports = list
            .split(',')
            .map(|item| item.trim().parse::<PortSpec>())
            .collect::<Result<Vec<_>, _>>()?;
        match keyword {
            "accept" => Ok(PortPolicy::AcceptOnly(ports)),
            "reject" => Ok(PortPolicy::RejectOnly(ports)),
            _ => Err(PolicyError::InvalidPolicy),
        }
    }
}
