//! The exit decision engine: combine IPv4 rules with an IPv6 port policy.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use super::{ExitRule, PortPolicy, RuleKind};

/// A relay's complete exit policy.
///
/// IPv4 destinations are checked against an ordered list of
/// [`ExitRule`]s: the first rule whose address and port both match decides,
/// and a destination that matches no rule is rejected.
///
/// IPv6 destinations are checked only against the [`PortPolicy`].  The
/// IPv4 rules are never consulted for an IPv6 address, even a rule whose
/// address is `*`.
///
/// # Examples
/// ```
/// use onion_netdoc::types::policy::{ExitPolicy, ExitRule, PortPolicy, RuleKind};
/// let rules: Vec<ExitRule> = ["reject 10.0.0.0/8:*", "accept *:80"]
///     .iter()
///     .map(|s| s.parse().unwrap())
///     .collect();
/// let policy = ExitPolicy::new(rules, PortPolicy::new_reject_all());
///
/// assert_eq!(policy.decide(&"10.1.2.3".parse().unwrap(), 80), RuleKind::Reject);
/// assert_eq!(policy.decide(&"192.0.2.1".parse().unwrap(), 80), RuleKind::Accept);
/// assert_eq!(policy.decide(&"192.0.2.1".parse().unwrap(), 81), RuleKind::Reject);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ExitPolicy {
    /// Rules for IPv4 destinations, in the order they are evaluated.
    ipv4_rules: Vec<ExitRule>,
    /// Ports allowed on IPv6 destinations.
    ipv6: PortPolicy,
}

impl ExitPolicy {
    /// Construct a new ExitPolicy from its IPv4 rules and its IPv6 port
    /// policy.
    pub fn new(ipv4_rules: Vec<ExitRule>, ipv6: PortPolicy) -> Self {
        ExitPolicy { ipv4_rules, ipv6 }
    }

    /// Return a policy that rejects every destination.
    pub fn reject_all() -> Self {
        ExitPolicy::default()
    }

    /// Add a new IPv4 rule to the end of this policy.
    ///
    /// The new rule has the lowest priority of any rule so far.
    pub fn push(&mut self, rule: ExitRule) {
        self.ipv4_rules.push(rule);
    }

    /// Replace the IPv6 port policy.
    pub fn set_ipv6_policy(&mut self, ipv6: PortPolicy) {
        self.ipv6 = ipv6;
    }

    /// Return the IPv4 rules, in evaluation order.
    pub fn ipv4_rules(&self) -> &[ExitRule] {
        &self.ipv4_rules[..]
    }

    /// Return the IPv6 port policy.
    pub fn ipv6_policy(&self) -> &PortPolicy {
        &self.ipv6
    }

    /// Return the first IPv4 rule that matches `addr` and `port`, if any.
    pub fn first_match(&self, addr: &Ipv4Addr, port: u16) -> Option<&ExitRule> {
        let addr = IpAddr::V4(*addr);
        self.ipv4_rules.iter().find(|rule| rule.matches(&addr, port))
    }

    /// Decide whether this policy accepts or rejects a connection to
    /// `addr` on `port`.
    pub fn decide(&self, addr: &IpAddr, port: u16) -> RuleKind {
        match addr {
            IpAddr::V4(v4) => self
                .first_match(v4, port)
                .map_or(RuleKind::Reject, ExitRule::kind),
            IpAddr::V6(_) => {
                if self.ipv6.allows_port(port) {
                    RuleKind::Accept
                } else {
                    RuleKind::Reject
                }
            }
        }
    }

    /// Return true iff this policy accepts a connection to `addr` on `port`.
    pub fn allows(&self, addr: &IpAddr, port: u16) -> bool {
        self.decide(addr, port).is_accept()
    }

    /// As allows, but accept a SocketAddr.
    pub fn allows_sockaddr(&self, addr: &SocketAddr) -> bool {
        self.allows(&addr.ip(), addr.port())
    }

    /// Return true if this policy accepts at least one port on some address.
    ///
    /// An IPv4 accept rule only counts if some destination it matches gets
    /// past every reject rule before it.
    pub fn allows_some_destination(&self) -> bool {
        self.ipv6.allows_some_port() || self.allows_some_ipv4()
    }

    /// Return true if some IPv4 destination is accepted.
    fn allows_some_ipv4(&self) -> bool {
        let mut rejected = Vec::new();
        for rule in &self.ipv4_rules {
            let Some(block) = V4Block::of_rule(rule) else {
                continue;
            };
            match rule.kind() {
                RuleKind::Accept => {
                    if block.escapes(&rejected) {
                        return true;
                    }
                }
                RuleKind::Reject => rejected.push(block),
            }
        }
        false
    }

    /// Summarize the IPv4 rules as the set of ports that are accepted for
    /// most public addresses.
    ///
    /// Only rules whose address covers the whole IPv4 space take part: a
    /// rule about a narrower network does not change the answer for "most"
    /// addresses.  For each port, the first such rule that matches decides.
    pub fn summarize_ipv4(&self) -> PortPolicy {
        let wide: Vec<&ExitRule> = self
            .ipv4_rules
            .iter()
            .filter(|r| r.addr().is_wildcard())
            .collect();

        // Every port between two neighbouring bounds is decided the same way.
        let mut bounds: Vec<u32> = vec![0, u32::from(u16::MAX) + 1];
        for rule in &wide {
            let (lo, hi) = rule.ports().bounds();
            bounds.push(u32::from(lo));
            bounds.push(u32::from(hi) + 1);
        }
        bounds.sort_unstable();
        bounds.dedup();

        let accepted = bounds.windows(2).filter_map(|pair| {
            let lo = u16::try_from(pair[0]).ok()?;
            let hi = u16::try_from(pair[1] - 1).ok()?;
            wide.iter()
                .find(|r| r.ports().matches(lo))
                .is_some_and(|r| r.kind().is_accept())
                .then_some((lo, hi))
        });
        PortPolicy::from_allowed_runs(accepted)
    }
}

/// A set of IPv4 destinations: every address that agrees with `addr` on
/// the bits of `mask`, on every port from `lo` through `hi`.
#[derive(Clone, Copy, Debug)]
struct V4Block {
    /// Address bits; zero outside `mask`.
    addr: u32,
    /// Which address bits are fixed.
    mask: u32,
    /// Lowest port.
    lo: u16,
    /// Highest port.
    hi: u16,
}

impl V4Block {
    /// Return the IPv4 destinations `rule` matches, if there are any.
    fn of_rule(rule: &ExitRule) -> Option<Self> {
        let (addr, mask) = rule.addr().ipv4_mask()?;
        let (lo, hi) = rule.ports().bounds();
        Some(V4Block { addr, mask, lo, hi })
    }

    /// Return true if every destination in `other` is in `self`.
    fn covers(&self, other: &V4Block) -> bool {
        self.mask & !other.mask == 0
            && other.addr & self.mask == self.addr
            && self.lo <= other.lo
            && other.hi <= self.hi
    }

    /// Return true if some destination is in both `self` and `other`.
    fn overlaps(&self, other: &V4Block) -> bool {
        let common = self.mask & other.mask;
        self.addr & common == other.addr & common && self.lo <= other.hi && other.lo <= self.hi
    }

    /// Return true if some destination in `self` is in none of `holes`.
    ///
    /// Works by splitting `self` along the edges of a hole that overlaps
    /// it until each piece is either clear of every hole or inside one.
    fn escapes(&self, holes: &[V4Block]) -> bool {
        let holes: Vec<V4Block> = holes.iter().filter(|h| h.overlaps(self)).copied().collect();
        let Some(first) = holes.first() else {
            return true;
        };
        if holes.iter().any(|h| h.covers(self)) {
            return false;
        }
        let (a, b) = self.split_along(first);
        a.escapes(&holes) || b.escapes(&holes)
    }

    /// Split `self` in two along an edge of `hole`, which overlaps `self`
    /// without covering it.
    fn split_along(&self, hole: &V4Block) -> (V4Block, V4Block) {
        let free = hole.mask & !self.mask;
        if free != 0 {
            let bit = 1 << free.trailing_zeros();
            let mask = self.mask | bit;
            return (
                V4Block { mask, ..*self },
                V4Block {
                    addr: self.addr | bit,
                    mask,
                    ..*self
                },
            );
        }
        // The hole has every address of ours, so it misses some of our ports.
        if hole.lo > self.lo {
            (
                V4Block {
                    hi: hole.lo - 1,
                    ..*self
                },
                V4Block {
                    lo: hole.lo,
                    ..*self
                },
            )
        } else {
            (
                V4Block {
                    hi: hole.hi,
                    ..*self
                },
                V4Block {
                    lo: hole.hi + 1,
                    ..*self
                },
            )
        }
    }
}

/// Decide whether `policy` accepts or rejects a connection to `addr` on
/// `port`.
///
/// This is the same as [`ExitPolicy::decide`].
pub fn decide(policy: &ExitPolicy, addr: &IpAddr, port: u16) -> RuleKind {
    policy.decide(addr, port)
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
    use crate::types::policy::{AddrSpec, PortSpec};

    fn policy(rules: &[&str], ipv6: &str) -> ExitPolicy {
        ExitPolicy::new(
            rules.iter().map(|r| r.parse().unwrap()).collect(),
            ipv6.parse().unwrap(),
        )
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn first_match_wins() {
        let p = ExitPolicy::new(
            vec![
                ExitRule::reject(AddrSpec::all(), PortSpec::all()),
                ExitRule::accept(AddrSpec::all(), PortSpec::single(80)),
            ],
            PortPolicy::new_reject_all(),
        );
        assert_eq!(p.decide(&ip("192.0.2.1"), 80), RuleKind::Reject);

        let p = policy(&["accept *:80", "reject *:*"], "reject *");
        assert_eq!(p.decide(&ip("192.0.2.1"), 80), RuleKind::Accept);
        assert_eq!(p.decide(&ip("192.0.2.1"), 81), RuleKind::Reject);
        assert_eq!(
            p.first_match(&"192.0.2.1".parse().unwrap(), 80)
                .unwrap()
                .to_string(),
            "accept *:80"
        );
    }

    #[test]
    fn empty_rules_reject() {
        let p = ExitPolicy::reject_all();
        for addr in ["0.0.0.0", "127.0.0.1", "192.0.2.1", "255.255.255.255"] {
            for port in [0, 22, 80, 443, 65535] {
                assert_eq!(p.decide(&ip(addr), port), RuleKind::Reject);
                assert_eq!(decide(&p, &ip(addr), port), RuleKind::Reject);
            }
        }
        assert!(p.first_match(&"192.0.2.1".parse().unwrap(), 80).is_none());
        assert!(!p.allows(&ip("::1"), 80));
        assert!(!p.allows_some_destination());
    }

    #[test]
    fn narrow_rules() {
        let p = policy(
            &[
                "reject 127.0.0.0/8:*",
                "reject 192.168.0.0/255.255.0.0:*",
                "accept 198.51.100.7:22",
                "accept *:443",
            ],
            "reject *",
        );
        assert!(!p.allows(&ip("127.0.0.1"), 443));
        assert!(!p.allows(&ip("192.168.4.4"), 443));
        assert!(p.allows(&ip("192.169.4.4"), 443));
        assert!(p.allows(&ip("198.51.100.7"), 22));
        assert!(!p.allows(&ip("198.51.100.8"), 22));
        assert!(p.allows_sockaddr(&"203.0.113.9:443".parse().unwrap()));
        assert!(!p.allows_sockaddr(&"203.0.113.9:444".parse().unwrap()));
    }

    #[test]
    fn ipv6_uses_port_policy_only() {
        // An accept-everything IPv4 rule says nothing about IPv6.
        let p = policy(&["accept *:*"], "accept 80");
        assert!(p.allows(&ip("2001:db8::1"), 80));
        assert!(!p.allows(&ip("2001:db8::1"), 25));
        assert!(p.allows(&ip("192.0.2.1"), 25));

        let p = policy(&["reject *:*"], "reject 25");
        assert!(p.allows(&ip("2001:db8::1"), 80));
        assert!(!p.allows(&ip("2001:db8::1"), 25));
        assert!(!p.allows(&ip("192.0.2.1"), 80));
        assert!(p.allows_sockaddr(&"[2001:db8::1]:443".parse().unwrap()));
    }

    #[test]
    fn ipv4_rules_ignore_v6_candidates() {
        let p = policy(&["accept 0.0.0.0/0:*"], "reject *");
        assert!(p.allows(&ip("192.0.2.1"), 9));
        assert!(!p.allows(&ip("::ffff:192.0.2.1"), 9));
        assert!(!p.allows(&ip("::"), 9));
    }

    #[test]
    fn push_and_replace() {
        let mut p = ExitPolicy::reject_all();
        p.push("accept *:22".parse().unwrap());
        p.push("reject *:*".parse().unwrap());
        p.set_ipv6_policy(PortPolicy::new_accept_all());
        assert_eq!(p.ipv4_rules().len(), 2);
        assert!(p.allows(&ip("192.0.2.1"), 22));
        assert!(p.allows(&ip("2001:db8::5"), 9999));
        assert_eq!(p.ipv6_policy(), &PortPolicy::new_accept_all());
    }

    #[test]
    fn summary() {
        let check = |rules: &[&str], expect: &str| {
            let p = policy(rules, "reject *");
            assert_eq!(p.summarize_ipv4().to_string(), expect, "{:?}", rules);
        };
        check(&[], "reject *");
        check(&["accept *:80", "accept *:443"], "accept 80,443");
        check(&["accept *:20-23", "accept *:24"], "accept 20-24");
        check(
            &["reject 10.0.0.0/8:*", "accept *:22", "reject 1.2.3.4:80", "accept *:80"],
            "accept 22,80",
        );
        check(&["accept 10.0.0.0/8:*"], "reject *");
        check(&["reject *:25", "accept *:1-100"], "accept 1-24,26-100");
        check(&["accept 0.0.0.0/0:53"], "accept 53");
    }

    #[test]
    fn shadowed_accepts_allow_nothing() {
        let check = |rules: &[&str], expect: bool| {
            let p = policy(rules, "reject *");
            assert_eq!(p.allows_some_destination(), expect, "{:?}", rules);
            if !expect {
                // Compare with what the rules actually decide.
                for a in ["0.0.0.0", "10.0.0.1", "10.1.0.1", "192.0.2.1", "255.255.255.255"] {
                    assert!(
                        (0..=u16::MAX).all(|port| !p.allows(&ip(a), port)),
                        "{:?} {}",
                        rules,
                        a
                    );
                }
            }
        };
        check(&["accept *:80"], true);
        check(&["reject *:*", "accept *:80"], false);
        check(&["reject 0.0.0.0/0:*", "accept 192.0.2.1:80"], false);
        check(&["reject *:1-100", "reject *:101-65535", "reject *:0", "accept *:80"], false);
        check(&["reject *:1-100", "reject *:102-65535", "accept *:*"], true);
        check(&["reject 0.0.0.0/1:*", "reject 128.0.0.0/1:*", "accept *:443"], false);
        check(&["reject 0.0.0.0/1:*", "reject 128.0.0.0/2:*", "accept *:443"], true);
        check(&["reject 10.0.0.0/8:*", "accept 10.1.0.0/16:22"], false);
        check(&["reject 10.0.0.0/8:22", "accept 10.1.0.0/16:22-23"], true);
        check(&["reject 0.0.0.0/0.0.0.1:*", "reject 0.0.0.1/0.0.0.1:*", "accept *:*"], false);
        check(&["accept [::1]:80", "reject *:*"], false);
        check(&["reject *:*", "accept 10.0.0.0/8:80", "accept *:*"], false);

        // The IPv6 policy alone is enough.
        assert!(policy(&["reject *:*", "accept *:80"], "accept 443").allows_some_destination());
    }

    #[test]
    fn summary_of_large_policy() {
        let rules: Vec<String> = (0..2000_u32)
            .map(|i| format!("accept *:{}", i * 3))
            .collect();
        let rules: Vec<&str> = rules.iter().map(String::as_str).collect();
        let summary = policy(&rules, "reject *").summarize_ipv4();
        assert_eq!(summary.listed().len(), 2000);
        assert!(summary.allows_port(5997));
        assert!(!summary.allows_port(5998));
    }

    #[test]
    fn reject_all_round_trips() {
        for p in [
            ExitPolicy::reject_all(),
            ExitPolicy::new(vec![], PortPolicy::new_accept_all()),
        ] {
            let json = serde_json::to_string(&p).unwrap();
            let back: ExitPolicy = serde_json::from_str(&json).unwrap();
            assert_eq!(back, p);
            assert_eq!(back.ipv6_policy().listed(), p.ipv6_policy().listed());
        }
        assert_eq!(
            serde_json::to_string(&ExitPolicy::reject_all()).unwrap(),
            r#"{"ipv4_rules":[],"ipv6":"reject *"}"#
        );
    }

    #[test]
    fn serde() {
        let p = policy(&["accept *:80", "reject *:*"], "accept 443");
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(
            json,
            r#"{"ipv4_rules":["accept *:80","reject *:*"],"ipv6":"accept 443"}"#
        );
        let back: ExitPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}
