//! Facilities to construct router descriptor objects.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::SystemTime;

use super::{NtorKey, PublicKeyBytes, RouterDesc, Signature};
use crate::types::misc::{BandwidthHistory, Fingerprint, Nickname};
use crate::types::policy::{ExitPolicy, ExitRule, PortPolicy};
use crate::{BuildError as Error, BuildResult as Result};

/// A builder object used to construct a router descriptor.
///
/// There are two ways to get one.  A parser that has read a descriptor
/// from elsewhere starts from [`RouterDescBuilder::blank`] and sets every
/// field it found.  A relay describing itself does the same, but leaves
/// the key material for later: a blank builder works as a template that
/// can be cloned and completed once keys exist.
///
/// A builder never answers exit-policy questions, and never hands out key
/// material it does not have.  The key accessors
/// ([`onion_key`](Self::onion_key) and friends) return
/// [`BuildError::UninitializedKeyMaterial`](crate::BuildError::UninitializedKeyMaterial)
/// until the key has been set.
#[derive(Debug, Clone)]
pub struct RouterDescBuilder {
    /// See [`RouterDesc::nickname`]
    nickname: Option<Nickname>,
    /// See [`RouterDesc::ipv4addr`]
    ipv4addr: Ipv4Addr,
    /// See [`RouterDesc::orport`]
    orport: u16,
    /// See [`RouterDesc::dirport`]
    dirport: Option<u16>,
    /// See [`RouterDesc::fingerprint`]
    fingerprint: Option<Fingerprint>,
    /// See [`RouterDesc::onion_key`]
    onion_key: Option<PublicKeyBytes>,
    /// See [`RouterDesc::signing_key`]
    signing_key: Option<PublicKeyBytes>,
    /// See [`RouterDesc::ntor_onion_key`]
    ntor_onion_key: Option<NtorKey>,
    /// See [`RouterDesc::signature`]
    signature: Option<Signature>,
    /// See [`RouterDesc::is_hibernating`]
    hibernating: bool,
    /// See [`RouterDesc::caches_extra_info`]
    caches_extra_info: bool,
    /// See [`RouterDesc::allows_single_hop_exits`]
    allow_single_hop_exits: bool,
    /// See [`RouterDesc::link_protocols`]
    link_protocols: Vec<u16>,
    /// See [`RouterDesc::circuit_protocols`]
    circuit_protocols: Vec<u16>,
    /// See [`RouterDesc::bandwidth`]
    bandwidth: (u64, u64, u64),
    /// See [`RouterDesc::uptime`]
    uptime: Option<u64>,
    /// See [`RouterDesc::read_history`]
    read_history: Option<BandwidthHistory>,
    /// See [`RouterDesc::write_history`]
    write_history: Option<BandwidthHistory>,
    /// See [`RouterDesc::platform`]
    platform: Option<String>,
    /// See [`RouterDesc::contact`]
    contact: Option<String>,
    /// See [`RouterDesc::family`]
    family: Vec<Fingerprint>,
    /// See [`RouterDesc::or_addresses`]
    or_addresses: Vec<SocketAddr>,
    /// See [`RouterDesc::published`]
    published: Option<SystemTime>,
    /// Notes to put at the start of the built descriptor's status log.
    notes: Vec<String>,
    /// See [`RouterDesc::exit_policy`]
    exit_policy: ExitPolicy,
}

impl Default for RouterDescBuilder {
    fn default() -> Self {
        Self::blank()
    }
}

impl RouterDescBuilder {
    /// Create a new builder with nothing set.
    ///
    /// The address is `0.0.0.0`, every port is zero, no keys are present,
    /// and the exit policy rejects everything.
    pub fn blank() -> Self {
        RouterDescBuilder {
            nickname: None,
            ipv4addr: Ipv4Addr::UNSPECIFIED,
            orport: 0,
            dirport: None,
            fingerprint: None,
            onion_key: None,
            signing_key: None,
            ntor_onion_key: None,
            signature: None,
            hibernating: false,
            caches_extra_info: false,
            allow_single_hop_exits: false,
            link_protocols: Vec::new(),
            circuit_protocols: Vec::new(),
            bandwidth: (0, 0, 0),
            uptime: None,
            read_history: None,
            write_history: None,
            platform: None,
            contact: None,
            family: Vec::new(),
            or_addresses: Vec::new(),
            published: None,
            notes: Vec::new(),
            exit_policy: ExitPolicy::reject_all(),
        }
    }

    /// Create a builder holding every field of `desc`, except its status
    /// log.
    pub(super) fn from_desc(desc: &RouterDesc) -> Self {
        RouterDescBuilder {
            nickname: Some(desc.nickname.clone()),
            ipv4addr: desc.ipv4addr,
            orport: desc.orport,
            dirport: desc.dirport,
            fingerprint: Some(desc.fingerprint),
            onion_key: Some(desc.onion_key.clone()),
            signing_key: Some(desc.signing_key.clone()),
            ntor_onion_key: desc.ntor_onion_key,
            signature: Some(desc.signature.clone()),
            hibernating: desc.hibernating,
            caches_extra_info: desc.caches_extra_info,
            allow_single_hop_exits: desc.allow_single_hop_exits,
            link_protocols: desc.link_protocols.clone(),
            circuit_protocols: desc.circuit_protocols.clone(),
            bandwidth: desc.bandwidth(),
            uptime: desc.uptime,
            read_history: desc.read_history.clone(),
            write_history: desc.write_history.clone(),
            platform: desc.platform.clone(),
            contact: desc.contact.clone(),
            family: desc.family.clone(),
            or_addresses: desc.or_addresses.clone(),
            published: desc.published,
            notes: Vec::new(),
            exit_policy: desc.exit_policy.clone(),
        }
    }

    /// Set the nickname.
    ///
    /// This field is required.
    pub fn nickname(&mut self, nickname: Nickname) -> &mut Self {
        self.nickname = Some(nickname);
        self
    }

    /// Set the nickname based on parsing a string.
    pub fn parse_nickname(&mut self, nickname: &str) -> Result<&mut Self> {
        Ok(self.nickname(nickname.parse()?))
    }

    /// Set the IPv4 address.
    pub fn ipv4addr(&mut self, addr: Ipv4Addr) -> &mut Self {
        self.ipv4addr = addr;
        self
    }

    /// Set the IPv4 ORPort.
    pub fn orport(&mut self, port: u16) -> &mut Self {
        self.orport = port;
        self
    }

    /// Set the directory port.
    pub fn dirport(&mut self, port: u16) -> &mut Self {
        self.dirport = Some(port);
        self
    }

    /// Set the identity fingerprint.
    ///
    /// This field is required.
    pub fn fingerprint(&mut self, fingerprint: Fingerprint) -> &mut Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    /// Set the identity fingerprint based on parsing a hex string.
    pub fn parse_fingerprint(&mut self, fingerprint: &str) -> Result<&mut Self> {
        Ok(self.fingerprint(fingerprint.parse()?))
    }

    /// Set the onion key.
    ///
    /// This key is required for a well-formed descriptor.
    pub fn set_onion_key(&mut self, key: PublicKeyBytes) -> &mut Self {
        self.onion_key = Some(key);
        self
    }

    /// Set the signing key.
    ///
    /// This key is required for a well-formed descriptor.
    pub fn set_signing_key(&mut self, key: PublicKeyBytes) -> &mut Self {
        self.signing_key = Some(key);
        self
    }

    /// Set the ntor onion key.
    pub fn set_ntor_onion_key(&mut self, key: NtorKey) -> &mut Self {
        self.ntor_onion_key = Some(key);
        self
    }

    /// Set the signature.
    ///
    /// This field is required for a well-formed descriptor.
    pub fn set_signature(&mut self, signature: Signature) -> &mut Self {
        self.signature = Some(signature);
        self
    }

    /// Return the onion key, if it has been set.
    pub fn onion_key(&self) -> Result<&PublicKeyBytes> {
        self.onion_key
            .as_ref()
            .ok_or(Error::UninitializedKeyMaterial { field: "onion_key" })
    }

    /// Return the signing key, if it has been set.
    pub fn signing_key(&self) -> Result<&PublicKeyBytes> {
        self.signing_key
            .as_ref()
            .ok_or(Error::UninitializedKeyMaterial {
                field: "signing_key",
            })
    }

    /// Return the ntor onion key, if it has been set.
    pub fn ntor_onion_key(&self) -> Result<&NtorKey> {
        self.ntor_onion_key
            .as_ref()
            .ok_or(Error::UninitializedKeyMaterial {
                field: "ntor_onion_key",
            })
    }

    /// Return the signature, if it has been set.
    pub fn signature(&self) -> Result<&Signature> {
        self.signature
            .as_ref()
            .ok_or(Error::UninitializedKeyMaterial { field: "signature" })
    }

    /// Set whether the relay is hibernating.
    pub fn hibernating(&mut self, hibernating: bool) -> &mut Self {
        self.hibernating = hibernating;
        self
    }

    /// Set whether the relay caches extra-info documents.
    pub fn caches_extra_info(&mut self, caches: bool) -> &mut Self {
        self.caches_extra_info = caches;
        self
    }

    /// Set whether the relay allows single-hop exits.
    pub fn allow_single_hop_exits(&mut self, allow: bool) -> &mut Self {
        self.allow_single_hop_exits = allow;
        self
    }

    /// Set the supported link protocol versions.
    pub fn link_protocols(&mut self, versions: Vec<u16>) -> &mut Self {
        self.link_protocols = versions;
        self
    }

    /// Set the supported circuit protocol versions.
    pub fn circuit_protocols(&mut self, versions: Vec<u16>) -> &mut Self {
        self.circuit_protocols = versions;
        self
    }

    /// Set the average, burst, and observed bandwidth, in bytes per second.
    pub fn bandwidth(&mut self, avg: u64, burst: u64, observed: u64) -> &mut Self {
        self.bandwidth = (avg, burst, observed);
        self
    }

    /// Set the declared uptime, in seconds.
    pub fn uptime(&mut self, seconds: u64) -> &mut Self {
        self.uptime = Some(seconds);
        self
    }

    /// Set the read history.
    pub fn read_history(&mut self, history: BandwidthHistory) -> &mut Self {
        self.read_history = Some(history);
        self
    }

    /// Set the write history.
    pub fn write_history(&mut self, history: BandwidthHistory) -> &mut Self {
        self.write_history = Some(history);
        self
    }

    /// Set the platform string.
    pub fn platform(&mut self, platform: String) -> &mut Self {
        self.platform = Some(platform);
        self
    }

    /// Set the operator contact information.
    pub fn contact(&mut self, contact: String) -> &mut Self {
        self.contact = Some(contact);
        self
    }

    /// Add a member to this relay's family.
    ///
    /// Adding the same member twice has no further effect.
    pub fn family_member(&mut self, member: Fingerprint) -> &mut Self {
        if !self.family.contains(&member) {
            self.family.push(member);
        }
        self
    }

    /// Add an alternate address.
    pub fn or_address(&mut self, addr: SocketAddr) -> &mut Self {
        self.or_addresses.push(addr);
        self
    }

    /// Set the publication time.
    pub fn published(&mut self, when: SystemTime) -> &mut Self {
        self.published = Some(when);
        self
    }

    /// Replace the whole exit policy.
    ///
    /// By default, the exit policy rejects everything.
    pub fn exit_policy(&mut self, policy: ExitPolicy) -> &mut Self {
        self.exit_policy = policy;
        self
    }

    /// Add an IPv4 exit rule after every rule added so far.
    pub fn exit_rule(&mut self, rule: ExitRule) -> &mut Self {
        self.exit_policy.push(rule);
        self
    }

    /// Add an IPv4 exit rule based on parsing a string.
    pub fn parse_exit_rule(&mut self, rule: &str) -> Result<&mut Self> {
        Ok(self.exit_rule(rule.parse()?))
    }

    /// Set the IPv6 exit policy.
    ///
    /// By default, this policy is `reject *`.
    pub fn ipv6_policy(&mut self, policy: PortPolicy) -> &mut Self {
        self.exit_policy.set_ipv6_policy(policy);
        self
    }

    /// Set the IPv6 exit policy based on parsing a string.
    pub fn parse_ipv6_policy(&mut self, policy: &str) -> Result<&mut Self> {
        Ok(self.ipv6_policy(policy.parse()?))
    }

    /// Record a note to go into the built descriptor's status log.
    pub fn note(&mut self, note: impl Into<String>) -> &mut Self {
        self.notes.push(note.into());
        self
    }

    /// Try to build a router descriptor from the settings on this builder.
    ///
    /// Give an error if the nickname, fingerprint, onion key, signing key,
    /// or signature is missing.
    pub fn build(&self) -> Result<RouterDesc> {
        let nickname = self
            .nickname
            .clone()
            .ok_or(Error::MissingField("nickname"))?;
        let fingerprint = self.fingerprint.ok_or(Error::MissingField("fingerprint"))?;
        let onion_key = self.onion_key()?.clone();
        let signing_key = self.signing_key()?.clone();
        let signature = self.signature()?.clone();

        let mut status_log = self.notes.clone();
        status_log.push(format!(
            "built descriptor for {} ({}) at {}:{}",
            nickname, fingerprint, self.ipv4addr, self.orport
        ));
        status_log.push(format!(
            "exit policy: {} IPv4 rules, IPv4 summary \"{}\", IPv6 \"{}\"",
            self.exit_policy.ipv4_rules().len(),
            self.exit_policy.summarize_ipv4(),
            self.exit_policy.ipv6_policy(),
        ));

        let (bandwidth_avg, bandwidth_burst, bandwidth_observed) = self.bandwidth;
        Ok(RouterDesc {
            nickname,
            ipv4addr: self.ipv4addr,
            orport: self.orport,
            dirport: self.dirport,
            fingerprint,
            onion_key,
            signing_key,
            ntor_onion_key: self.ntor_onion_key,
            signature,
            hibernating: self.hibernating,
            caches_extra_info: self.caches_extra_info,
            allow_single_hop_exits: self.allow_single_hop_exits,
            link_protocols: self.link_protocols.clone(),
            circuit_protocols: self.circuit_protocols.clone(),
            bandwidth_avg,
            bandwidth_burst,
            bandwidth_observed,
            uptime: self.uptime,
            read_history: self.read_history.clone(),
            write_history: self.write_history.clone(),
            platform: self.platform.clone(),
            contact: self.contact.clone(),
            family: self.family.clone(),
            or_addresses: self.or_addresses.clone(),
            published: self.published,
            status_log,
            exit_policy: self.exit_policy.clone(),
        })
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
    use crate::types::policy::RuleKind;
    use std::time::Duration;

    const FP: &str = "7467A97D19CD2B4F2BC0388AA99C5E67710F847E";

    /// Return a builder with every required non-key field set.
    fn template() -> RouterDescBuilder {
        let mut b = RouterDescBuilder::blank();
        b.parse_nickname("Template").unwrap();
        b.parse_fingerprint(FP).unwrap();
        b.ipv4addr(Ipv4Addr::new(198, 51, 100, 1)).orport(9374);
        b
    }

    /// Fill in key material.
    fn with_keys(b: &mut RouterDescBuilder) -> &mut RouterDescBuilder {
        b.set_onion_key(vec![0xAA_u8; 140].into())
            .set_signing_key(vec![0xBB_u8; 140].into())
            .set_signature(vec![0xCC_u8; 128].into())
    }

    #[test]
    fn blank_has_no_keys() {
        let b = RouterDescBuilder::blank();
        for (res, field) in [
            (b.onion_key().map(|_| ()), "onion_key"),
            (b.signing_key().map(|_| ()), "signing_key"),
            (b.ntor_onion_key().map(|_| ()), "ntor_onion_key"),
            (b.signature().map(|_| ()), "signature"),
        ] {
            match res {
                Err(Error::UninitializedKeyMaterial { field: f }) => assert_eq!(f, field),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn blank_refuses_to_build() {
        assert!(matches!(
            RouterDescBuilder::blank().build(),
            Err(Error::MissingField("nickname"))
        ));

        let mut b = RouterDescBuilder::blank();
        b.parse_nickname("OnlyName").unwrap();
        assert!(matches!(b.build(), Err(Error::MissingField("fingerprint"))));

        // Identity is there, keys aren't.
        let b = template();
        assert!(matches!(
            b.build(),
            Err(Error::UninitializedKeyMaterial { field: "onion_key" })
        ));

        let mut b = template();
        b.set_onion_key(vec![1_u8].into());
        assert!(matches!(
            b.build(),
            Err(Error::UninitializedKeyMaterial {
                field: "signing_key"
            })
        ));
        b.set_signing_key(vec![2_u8].into());
        assert!(matches!(
            b.build(),
            Err(Error::UninitializedKeyMaterial { field: "signature" })
        ));
        b.set_signature(vec![3_u8].into());
        assert!(b.build().is_ok());
    }

    #[test]
    fn template_is_reusable() {
        let tmpl = template();
        let mut first = tmpl.clone();
        let d1 = with_keys(&mut first).build().unwrap();
        let mut second = tmpl.clone();
        second.set_ntor_onion_key([7_u8; 32].into());
        let d2 = with_keys(&mut second).build().unwrap();

        assert!(d1.ntor_onion_key().is_none());
        assert_eq!(d2.ntor_onion_key().unwrap().as_bytes(), &[7; 32]);
        // The template itself is untouched.
        assert!(tmpl.onion_key().is_err());
    }

    #[test]
    fn blank_policy_rejects_everything() {
        let mut b = template();
        let d = with_keys(&mut b).build().unwrap();
        for addr in ["192.0.2.1", "2001:db8::1"] {
            for port in [22, 80, 443] {
                assert_eq!(
                    d.decide_exit(&addr.parse().unwrap(), port),
                    RuleKind::Reject
                );
            }
        }
    }

    #[test]
    fn exit_rules_in_order() {
        let mut b = template();
        b.parse_exit_rule("reject 192.0.2.0/24:*")
            .unwrap()
            .parse_exit_rule("accept *:80")
            .unwrap()
            .parse_ipv6_policy("accept 80")
            .unwrap();
        assert!(b.parse_exit_rule("permit *:80").is_err());
        assert!(b.parse_ipv6_policy("accept 99999").is_err());

        let d = with_keys(&mut b).build().unwrap();
        assert_eq!(d.exit_policy().ipv4_rules().len(), 2);
        assert_eq!(
            d.decide_exit(&"192.0.2.9".parse().unwrap(), 80),
            RuleKind::Reject
        );
        assert_eq!(
            d.decide_exit(&"203.0.113.9".parse().unwrap(), 80),
            RuleKind::Accept
        );
        assert_eq!(
            d.decide_exit(&"2001:db8::9".parse().unwrap(), 80),
            RuleKind::Accept
        );
    }

    #[test]
    fn bad_identity() {
        let mut b = RouterDescBuilder::blank();
        assert!(matches!(
            b.parse_nickname("has space"),
            Err(Error::BadNickname(_))
        ));
        assert!(matches!(
            b.parse_fingerprint("1234"),
            Err(Error::BadFingerprint(_))
        ));
    }

    #[test]
    fn status_log() {
        let mut b = template();
        b.note("first").note(String::from("second"));
        b.parse_exit_rule("accept *:443").unwrap();
        let d = with_keys(&mut b).build().unwrap();
        let log = d.status_log();
        assert_eq!(log.len(), 4);
        assert_eq!(log[0], "first");
        assert_eq!(log[1], "second");
        assert_eq!(
            log[2],
            format!("built descriptor for Template ({}) at 198.51.100.1:9374", FP)
        );
        assert_eq!(
            log[3],
            "exit policy: 1 IPv4 rules, IPv4 summary \"accept 443\", IPv6 \"reject *\""
        );
    }

    #[test]
    fn metadata() {
        let start = SystemTime::UNIX_EPOCH + Duration::from_secs(86400);
        let member: Fingerprint = "0000000000000000000000000000000000000001".parse().unwrap();
        let mut b = template();
        b.dirport(9030)
            .hibernating(true)
            .caches_extra_info(true)
            .allow_single_hop_exits(false)
            .link_protocols(vec![3, 4, 5])
            .circuit_protocols(vec![1])
            .bandwidth(1000, 2000, 500)
            .uptime(3600)
            .read_history(BandwidthHistory::new(
                start,
                Duration::from_secs(900),
                vec![1, 2],
            ))
            .platform("onion-relay 0.1.0".into())
            .family_member(member)
            .family_member(member)
            .published(start);
        let d = with_keys(&mut b).build().unwrap();
        assert_eq!(d.dirport(), Some(9030));
        assert!(d.is_hibernating());
        assert!(d.caches_extra_info());
        assert!(!d.allows_single_hop_exits());
        assert_eq!(d.link_protocols(), &[3, 4, 5]);
        assert_eq!(d.circuit_protocols(), &[1]);
        assert_eq!(d.bandwidth(), (1000, 2000, 500));
        assert_eq!(d.uptime(), Some(3600));
        assert_eq!(d.read_history().unwrap().total(), 3);
        assert!(d.write_history().is_none());
        assert_eq!(d.platform(), Some("onion-relay 0.1.0"));
        assert_eq!(d.family(), &[member]);
        assert_eq!(d.published(), Some(start));
    }
}
