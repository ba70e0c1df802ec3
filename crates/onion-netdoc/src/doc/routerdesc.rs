//! Router descriptors: what a relay says about itself.
//!
//! A "router descriptor" is a signed statement that a relay makes
//! about itself, explaining its keys, its capabilities, its location,
//! its exit policy, and its status.
//!
//! This module only holds the data.  Encoding a descriptor to its wire
//! text, parsing one back, and checking its signature all happen
//! elsewhere; here, keys and signatures are opaque byte strings.
//!
//! A [`RouterDesc`] is never changed once built.  To publish a changed
//! descriptor, start a new [`RouterDescBuilder`] from the old one with
//! [`RouterDesc::to_builder`], change what needs changing, and build a
//! replacement.

mod build;

pub use build::RouterDescBuilder;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::SystemTime;

use crate::types::misc::{BandwidthHistory, Fingerprint, Nickname};
use crate::types::policy::{ExitPolicy, RuleKind};

/// An encoded public key, treated as opaque bytes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, derive_more::From, derive_more::AsRef)]
pub struct PublicKeyBytes(Vec<u8>);

impl PublicKeyBytes {
    /// Return the bytes of this key.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }
}

/// A curve25519 public key used for the ntor handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, derive_more::From, derive_more::AsRef)]
pub struct NtorKey([u8; 32]);

impl NtorKey {
    /// Return the bytes of this key.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// A signature over a descriptor, treated as opaque bytes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, derive_more::From, derive_more::AsRef)]
pub struct Signature(Vec<u8>);

impl Signature {
    /// Return the bytes of this signature.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }
}

/// Information about a relay, as published in its router descriptor.
///
/// A `RouterDesc` can only be obtained from
/// [`RouterDescBuilder::build`], which refuses to produce one without the
/// relay's identity, keys, and signature.  So every `RouterDesc` in
/// existence has usable key material, and every accessor here is
/// infallible.
#[derive(Clone, Debug)]
pub struct RouterDesc {
    /// Human-readable nickname for this relay.
    ///
    /// This is not secure, and not guaranteed to be unique.
    nickname: Nickname,
    /// IPv4 address for this relay.
    ipv4addr: Ipv4Addr,
    /// IPv4 ORPort for this relay.
    orport: u16,
    /// Directory port, if this relay serves directory requests over plain
    /// HTTP.
    dirport: Option<u16>,
    /// Digest of this relay's identity key.
    fingerprint: Fingerprint,
    /// Key used to extend circuits to this relay.
    onion_key: PublicKeyBytes,
    /// Key used to sign this descriptor.
    signing_key: PublicKeyBytes,
    /// Key for extending a circuit to this relay using the ntor protocol.
    ntor_onion_key: Option<NtorKey>,
    /// Signature over the whole descriptor.
    signature: Signature,
    /// True if this relay says it is hibernating.
    hibernating: bool,
    /// True if this relay says that it caches extrainfo documents.
    caches_extra_info: bool,
    /// True if this relay allows circuits of a single hop to exit through
    /// it.
    allow_single_hop_exits: bool,
    /// Link protocol versions this relay supports.
    link_protocols: Vec<u16>,
    /// Circuit protocol versions this relay supports.
    circuit_protocols: Vec<u16>,
    /// Average bandwidth the relay is willing to sustain, in bytes per second.
    bandwidth_avg: u64,
    /// Burst bandwidth the relay is willing to sustain, in bytes per second.
    bandwidth_burst: u64,
    /// Bandwidth the relay has been observed to handle, in bytes per second.
    bandwidth_observed: u64,
    /// Declared uptime for this relay, in seconds.
    uptime: Option<u64>,
    /// Bytes read, per interval.
    read_history: Option<BandwidthHistory>,
    /// Bytes written, per interval.
    write_history: Option<BandwidthHistory>,
    /// Software and version that this relay says it's running.
    platform: Option<String>,
    /// Contact information for the relay's operator.
    contact: Option<String>,
    /// Declared family members for this relay.  If two relays are in the
    /// same family, they shouldn't be used in the same circuit.
    family: Vec<Fingerprint>,
    /// Additional addresses where this relay accepts connections.
    or_addresses: Vec<SocketAddr>,
    /// Time when this router descriptor was published.
    published: Option<SystemTime>,
    /// Notes recorded while this descriptor was being built.
    status_log: Vec<String>,
    /// Which destinations this relay will connect to.
    exit_policy: ExitPolicy,
}

impl RouterDesc {
    /// Return a new [`RouterDescBuilder`] with nothing set.
    pub fn builder() -> RouterDescBuilder {
        RouterDescBuilder::blank()
    }

    /// Return a builder that starts out with every field of this
    /// descriptor, for making a replacement.
    ///
    /// The status log is not carried over.
    pub fn to_builder(&self) -> RouterDescBuilder {
        RouterDescBuilder::from_desc(self)
    }

    /// Return the nickname of this relay.
    pub fn nickname(&self) -> &Nickname {
        &self.nickname
    }

    /// Return the IPv4 address of this relay.
    pub fn ipv4addr(&self) -> Ipv4Addr {
        self.ipv4addr
    }

    /// Return the IPv4 ORPort of this relay.
    pub fn orport(&self) -> u16 {
        self.orport
    }

    /// Return the directory port of this relay, if it has one.
    pub fn dirport(&self) -> Option<u16> {
        self.dirport
    }

    /// Return the identity fingerprint of this relay.
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Return the onion key of this relay.
    pub fn onion_key(&self) -> &PublicKeyBytes {
        &self.onion_key
    }

    /// Return the signing key of this relay.
    pub fn signing_key(&self) -> &PublicKeyBytes {
        &self.signing_key
    }

    /// Return the ntor onion key of this relay, if it has one.
    pub fn ntor_onion_key(&self) -> Option<&NtorKey> {
        self.ntor_onion_key.as_ref()
    }

    /// Return the signature on this descriptor.
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Return true if this relay says it is hibernating.
    pub fn is_hibernating(&self) -> bool {
        self.hibernating
    }

    /// Return true if this relay caches extra-info documents.
    pub fn caches_extra_info(&self) -> bool {
        self.caches_extra_info
    }

    /// Return true if this relay allows single-hop circuits to exit.
    pub fn allows_single_hop_exits(&self) -> bool {
        self.allow_single_hop_exits
    }

    /// Return the link protocol versions this relay supports.
    pub fn link_protocols(&self) -> &[u16] {
        &self.link_protocols[..]
    }

    /// Return the circuit protocol versions this relay supports.
    pub fn circuit_protocols(&self) -> &[u16] {
        &self.circuit_protocols[..]
    }

    /// Return the average, burst, and observed bandwidth, in bytes per
    /// second.
    pub fn bandwidth(&self) -> (u64, u64, u64) {
        (
            self.bandwidth_avg,
            self.bandwidth_burst,
            self.bandwidth_observed,
        )
    }

    /// Return the declared uptime of this relay, in seconds.
    pub fn uptime(&self) -> Option<u64> {
        self.uptime
    }

    /// Return the read history of this relay.
    pub fn read_history(&self) -> Option<&BandwidthHistory> {
        self.read_history.as_ref()
    }

    /// Return the write history of this relay.
    pub fn write_history(&self) -> Option<&BandwidthHistory> {
        self.write_history.as_ref()
    }

    /// Return the platform string of this relay.
    pub fn platform(&self) -> Option<&str> {
        self.platform.as_deref()
    }

    /// Return the operator contact information for this relay.
    pub fn contact(&self) -> Option<&str> {
        self.contact.as_deref()
    }

    /// Return the declared family of this relay.
    pub fn family(&self) -> &[Fingerprint] {
        &self.family[..]
    }

    /// Return the alternate addresses of this relay.
    pub fn or_addresses(&self) -> &[SocketAddr] {
        &self.or_addresses[..]
    }

    /// Return every address where this relay accepts OR connections: the
    /// main IPv4 address first, then the alternates.
    pub fn or_ports(&self) -> impl Iterator<Item = SocketAddr> + '_ {
        std::iter::once(SocketAddr::new(IpAddr::V4(self.ipv4addr), self.orport))
            .chain(self.or_addresses.iter().copied())
    }

    /// Return the time when this descriptor was published.
    pub fn published(&self) -> Option<SystemTime> {
        self.published
    }

    /// Return the notes recorded while this descriptor was built, oldest
    /// first.
    pub fn status_log(&self) -> &[String] {
        &self.status_log[..]
    }

    /// Return the exit policy of this relay.
    pub fn exit_policy(&self) -> &ExitPolicy {
        &self.exit_policy
    }

    /// Decide whether this relay would exit to `addr` on `port`.
    pub fn decide_exit(&self, addr: &IpAddr, port: u16) -> RuleKind {
        self.exit_policy.decide(addr, port)
    }
}
