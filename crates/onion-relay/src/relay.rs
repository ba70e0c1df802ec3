//! The running node: its options, its exit policy, and its descriptors.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::SystemTime;

use onion_netdoc::doc::routerdesc::{
    NtorKey, PublicKeyBytes, RouterDesc, RouterDescBuilder, Signature,
};
use onion_netdoc::types::policy::{ExitPolicy, RuleKind};
use onion_netdoc::types::{Fingerprint, Nickname};
use safelog::sensitive;
use serde::Deserialize;
use tor_error::into_internal;
use tracing::{debug, info, warn};

use crate::config::{
    ConfigLoadError, ExitConfig, NodeOptions, NodeOptionsBuilder, Role, DEFAULT_ONION_PORT,
};
use crate::descs::DescriptorStore;
use crate::err::ErrorDetail;
use crate::logging::LogSink;
use crate::Error;

/// Nickname we publish when the operator didn't choose one.
const UNNAMED: &str = "Unnamed";

/// Link protocol versions this node speaks.
const LINK_PROTOCOLS: [u16; 2] = [4, 5];

/// Circuit protocol versions this node speaks.
const CIRCUIT_PROTOCOLS: [u16; 1] = [1];

/// The key material a node needs before it can publish a descriptor.
///
/// Keys and signatures are opaque here; whatever generates them hands them
/// over in this form.
#[derive(Clone, Debug)]
pub struct LocalKeys {
    /// Digest of the identity key.
    fingerprint: Fingerprint,
    /// Onion key.
    onion_key: PublicKeyBytes,
    /// Signing key.
    signing_key: PublicKeyBytes,
    /// Optional ntor onion key.
    ntor_onion_key: Option<NtorKey>,
    /// Signature over the descriptor.
    signature: Signature,
}

impl LocalKeys {
    /// Collect the key material for a descriptor.
    pub fn new(
        fingerprint: Fingerprint,
        onion_key: PublicKeyBytes,
        signing_key: PublicKeyBytes,
        signature: Signature,
    ) -> Self {
        LocalKeys {
            fingerprint,
            onion_key,
            signing_key,
            ntor_onion_key: None,
            signature,
        }
    }

    /// Add an ntor onion key.
    #[must_use]
    pub fn with_ntor_onion_key(mut self, key: NtorKey) -> Self {
        self.ntor_onion_key = Some(key);
        self
    }

    /// Return the fingerprint these keys belong to.
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Parse keys from a TOML document.
    ///
    /// The document has a hex `fingerprint`, hex `onion_key`, `signing_key`
    /// and `signature`, and optionally a hex `ntor_onion_key` of 32 bytes.
    /// `source_name` names the document in error messages.
    pub fn from_toml_str(text: &str, source_name: &str) -> Result<Self, ConfigLoadError> {
        let file: KeyFile = toml::from_str(text).map_err(|e: toml::de::Error| {
            ConfigLoadError::Syntax {
                source_name: source_name.to_owned(),
                message: e.message().to_owned(),
            }
        })?;
        let keys = LocalKeys::new(
            file.fingerprint,
            decode_hex("onion_key", &file.onion_key)?.into(),
            decode_hex("signing_key", &file.signing_key)?.into(),
            decode_hex("signature", &file.signature)?.into(),
        );
        match file.ntor_onion_key {
            None => Ok(keys),
            Some(ntor) => {
                let bytes: [u8; 32] = decode_hex("ntor_onion_key", &ntor)?
                    .try_into()
                    .map_err(|_| {
                        ConfigLoadError::Shape("ntor_onion_key must be 32 bytes long".into())
                    })?;
                Ok(keys.with_ntor_onion_key(bytes.into()))
            }
        }
    }
}

/// On-disk form of [`LocalKeys`].
#[derive(Deserialize)]
struct KeyFile {
    /// Identity fingerprint, in hex.
    fingerprint: Fingerprint,
    /// Onion key, in hex.
    onion_key: String,
    /// Signing key, in hex.
    signing_key: String,
    /// Descriptor signature, in hex.
    signature: String,
    /// ntor onion key, in hex.
    #[serde(default)]
    ntor_onion_key: Option<String>,
}

/// Decode the hex value of `field`.
fn decode_hex(field: &str, value: &str) -> Result<Vec<u8>, ConfigLoadError> {
    hex::decode(value).map_err(|e| ConfigLoadError::Shape(format!("{}: {}", field, e)))
}

/// Turn an exit section into a policy, or explain why we won't exit.
fn checked_exit_policy(exit: &ExitConfig) -> Result<ExitPolicy, ErrorDetail> {
    if exit.exit_rules.is_empty() {
        return Err(ErrorDetail::ExitPolicy("no exit rules are configured"));
    }
    let policy = exit.exit_policy();
    if !policy.allows_some_destination() {
        return Err(ErrorDetail::ExitPolicy(
            "the exit policy accepts no destinations",
        ));
    }
    Ok(policy)
}

/// Describe a list of roles for a status line.
fn describe_roles(roles: &[Role]) -> String {
    if roles.is_empty() {
        return "none".to_owned();
    }
    roles
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// An onion-routing node.
///
/// An `OnionRelay` knows which roles it plays, holds the exit policy it
/// enforces, and keeps its own descriptor and those of its peers in a
/// [`DescriptorStore`].
pub struct OnionRelay {
    /// The options this node was started with.
    options: NodeOptions,
    /// The policy we enforce.  Rejects everything unless we are an exit.
    exit_policy: ExitPolicy,
    /// Everything our descriptor says except the key material.
    template: RouterDescBuilder,
    /// Our descriptor and our peers'.
    store: Arc<DescriptorStore>,
    /// Where we report what we are doing.
    sink: LogSink,
}

impl std::fmt::Debug for OnionRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnionRelay")
            .field("options", &self.options)
            .field("exit_policy", &self.exit_policy)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl OnionRelay {
    /// Set up a node from its options.
    ///
    /// Gives an error if the exit role is on but its rules don't make a
    /// usable policy.  A node that is not an exit gets a policy that
    /// rejects everything.
    pub fn new(options: NodeOptions, sink: LogSink) -> Result<Self, Error> {
        let exit_policy = match &options.exit {
            Some(exit) => checked_exit_policy(exit)?,
            None => ExitPolicy::reject_all(),
        };

        let mut template = RouterDescBuilder::blank();
        let nickname = match options.relay.as_ref().and_then(|r| r.chosen_nickname()) {
            Some(nickname) => nickname,
            None => UNNAMED
                .parse::<Nickname>()
                .map_err(into_internal!("built-in nickname rejected"))
                .map_err(ErrorDetail::from)?,
        };
        template
            .nickname(nickname)
            .platform(format!("onion-relay {}", env!("CARGO_PKG_VERSION")))
            .link_protocols(LINK_PROTOCOLS.to_vec())
            .circuit_protocols(CIRCUIT_PROTOCOLS.to_vec())
            .exit_policy(exit_policy.clone());
        match &options.relay {
            Some(relay) => {
                template.orport(relay.onion_port);
                if let Some(contact) = &relay.contact {
                    template.contact(contact.clone());
                }
            }
            None => {
                template.orport(DEFAULT_ONION_PORT);
            }
        }

        let roles = options.roles();
        template.note(format!("roles: {}", describe_roles(&roles)));

        let relay = OnionRelay {
            options,
            exit_policy,
            template,
            store: Arc::new(DescriptorStore::new()),
            sink,
        };

        if roles.is_empty() {
            warn!("No roles are enabled; this node will do nothing.");
        }
        info!("Node roles: {}", describe_roles(&roles));
        if relay.has_role(Role::Exit) {
            info!(
                "Exit policy: {} IPv4 rules; IPv4 summary \"{}\"; IPv6 \"{}\"",
                relay.exit_policy.ipv4_rules().len(),
                relay.exit_policy.summarize_ipv4(),
                relay.exit_policy.ipv6_policy()
            );
        }
        relay.report(&format!("node roles: {}", describe_roles(&roles)));

        Ok(relay)
    }

    /// As [`new`](Self::new), but build the options from `builder` first.
    pub fn from_builder(builder: &NodeOptionsBuilder, sink: LogSink) -> Result<Self, Error> {
        let options = builder.build().map_err(ErrorDetail::from)?;
        Self::new(options, sink)
    }

    /// Send `msg` to our status sink.
    fn report(&self, msg: &str) {
        (self.sink)(msg);
    }

    /// Return the options this node was started with.
    pub fn options(&self) -> &NodeOptions {
        &self.options
    }

    /// Return the roles this node plays.
    pub fn roles(&self) -> Vec<Role> {
        self.options.roles()
    }

    /// Return true if this node plays `role`.
    pub fn has_role(&self, role: Role) -> bool {
        self.options.has_role(role)
    }

    /// Return true if this node publishes a descriptor: that is, if it
    /// relays or exits.
    pub fn publishes(&self) -> bool {
        self.has_role(Role::Relay) || self.has_role(Role::Exit)
    }

    /// Return the exit policy this node enforces.
    pub fn exit_policy(&self) -> &ExitPolicy {
        &self.exit_policy
    }

    /// Return the store holding our descriptor and our peers'.
    pub fn store(&self) -> &Arc<DescriptorStore> {
        &self.store
    }

    /// Return a builder for our descriptor with everything but the keys
    /// filled in.
    pub fn descriptor_template(&self) -> RouterDescBuilder {
        self.template.clone()
    }

    /// Build our descriptor with `keys`, install it as current, and return
    /// it.
    ///
    /// Any descriptor we installed before is replaced.
    pub fn publish(&self, keys: LocalKeys) -> Result<Arc<RouterDesc>, Error> {
        if !self.publishes() {
            return Err(ErrorDetail::NotPublishing.into());
        }
        let LocalKeys {
            fingerprint,
            onion_key,
            signing_key,
            ntor_onion_key,
            signature,
        } = keys;

        let mut builder = self.descriptor_template();
        builder
            .fingerprint(fingerprint)
            .set_onion_key(onion_key)
            .set_signing_key(signing_key)
            .set_signature(signature)
            .published(SystemTime::now());
        if let Some(ntor) = ntor_onion_key {
            builder.set_ntor_onion_key(ntor);
        }
        let desc = Arc::new(builder.build().map_err(ErrorDetail::from)?);

        let replaced = self.store.replace_current(Arc::clone(&desc));
        let verb = if replaced.is_some() {
            "replaced"
        } else {
            "installed"
        };
        info!(
            "{} descriptor for {} ({})",
            verb,
            desc.nickname(),
            desc.fingerprint()
        );
        self.report(&format!(
            "{} descriptor for {} ({})",
            verb,
            desc.nickname(),
            desc.fingerprint()
        ));
        Ok(desc)
    }

    /// Decide whether this node would carry a connection to `addr` on
    /// `port` out of the network.
    ///
    /// Uses the policy on our current descriptor if we have one, and the
    /// configured policy otherwise.
    pub fn decide_exit(&self, addr: &IpAddr, port: u16) -> RuleKind {
        let decision = match self.store.current() {
            Some(desc) => desc.decide_exit(addr, port),
            None => self.exit_policy.decide(addr, port),
        };
        debug!(
            "Exit decision for {}:{}: {}",
            sensitive(addr),
            port,
            decision
        );
        decision
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
    use crate::logging::discard;
    use std::sync::Mutex;
    use tor_error::{ErrorKind, HasKind};
    use tracing_test::traced_test;

    fn keys(fp: u8) -> LocalKeys {
        LocalKeys::new(
            [fp; 20].into(),
            vec![1_u8, 2, 3].into(),
            vec![4_u8, 5, 6].into(),
            vec![7_u8, 8, 9].into(),
        )
    }

    fn recording_sink() -> (LogSink, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let lines2 = Arc::clone(&lines);
        let sink: LogSink = Arc::new(move |m: &str| lines2.lock().unwrap().push(m.to_owned()));
        (sink, lines)
    }

    fn exit_options(rules: &[&str]) -> NodeOptions {
        let mut b = NodeOptions::builder();
        b.relay().nickname("ExitNode").onion_port(9001);
        b.exit()
            .exit_rules(rules.iter().map(|r| r.parse().unwrap()).collect());
        b.build().unwrap()
    }

    #[test]
    fn non_exit_rejects_everything() {
        let relay = OnionRelay::new(NodeOptions::default(), discard()).unwrap();
        assert_eq!(relay.roles(), vec![Role::Entrance]);
        assert!(!relay.publishes());
        assert_eq!(
            relay.decide_exit(&"93.184.216.34".parse().unwrap(), 80),
            RuleKind::Reject
        );
        assert_eq!(
            relay.decide_exit(&"2001:db8::1".parse().unwrap(), 80),
            RuleKind::Reject
        );
        let e = relay.publish(keys(1)).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::BadApiUsage);
    }

    #[test]
    fn refuses_useless_exit() {
        let options = exit_options(&["reject *:*"]);
        let e = OnionRelay::new(options, discard()).unwrap_err();
        assert!(e.is_config_problem());
        assert!(e.to_string().contains("accepts no destinations"));

        // Section fields are public, so the rule list can be emptied after
        // validation.
        let mut options = exit_options(&["accept *:80"]);
        if let Some(exit) = options.exit.as_mut() {
            exit.exit_rules.clear();
        }
        let e = OnionRelay::new(options, discard()).unwrap_err();
        assert!(e.to_string().contains("no exit rules"));

        // Accept rules that an earlier reject hides are no use either.
        for rules in [
            &["reject *:*", "accept *:80"][..],
            &["reject 0.0.0.0/0:1-65535", "reject *:0", "accept 192.0.2.0/24:443"][..],
        ] {
            let e = OnionRelay::new(exit_options(rules), discard()).unwrap_err();
            assert!(e.is_config_problem(), "{:?}", rules);
            assert!(e.to_string().contains("accepts no destinations"));
        }

        // An IPv6 policy that accepts something is enough.
        let mut options = exit_options(&["reject *:*", "accept *:80"]);
        if let Some(exit) = options.exit.as_mut() {
            exit.ipv6_policy = "accept 443".parse().unwrap();
        }
        assert!(OnionRelay::new(options, discard()).is_ok());
    }

    #[test]
    fn exit_only_node_publishes_default_port() {
        let mut b = NodeOptions::builder();
        b.exit();
        let relay = OnionRelay::from_builder(&b, discard()).unwrap();
        assert!(!relay.has_role(Role::Relay));
        assert!(relay.publishes());
        let desc = relay.publish(keys(7)).unwrap();
        assert_eq!(desc.orport(), DEFAULT_ONION_PORT);
        assert_eq!(desc.nickname().as_str(), "Unnamed");
    }

    #[test]
    fn publish_and_decide() {
        let (sink, lines) = recording_sink();
        let relay = OnionRelay::new(exit_options(&["accept *:443"]), sink).unwrap();
        assert!(relay.publishes());
        assert!(relay.store().current().is_none());

        let desc = relay.publish(keys(0x42)).unwrap();
        assert_eq!(desc.nickname().as_str(), "ExitNode");
        assert_eq!(desc.orport(), 9001);
        assert_eq!(desc.link_protocols(), &[4, 5]);
        assert!(desc.published().is_some());
        assert!(desc.platform().unwrap().starts_with("onion-relay "));
        assert_eq!(desc.status_log()[0], "roles: relay, exit");
        assert!(Arc::ptr_eq(&relay.store().current().unwrap(), &desc));

        let dest: IpAddr = "198.51.100.7".parse().unwrap();
        assert_eq!(relay.decide_exit(&dest, 443), RuleKind::Accept);
        assert_eq!(relay.decide_exit(&dest, 80), RuleKind::Reject);

        relay.publish(keys(0x42)).unwrap();
        let lines = lines.lock().unwrap();
        assert_eq!(
            *lines,
            vec![
                "node roles: relay, exit".to_owned(),
                format!("installed descriptor for ExitNode ({})", keys(0x42).fingerprint()),
                format!("replaced descriptor for ExitNode ({})", keys(0x42).fingerprint()),
            ]
        );
    }

    #[test]
    fn unnamed() {
        let mut b = NodeOptions::builder();
        b.relay().contact("someone@example.com");
        let relay = OnionRelay::new(b.build().unwrap(), discard()).unwrap();
        let desc = relay
            .publish(keys(7).with_ntor_onion_key([9; 32].into()))
            .unwrap();
        assert_eq!(desc.nickname().as_str(), "Unnamed");
        assert_eq!(desc.contact(), Some("someone@example.com"));
        assert_eq!(desc.ntor_onion_key().unwrap().as_bytes(), &[9; 32]);
        // Not an exit, so the published policy rejects everything.
        assert!(!desc.exit_policy().allows_some_destination());
    }

    #[test]
    #[traced_test]
    fn logs_roles_without_addresses() {
        let relay = OnionRelay::new(exit_options(&["accept *:443"]), discard()).unwrap();
        assert!(logs_contain("Node roles: relay, exit"));
        assert!(logs_contain("IPv4 summary \"accept 443\""));

        relay.decide_exit(&"198.51.100.7".parse().unwrap(), 443);
        assert!(logs_contain("Exit decision for [scrubbed]:443: accept"));
        assert!(!logs_contain("198.51.100.7"));
    }

    #[test]
    fn key_file() {
        let fp = "0123456789ABCDEF0123456789ABCDEF01234567";
        let text = format!(
            "fingerprint = \"{}\"\nonion_key = \"0102\"\nsigning_key = \"0304\"\nsignature = \"aabb\"\n",
            fp
        );
        let keys = LocalKeys::from_toml_str(&text, "keys.toml").unwrap();
        assert_eq!(keys.fingerprint().to_string(), fp);
        assert_eq!(keys.onion_key.as_bytes(), &[1, 2]);
        assert_eq!(keys.signing_key.as_bytes(), &[3, 4]);
        assert_eq!(keys.signature.as_bytes(), &[0xaa, 0xbb]);
        assert!(keys.ntor_onion_key.is_none());

        let with_ntor = format!("{}ntor_onion_key = \"{}\"\n", text, "11".repeat(32));
        let keys = LocalKeys::from_toml_str(&with_ntor, "keys.toml").unwrap();
        assert_eq!(keys.ntor_onion_key.unwrap().as_bytes(), &[0x11; 32]);

        let short_ntor = format!("{}ntor_onion_key = \"1122\"\n", text);
        assert!(matches!(
            LocalKeys::from_toml_str(&short_ntor, "keys.toml"),
            Err(ConfigLoadError::Shape(_))
        ));

        let bad_hex = text.replace("0102", "zz");
        let e = LocalKeys::from_toml_str(&bad_hex, "keys.toml").unwrap_err();
        assert!(e.to_string().contains("onion_key"), "{}", e);

        let missing = "fingerprint = \"00\"\n";
        assert!(matches!(
            LocalKeys::from_toml_str(missing, "keys.toml"),
            Err(ConfigLoadError::Syntax { source_name, .. }) if source_name == "keys.toml"
        ));
    }

    #[test]
    fn bad_builder() {
        let mut b = NodeOptions::builder();
        b.entrance().max_connections(0);
        let e = OnionRelay::from_builder(&b, discard()).unwrap_err();
        assert!(e.is_config_problem());
        assert!(std::error::Error::source(&e)
            .unwrap()
            .to_string()
            .contains("Invalid node options"));
    }

    #[test]
    #[traced_test]
    fn warns_about_no_roles() {
        let opts = NodeOptions::builder().build().unwrap();
        let relay = OnionRelay::new(opts, discard()).unwrap();
        assert!(relay.roles().is_empty());
        assert!(logs_contain("No roles are enabled"));
    }
}
