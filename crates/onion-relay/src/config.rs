//! Types and functions to configure an onion-routing node.
//!
//! A node can play any combination of three roles: entrance (building
//! circuits for local clients), relay (carrying other people's circuits),
//! and exit (connecting circuits to the wider internet).  Each role has its
//! own section in [`NodeOptions`].  A role whose section is absent is off;
//! that is different from a role that is on with every setting left at its
//! default.

mod err;

pub use err::{ConfigBuildError, ConfigLoadError};

use std::str::FromStr;

use derive_builder::Builder;
use onion_netdoc::types::policy::{AddrSpec, ExitPolicy, ExitRule, PortPolicy, PortSpec};
use onion_netdoc::types::Nickname;
use serde::{Deserialize, Serialize};
use tracing::metadata::Level;
use tracing_subscriber::filter::Targets;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: Level = Level::INFO;

/// Ports that a new exit accepts, from any address, unless configured
/// otherwise.
pub const DEFAULT_EXIT_PORTS: [u16; 5] = [22, 80, 443, 465, 993];

/// Port on which a node accepts connections from other nodes, unless
/// configured otherwise.
pub const DEFAULT_ONION_PORT: u16 = 9374;

/// One of the roles a node can play.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, derive_more::Display)]
#[non_exhaustive]
pub enum Role {
    /// Build circuits on behalf of local clients.
    #[display("entrance")]
    Entrance,
    /// Carry circuits for others.
    #[display("relay")]
    Relay,
    /// Connect circuits to destinations outside the network.
    #[display("exit")]
    Exit,
}

/// Return an error if `value` is present and zero.
fn check_positive(field: &str, value: Option<u32>) -> Result<(), ConfigBuildError> {
    if value == Some(0) {
        return Err(ConfigBuildError::Invalid {
            field: field.to_owned(),
            problem: "must be at least 1".to_owned(),
        });
    }
    Ok(())
}

/// Configuration for the entrance role.
#[derive(Debug, Clone, Builder, Eq, PartialEq, Serialize)]
#[builder(build_fn(error = "ConfigBuildError", validate = "Self::validate"))]
#[builder(derive(Debug, Serialize, Deserialize))]
#[non_exhaustive]
pub struct EntranceConfig {
    /// How many intermediate hops to use in circuits this node builds.
    #[builder_field_attr(serde(default))]
    #[builder(default = "6")]
    pub internal_circuit_length: u32,
    /// How many circuits to keep open at once.
    #[builder_field_attr(serde(default))]
    #[builder(default = "3")]
    pub max_circuits: u32,
    /// How many client connections to accept at once.
    #[builder_field_attr(serde(default))]
    #[builder(default = "3")]
    pub max_connections: u32,
}

impl EntranceConfigBuilder {
    /// Check that every count is at least one.
    fn validate(&self) -> Result<(), ConfigBuildError> {
        check_positive("internal_circuit_length", self.internal_circuit_length)?;
        check_positive("max_circuits", self.max_circuits)?;
        check_positive("max_connections", self.max_connections)?;
        Ok(())
    }
}

/// Configuration for the relay role.
#[derive(Debug, Clone, Builder, Eq, PartialEq, Serialize)]
#[builder(build_fn(error = "ConfigBuildError", validate = "Self::validate"))]
#[builder(derive(Debug, Serialize, Deserialize))]
#[non_exhaustive]
pub struct RelayConfig {
    /// Port on which to accept connections from other nodes.
    #[builder_field_attr(serde(default))]
    #[builder(default = "DEFAULT_ONION_PORT")]
    pub onion_port: u16,
    /// Nickname to publish.  Empty means no nickname was chosen.
    #[builder_field_attr(serde(default))]
    #[builder(default, setter(into))]
    pub nickname: String,
    /// Contact information for the operator.
    #[builder_field_attr(serde(default))]
    #[builder(default, setter(into, strip_option))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
}

impl RelayConfigBuilder {
    /// Check the port and nickname.
    fn validate(&self) -> Result<(), ConfigBuildError> {
        if self.onion_port == Some(0) {
            return Err(ConfigBuildError::Invalid {
                field: "onion_port".to_owned(),
                problem: "must not be zero".to_owned(),
            });
        }
        if let Some(nickname) = self.nickname.as_deref().filter(|n| !n.is_empty()) {
            nickname
                .parse::<Nickname>()
                .map_err(|e| ConfigBuildError::Invalid {
                    field: "nickname".to_owned(),
                    problem: e.to_string(),
                })?;
        }
        Ok(())
    }
}

impl RelayConfig {
    /// Return the configured nickname, if one was chosen.
    pub fn chosen_nickname(&self) -> Option<Nickname> {
        // Checked when this config was built.
        self.nickname.parse().ok()
    }
}

/// Return the rules a new exit starts with.
fn default_exit_rules() -> Vec<ExitRule> {
    DEFAULT_EXIT_PORTS
        .iter()
        .map(|port| ExitRule::accept(AddrSpec::all(), PortSpec::single(*port)))
        .collect()
}

/// Configuration for the exit role.
#[derive(Debug, Clone, Builder, Eq, PartialEq, Serialize)]
#[builder(build_fn(error = "ConfigBuildError", validate = "Self::validate"))]
#[builder(derive(Debug, Serialize, Deserialize))]
#[non_exhaustive]
pub struct ExitConfig {
    /// Rules for IPv4 destinations, in the order they are checked.
    ///
    /// Anything that no rule matches is rejected.
    #[builder_field_attr(serde(default))]
    #[builder(default = "default_exit_rules()")]
    pub exit_rules: Vec<ExitRule>,
    /// Ports to allow on IPv6 destinations.
    #[builder_field_attr(serde(default))]
    #[builder(default)]
    pub ipv6_policy: PortPolicy,
}

impl ExitConfigBuilder {
    /// Refuse an explicitly empty rule list.
    fn validate(&self) -> Result<(), ConfigBuildError> {
        if self.exit_rules.as_ref().is_some_and(Vec::is_empty) {
            return Err(ConfigBuildError::Invalid {
                field: "exit_rules".to_owned(),
                problem: "no rules given; leave out the exit section to disable exiting"
                    .to_owned(),
            });
        }
        Ok(())
    }
}

impl ExitConfig {
    /// Return the exit policy described by this configuration.
    pub fn exit_policy(&self) -> ExitPolicy {
        ExitPolicy::new(self.exit_rules.clone(), self.ipv6_policy.clone())
    }
}

/// Logging configuration options.
#[derive(Debug, Clone, Builder, Eq, PartialEq, Serialize)]
#[builder(build_fn(error = "ConfigBuildError", validate = "Self::validate"))]
#[builder(derive(Debug, Serialize, Deserialize))]
#[non_exhaustive]
pub struct LoggingConfig {
    /// Filtering directives that determine tracing levels as described at
    /// <https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/targets/struct.Targets.html#impl-FromStr-for-Targets>
    ///
    /// You can override this setting with the `-l`, `--log-level` command line parameter.
    ///
    /// Example: "info,onion_relay::relay=debug"
    #[builder_field_attr(serde(default))]
    #[builder(default = "DEFAULT_LOG_LEVEL.to_string()", setter(into))]
    pub console: String,
}

impl LoggingConfigBuilder {
    /// Check that the console filter parses.
    fn validate(&self) -> Result<(), ConfigBuildError> {
        if let Some(console) = &self.console {
            Targets::from_str(console).map_err(|e| ConfigBuildError::Invalid {
                field: "console".to_string(),
                problem: e.to_string(),
            })?;
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            console: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

/// The complete configuration of a node.
///
/// Most users will get one of these from
/// [`ConfigSources::load`](crate::sources::ConfigSources::load), or build
/// one with [`NodeOptionsBuilder`].
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
#[non_exhaustive]
pub struct NodeOptions {
    /// Entrance role settings; `None` if the node is not an entrance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entrance: Option<EntranceConfig>,
    /// Relay role settings; `None` if the node does not relay.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay: Option<RelayConfig>,
    /// Exit role settings; `None` if the node is not an exit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit: Option<ExitConfig>,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Default for NodeOptions {
    /// Return the options for a node that is only an entrance, with default
    /// settings.
    fn default() -> Self {
        NodeOptions {
            entrance: Some(EntranceConfig {
                internal_circuit_length: 6,
                max_circuits: 3,
                max_connections: 3,
            }),
            relay: None,
            exit: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl NodeOptions {
    /// Return a new builder with no roles enabled.
    pub fn builder() -> NodeOptionsBuilder {
        NodeOptionsBuilder::default()
    }

    /// Return the roles this node plays, in a fixed order.
    pub fn roles(&self) -> Vec<Role> {
        [
            (Role::Entrance, self.entrance.is_some()),
            (Role::Relay, self.relay.is_some()),
            (Role::Exit, self.exit.is_some()),
        ]
        .into_iter()
        .filter_map(|(role, on)| on.then_some(role))
        .collect()
    }

    /// Return true if this node plays `role`.
    pub fn has_role(&self, role: Role) -> bool {
        self.roles().contains(&role)
    }
}

/// Builder for [`NodeOptions`].
///
/// Each role section starts out absent.  Asking for a section's builder
/// (for example with [`entrance`](Self::entrance)) turns that role on with
/// default settings; the `disable_*` methods turn it off again.
///
/// This type deserializes from TOML: a missing table means the role is
/// off, and an empty table means the role is on with defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeOptionsBuilder {
    /// Entrance section, if present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    entrance: Option<EntranceConfigBuilder>,
    /// Relay section, if present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    relay: Option<RelayConfigBuilder>,
    /// Exit section, if present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exit: Option<ExitConfigBuilder>,
    /// Logging section.
    #[serde(default)]
    logging: LoggingConfigBuilder,
}

/// Build an optional section, labelling any error with the section name.
fn build_section<B, T>(
    section: Option<&B>,
    name: &str,
    build: impl FnOnce(&B) -> Result<T, ConfigBuildError>,
) -> Result<Option<T>, ConfigBuildError> {
    section
        .map(build)
        .transpose()
        .map_err(|e| e.within(name))
}

impl NodeOptionsBuilder {
    /// Turn on the entrance role, and return its settings for changing.
    pub fn entrance(&mut self) -> &mut EntranceConfigBuilder {
        self.entrance.get_or_insert_with(Default::default)
    }

    /// Turn on the relay role, and return its settings for changing.
    pub fn relay(&mut self) -> &mut RelayConfigBuilder {
        self.relay.get_or_insert_with(Default::default)
    }

    /// Turn on the exit role, and return its settings for changing.
    pub fn exit(&mut self) -> &mut ExitConfigBuilder {
        self.exit.get_or_insert_with(Default::default)
    }

    /// Return the logging settings for changing.
    pub fn logging(&mut self) -> &mut LoggingConfigBuilder {
        &mut self.logging
    }

    /// Turn off the entrance role.
    pub fn disable_entrance(&mut self) -> &mut Self {
        self.entrance = None;
        self
    }

    /// Turn off the relay role.
    pub fn disable_relay(&mut self) -> &mut Self {
        self.relay = None;
        self
    }

    /// Turn off the exit role.
    pub fn disable_exit(&mut self) -> &mut Self {
        self.exit = None;
        self
    }

    /// Try to build the options.
    pub fn build(&self) -> Result<NodeOptions, ConfigBuildError> {
        Ok(NodeOptions {
            entrance: build_section(self.entrance.as_ref(), "entrance", |b| b.build())?,
            relay: build_section(self.relay.as_ref(), "relay", |b| b.build())?,
            exit: build_section(self.exit.as_ref(), "exit", |b| b.build())?,
            logging: self.logging.build().map_err(|e| e.within("logging"))?,
        })
    }
}
