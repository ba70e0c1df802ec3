//! Declare relay-node specific errors.

use std::fmt::{self, Display};

use onion_netdoc::BuildError;
use thiserror::Error;
use tor_error::{ErrorKind, HasKind};

use crate::config::ConfigBuildError;

/// Main high-level error type for an onion-routing node.
///
/// If you need to handle different types of errors differently, use the
/// [`kind`](`tor_error::HasKind::kind`) trait method to check what kind of
/// error it is.
///
/// Note that although this type implements that standard
/// [`Error`](trait@std::error::Error) trait, the output of that trait's methods are
/// not covered by semantic versioning.  Specifically: you should not rely on
/// the specific output of `Display`, `Debug`, or `Error::source()` when run on
/// this type; it may change between patch versions without notification.
#[derive(Error, Clone, Debug)]
pub struct Error {
    /// The actual error.
    #[source]
    detail: Box<ErrorDetail>,
}

impl From<ErrorDetail> for Error {
    fn from(detail: ErrorDetail) -> Error {
        Error {
            detail: detail.into(),
        }
    }
}

/// Represents errors that can occur while configuring or running a node.
///
/// This enumeration is the inner view of an [`onion_relay::Error`](crate::Error).
#[derive(Error, Clone, Debug)]
#[non_exhaustive]
pub(crate) enum ErrorDetail {
    /// The node options could not be built.
    #[error("Invalid node options")]
    Config(#[from] ConfigBuildError),

    /// The configured exit rules do not make a usable exit policy.
    #[error("Refusing to act as an exit: {0}")]
    ExitPolicy(&'static str),

    /// We were asked to publish a descriptor, but this node neither relays
    /// nor exits.
    #[error("Cannot publish a descriptor: this node is not a relay")]
    NotPublishing,

    /// We could not build a router descriptor.
    #[error("Unable to build router descriptor")]
    Descriptor(#[from] BuildError),

    /// A programming problem, either in our code or the code calling it.
    #[error("Programming problem")]
    Bug(#[from] tor_error::Bug),
}

impl Error {
    /// Return true if this error came from the node's configuration.
    pub fn is_config_problem(&self) -> bool {
        self.kind() == ErrorKind::InvalidConfig
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "onion-relay: {}: {}", self.detail.kind(), &self.detail)
    }
}

impl HasKind for Error {
    fn kind(&self) -> ErrorKind {
        self.detail.kind()
    }
}

impl HasKind for ErrorDetail {
    fn kind(&self) -> ErrorKind {
        use ErrorDetail as E;
        match self {
            E::Config(_) | E::ExitPolicy(_) => ErrorKind::InvalidConfig,
            E::NotPublishing => ErrorKind::BadApiUsage,
            E::Descriptor(e) => e.kind(),
            E::Bug(e) => e.kind(),
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

    /// This code makes sure that our errors implement all the traits we want.
    #[test]
    fn traits_ok() {
        // I had intended to use `assert_impl`, but that crate can't check whether
        // a type is 'static.
        fn assert<
            T: Send + Sync + Clone + std::fmt::Debug + Display + std::error::Error + 'static,
        >() {
        }
        fn check() {
            assert::<Error>();
            assert::<ErrorDetail>();
        }
        check(); // doesn't do anything, but avoids "unused function" warnings.
    }

    #[test]
    fn kinds() {
        let e: Error = ErrorDetail::ExitPolicy("no rules").into();
        assert_eq!(e.kind(), ErrorKind::InvalidConfig);
        assert!(e.is_config_problem());
        assert_eq!(
            e.to_string(),
            "onion-relay: invalid configuration: Refusing to act as an exit: no rules"
        );

        let e: Error =
            ErrorDetail::from(BuildError::UninitializedKeyMaterial { field: "signature" }).into();
        assert_eq!(e.kind(), ErrorKind::BadApiUsage);
        assert!(!e.is_config_problem());
    }
}
