//! Error type for constructing router descriptors.

use thiserror::Error;
use tor_error::{ErrorKind, HasKind};

use crate::types::policy::PolicyError;

/// An error that occurs while trying to construct a router descriptor.
///
/// Every variant here is a construction-time failure: once a
/// [`RouterDesc`](crate::doc::routerdesc::RouterDesc) exists, nothing that
/// reads it can fail.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum BuildError {
    /// We were unable to build the descriptor, because some required
    /// non-key field was never set.
    #[error("cannot build descriptor: missing {0}")]
    MissingField(&'static str),

    /// Somebody asked for key material (or a signature) that a descriptor
    /// template does not have yet.
    ///
    /// A blank template carries no usable keys.  Asking it for them, or
    /// trying to turn it into a live descriptor without supplying them, is
    /// a programming error on the caller's side.
    #[error("key material {field:?} has not been initialized")]
    UninitializedKeyMaterial {
        /// Which piece of key material was missing.
        field: &'static str,
    },

    /// A nickname did not follow the nickname rules.
    #[error("invalid nickname {0:?}")]
    BadNickname(String),

    /// A fingerprint was not 20 bytes of hex.
    #[error("invalid fingerprint {0:?}")]
    BadFingerprint(String),

    /// An exit rule or port policy could not be constructed.
    #[error("invalid exit policy")]
    Policy(#[from] PolicyError),
}

impl HasKind for BuildError {
    fn kind(&self) -> ErrorKind {
        use BuildError as E;
        match self {
            E::MissingField(_) | E::UninitializedKeyMaterial { .. } => ErrorKind::BadApiUsage,
            E::BadNickname(_) | E::BadFingerprint(_) | E::Policy(_) => ErrorKind::InvalidConfig,
        }
    }
}
