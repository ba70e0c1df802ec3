//! Declare configuration error types.

use std::path::PathBuf;
use std::sync::Arc;

use tor_error::{ErrorKind, HasKind};

/// An error related to an option passed to a node via a configuration
/// builder.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigBuildError {
    /// A mandatory field was not present.
    #[error("Field was not provided: {field}")]
    MissingField {
        /// The name of the missing field.
        field: String,
    },
    /// A single field had a value that proved to be unusable.
    #[error("Value of {field} was incorrect: {problem}")]
    Invalid {
        /// The name of the invalid field
        field: String,
        /// A description of the problem.
        problem: String,
    },
}

impl From<derive_builder::UninitializedFieldError> for ConfigBuildError {
    fn from(val: derive_builder::UninitializedFieldError) -> Self {
        ConfigBuildError::MissingField {
            field: val.field_name().to_string(),
        }
    }
}

impl ConfigBuildError {
    /// Return a new ConfigBuildError that prefixes its field name with
    /// `prefix` and a dot.
    #[must_use]
    pub fn within(&self, prefix: &str) -> Self {
        use ConfigBuildError::*;
        let addprefix = |field: &str| format!("{}.{}", prefix, field);
        match self {
            MissingField { field } => MissingField {
                field: addprefix(field),
            },
            Invalid { field, problem } => Invalid {
                field: addprefix(field),
                problem: problem.clone(),
            },
        }
    }

    /// Return the (possibly dotted) name of the field this error is about.
    pub fn field(&self) -> &str {
        match self {
            ConfigBuildError::MissingField { field } | ConfigBuildError::Invalid { field, .. } => {
                field
            }
        }
    }
}

impl HasKind for ConfigBuildError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidConfig
    }
}

/// An error that occurred while reading configuration sources.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigLoadError {
    /// A configuration file could not be read.
    #[error("Unable to read configuration file {}", path.display())]
    Io {
        /// The file we tried to read.
        path: PathBuf,
        /// What went wrong.
        #[source]
        err: Arc<std::io::Error>,
    },
    /// A configuration file, or the command line, was not valid TOML.
    #[error("Couldn't parse {source_name}: {message}")]
    Syntax {
        /// Where the bad TOML came from.
        source_name: String,
        /// The parser's description of the problem.
        message: String,
    },
    /// The merged configuration did not have the expected shape.
    #[error("Configuration has the wrong shape: {0}")]
    Shape(String),
    /// The merged configuration had the right shape, but bad values.
    #[error("Invalid configuration")]
    Build(#[from] ConfigBuildError),
}

impl HasKind for ConfigLoadError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidConfig
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
    fn within() {
        let e1 = ConfigBuildError::MissingField {
            field: "nickname".to_owned(),
        }
        .within("relay");
        let e2 = ConfigBuildError::Invalid {
            field: "max_circuits".to_owned(),
            problem: "must be at least 1".to_owned(),
        }
        .within("entrance");
        assert_eq!(e1.to_string(), "Field was not provided: relay.nickname");
        assert_eq!(
            e2.to_string(),
            "Value of entrance.max_circuits was incorrect: must be at least 1"
        );
        assert_eq!(e2.field(), "entrance.max_circuits");
        assert_eq!(e2.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn converted() {
        let e: ConfigBuildError = derive_builder::UninitializedFieldError::new("bob").into();
        assert!(matches!(e, ConfigBuildError::MissingField { field } if field == "bob"));
    }
}
