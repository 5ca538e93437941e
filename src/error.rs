//! Build errors
//!
//! Every failure here is raised while building a plan, before anything is
//! handed to the provisioning engine. None of them are retryable: they mean
//! the deployment description itself is wrong.

use crate::resource::ResourceKind;
use thiserror::Error;

/// Errors raised while declaring, resolving or emitting a stack
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StackError {
    #[error("schema violation in {kind} '{name}': {cause}")]
    SchemaViolation {
        name: String,
        kind: ResourceKind,
        cause: String,
    },

    #[error("duplicate name '{name}'")]
    DuplicateName { name: String },

    #[error("cyclic dependency: {}", .names.join(" -> "))]
    CyclicDependency { names: Vec<String> },

    #[error("validation failed for {}: {cause}", .names.join(", "))]
    Validation { names: Vec<String>, cause: String },

    #[error("missing required context value '{key}'")]
    MissingContext { key: String },

    #[error("invalid context value '{key}': {cause}")]
    InvalidContext { key: String, cause: String },

    #[error("stack '{stack}' is {phase}, expected {expected}")]
    Sealed {
        stack: String,
        phase: &'static str,
        expected: &'static str,
    },
}

impl StackError {
    pub(crate) fn validation(names: &[&str], cause: impl Into<String>) -> Self {
        Self::Validation {
            names: names.iter().map(|n| n.to_string()).collect(),
            cause: cause.into(),
        }
    }

    /// Names of the descriptors (or context keys) the error is about
    pub fn offenders(&self) -> Vec<&str> {
        match self {
            Self::SchemaViolation { name, .. } | Self::DuplicateName { name } => vec![name.as_str()],
            Self::CyclicDependency { names } | Self::Validation { names, .. } => {
                names.iter().map(String::as_str).collect()
            }
            Self::MissingContext { key } | Self::InvalidContext { key, .. } => vec![key.as_str()],
            Self::Sealed { stack, .. } => vec![stack.as_str()],
        }
    }
}

pub type Result<T> = std::result::Result<T, StackError>;
