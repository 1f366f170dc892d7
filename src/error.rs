//! Errors raised while building, reading, and validating an object graph.
//!
//! Everything except `ValidationFailed` aborts the current build. Validation
//! violations are collected across the whole tree and surface together.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::Kind;
use crate::validate::Violations;

#[derive(Error, Debug)]
pub enum BindError {
    /// Empty, unparseable, or structurally unusable JSON input.
    #[error("malformed input: {reason}")]
    MalformedInput { reason: String },

    /// A root or referenced class is not registered.
    #[error("class `{class}` is not registered{}", referenced_by_suffix(.referenced_by))]
    UnresolvableSchema {
        class: String,
        referenced_by: Option<String>,
    },

    /// A class declaration that cannot be turned into a schema.
    #[error("invalid schema for `{class}`: {reason}")]
    InvalidSchema { class: String, reason: String },

    /// No member of the declared union accepts the observed value.
    #[error(
        "failed to load {identifier} declared as `{declared}` using {observed} value: {preview}\n\
         correct the schema for {identifier} or change the value in the input"
    )]
    TypeMismatch {
        identifier: String,
        declared: String,
        observed: Kind,
        preview: String,
    },

    /// A `$name` / `!$name` expression names a property not declared earlier.
    #[error("{identifier} refers to `${reference}`, which is not declared before it")]
    UndeclaredBackReference {
        identifier: String,
        reference: String,
    },

    /// No node on the lookup chain declares, captures, or computes the name.
    #[error("there is no property `{property}` in any of these class(es): {}", .class_chain.join(", "))]
    UnknownProperty {
        property: String,
        class_chain: Vec<String>,
    },

    /// Instantiation went deeper than the configured limit.
    #[error("depth limit of {limit} exceeded instantiating `{class}` at {path}")]
    DepthLimitExceeded {
        class: String,
        path: String,
        limit: usize,
    },

    /// A computed-value hook rejected the value it was given.
    #[error("{identifier}: {reason}")]
    Hook { identifier: String, reason: String },

    #[error("validation failed:\n{0}")]
    ValidationFailed(Violations),

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BindError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        BindError::MalformedInput {
            reason: reason.into(),
        }
    }

    pub fn invalid_schema(class: impl Into<String>, reason: impl Into<String>) -> Self {
        BindError::InvalidSchema {
            class: class.into(),
            reason: reason.into(),
        }
    }

    pub fn hook(identifier: impl Into<String>, reason: impl Into<String>) -> Self {
        BindError::Hook {
            identifier: identifier.into(),
            reason: reason.into(),
        }
    }
}

fn referenced_by_suffix(from: &Option<String>) -> String {
    match from {
        Some(from) => format!(" (referenced by {from})"),
        None => String::new(),
    }
}

pub type Result<T, E = BindError> = std::result::Result<T, E>;
