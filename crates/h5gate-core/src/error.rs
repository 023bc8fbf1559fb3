use h5gate_spec::SpecError;
use h5gate_store::StoreError;
use thiserror::Error;

use crate::report::Report;

/// Errors that abort a session.
///
/// Problems found while scanning a whole container are accumulated into a
/// [`Report`] instead; they only surface here, as
/// [`GateError::ValidationFailed`], when the session is closed.
#[derive(Debug, Error)]
pub enum GateError {
    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("schema violation at `{path}`: {message}")]
    SchemaViolation { path: String, message: String },

    #[error("`{member}` in `{parent}` already has {max} instance(s)")]
    MultiplicityExceeded {
        parent: String,
        member: String,
        max: usize,
    },

    #[error("link integrity error at `{path}`: {message}")]
    LinkIntegrity { path: String, message: String },

    #[error("autogen error at `{path}`: {message}")]
    Autogen { path: String, message: String },

    #[error("session opened read-only; cannot modify `{path}`")]
    ReadOnly { path: String },

    #[error(
        "validation failed with {} error(s) and {} warning(s)",
        report.errors.len(),
        report.warnings.len()
    )]
    ValidationFailed { report: Report },
}

pub type Result<T, E = GateError> = std::result::Result<T, E>;
