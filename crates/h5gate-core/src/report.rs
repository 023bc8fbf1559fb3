//! Accumulated diagnostics.
//!
//! A bulk pass (binding an existing container, computing autogen fields,
//! final validation) records every problem it finds instead of stopping at
//! the first one. Errors fail the session at close; warnings are informative.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Stored node matches no declared member of a closed group.
    SchemaViolation,
    /// Stored node in an open group that matches no declared member.
    Unrecognized,
    MultiplicityExceeded,
    RequiredMemberMissing,
    /// Link target has the wrong type.
    LinkTargetType,
    /// Dangling link or unresolvable link chain.
    LinkIntegrity,
    /// Computed value disagrees with the stored one.
    AutogenMismatch,
    /// Stored value has the right content in the wrong order.
    AutogenUnsorted,
    /// A directive's target could not be resolved as required.
    AutogenTarget,
    /// A computed value could not be written back.
    AutogenUpdate,
    /// A `const` field holds something else.
    ConstMismatch,
}

impl DiagnosticKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagnosticKind::SchemaViolation => "schema violation",
            DiagnosticKind::Unrecognized => "unrecognized",
            DiagnosticKind::MultiplicityExceeded => "multiplicity exceeded",
            DiagnosticKind::RequiredMemberMissing => "required member missing",
            DiagnosticKind::LinkTargetType => "link target type",
            DiagnosticKind::LinkIntegrity => "link integrity",
            DiagnosticKind::AutogenMismatch => "autogen mismatch",
            DiagnosticKind::AutogenUnsorted => "autogen unsorted",
            DiagnosticKind::AutogenTarget => "autogen target",
            DiagnosticKind::AutogenUpdate => "autogen update",
            DiagnosticKind::ConstMismatch => "const mismatch",
        }
    }
}

impl std::fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.path, self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
}

impl Report {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn error(&mut self, kind: DiagnosticKind, path: impl Into<String>, message: impl Into<String>) {
        let diagnostic = Diagnostic {
            kind,
            path: path.into(),
            message: message.into(),
        };
        tracing::debug!(kind = %diagnostic.kind, path = %diagnostic.path, message = %diagnostic.message, "error recorded");
        self.errors.push(diagnostic);
    }

    pub fn warn(&mut self, kind: DiagnosticKind, path: impl Into<String>, message: impl Into<String>) {
        let diagnostic = Diagnostic {
            kind,
            path: path.into(),
            message: message.into(),
        };
        tracing::warn!(kind = %diagnostic.kind, path = %diagnostic.path, message = %diagnostic.message, "validation warning");
        self.warnings.push(diagnostic);
    }

    /// Record as an error, or as a warning when `demote` is set.
    pub fn record(
        &mut self,
        demote: bool,
        kind: DiagnosticKind,
        path: impl Into<String>,
        message: impl Into<String>,
    ) {
        if demote {
            self.warn(kind, path, message);
        } else {
            self.error(kind, path, message);
        }
    }

    /// Errors of one kind (mostly useful in tests and the CLI summary).
    pub fn errors_of(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.errors.iter().filter(move |d| d.kind == kind)
    }

    pub fn warnings_of(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.warnings.iter().filter(move |d| d.kind == kind)
    }
}
