//! The h5gate specification language.
//!
//! A specification is a set of JSON namespaces. Each namespace defines named
//! node types (`<TimeSeries>/`, `<Electrode>`) and optionally the root group
//! `/`. Types compose through `merge` (inheritance), `include` (variable
//! members of another type) and the definition's own members.
//!
//! [`Registry::load`] parses, validates and resolves all of this once; the
//! session engine only ever reads the resulting [`Effective`] definitions.

pub mod autogen;
pub mod error;
pub mod ident;
pub mod model;
mod raw;
pub mod registry;
pub mod source;

pub use autogen::{AutogenKind, AutogenSpec, TargetSignature};
pub use error::SpecError;
pub use ident::{parse_member_id, MemberId, MemberName, NodeKind, QualifiedId, Quantity};
pub use model::{AttrSpec, LinkSpec, Namespace, NamespaceInfo, NodeSpec, TypeDef};
pub use registry::{Effective, MemberMatch, Registry};
pub use source::SpecSource;
