//! h5gate engine.
//!
//! Reads and writes hierarchical containers under the control of a loaded
//! [`h5gate_spec::Registry`]:
//!
//! - [`links`]: equivalence classes of paths that alias each other
//! - [`tree`]: the spec-bound view of a container, one node per path
//! - [`autogen`]: fields derived from the tree (`links`, `names`, `length`, ...)
//! - [`session`]: one open container, from `open`/`create` to `close`
//!
//! Whole-container passes accumulate problems in a [`Report`]; client calls
//! that would break the schema fail immediately with a [`GateError`].

pub mod autogen;
pub mod error;
pub mod links;
pub mod options;
pub mod report;
pub mod session;
pub mod tree;

pub use autogen::{AutogenEngine, Directive, DirectiveState};
pub use error::{GateError, Result};
pub use links::{LinkGroup, LinkKind, LinkRole, LinkTracker, LocationKey};
pub use options::{SessionOptions, DEFAULT_MAX_LINK_HOPS};
pub use report::{Diagnostic, DiagnosticKind, Report};
pub use session::{Closed, LinkRef, Session, SCHEMA_ID_ATTR};
pub use tree::{LinkState, Node, NodeId, NodeTree};
