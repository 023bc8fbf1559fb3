//! Hierarchical container store for h5gate.
//!
//! The engine never touches a binary container directly. Everything it needs
//! from the storage layer goes through [`HierStore`]:
//!
//! - groups and datasets addressed by slash-delimited paths,
//! - attributes on either kind of object,
//! - hard links (several names for one stored object), soft links (a stored
//!   redirect to a path) and external links (a redirect into another file),
//! - a stable low-level [`ObjectId`] per stored object, which is what lets the
//!   link tracker recognise hard-link aliases.
//!
//! [`MemStore`] is the in-process reference implementation. It persists as a
//! JSON snapshot, which is what the CLI and the test-suites operate on.

pub mod error;
pub mod mem;
pub mod path;
pub mod value;

pub use error::StoreError;
pub use mem::MemStore;
pub use value::Value;

use serde::{Deserialize, Serialize};

/// Stable identity of a stored object (shared by every hard link to it).
pub type ObjectId = u64;

/// How a container was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenMode {
    /// Existing container, no modification allowed.
    Read,
    /// New container (any previous content is discarded).
    Write,
    /// Existing container, modifications allowed.
    ReadWrite,
}

impl OpenMode {
    pub fn is_mutable(self) -> bool {
        !matches!(self, OpenMode::Read)
    }

    /// True when the container is expected to already hold content.
    pub fn reads_existing(self) -> bool {
        !matches!(self, OpenMode::Write)
    }
}

impl std::str::FromStr for OpenMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "r" | "read" => Ok(OpenMode::Read),
            "w" | "write" => Ok(OpenMode::Write),
            "r+" | "rw" | "read_write" => Ok(OpenMode::ReadWrite),
            other => Err(format!("unknown open mode `{other}`")),
        }
    }
}

/// Kind of a child entry as seen by `list_children`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Group,
    Dataset,
    SoftLink,
    ExternalLink,
}

/// Redirect record carried by soft and external link entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LinkTarget {
    Soft { path: String },
    External { file: String, path: String },
}

/// One entry of a group listing.
///
/// `kind` is the kind of the entry itself: a soft link is reported as
/// `SoftLink` even if its target is a group. `object_id` is only set for hard
/// entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildEntry {
    pub name: String,
    pub kind: EntryKind,
    pub object_id: Option<ObjectId>,
    pub link: Option<LinkTarget>,
}

/// Storage options for a new dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetOptions {
    pub dtype: Option<String>,
    pub dims: Option<Vec<String>>,
    pub compress: bool,
}

/// The collaborator interface to a hierarchical binary container.
///
/// All paths are absolute. Reads follow soft links in intermediate path
/// components; they fail with [`StoreError::ExternalLink`] when resolution
/// would have to leave the file.
pub trait HierStore {
    fn mode(&self) -> OpenMode;

    /// Resolve `path` to a stored object (following soft links).
    fn object_id(&self, path: &str) -> Result<ObjectId, StoreError>;

    /// True if `path` names an entry, including dangling link entries.
    fn exists(&self, path: &str) -> bool;

    /// Object kind of `path` after following links (`Group` or `Dataset`).
    fn kind_of(&self, path: &str) -> Result<EntryKind, StoreError>;

    fn create_group(&mut self, parent: &str, name: &str) -> Result<(), StoreError>;

    fn create_dataset(
        &mut self,
        parent: &str,
        name: &str,
        value: Value,
        options: &DatasetOptions,
    ) -> Result<(), StoreError>;

    fn set_attribute(&mut self, path: &str, name: &str, value: Value) -> Result<(), StoreError>;

    fn get_value(&self, path: &str) -> Result<Value, StoreError>;

    fn get_attribute(&self, path: &str, name: &str) -> Result<Option<Value>, StoreError>;

    fn attributes(&self, path: &str) -> Result<Vec<(String, Value)>, StoreError>;

    fn list_children(&self, path: &str) -> Result<Vec<ChildEntry>, StoreError>;

    /// Create `source` as an additional name for the object at `target`.
    fn create_hard_link(&mut self, source: &str, target: &str) -> Result<(), StoreError>;

    /// Create `source` as a redirect to the path `target` (which need not exist yet).
    fn create_soft_link(&mut self, source: &str, target: &str) -> Result<(), StoreError>;

    fn create_external_link(
        &mut self,
        source: &str,
        file: &str,
        target: &str,
    ) -> Result<(), StoreError>;
}
