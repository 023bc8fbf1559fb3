//! File sessions.
//!
//! A session owns everything derived from one open container: the link
//! tracker, the spec-bound node tree, the report and the autogen directives.
//! Nothing is shared between sessions.
//!
//! ```text
//! open:   scan links -> refine -> bind stored nodes (breadth-first)
//! create: empty tree, client calls add nodes and links
//! close:  autogen (compute, validate/update) -> final validation
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use serde::Serialize;

use h5gate_spec::{LinkSpec, NodeKind, QualifiedId, Registry, SpecSource};
use h5gate_store::{path, DatasetOptions, EntryKind, HierStore, Value};

use crate::autogen::{AutogenEngine, Directive};
use crate::error::{GateError, Result};
use crate::links::{LinkRole, LinkTracker, LocationKey};
use crate::options::SessionOptions;
use crate::report::{DiagnosticKind, Report};
use crate::tree::{LinkState, NodeId, NodeTree, StoredChild};

/// Attribute recording the qualified type of a typed node.
pub const SCHEMA_ID_ATTR: &str = "schema_id";

/// Target of a link created by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LinkRef {
    /// Another name for an existing node.
    Hard { path: String },
    /// A redirect to a path that may not exist yet.
    Soft { path: String },
    External { file: String, path: String },
}

/// What a successfully closed session hands back.
#[derive(Debug)]
pub struct Closed<S> {
    pub store: S,
    pub report: Report,
    pub directives: Vec<Directive>,
}

pub struct Session<S: HierStore> {
    pub(crate) registry: Arc<Registry>,
    pub(crate) store: S,
    pub(crate) options: SessionOptions,
    pub(crate) tracker: LinkTracker,
    pub(crate) tree: NodeTree,
    pub(crate) report: Report,
    pub(crate) directives: Vec<Directive>,
    autogen_done: bool,
}

impl<S: HierStore> Session<S> {
    /// Start building a new container.
    pub fn create(store: S, registry: Arc<Registry>, options: SessionOptions) -> Result<Self> {
        if !store.mode().is_mutable() {
            return Err(GateError::ReadOnly {
                path: "/".to_string(),
            });
        }
        let mut session = Self::empty(store, registry, options, LinkTracker::new(0));
        session.tracker = LinkTracker::new(session.options.max_link_hops);
        let root = session.tree.root();
        session.apply_attribute_defaults(root)?;
        tracing::debug!(mode = ?session.store.mode(), "created session");
        Ok(session)
    }

    /// Interpret an existing container against the registry.
    pub fn open(store: S, registry: Arc<Registry>, options: SessionOptions) -> Result<Self> {
        let tracker = LinkTracker::scan(&store, options.max_link_hops)?;
        let mut session = Self::empty(store, registry, options, tracker);
        session.bind_all()?;
        tracing::debug!(
            nodes = session.tree.len(),
            errors = session.report.errors.len(),
            warnings = session.report.warnings.len(),
            "bound existing container"
        );
        Ok(session)
    }

    /// Open a container against the spec embedded in it.
    pub fn open_embedded(store: S, default_ns: Option<&str>, options: SessionOptions) -> Result<Self> {
        let sources = SpecSource::from_store(&store, &options.specifications_path)?;
        let registry = Registry::load(&sources, default_ns)?;
        Self::open(store, Arc::new(registry), options)
    }

    fn empty(store: S, registry: Arc<Registry>, options: SessionOptions, tracker: LinkTracker) -> Self {
        let tree = NodeTree::new(registry.root());
        Self {
            registry,
            store,
            options,
            tracker,
            tree,
            report: Report::default(),
            directives: Vec::new(),
            autogen_done: false,
        }
    }

    pub fn is_mutable(&self) -> bool {
        self.store.mode().is_mutable()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn tree(&self) -> &NodeTree {
        &self.tree
    }

    pub fn tracker(&self) -> &LinkTracker {
        &self.tracker
    }

    pub fn report(&self) -> &Report {
        &self.report
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn directives(&self) -> &[Directive] {
        &self.directives
    }

    pub fn root(&self) -> NodeId {
        self.tree.root()
    }

    pub fn lookup(&self, at: &str) -> Option<NodeId> {
        self.tree.lookup(at)
    }

    pub fn path_of(&self, id: NodeId) -> &str {
        &self.tree.node(id).path
    }

    /// Paths aliasing the node at `at` that are bound in this session.
    pub fn common_links(&self, at: &str) -> Option<Vec<String>> {
        self.tracker
            .common_links(at, |p| self.tree.lookup(p).is_some())
    }

    fn ensure_mutable(&self, at: &str) -> Result<()> {
        if self.is_mutable() {
            Ok(())
        } else {
            Err(GateError::ReadOnly {
                path: at.to_string(),
            })
        }
    }

    fn parent_path(&self, parent: NodeId) -> String {
        self.tree.node(self.tree.deref(parent)).path.clone()
    }

    /// Create a group member of `parent`. `name` is required for
    /// variable-named (`<Type>/`) members.
    pub fn create_group(&mut self, parent: NodeId, member_id: &str, name: Option<&str>) -> Result<NodeId> {
        let placement = self.tree.plan_member(&self.registry, parent, member_id, name)?;
        let parent_path = self.parent_path(parent);
        self.ensure_mutable(&path::join(&parent_path, &placement.name))?;
        if placement.kind != NodeKind::Group {
            return Err(GateError::SchemaViolation {
                path: path::join(&parent_path, &placement.name),
                message: format!("`{member_id}` is not a group"),
            });
        }
        self.store.create_group(&parent_path, &placement.name)?;
        let id = self.tree.insert(parent, placement);
        self.after_create(id)?;
        Ok(id)
    }

    /// Create a dataset member of `parent` holding `value`.
    pub fn create_dataset(
        &mut self,
        parent: NodeId,
        member_id: &str,
        name: Option<&str>,
        value: Value,
    ) -> Result<NodeId> {
        let placement = self.tree.plan_member(&self.registry, parent, member_id, name)?;
        let parent_path = self.parent_path(parent);
        let at = path::join(&parent_path, &placement.name);
        self.ensure_mutable(&at)?;
        let spec = &placement.spec.spec;
        if placement.kind != NodeKind::Dataset {
            return Err(GateError::SchemaViolation {
                path: at,
                message: format!("`{member_id}` is not a dataset"),
            });
        }
        if let (true, Some(fixed)) = (spec.is_const, &spec.value) {
            if !fixed.same_as(&value) {
                return Err(GateError::SchemaViolation {
                    path: at,
                    message: format!("constant dataset must hold `{fixed}`, got `{value}`"),
                });
            }
        }
        let options = DatasetOptions {
            dtype: spec.data_type.clone(),
            dims: spec.dimensions.clone(),
            compress: false,
        };
        self.store
            .create_dataset(&parent_path, &placement.name, value, &options)?;
        let id = self.tree.insert(parent, placement);
        self.after_create(id)?;
        Ok(id)
    }

    /// Set an attribute on a bound node.
    pub fn set_attribute(&mut self, node: NodeId, name: &str, value: Value) -> Result<()> {
        let target = self.tree.deref(node);
        let at = self.tree.node(target).path.clone();
        self.ensure_mutable(&at)?;
        if let Some(attr) = self.tree.node(target).spec.spec.attributes.get(name) {
            if let (true, Some(fixed)) = (attr.is_const, &attr.value) {
                if !fixed.same_as(&value) {
                    return Err(GateError::SchemaViolation {
                        path: at,
                        message: format!("constant attribute `{name}` must be `{fixed}`, got `{value}`"),
                    });
                }
            }
        }
        self.store.set_attribute(&at, name, value)?;
        Ok(())
    }

    /// Create a member of `parent` that is a link to `target`.
    pub fn create_link(
        &mut self,
        parent: NodeId,
        member_id: &str,
        name: Option<&str>,
        target: LinkRef,
    ) -> Result<NodeId> {
        let placement = self.tree.plan_member(&self.registry, parent, member_id, name)?;
        let parent_path = self.parent_path(parent);
        let at = path::join(&parent_path, &placement.name);
        self.ensure_mutable(&at)?;

        match target {
            LinkRef::Hard { path: target_path } => {
                let target_id = self.tree.resolve_path(&target_path).ok_or_else(|| {
                    GateError::LinkIntegrity {
                        path: at.clone(),
                        message: format!("hard link target `{target_path}` does not exist"),
                    }
                })?;
                self.check_link_target(&at, placement.spec.spec.link.as_ref(), target_id)?;
                let real = self.tree.node(self.tree.deref(target_id)).path.clone();
                self.store.create_hard_link(&at, &real)?;
                let object = self.store.object_id(&at)?;
                self.tracker.add_hard_link(&at, &real, object)?;
                let id = self.tree.insert(parent, placement);
                self.tree.node_mut(id).link = LinkState::Resolved { target: target_id };
                Ok(id)
            }
            LinkRef::Soft { path: target_path } => {
                let target_path = path::normalize(&target_path);
                if let Some(target_id) = self.tree.resolve_path(&target_path) {
                    self.check_link_target(&at, placement.spec.spec.link.as_ref(), target_id)?;
                }
                self.store.create_soft_link(&at, &target_path)?;
                self.tracker.add_soft_link(&at, &target_path)?;
                let id = self.tree.insert(parent, placement);
                let key = self
                    .tracker
                    .group_of(&at)
                    .map(|group| group.key)
                    .unwrap_or(LocationKey::Path { path: target_path });
                match key.path().and_then(|p| self.tree.resolve_path(p)) {
                    Some(target_id) if target_id != id => {
                        self.tree.node_mut(id).link = LinkState::Resolved { target: target_id };
                    }
                    _ => self.tree.add_pending(key, id),
                }
                Ok(id)
            }
            LinkRef::External { file, path: target_path } => {
                self.store.create_external_link(&at, &file, &target_path)?;
                self.tracker.add_external_link(&at, &file, &target_path)?;
                let id = self.tree.insert(parent, placement);
                self.tree.node_mut(id).link = LinkState::External {
                    file,
                    path: target_path,
                };
                Ok(id)
            }
        }
    }

    fn check_link_target(&self, at: &str, link: Option<&LinkSpec>, target: NodeId) -> Result<()> {
        let Some(link) = link else {
            return Ok(());
        };
        let target_node = self.tree.node(self.tree.deref(target));
        let ok = target_node.schema_id().is_some_and(|actual| {
            *actual == link.target_type
                || (link.allow_subclasses && self.registry.is_subtype(actual, &link.target_type))
        });
        if ok {
            Ok(())
        } else {
            Err(GateError::SchemaViolation {
                path: at.to_string(),
                message: format!(
                    "link target `{}` is not a {}",
                    target_node.path, link.target_type
                ),
            })
        }
    }

    /// Bookkeeping shared by every client-created plain node.
    fn after_create(&mut self, id: NodeId) -> Result<()> {
        let node = self.tree.node(id);
        let at = node.path.clone();
        if let Some(type_id) = node.schema_id() {
            let type_text = type_id.to_string();
            self.store
                .set_attribute(&at, SCHEMA_ID_ATTR, Value::Text(type_text))?;
        }
        self.apply_attribute_defaults(id)?;
        tracing::trace!(path = %at, "created node");
        self.resolve_pending_for(&LocationKey::Path { path: at }, id);
        Ok(())
    }

    /// Write declared attribute values (constants and defaults) that are not
    /// stored yet.
    fn apply_attribute_defaults(&mut self, id: NodeId) -> Result<()> {
        let node = self.tree.node(id);
        let at = node.path.clone();
        let defaults: Vec<(String, Value)> = node
            .spec
            .spec
            .attributes
            .iter()
            .filter(|(_, attr)| attr.autogen.is_none())
            .filter_map(|(name, attr)| attr.value.clone().map(|v| (name.clone(), v)))
            .collect();
        for (name, value) in defaults {
            if self.store.get_attribute(&at, &name)?.is_none() {
                self.store.set_attribute(&at, &name, value)?;
            }
        }
        Ok(())
    }

    fn resolve_pending_for(&mut self, key: &LocationKey, target: NodeId) {
        for source in self.tree.take_pending(key) {
            if source != target {
                self.tree
                    .resolve_link(&self.registry, source, target, &mut self.report);
            }
        }
    }

    fn stored_schema_id(&self, at: &str) -> Option<QualifiedId> {
        match self.store.get_attribute(at, SCHEMA_ID_ATTR) {
            Ok(Some(Value::Text(text))) => text.parse().ok(),
            _ => None,
        }
    }

    /// Breadth-first binding of every stored node below the root.
    fn bind_all(&mut self) -> Result<()> {
        let mut queue = VecDeque::from([self.tree.root()]);
        while let Some(group) = queue.pop_front() {
            let group_path = self.tree.node(group).path.clone();
            for entry in self.store.list_children(&group_path)? {
                let child_path = path::join(&group_path, &entry.name);
                if path::is_within(&child_path, &self.options.specifications_path) {
                    continue;
                }
                let kind = match entry.kind {
                    EntryKind::Group => Some(NodeKind::Group),
                    EntryKind::Dataset => Some(NodeKind::Dataset),
                    EntryKind::SoftLink | EntryKind::ExternalLink => {
                        match self.store.kind_of(&child_path) {
                            Ok(EntryKind::Group) => Some(NodeKind::Group),
                            Ok(EntryKind::Dataset) => Some(NodeKind::Dataset),
                            _ => None,
                        }
                    }
                };
                let child = StoredChild {
                    name: &entry.name,
                    kind,
                    schema_id: self.stored_schema_id(&child_path),
                };
                let id = self.tree.bind_existing(
                    &self.registry,
                    group,
                    &child,
                    self.options.tolerant,
                    &mut self.report,
                )?;
                self.bind_link_role(id);
                let node = self.tree.node(id);
                if node.is_group() && !node.is_link_source() {
                    queue.push_back(id);
                }
            }
        }
        self.settle_pending();
        Ok(())
    }

    fn bind_link_role(&mut self, id: NodeId) {
        let node = self.tree.node(id);
        let at = node.path.clone();
        let declares_source = node.spec.spec.declares_link_source();
        match self.tracker.classify(&at, declares_source) {
            LinkRole::None => {}
            LinkRole::Target(key) => self.resolve_pending_for(&key, id),
            LinkRole::Source(key) => {
                let target = match &key {
                    LocationKey::External { file, path } => {
                        self.tree.node_mut(id).link = LinkState::External {
                            file: file.clone(),
                            path: path.clone(),
                        };
                        return;
                    }
                    LocationKey::Path { path } => self.tree.resolve_path(path),
                    LocationKey::Object { object } => self
                        .tracker
                        .hard_target(*object)
                        .and_then(|p| self.tree.lookup(p)),
                };
                match target {
                    Some(target) if target != id => {
                        self.tree
                            .resolve_link(&self.registry, id, target, &mut self.report);
                    }
                    _ => self.tree.add_pending(key, id),
                }
            }
        }
    }

    /// Resolve pending soft links whose target is reachable through other
    /// links, and hard links whose target was bound after them.
    fn settle_pending(&mut self) {
        for key in self.tree.pending_keys() {
            let target = match &key {
                LocationKey::Path { path } => self.tree.resolve_path(path),
                LocationKey::Object { object } => self
                    .tracker
                    .hard_target(*object)
                    .and_then(|p| self.tree.lookup(p)),
                LocationKey::External { .. } => None,
            };
            if let Some(target) = target {
                self.resolve_pending_for(&key, target);
            }
        }
    }

    /// Compute, validate and (in mutable sessions) update autogen fields.
    pub fn run_autogen(&mut self) -> Result<()> {
        let mut engine = AutogenEngine::discover(self)?;
        engine.compute_all(self)?;
        engine.settle(self)?;
        self.directives = engine.into_directives();
        self.autogen_done = true;
        Ok(())
    }

    /// Store each namespace's source text under the specifications path.
    fn embed_spec(&mut self) -> Result<()> {
        let location = path::normalize(&self.options.specifications_path);
        if !self.store.exists(&location) {
            self.store
                .create_group(path::parent(&location), path::basename(&location))?;
        }
        let registry = self.registry.clone();
        for ns in registry.namespaces() {
            let at = path::join(&location, ns.name());
            if !self.store.exists(&at) {
                self.store.create_dataset(
                    &location,
                    ns.name(),
                    Value::Text(ns.source_text.clone()),
                    &DatasetOptions {
                        dtype: Some("text".to_string()),
                        ..DatasetOptions::default()
                    },
                )?;
            }
        }
        tracing::debug!(path = %location, "embedded specification");
        Ok(())
    }

    /// Final structural validation: dangling links, required members and
    /// attributes, constant values.
    pub fn validate(&mut self) -> Result<()> {
        self.settle_pending();
        let dangling: Vec<(LocationKey, Vec<NodeId>)> = self
            .tree
            .pending()
            .map(|(key, sources)| (key.clone(), sources.to_vec()))
            .collect();
        for (key, sources) in dangling {
            for source in sources {
                let at = self.tree.node(source).path.clone();
                self.report.error(
                    DiagnosticKind::LinkIntegrity,
                    at,
                    format!("link target `{key}` was never created"),
                );
            }
        }

        let mut excused: HashMap<NodeId, HashSet<String>> = HashMap::new();
        for directive in &self.directives {
            if directive.kind() == h5gate_spec::AutogenKind::Missing {
                if let Some(value) = &directive.value {
                    excused
                        .entry(directive.group)
                        .or_default()
                        .extend(value.to_text_list());
                }
            }
        }

        let ids: Vec<NodeId> = self.tree.ids().collect();
        for id in ids {
            let node = self.tree.node(id);
            if node.unconstrained || node.is_link_source() {
                continue;
            }
            let at = node.path.clone();
            let mut problems: Vec<(bool, DiagnosticKind, String)> = Vec::new();

            if node.is_group() {
                for (key, declared) in node.spec.members() {
                    if !declared.id.quantity.is_required()
                        || declared.autogen.as_ref().is_some_and(|a| a.kind.writes_value())
                        || !node.instances(key).is_empty()
                    {
                        continue;
                    }
                    let name = declared.id.display_name();
                    let demote = excused.get(&id).is_some_and(|names| names.contains(&name));
                    problems.push((
                        demote,
                        DiagnosticKind::RequiredMemberMissing,
                        format!("required member `{name}` was never created"),
                    ));
                }
            } else if let (true, Some(fixed)) = (node.spec.spec.is_const, &node.spec.spec.value) {
                if let Ok(stored) = self.store.get_value(&at) {
                    if !stored.same_as(fixed) {
                        problems.push((
                            false,
                            DiagnosticKind::ConstMismatch,
                            format!("constant dataset holds `{stored}`, expected `{fixed}`"),
                        ));
                    }
                }
            }

            for (name, attr) in &node.spec.spec.attributes {
                let stored = self.store.get_attribute(&at, name)?;
                match (&stored, &attr.value) {
                    (None, _) if attr.quantity.is_required() && attr.autogen.is_none() => {
                        problems.push((
                            false,
                            DiagnosticKind::RequiredMemberMissing,
                            format!("required attribute `{name}` is not set"),
                        ));
                    }
                    (Some(stored), Some(fixed)) if attr.is_const && !stored.same_as(fixed) => {
                        problems.push((
                            false,
                            DiagnosticKind::ConstMismatch,
                            format!("constant attribute `{name}` is `{stored}`, expected `{fixed}`"),
                        ));
                    }
                    _ => {}
                }
            }

            for (demote, kind, message) in problems {
                self.report.record(demote, kind, at.clone(), message);
            }
        }
        Ok(())
    }

    /// Run whatever has not run yet and hand back the store. Fails with
    /// [`GateError::ValidationFailed`] if any error was recorded.
    pub fn close(mut self) -> Result<Closed<S>> {
        if !self.autogen_done {
            self.run_autogen()?;
        }
        if self.is_mutable() && self.options.embed_spec {
            self.embed_spec()?;
        }
        self.validate()?;
        tracing::info!(
            errors = self.report.errors.len(),
            warnings = self.report.warnings.len(),
            directives = self.directives.len(),
            "session closed"
        );
        if self.report.is_ok() {
            Ok(Closed {
                store: self.store,
                report: self.report,
                directives: self.directives,
            })
        } else {
            Err(GateError::ValidationFailed {
                report: self.report,
            })
        }
    }
}

impl<S: HierStore> std::fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("mode", &self.store.mode())
            .field("nodes", &self.tree.len())
            .field("errors", &self.report.errors.len())
            .field("warnings", &self.report.warnings.len())
            .finish()
    }
}
