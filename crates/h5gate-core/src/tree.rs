//! Spec-bound node tree.
//!
//! Nodes live in an arena addressed by [`NodeId`]; `path -> NodeId` and the
//! pending-link lists are separate maps. Every node carries the effective
//! definition it was bound to, and every group keeps per-member instance
//! lists for multiplicity checks.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;

use h5gate_spec::{Effective, MemberId, MemberMatch, NodeKind, NodeSpec, QualifiedId, Registry};
use h5gate_store::{path, StoreError};

use crate::error::{GateError, Result};
use crate::links::LocationKey;
use crate::report::{DiagnosticKind, Report};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Link state of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    None,
    /// Source whose target has not been bound yet.
    Pending { key: LocationKey },
    Resolved { target: NodeId },
    External { file: String, path: String },
}

/// Instances created for one declared member.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberStats {
    pub nodes: Vec<NodeId>,
}

impl MemberStats {
    pub fn count(&self) -> usize {
        self.nodes.len()
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub path: String,
    pub name: String,
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub spec: Arc<Effective>,
    /// Key of the parent's member this node instantiates.
    pub member_key: Option<String>,
    /// Matched no declaration; nothing below it is checked.
    pub unconstrained: bool,
    pub link: LinkState,
    pub children: IndexMap<String, NodeId>,
    pub members: IndexMap<String, MemberStats>,
}

impl Node {
    pub fn schema_id(&self) -> Option<&QualifiedId> {
        self.spec.type_id.as_ref()
    }

    pub fn is_link_source(&self) -> bool {
        !matches!(self.link, LinkState::None)
    }

    pub fn is_group(&self) -> bool {
        self.kind == NodeKind::Group
    }

    /// Instances of the member with this key.
    pub fn instances(&self, key: &str) -> &[NodeId] {
        self.members
            .get(key)
            .map(|stats| stats.nodes.as_slice())
            .unwrap_or(&[])
    }
}

/// Where and as what a new node will be inserted.
#[derive(Debug, Clone)]
pub struct Placement {
    pub name: String,
    pub kind: NodeKind,
    pub spec: Arc<Effective>,
    pub member_key: Option<String>,
    pub unconstrained: bool,
}

/// A stored child as seen while binding an existing container.
#[derive(Debug, Clone)]
pub struct StoredChild<'a> {
    pub name: &'a str,
    /// `None` when the kind cannot be determined (dangling or external link).
    pub kind: Option<NodeKind>,
    pub schema_id: Option<QualifiedId>,
}

/// Key of the member `id` denotes in `parent`, if declared.
///
/// A `<Type>` id without a namespace matches in the default namespace first,
/// then in any namespace if exactly one member has that local id.
pub fn find_member_key(parent: &Effective, id: &MemberId, default_ns: &str) -> Option<String> {
    if !id.is_variable() || id.namespace.is_some() {
        let key = id.key();
        return parent.members().contains_key(&key).then_some(key);
    }
    let local = id.key_local();
    let preferred = format!("{default_ns}:{local}");
    if parent.members().contains_key(&preferred) {
        return Some(preferred);
    }
    let mut candidates = parent
        .members()
        .keys()
        .filter(|key| key.split_once(':').is_some_and(|(_, l)| l == local));
    match (candidates.next(), candidates.next()) {
        (Some(only), None) => Some(only.clone()),
        _ => None,
    }
}

fn unconstrained_spec(kind: NodeKind) -> Arc<Effective> {
    let mut id = MemberId::root();
    id.kind = kind;
    Arc::new(Effective {
        spec: NodeSpec {
            id,
            namespace: String::new(),
            description: None,
            merge: Vec::new(),
            include: Vec::new(),
            attributes: IndexMap::new(),
            closed: None,
            is_abstract: false,
            data_type: None,
            dimensions: None,
            value: None,
            is_const: false,
            link: None,
            autogen: None,
            members: IndexMap::new(),
            accepts_subclasses: false,
        },
        type_id: None,
        ancestry: Vec::new(),
    })
}

#[derive(Debug, Clone)]
pub struct NodeTree {
    nodes: Vec<Node>,
    by_path: HashMap<String, NodeId>,
    pending: IndexMap<LocationKey, Vec<NodeId>>,
}

impl NodeTree {
    pub fn new(root: Arc<Effective>) -> Self {
        let node = Node {
            path: "/".to_string(),
            name: String::new(),
            kind: NodeKind::Group,
            parent: None,
            spec: root,
            member_key: None,
            unconstrained: false,
            link: LinkState::None,
            children: IndexMap::new(),
            members: IndexMap::new(),
        };
        Self {
            nodes: vec![node],
            by_path: HashMap::from([("/".to_string(), NodeId(0))]),
            pending: IndexMap::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn lookup(&self, at: &str) -> Option<NodeId> {
        self.by_path.get(at).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    pub fn child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.node(parent).children.get(name).copied()
    }

    /// Follow resolved links to the node holding the content.
    pub fn deref(&self, mut id: NodeId) -> NodeId {
        // Resolved links always point at already-bound nodes, so a chain is
        // at most as long as the arena.
        for _ in 0..self.nodes.len() {
            match self.node(id).link {
                LinkState::Resolved { target } if target != id => id = target,
                _ => break,
            }
        }
        id
    }

    /// Resolve `at` through bound nodes, following link sources on the way.
    pub fn resolve_path(&self, at: &str) -> Option<NodeId> {
        if let Some(id) = self.lookup(at) {
            return Some(id);
        }
        let mut current = self.root();
        for comp in path::components(at) {
            current = self.child(self.deref(current), comp)?;
        }
        Some(current)
    }

    /// Validate a client request for a new member of `parent`.
    pub fn plan_member(
        &self,
        registry: &Registry,
        parent: NodeId,
        member_id: &str,
        name: Option<&str>,
    ) -> Result<Placement> {
        let parent_node = self.node(self.deref(parent));
        let violation = |message: String| GateError::SchemaViolation {
            path: parent_node.path.clone(),
            message,
        };
        if !parent_node.is_group() {
            return Err(violation("datasets have no members".to_string()));
        }
        let id = h5gate_spec::parse_member_id(member_id).map_err(violation)?;
        let name = match (id.fixed_name(), name) {
            (Some(fixed), None) => fixed.to_string(),
            (Some(fixed), Some(given)) if given == fixed => fixed.to_string(),
            (Some(fixed), Some(given)) => {
                return Err(violation(format!(
                    "member `{fixed}` has a fixed name, cannot create it as `{given}`"
                )))
            }
            (None, Some(given)) => given.to_string(),
            (None, None) => {
                return Err(violation(format!(
                    "variable-named member `{member_id}` needs an explicit name"
                )))
            }
        };
        if name.is_empty() || name.contains('/') {
            return Err(violation(format!("invalid node name `{name}`")));
        }
        let child_path = path::join(&parent_node.path, &name);
        if parent_node.children.contains_key(&name) {
            return Err(StoreError::AlreadyExists { path: child_path }.into());
        }

        let parent_spec = &parent_node.spec;
        if parent_node.unconstrained {
            return Ok(Placement {
                name,
                kind: id.kind,
                spec: unconstrained_spec(id.kind),
                member_key: None,
                unconstrained: true,
            });
        }
        let wanted_type = id.qualify(registry.default_namespace());
        let key = find_member_key(parent_spec, &id, registry.default_namespace()).or_else(|| {
            // A subtype instance lands in a member that accepts subclasses.
            let wanted = wanted_type.as_ref()?;
            match registry.match_member(parent_spec, &name, id.kind, Some(wanted)) {
                MemberMatch::Declared { key, spec } if spec.id.is_variable() => Some(key.to_string()),
                _ => None,
            }
        });
        let Some(key) = key else {
            if parent_spec.is_closed() {
                return Err(violation(format!(
                    "`{member_id}` is not a declared member of this closed group"
                )));
            }
            // Open group: a known type still binds its definition.
            let spec = match &wanted_type {
                Some(type_id) => registry.effective_type(type_id)?,
                None => unconstrained_spec(id.kind),
            };
            let unconstrained = spec.type_id.is_none();
            return Ok(Placement {
                name,
                kind: id.kind,
                spec,
                member_key: None,
                unconstrained,
            });
        };

        let declared = &parent_spec.members()[&key];
        if declared.kind() != id.kind {
            return Err(violation(format!(
                "`{member_id}` is declared as a {}",
                declared.kind()
            )));
        }
        if let Some(max) = declared.id.quantity.max() {
            if parent_node.instances(&key).len() >= max {
                return Err(GateError::MultiplicityExceeded {
                    parent: parent_node.path.clone(),
                    member: declared.id.display_name(),
                    max,
                });
            }
        }
        let effective = match &wanted_type {
            Some(t) if declared.type_ref().as_ref() != Some(t) => registry.effective_type(t)?,
            _ => Arc::new(registry.effective_member(declared)?),
        };
        if effective.spec.is_abstract {
            return Err(violation(format!(
                "`{member_id}` is abstract and cannot be instantiated"
            )));
        }
        Ok(Placement {
            name,
            kind: id.kind,
            spec: effective,
            member_key: Some(key),
            unconstrained: false,
        })
    }

    /// Insert a planned node under `parent` and update its bookkeeping.
    pub fn insert(&mut self, parent: NodeId, placement: Placement) -> NodeId {
        let parent = self.deref(parent);
        let id = NodeId(self.nodes.len());
        let child_path = path::join(&self.node(parent).path, &placement.name);
        let parent_node = self.node_mut(parent);
        parent_node.children.insert(placement.name.clone(), id);
        if let Some(key) = &placement.member_key {
            parent_node
                .members
                .entry(key.clone())
                .or_default()
                .nodes
                .push(id);
        }
        self.by_path.insert(child_path.clone(), id);
        self.nodes.push(Node {
            path: child_path,
            name: placement.name,
            kind: placement.kind,
            parent: Some(parent),
            spec: placement.spec,
            member_key: placement.member_key,
            unconstrained: placement.unconstrained,
            link: LinkState::None,
            children: IndexMap::new(),
            members: IndexMap::new(),
        });
        id
    }

    pub fn create_member(
        &mut self,
        registry: &Registry,
        parent: NodeId,
        member_id: &str,
        name: Option<&str>,
    ) -> Result<NodeId> {
        let placement = self.plan_member(registry, parent, member_id, name)?;
        Ok(self.insert(parent, placement))
    }

    /// Match a stored child against its parent's definition and insert it.
    /// Problems are recorded in `report`; nothing here is fatal.
    pub fn bind_existing(
        &mut self,
        registry: &Registry,
        parent: NodeId,
        child: &StoredChild<'_>,
        tolerant: bool,
        report: &mut Report,
    ) -> Result<NodeId> {
        let parent_node = self.node(parent);
        let child_path = path::join(&parent_node.path, child.name);
        let kinds: &[NodeKind] = match child.kind {
            Some(NodeKind::Group) => &[NodeKind::Group],
            Some(NodeKind::Dataset) => &[NodeKind::Dataset],
            None => &[NodeKind::Group, NodeKind::Dataset],
        };
        let fallback_kind = child.kind.unwrap_or(NodeKind::Dataset);

        let matched = if parent_node.unconstrained {
            None
        } else {
            kinds.iter().find_map(|kind| {
                match registry.match_member(&parent_node.spec, child.name, *kind, child.schema_id.as_ref()) {
                    MemberMatch::Declared { key, spec } => Some((key.to_string(), spec.clone())),
                    MemberMatch::Undeclared => None,
                }
            })
        };

        let placement = match matched {
            Some((key, declared)) => {
                if let Some(max) = declared.id.quantity.max() {
                    let count = parent_node.instances(&key).len();
                    if count >= max {
                        report.error(
                            DiagnosticKind::MultiplicityExceeded,
                            &child_path,
                            format!(
                                "`{}` allows at most {max} instance(s) in `{}`",
                                declared.id.display_name(),
                                parent_node.path
                            ),
                        );
                    }
                }
                let spec = match &child.schema_id {
                    Some(t) if declared.accepts_subclasses && declared.type_ref().as_ref() != Some(t) => {
                        registry.effective_type(t)?
                    }
                    _ => Arc::new(registry.effective_member(&declared)?),
                };
                Placement {
                    name: child.name.to_string(),
                    kind: declared.kind(),
                    spec,
                    member_key: Some(key),
                    unconstrained: false,
                }
            }
            None => {
                if !parent_node.unconstrained {
                    if parent_node.spec.is_closed() {
                        report.record(
                            tolerant,
                            DiagnosticKind::SchemaViolation,
                            &child_path,
                            format!("not a declared member of closed group `{}`", parent_node.path),
                        );
                    } else {
                        report.warn(
                            DiagnosticKind::Unrecognized,
                            &child_path,
                            "matches no declared member".to_string(),
                        );
                    }
                }
                let known = child
                    .schema_id
                    .as_ref()
                    .and_then(|id| registry.effective_type(id).ok());
                match known {
                    Some(spec) if !parent_node.unconstrained => Placement {
                        name: child.name.to_string(),
                        kind: spec.kind(),
                        spec,
                        member_key: None,
                        unconstrained: false,
                    },
                    _ => Placement {
                        name: child.name.to_string(),
                        kind: fallback_kind,
                        spec: unconstrained_spec(fallback_kind),
                        member_key: None,
                        unconstrained: true,
                    },
                }
            }
        };
        tracing::trace!(path = %child_path, member = ?placement.member_key, "bound stored node");
        Ok(self.insert(parent, placement))
    }

    pub fn add_pending(&mut self, key: LocationKey, source: NodeId) {
        self.node_mut(source).link = LinkState::Pending { key: key.clone() };
        self.pending.entry(key).or_default().push(source);
    }

    pub fn take_pending(&mut self, key: &LocationKey) -> Vec<NodeId> {
        self.pending.shift_remove(key).unwrap_or_default()
    }

    pub fn pending(&self) -> impl Iterator<Item = (&LocationKey, &[NodeId])> {
        self.pending.iter().map(|(k, v)| (k, v.as_slice()))
    }

    pub fn pending_keys(&self) -> Vec<LocationKey> {
        self.pending.keys().cloned().collect()
    }

    /// Point `source` at `target` and check the declared target type.
    pub fn resolve_link(
        &mut self,
        registry: &Registry,
        source: NodeId,
        target: NodeId,
        report: &mut Report,
    ) {
        self.node_mut(source).link = LinkState::Resolved { target };
        if let Err(message) = self.check_link_type(registry, source, target) {
            report.error(DiagnosticKind::LinkTargetType, &self.node(source).path, message);
        }
    }

    pub fn check_link_type(
        &self,
        registry: &Registry,
        source: NodeId,
        target: NodeId,
    ) -> std::result::Result<(), String> {
        let Some(link) = &self.node(source).spec.spec.link else {
            return Ok(());
        };
        let target_node = self.node(self.deref(target));
        let Some(actual) = target_node.schema_id() else {
            return Err(format!(
                "link target `{}` has no type, expected {}",
                target_node.path, link.target_type
            ));
        };
        let ok = *actual == link.target_type
            || (link.allow_subclasses && registry.is_subtype(actual, &link.target_type));
        if ok {
            Ok(())
        } else {
            Err(format!(
                "link target `{}` is {actual}, expected {}{}",
                target_node.path,
                link.target_type,
                if link.allow_subclasses { " or a subtype" } else { "" }
            ))
        }
    }
}
