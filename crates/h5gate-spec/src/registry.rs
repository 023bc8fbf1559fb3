//! The spec registry: loaded namespaces plus resolved (effective) types.
//!
//! Effective definitions are computed once, at load time, for every named
//! type. Resolution order for a type or member definition:
//!
//! 1. merge parents, depth-first and left-to-right; a later parent overrides
//!    an earlier one on key collisions,
//! 2. `include` directives (variable-named members of another type),
//! 3. the definition's own declarations, last and therefore strongest.
//!
//! A merge cycle is a load error, never a deferred one.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::ident::{MemberId, NodeKind, QualifiedId};
use crate::model::{IncludeSpec, Namespace, NodeSpec, TypeDef};
use crate::source::SpecSource;
use crate::SpecError;

/// A fully resolved definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Effective {
    /// Merged definition; `spec.members` is the effective member set.
    pub spec: NodeSpec,
    /// Most specific named type, for typed nodes.
    pub type_id: Option<QualifiedId>,
    /// `type_id` followed by every merge ancestor (no duplicates).
    pub ancestry: Vec<QualifiedId>,
}

impl Effective {
    pub fn kind(&self) -> NodeKind {
        self.spec.kind()
    }

    pub fn members(&self) -> &IndexMap<String, NodeSpec> {
        &self.spec.members
    }

    pub fn member(&self, key: &str) -> Option<&NodeSpec> {
        self.spec.members.get(key)
    }

    /// Closed definitions reject members they do not declare.
    pub fn is_closed(&self) -> bool {
        self.spec.closed.unwrap_or(false)
    }

    /// Whether a member with this key may be added.
    pub fn accepts(&self, key: &str) -> bool {
        !self.is_closed() || self.spec.members.contains_key(key)
    }
}

/// Result of matching a stored child against a parent's member set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MemberMatch<'a> {
    Declared { key: &'a str, spec: &'a NodeSpec },
    Undeclared,
}

/// Combine resolved parents and the definition's own declarations.
fn compose(own: &NodeSpec, type_id: Option<QualifiedId>, parents: &[Arc<Effective>]) -> Effective {
    let mut acc = own.empty_like();
    let mut ancestry: Vec<QualifiedId> = type_id.iter().cloned().collect();
    for parent in parents {
        acc.overlay(&parent.spec);
        for a in &parent.ancestry {
            if !ancestry.contains(a) {
                ancestry.push(a.clone());
            }
        }
    }
    for inc in &own.include {
        let placeholder = NodeSpec::from_include(inc);
        match acc.members.get_mut(&inc.id.key()) {
            Some(existing) => existing.overlay(&placeholder),
            None => {
                acc.members.insert(inc.id.key(), placeholder);
            }
        }
    }
    acc.overlay(own);
    // Whatever the merge parents were, an instance keeps its own identity.
    acc.id = own.id.clone();
    acc.namespace = own.namespace.clone();
    Effective {
        spec: acc,
        type_id,
        ancestry,
    }
}

struct TypeResolver<'a> {
    namespaces: &'a IndexMap<String, Namespace>,
    cache: HashMap<QualifiedId, Arc<Effective>>,
    stack: Vec<QualifiedId>,
}

impl<'a> TypeResolver<'a> {
    fn lookup(&self, id: &QualifiedId) -> Option<&'a TypeDef> {
        self.namespaces.get(&id.namespace)?.types.get(&id.local)
    }

    fn resolve(&mut self, id: &QualifiedId) -> Result<Arc<Effective>, SpecError> {
        if let Some(done) = self.cache.get(id) {
            return Ok(done.clone());
        }
        if let Some(pos) = self.stack.iter().position(|s| s == id) {
            let mut cycle: Vec<String> = self.stack[pos..].iter().map(|q| q.to_string()).collect();
            cycle.push(id.to_string());
            return Err(SpecError::MergeCycle { cycle });
        }
        let ty = self.lookup(id).ok_or_else(|| SpecError::UnresolvedType {
            reference: id.to_string(),
            context: self
                .stack
                .last()
                .map(|s| format!("{s} merge"))
                .unwrap_or_else(|| "registry".to_string()),
        })?;
        self.stack.push(id.clone());
        let mut parents = Vec::with_capacity(ty.spec.merge.len());
        for parent in &ty.spec.merge {
            parents.push(self.resolve(parent)?);
        }
        self.stack.pop();
        let eff = Arc::new(compose(&ty.spec, Some(id.clone()), &parents));
        self.cache.insert(id.clone(), eff.clone());
        Ok(eff)
    }
}

/// Loaded, immutable specification.
#[derive(Debug)]
pub struct Registry {
    namespaces: IndexMap<String, Namespace>,
    default_ns: String,
    effective: HashMap<QualifiedId, Arc<Effective>>,
    root: Arc<Effective>,
}

impl Registry {
    /// Load and index namespaces. `default_ns` defaults to the first source.
    pub fn load(sources: &[SpecSource], default_ns: Option<&str>) -> Result<Self, SpecError> {
        if sources.is_empty() {
            return Err(SpecError::Empty);
        }
        let mut namespaces: IndexMap<String, Namespace> = IndexMap::new();
        for source in sources {
            let raw = source.parse()?;
            let ns = Namespace::from_raw(&raw, source.text.clone())?;
            if namespaces.contains_key(ns.name()) {
                return Err(SpecError::DuplicateNamespace(ns.name().to_string()));
            }
            tracing::debug!(
                namespace = ns.name(),
                version = %ns.info.version,
                types = ns.types.len(),
                origin = %source.origin,
                "loaded specification namespace"
            );
            namespaces.insert(ns.name().to_string(), ns);
        }

        let default_ns = match default_ns {
            Some(ns) if namespaces.contains_key(ns) => ns.to_string(),
            Some(ns) => return Err(SpecError::UnknownNamespace(ns.to_string())),
            None => namespaces
                .keys()
                .next()
                .cloned()
                .ok_or(SpecError::Empty)?,
        };

        for ns in namespaces.values() {
            for ty in ns.types.values() {
                check_references(&namespaces, &ty.spec, &ty.id.to_string())?;
            }
            if let Some(root) = &ns.root {
                check_references(&namespaces, root, &format!("{}:/", ns.name()))?;
            }
        }

        let mut resolver = TypeResolver {
            namespaces: &namespaces,
            cache: HashMap::new(),
            stack: Vec::new(),
        };
        for ns in namespaces.values() {
            for ty in ns.types.values() {
                resolver.resolve(&ty.id)?;
            }
        }
        let effective = resolver.cache;

        // Root: the default namespace's `/` first, extensions layered on top.
        let mut root_specs: Vec<NodeSpec> = Vec::new();
        if let Some(root) = namespaces.get(&default_ns).and_then(|ns| ns.root.as_ref()) {
            root_specs.push(root.clone());
        }
        for (name, ns) in &namespaces {
            if *name != default_ns {
                if let Some(root) = &ns.root {
                    root_specs.push(root.clone());
                }
            }
        }

        let mut registry = Registry {
            namespaces,
            default_ns,
            effective,
            root: Arc::new(Effective {
                spec: NodeSpec::from_include(&IncludeSpec {
                    id: MemberId::root(),
                    subclasses: false,
                }),
                type_id: None,
                ancestry: Vec::new(),
            }),
        };
        let mut root = (*registry.root).clone();
        for spec in &root_specs {
            let layer = registry.effective_member(spec)?;
            root.spec.overlay(&layer.spec);
        }
        registry.root = Arc::new(root);
        Ok(registry)
    }

    pub fn default_namespace(&self) -> &str {
        &self.default_ns
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &Namespace> {
        self.namespaces.values()
    }

    pub fn namespace(&self, name: &str) -> Option<&Namespace> {
        self.namespaces.get(name)
    }

    /// Effective definition of the root group.
    pub fn root(&self) -> Arc<Effective> {
        self.root.clone()
    }

    /// Look up a type by qualified (`ns:<T>/`) or default-namespace (`<T>/`) id.
    pub fn resolve_type(&self, id: &str) -> Result<&TypeDef, SpecError> {
        let qualified = QualifiedId::parse(id, &self.default_ns).map_err(|message| {
            SpecError::InvalidMemberId {
                id: id.to_string(),
                context: "resolve_type".to_string(),
                message,
            }
        })?;
        self.type_def(&qualified)
            .ok_or_else(|| SpecError::UnresolvedType {
                reference: qualified.to_string(),
                context: "resolve_type".to_string(),
            })
    }

    pub fn type_def(&self, id: &QualifiedId) -> Option<&TypeDef> {
        self.namespaces.get(&id.namespace)?.types.get(&id.local)
    }

    /// Effective definition of a named type.
    pub fn effective_type(&self, id: &QualifiedId) -> Result<Arc<Effective>, SpecError> {
        self.effective
            .get(id)
            .cloned()
            .ok_or_else(|| SpecError::UnresolvedType {
                reference: id.to_string(),
                context: "effective_type".to_string(),
            })
    }

    /// Effective member set of a type, in resolution order.
    pub fn effective_members(&self, ty: &TypeDef) -> Result<IndexMap<String, NodeSpec>, SpecError> {
        Ok(self.effective_type(&ty.id)?.spec.members.clone())
    }

    /// Effective definition of a member declaration (typed or inline).
    pub fn effective_member(&self, spec: &NodeSpec) -> Result<Effective, SpecError> {
        let type_id = spec.type_ref();
        let mut parents = Vec::with_capacity(spec.merge.len() + 1);
        if let Some(t) = &type_id {
            parents.push(self.effective_type(t)?);
        }
        for m in &spec.merge {
            parents.push(self.effective_type(m)?);
        }
        Ok(compose(spec, type_id, &parents))
    }

    /// `sub` is `sup` or inherits from it through merges.
    pub fn is_subtype(&self, sub: &QualifiedId, sup: &QualifiedId) -> bool {
        sub == sup
            || self
                .effective
                .get(sub)
                .is_some_and(|e| e.ancestry.contains(sup))
    }

    /// Match a stored child (by name, kind and recorded type) against a
    /// parent's effective member set. Fixed names win over typed members.
    pub fn match_member<'e>(
        &self,
        parent: &'e Effective,
        name: &str,
        kind: NodeKind,
        schema_id: Option<&QualifiedId>,
    ) -> MemberMatch<'e> {
        for (key, spec) in parent.members() {
            if spec.kind() == kind && spec.id.fixed_name() == Some(name) {
                return MemberMatch::Declared { key, spec };
            }
        }
        let Some(stored) = schema_id else {
            return MemberMatch::Undeclared;
        };
        let mut subtype_match = None;
        for (key, spec) in parent.members() {
            if spec.kind() != kind {
                continue;
            }
            let Some(member_type) = spec.type_ref() else {
                continue;
            };
            if &member_type == stored {
                return MemberMatch::Declared { key, spec };
            }
            if subtype_match.is_none()
                && spec.accepts_subclasses
                && self.is_subtype(stored, &member_type)
            {
                subtype_match = Some(MemberMatch::Declared { key, spec });
            }
        }
        subtype_match.unwrap_or(MemberMatch::Undeclared)
    }
}

fn check_references(
    namespaces: &IndexMap<String, Namespace>,
    spec: &NodeSpec,
    context: &str,
) -> Result<(), SpecError> {
    let exists = |id: &QualifiedId| {
        namespaces
            .get(&id.namespace)
            .is_some_and(|ns| ns.types.contains_key(&id.local))
    };
    let mut refs: Vec<(QualifiedId, &str)> = Vec::new();
    if let Some(t) = spec.type_ref() {
        refs.push((t, "member type"));
    }
    refs.extend(spec.merge.iter().map(|m| (m.clone(), "merge")));
    for inc in &spec.include {
        if let Some(t) = inc.id.qualify(&spec.namespace) {
            refs.push((t, "include"));
        }
    }
    if let Some(link) = &spec.link {
        refs.push((link.target_type.clone(), "link target"));
    }
    if let Some(t) = spec.autogen.as_ref().and_then(|a| a.tsig.as_ref()).and_then(|t| t.type_ref.clone()) {
        refs.push((t, "autogen tsig"));
    }
    for attr in spec.attributes.values() {
        if let Some(t) = attr.autogen.as_ref().and_then(|a| a.tsig.as_ref()).and_then(|t| t.type_ref.clone()) {
            refs.push((t, "autogen tsig"));
        }
    }
    let mut seen = HashSet::new();
    for (id, what) in refs {
        if seen.insert(id.clone()) && !exists(&id) {
            return Err(SpecError::UnresolvedType {
                reference: id.to_string(),
                context: format!("{context} ({what})"),
            });
        }
    }
    for (key, member) in &spec.members {
        check_references(namespaces, member, &format!("{context}/{key}"))?;
    }
    Ok(())
}
