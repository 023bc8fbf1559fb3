//! Typed specification model.
//!
//! Built from the raw serde shape by [`Namespace::from_raw`]; every reference
//! is qualified with a namespace and every literal converted to a [`Value`].

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use h5gate_store::Value;

use crate::autogen::{parse_autogen, AutogenSpec};
use crate::ident::{parse_member_id, MemberId, NodeKind, QualifiedId, Quantity};
use crate::raw::{RawAttr, RawNamespace, RawNode};
use crate::SpecError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceInfo {
    pub name: String,
    pub version: String,
    pub date: Option<String>,
    pub author: Option<String>,
    pub contact: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttrSpec {
    pub name: String,
    pub quantity: Quantity,
    pub description: Option<String>,
    pub data_type: Option<String>,
    pub dimensions: Option<Vec<String>>,
    pub value: Option<Value>,
    pub is_const: bool,
    pub autogen: Option<AutogenSpec>,
}

impl AttrSpec {
    /// Later declarations override the fields they set.
    pub fn overlay(&mut self, other: &AttrSpec) {
        self.quantity = other.quantity;
        overlay_opt(&mut self.description, &other.description);
        overlay_opt(&mut self.data_type, &other.data_type);
        overlay_opt(&mut self.dimensions, &other.dimensions);
        overlay_opt(&mut self.value, &other.value);
        overlay_opt(&mut self.autogen, &other.autogen);
        self.is_const |= other.is_const;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSpec {
    pub target_type: QualifiedId,
    pub allow_subclasses: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncludeSpec {
    /// A `<Type>` member id, namespace-qualified.
    pub id: MemberId,
    pub subclasses: bool,
}

/// One node definition: a type definition or a member declared inside one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: MemberId,
    /// Namespace the definition was written in.
    pub namespace: String,
    pub description: Option<String>,
    pub merge: Vec<QualifiedId>,
    pub include: Vec<IncludeSpec>,
    pub attributes: IndexMap<String, AttrSpec>,
    pub closed: Option<bool>,
    pub is_abstract: bool,
    pub data_type: Option<String>,
    pub dimensions: Option<Vec<String>>,
    pub value: Option<Value>,
    pub is_const: bool,
    pub link: Option<LinkSpec>,
    pub autogen: Option<AutogenSpec>,
    /// Child members keyed by [`MemberId::key`].
    pub members: IndexMap<String, NodeSpec>,
    /// Set for members pulled in by an `include` with `subclasses: true`:
    /// instances of subtypes of the member's type also match.
    pub accepts_subclasses: bool,
}

impl NodeSpec {
    pub fn kind(&self) -> NodeKind {
        self.id.kind
    }

    pub fn key(&self) -> String {
        self.id.key()
    }

    /// The type instantiated by a `<Type>` member.
    pub fn type_ref(&self) -> Option<QualifiedId> {
        self.id.qualify(&self.namespace)
    }

    /// True when the declaration itself marks instances as link sources: a
    /// group with a `link` spec, or a dataset with a `link` spec and no
    /// `data_type` of its own.
    pub fn declares_link_source(&self) -> bool {
        match (&self.link, self.kind()) {
            (None, _) => false,
            (Some(_), NodeKind::Group) => true,
            (Some(_), NodeKind::Dataset) => self.data_type.is_none(),
        }
    }

    /// Deep overlay: scalar fields set in `other` win, attribute and member
    /// maps are merged key by key.
    pub fn overlay(&mut self, other: &NodeSpec) {
        overlay_opt(&mut self.description, &other.description);
        overlay_opt(&mut self.closed, &other.closed);
        overlay_opt(&mut self.data_type, &other.data_type);
        overlay_opt(&mut self.dimensions, &other.dimensions);
        overlay_opt(&mut self.value, &other.value);
        overlay_opt(&mut self.link, &other.link);
        overlay_opt(&mut self.autogen, &other.autogen);
        self.is_const |= other.is_const;
        for m in &other.merge {
            if !self.merge.contains(m) {
                self.merge.push(m.clone());
            }
        }
        for inc in &other.include {
            if !self.include.contains(inc) {
                self.include.push(inc.clone());
            }
        }
        for (name, attr) in &other.attributes {
            match self.attributes.get_mut(name) {
                Some(existing) => existing.overlay(attr),
                None => {
                    self.attributes.insert(name.clone(), attr.clone());
                }
            }
        }
        for (key, member) in &other.members {
            match self.members.get_mut(key) {
                Some(existing) => {
                    if member.id.explicit_quantity {
                        existing.id.quantity = member.id.quantity;
                        existing.id.explicit_quantity = true;
                    }
                    existing.accepts_subclasses |= member.accepts_subclasses;
                    existing.overlay(member);
                }
                None => {
                    self.members.insert(key.clone(), member.clone());
                }
            }
        }
    }

    /// Convert a raw definition. `context` locates it in error messages.
    pub(crate) fn from_raw(
        id_text: &str,
        raw: &RawNode,
        namespace: &str,
        context: &str,
    ) -> Result<NodeSpec, SpecError> {
        let mut id = parse_member_id(id_text).map_err(|message| SpecError::InvalidMemberId {
            id: id_text.to_string(),
            context: context.to_string(),
            message,
        })?;
        if id.is_variable() && id.namespace.is_none() {
            id.namespace = Some(namespace.to_string());
        }
        if id.kind == NodeKind::Dataset && !raw.members.is_empty() {
            return Err(SpecError::Malformed {
                origin: context.to_string(),
                message: format!(
                    "dataset `{id_text}` cannot declare members ({})",
                    raw.members.keys().cloned().collect::<Vec<_>>().join(", ")
                ),
            });
        }

        let merge = raw
            .merge
            .iter()
            .map(|m| {
                QualifiedId::parse(m, namespace).map_err(|message| SpecError::InvalidMemberId {
                    id: m.clone(),
                    context: format!("{context} merge"),
                    message,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut include = Vec::with_capacity(raw.include.len());
        for (key, inc) in &raw.include {
            let mut inc_id =
                parse_member_id(key).map_err(|message| SpecError::InvalidMemberId {
                    id: key.clone(),
                    context: format!("{context} include"),
                    message,
                })?;
            if !inc_id.is_variable() {
                return Err(SpecError::InvalidMemberId {
                    id: key.clone(),
                    context: format!("{context} include"),
                    message: "included members must use the `<Type>` form".to_string(),
                });
            }
            if inc_id.namespace.is_none() {
                inc_id.namespace = Some(namespace.to_string());
            }
            if !inc_id.explicit_quantity {
                inc_id.quantity = Quantity::ZeroOrMore;
            }
            include.push(IncludeSpec {
                id: inc_id,
                subclasses: inc.subclasses,
            });
        }

        let mut attributes = IndexMap::new();
        for (key, raw_attr) in &raw.attributes {
            let attr = attr_from_raw(key, raw_attr, namespace, &format!("{context}@{key}"))?;
            attributes.insert(attr.name.clone(), attr);
        }

        let value = literal(raw.value.as_ref(), context)?;

        let link = match &raw.link {
            None => None,
            Some(l) => Some(LinkSpec {
                target_type: QualifiedId::parse(&l.target_type, namespace).map_err(|message| {
                    SpecError::InvalidMemberId {
                        id: l.target_type.clone(),
                        context: format!("{context} link"),
                        message,
                    }
                })?,
                allow_subclasses: l.allow_subclasses,
            }),
        };

        let autogen = match &raw.autogen {
            None => None,
            Some(map) => Some(parse_autogen(map, namespace).map_err(|message| {
                SpecError::InvalidAutogen {
                    context: context.to_string(),
                    message,
                }
            })?),
        };

        let mut members = IndexMap::new();
        for (key, child) in &raw.members {
            let spec = NodeSpec::from_raw(key, child, namespace, &format!("{context}/{key}"))?;
            let member_key = spec.key();
            if members.contains_key(&member_key) {
                return Err(SpecError::Malformed {
                    origin: context.to_string(),
                    message: format!("member `{member_key}` declared twice"),
                });
            }
            members.insert(member_key, spec);
        }

        Ok(NodeSpec {
            id,
            namespace: namespace.to_string(),
            description: raw.description.clone(),
            merge,
            include,
            attributes,
            closed: raw.properties.closed,
            is_abstract: raw.properties.is_abstract,
            data_type: raw.data_type.clone(),
            dimensions: raw.dimensions.clone(),
            value,
            is_const: raw.is_const,
            link,
            autogen,
            members,
            accepts_subclasses: false,
        })
    }

    /// Placeholder member for an `include` directive.
    pub(crate) fn from_include(include: &IncludeSpec) -> NodeSpec {
        NodeSpec {
            id: include.id.clone(),
            namespace: include.id.namespace.clone().unwrap_or_default(),
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
            accepts_subclasses: include.subclasses,
        }
    }

    /// Same identity, nothing declared.
    pub(crate) fn empty_like(&self) -> NodeSpec {
        let mut empty = NodeSpec::from_include(&IncludeSpec {
            id: self.id.clone(),
            subclasses: false,
        });
        empty.namespace = self.namespace.clone();
        empty
    }
}

fn overlay_opt<T: Clone>(slot: &mut Option<T>, other: &Option<T>) {
    if other.is_some() {
        slot.clone_from(other);
    }
}

fn literal(json: Option<&serde_json::Value>, context: &str) -> Result<Option<Value>, SpecError> {
    match json {
        None => Ok(None),
        Some(j) => Value::from_json(j)
            .map(Some)
            .ok_or_else(|| SpecError::InvalidValue {
                context: context.to_string(),
                message: format!("unsupported literal {j}"),
            }),
    }
}

fn attr_from_raw(
    key: &str,
    raw: &RawAttr,
    namespace: &str,
    context: &str,
) -> Result<AttrSpec, SpecError> {
    let (name, explicit) = match key.char_indices().last() {
        Some((idx, c)) if matches!(c, '!' | '?') => (&key[..idx], Quantity::from_marker(c)),
        _ => (key, None),
    };
    if name.is_empty() || name.contains('/') {
        return Err(SpecError::InvalidMemberId {
            id: key.to_string(),
            context: context.to_string(),
            message: "attribute ids are plain names with an optional `!`/`?` suffix".to_string(),
        });
    }
    let quantity = explicit.unwrap_or(if raw.is_const {
        Quantity::ExactlyOne
    } else {
        Quantity::ZeroOrOne
    });
    let autogen = match &raw.autogen {
        None => None,
        Some(map) => Some(parse_autogen(map, namespace).map_err(|message| {
            SpecError::InvalidAutogen {
                context: context.to_string(),
                message,
            }
        })?),
    };
    Ok(AttrSpec {
        name: name.to_string(),
        quantity,
        description: raw.description.clone(),
        data_type: raw.data_type.clone(),
        dimensions: raw.dimensions.clone(),
        value: literal(raw.value.as_ref(), context)?,
        is_const: raw.is_const,
        autogen,
    })
}

/// A named type definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDef {
    pub id: QualifiedId,
    pub spec: NodeSpec,
}

/// One loaded namespace.
#[derive(Debug, Clone)]
pub struct Namespace {
    pub info: NamespaceInfo,
    pub types: IndexMap<String, TypeDef>,
    /// The `/` definition, if this namespace declares one.
    pub root: Option<NodeSpec>,
    /// The JSON text the namespace was loaded from.
    pub source_text: String,
}

impl Namespace {
    pub(crate) fn from_raw(raw: &RawNamespace, source_text: String) -> Result<Self, SpecError> {
        let ns = raw.info.name.trim();
        if ns.is_empty() || ns.contains(':') {
            return Err(SpecError::Malformed {
                origin: ns.to_string(),
                message: "`info.name` must be a non-empty id without `:`".to_string(),
            });
        }
        let mut types = IndexMap::new();
        let mut root = None;
        for (key, node) in &raw.schema {
            let context = format!("{ns}:{key}");
            if key.trim() == "/" {
                root = Some(NodeSpec::from_raw("/", node, ns, &context)?);
                continue;
            }
            let spec = NodeSpec::from_raw(key, node, ns, &context)?;
            if spec.id.explicit_quantity {
                return Err(SpecError::InvalidMemberId {
                    id: key.clone(),
                    context,
                    message: "type definitions cannot carry a quantity marker".to_string(),
                });
            }
            let Some(id) = spec.type_ref() else {
                return Err(SpecError::InvalidMemberId {
                    id: key.clone(),
                    context,
                    message: "top-level schema ids must be `<Type>` definitions or `/`".to_string(),
                });
            };
            if id.namespace != ns {
                return Err(SpecError::InvalidMemberId {
                    id: key.clone(),
                    context,
                    message: "types can only be defined in their own namespace".to_string(),
                });
            }
            if types.contains_key(&id.local) {
                return Err(SpecError::Malformed {
                    origin: ns.to_string(),
                    message: format!("type `{key}` defined twice"),
                });
            }
            types.insert(id.local.clone(), TypeDef { id, spec });
        }
        Ok(Namespace {
            info: NamespaceInfo {
                name: ns.to_string(),
                version: raw.info.version.clone(),
                date: raw.info.date.clone(),
                author: raw.info.author.clone(),
                contact: raw.info.contact.clone(),
                description: raw.info.description.clone(),
            },
            types,
            root,
            source_text,
        })
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }
}
