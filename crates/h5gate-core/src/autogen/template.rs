//! Target path templates.
//!
//! A template is resolved against the live node tree, relative to the
//! directive's enclosing group unless it starts with `/`:
//!
//! ```text
//! ../acquisition/<TimeSeries>/*/data
//! ```
//!
//! `..` steps to the parent, a plain name steps to that child, and a member
//! id followed by `*` expands to every created instance of that member.
//! Stepping into a link source continues at its target.

use h5gate_spec::{parse_member_id, Registry, TargetSignature};
use h5gate_store::{path, HierStore};

use crate::tree::{find_member_key, NodeId, NodeTree};

/// Split a template into steps, keeping `<Type>/*` together.
fn steps(template: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for comp in path::components(template) {
        match (comp, out.last_mut()) {
            ("*", Some(prev)) if !prev.ends_with('*') => prev.push_str("/*"),
            _ => out.push(comp.to_string()),
        }
    }
    out
}

/// Every node the template denotes, in tree order, without duplicates.
pub fn resolve(
    tree: &NodeTree,
    registry: &Registry,
    base: NodeId,
    template: &str,
) -> Result<Vec<NodeId>, String> {
    let mut current = if path::is_absolute(template) {
        vec![tree.root()]
    } else {
        vec![base]
    };
    for step in steps(template) {
        let mut next: Vec<NodeId> = Vec::new();
        let mut push = |id: NodeId| {
            if !next.contains(&id) {
                next.push(id);
            }
        };
        for id in &current {
            match step.as_str() {
                "." => push(*id),
                ".." => {
                    if let Some(parent) = tree.node(*id).parent {
                        push(parent);
                    }
                }
                wildcard if wildcard.ends_with('*') => {
                    let member = &wildcard[..wildcard.len() - 1];
                    let member_id = parse_member_id(member)
                        .map_err(|e| format!("bad template step `{wildcard}`: {e}"))?;
                    let holder = tree.node(tree.deref(*id));
                    match find_member_key(&holder.spec, &member_id, registry.default_namespace()) {
                        Some(key) => holder.instances(&key).iter().for_each(|n| push(*n)),
                        None => {
                            // Undeclared here: fall back to the stored types.
                            let Some(wanted) = member_id.qualify(registry.default_namespace()) else {
                                continue;
                            };
                            for child in holder.children.values() {
                                let child_node = tree.node(tree.deref(*child));
                                if child_node
                                    .schema_id()
                                    .is_some_and(|t| registry.is_subtype(t, &wanted))
                                {
                                    push(*child);
                                }
                            }
                        }
                    }
                }
                name => {
                    if let Some(child) = tree.child(tree.deref(*id), name) {
                        push(child);
                    }
                }
            }
        }
        current = next;
    }
    Ok(current)
}

/// Does the node satisfy a target signature?
pub fn matches_signature(
    tree: &NodeTree,
    store: &dyn HierStore,
    registry: &Registry,
    id: NodeId,
    tsig: &TargetSignature,
) -> bool {
    let node = tree.node(tree.deref(id));
    if tsig.kind.is_some_and(|kind| kind != node.kind) {
        return false;
    }
    if let Some(wanted) = &tsig.type_ref {
        if !node.schema_id().is_some_and(|t| registry.is_subtype(t, wanted)) {
            return false;
        }
    }
    tsig.attrs.iter().all(|(name, expected)| {
        matches!(
            store.get_attribute(&node.path, name),
            Ok(Some(stored)) if stored.same_as(expected)
        )
    })
}
