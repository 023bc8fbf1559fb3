//! Link discovery and classification.
//!
//! A full pre-scan records every hard, soft and external link in the
//! container. Refinement then turns the raw records into link groups (sets of
//! paths that denote one stored object), in a fixed order:
//!
//! 1. soft-link chains are collapsed onto their final location,
//! 2. hard-link groups that carry no information are pruned: single-member
//!    groups, and groups that only exist because their parents are aliases,
//! 3. a hard-link group containing the target of a soft-link group is folded
//!    into that soft-link group,
//! 4. per-kind `path -> group` indices are rebuilt.
//!
//! Refinement is idempotent, so write sessions simply re-run it after every
//! link they add.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use indexmap::IndexMap;
use serde::Serialize;

use h5gate_store::{path, EntryKind, HierStore, LinkTarget, ObjectId};

use crate::error::{GateError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    Hard,
    Soft,
    External,
}

impl std::fmt::Display for LinkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkKind::Hard => f.write_str("hard"),
            LinkKind::Soft => f.write_str("soft"),
            LinkKind::External => f.write_str("external"),
        }
    }
}

/// Identity of a link group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LocationKey {
    /// Stored object shared by hard-linked paths.
    Object { object: ObjectId },
    /// Final target path of a soft-link chain.
    Path { path: String },
    External { file: String, path: String },
}

impl LocationKey {
    pub fn kind(&self) -> LinkKind {
        match self {
            LocationKey::Object { .. } => LinkKind::Hard,
            LocationKey::Path { .. } => LinkKind::Soft,
            LocationKey::External { .. } => LinkKind::External,
        }
    }

    /// The in-file path this key names, if any.
    pub fn path(&self) -> Option<&str> {
        match self {
            LocationKey::Path { path } => Some(path),
            _ => None,
        }
    }
}

impl std::fmt::Display for LocationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocationKey::Object { object } => write!(f, "object #{object}"),
            LocationKey::Path { path } => f.write_str(path),
            LocationKey::External { file, path } => write!(f, "{file}:{path}"),
        }
    }
}

/// One refined equivalence class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkGroup {
    pub key: LocationKey,
    /// Aliasing paths. For soft groups the key path is not repeated here.
    pub members: Vec<String>,
}

impl LinkGroup {
    pub fn kind(&self) -> LinkKind {
        self.key.kind()
    }

    /// Every in-file path of the group, the soft-link target included.
    pub fn paths(&self) -> Vec<String> {
        let mut paths = self.members.clone();
        if let Some(key) = self.key.path() {
            if !paths.iter().any(|p| p == key) {
                paths.push(key.to_string());
            }
        }
        paths
    }
}

/// How a path participates in a link relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkRole {
    None,
    Source(LocationKey),
    Target(LocationKey),
}

#[derive(Debug, Clone)]
pub struct LinkTracker {
    max_hops: usize,
    hard: BTreeMap<ObjectId, Vec<String>>,
    soft: IndexMap<String, Vec<String>>,
    external: IndexMap<(String, String), Vec<String>>,
    /// Object id of every hard path seen (parents included).
    path_objects: HashMap<String, ObjectId>,
    hard_index: HashMap<String, ObjectId>,
    soft_index: HashMap<String, String>,
    external_index: HashMap<String, (String, String)>,
    /// Path chosen as the real object of each hard group.
    hard_targets: HashMap<ObjectId, String>,
}

fn push_unique(list: &mut Vec<String>, item: &str) {
    if !list.iter().any(|p| p == item) {
        list.push(item.to_string());
    }
}

impl LinkTracker {
    pub fn new(max_hops: usize) -> Self {
        Self {
            max_hops,
            hard: BTreeMap::new(),
            soft: IndexMap::new(),
            external: IndexMap::new(),
            path_objects: HashMap::new(),
            hard_index: HashMap::new(),
            soft_index: HashMap::new(),
            external_index: HashMap::new(),
            hard_targets: HashMap::new(),
        }
    }

    /// Traverse the whole container breadth-first and refine what was found.
    pub fn scan(store: &dyn HierStore, max_hops: usize) -> Result<Self> {
        let mut tracker = LinkTracker::new(max_hops);
        let root = store.object_id("/")?;
        tracker.path_objects.insert("/".to_string(), root);

        let mut queue = VecDeque::from([("/".to_string(), vec![root])]);
        while let Some((group, ancestors)) = queue.pop_front() {
            for child in store.list_children(&group)? {
                let child_path = path::join(&group, &child.name);
                match (&child.link, child.object_id) {
                    (Some(LinkTarget::Soft { path: target }), _) => {
                        tracker.record_soft(&child_path, &absolute(&group, target));
                    }
                    (Some(LinkTarget::External { file, path: target }), _) => {
                        tracker.record_external(&child_path, file, target);
                    }
                    (None, Some(object)) => {
                        tracker.record_hard(&child_path, object);
                        // A group hard-linked into its own subtree is visited once.
                        if child.kind == EntryKind::Group && !ancestors.contains(&object) {
                            let mut chain = ancestors.clone();
                            chain.push(object);
                            queue.push_back((child_path, chain));
                        }
                    }
                    (None, None) => {}
                }
            }
        }

        tracing::debug!(
            hard_objects = tracker.hard.len(),
            soft_targets = tracker.soft.len(),
            external_targets = tracker.external.len(),
            "link scan complete"
        );
        tracker.refine()?;
        Ok(tracker)
    }

    pub fn record_hard(&mut self, at: &str, object: ObjectId) {
        push_unique(self.hard.entry(object).or_default(), at);
        self.path_objects.insert(at.to_string(), object);
    }

    pub fn record_soft(&mut self, source: &str, target: &str) {
        push_unique(self.soft.entry(target.to_string()).or_default(), source);
    }

    pub fn record_external(&mut self, source: &str, file: &str, target: &str) {
        let key = (file.to_string(), target.to_string());
        push_unique(self.external.entry(key).or_default(), source);
    }

    /// Run the refinement passes and rebuild the lookup indices.
    pub fn refine(&mut self) -> Result<()> {
        self.collapse_soft_chains()?;
        self.prune_hard_groups();
        self.merge_hard_into_soft();
        self.build_indices();
        Ok(())
    }

    fn collapse_soft_chains(&mut self) -> Result<()> {
        let collapsed = self.collapsed_soft_groups()?;
        self.soft = collapsed;
        Ok(())
    }

    fn collapsed_soft_groups(&self) -> Result<IndexMap<String, Vec<String>>> {
        let source_to_key: HashMap<&str, &str> = self
            .soft
            .iter()
            .flat_map(|(key, members)| members.iter().map(move |m| (m.as_str(), key.as_str())))
            .collect();

        let mut collapsed: IndexMap<String, Vec<String>> = IndexMap::new();
        for (key, members) in &self.soft {
            let mut location = key.as_str();
            let mut hops = 0;
            while let Some(next) = source_to_key.get(location) {
                hops += 1;
                if hops > self.max_hops {
                    return Err(GateError::LinkIntegrity {
                        path: key.clone(),
                        message: format!("symbolic link loop (more than {} hops)", self.max_hops),
                    });
                }
                location = *next;
            }
            let group = collapsed.entry(location.to_string()).or_default();
            if key != location {
                push_unique(group, key);
            }
            for member in members {
                push_unique(group, member);
            }
        }
        Ok(collapsed)
    }

    fn prune_hard_groups(&mut self) {
        let path_objects = &self.path_objects;
        self.hard.retain(|_, members| {
            if members.len() < 2 {
                return false;
            }
            let name = path::basename(&members[0]);
            if !members.iter().all(|m| path::basename(m) == name) {
                return true;
            }
            let parents: BTreeSet<Option<ObjectId>> = members
                .iter()
                .map(|m| path_objects.get(path::parent(m)).copied())
                .collect();
            // Same name under one (aliased) parent: implied by the parent-level link.
            !(parents.len() == 1 && !parents.contains(&None))
        });
    }

    fn merge_hard_into_soft(&mut self) {
        let mut plans: Vec<(ObjectId, Vec<String>)> = Vec::new();
        for (object, members) in &self.hard {
            let keys: Vec<String> = members
                .iter()
                .filter(|m| self.soft.contains_key(*m))
                .cloned()
                .collect();
            if !keys.is_empty() {
                plans.push((*object, keys));
            }
        }
        for (object, keys) in plans {
            let primary = keys[0].clone();
            let mut merged = self.soft.get(&primary).cloned().unwrap_or_default();
            for other in &keys[1..] {
                push_unique(&mut merged, other);
                for member in self.soft.shift_remove(other).unwrap_or_default() {
                    push_unique(&mut merged, &member);
                }
            }
            for member in self.hard.remove(&object).unwrap_or_default() {
                if member != primary {
                    push_unique(&mut merged, &member);
                }
            }
            tracing::debug!(target_path = %primary, object, "merged hard-link group into soft-link group");
            self.soft.insert(primary, merged);
        }
    }

    fn build_indices(&mut self) {
        self.hard_index.clear();
        self.soft_index.clear();
        self.external_index.clear();
        for (object, members) in &self.hard {
            for member in members {
                self.hard_index.insert(member.clone(), *object);
            }
        }
        for (key, members) in &self.soft {
            self.soft_index.insert(key.clone(), key.clone());
            for member in members {
                self.soft_index.insert(member.clone(), key.clone());
            }
        }
        for (key, members) in &self.external {
            for member in members {
                self.external_index.insert(member.clone(), key.clone());
            }
        }
    }

    /// The refined groups: hard first, then soft, then external.
    pub fn groups(&self) -> Vec<LinkGroup> {
        let hard = self.hard.iter().map(|(object, members)| LinkGroup {
            key: LocationKey::Object { object: *object },
            members: members.clone(),
        });
        let soft = self.soft.iter().map(|(key, members)| LinkGroup {
            key: LocationKey::Path { path: key.clone() },
            members: members.clone(),
        });
        let external = self.external.iter().map(|((file, target), members)| LinkGroup {
            key: LocationKey::External {
                file: file.clone(),
                path: target.clone(),
            },
            members: members.clone(),
        });
        hard.chain(soft).chain(external).collect()
    }

    /// The group `path` belongs to, if any. Soft membership wins over the
    /// other kinds (a soft-link target may itself be an external link).
    pub fn group_of(&self, at: &str) -> Option<LinkGroup> {
        if let Some(key) = self.soft_index.get(at) {
            return Some(LinkGroup {
                key: LocationKey::Path { path: key.clone() },
                members: self.soft.get(key).cloned().unwrap_or_default(),
            });
        }
        if let Some(object) = self.hard_index.get(at) {
            return Some(LinkGroup {
                key: LocationKey::Object { object: *object },
                members: self.hard.get(object).cloned().unwrap_or_default(),
            });
        }
        let (file, target) = self.external_index.get(at)?;
        Some(LinkGroup {
            key: LocationKey::External {
                file: file.clone(),
                path: target.clone(),
            },
            members: self
                .external
                .get(&(file.clone(), target.clone()))
                .cloned()
                .unwrap_or_default(),
        })
    }

    /// Every live path aliasing the object at `at`, or `None` when fewer than
    /// two remain. `live` filters out paths that are not real tree nodes.
    pub fn common_links(&self, at: &str, live: impl Fn(&str) -> bool) -> Option<Vec<String>> {
        let mut paths = self.group_of(at)?.paths();
        paths.retain(|p| live(p));
        if paths.len() < 2 {
            None
        } else {
            Some(paths)
        }
    }

    /// Decide whether `at` is a link source or target.
    ///
    /// Precedence:
    /// 1. external link entries are always sources,
    /// 2. in a soft group the key path is the target, every member a source,
    /// 3. in a hard group a path is a source once another path has been
    ///    chosen as the group's target,
    /// 4. otherwise a path whose definition declares a link is a source,
    /// 5. otherwise the path becomes the group's target.
    ///
    /// Steps 3 and 5 make this stateful: call it once per path, in binding
    /// order.
    pub fn classify(&mut self, at: &str, declares_link_source: bool) -> LinkRole {
        if let Some((file, target)) = self.external_index.get(at) {
            return LinkRole::Source(LocationKey::External {
                file: file.clone(),
                path: target.clone(),
            });
        }
        if let Some(key) = self.soft_index.get(at) {
            let location = LocationKey::Path { path: key.clone() };
            return if key == at {
                LinkRole::Target(location)
            } else {
                LinkRole::Source(location)
            };
        }
        let Some(object) = self.hard_index.get(at).copied() else {
            return LinkRole::None;
        };
        let location = LocationKey::Object { object };
        match self.hard_targets.get(&object) {
            Some(target) if target == at => LinkRole::Target(location),
            Some(_) => LinkRole::Source(location),
            None if declares_link_source => LinkRole::Source(location),
            None => {
                self.hard_targets.insert(object, at.to_string());
                LinkRole::Target(location)
            }
        }
    }

    /// Path chosen as target of a hard group, once known.
    pub fn hard_target(&self, object: ObjectId) -> Option<&str> {
        self.hard_targets.get(&object).map(String::as_str)
    }

    /// Register a hard link created by the client; `target` is the original.
    pub fn add_hard_link(&mut self, source: &str, target: &str, object: ObjectId) -> Result<()> {
        self.record_hard(target, object);
        self.record_hard(source, object);
        self.hard_targets
            .entry(object)
            .or_insert_with(|| target.to_string());
        self.refine()
    }

    pub fn add_soft_link(&mut self, source: &str, target: &str) -> Result<()> {
        self.record_soft(source, target);
        self.refine()
    }

    pub fn add_external_link(&mut self, source: &str, file: &str, target: &str) -> Result<()> {
        self.record_external(source, file, target);
        self.refine()
    }
}

/// Soft-link targets are stored as written; relative ones resolve against
/// the link's own group.
fn absolute(group: &str, target: &str) -> String {
    if path::is_absolute(target) {
        path::normalize(target)
    } else {
        path::normalize(&path::join(group, target))
    }
}
