//! In-memory reference store.
//!
//! Objects live in an arena indexed by [`ObjectId`]; groups hold an ordered map
//! of entries, each entry being a hard reference to an object or a stored
//! soft/external redirect. Snapshots are plain JSON.

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::path;
use crate::{
    ChildEntry, DatasetOptions, EntryKind, HierStore, LinkTarget, ObjectId, OpenMode, StoreError,
    Value,
};

/// Upper bound on soft-link hops while resolving a single path.
pub const MAX_RESOLVE_HOPS: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
enum Entry {
    Hard { object: ObjectId },
    Soft { target: String },
    External { file: String, target: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Body {
    Group {
        children: IndexMap<String, Entry>,
    },
    Dataset {
        value: Value,
        #[serde(default)]
        options: DatasetOptions,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredObject {
    body: Body,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    attrs: IndexMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemStore {
    #[serde(skip, default = "default_mode")]
    mode: OpenMode,
    objects: Vec<StoredObject>,
}

fn default_mode() -> OpenMode {
    OpenMode::ReadWrite
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    /// A new, empty, writable container holding only the root group.
    pub fn new() -> Self {
        Self {
            mode: OpenMode::Write,
            objects: vec![StoredObject {
                body: Body::Group {
                    children: IndexMap::new(),
                },
                attrs: IndexMap::new(),
            }],
        }
    }

    /// Open a snapshot file. `Write` starts a fresh container without reading.
    pub fn open(file: impl AsRef<Path>, mode: OpenMode) -> Result<Self, StoreError> {
        let file = file.as_ref();
        if !mode.reads_existing() {
            return Ok(Self::new());
        }
        let text = std::fs::read_to_string(file).map_err(|source| StoreError::Io {
            path: file.to_path_buf(),
            source,
        })?;
        let mut store = Self::from_json(&text).map_err(|source| StoreError::Corrupt {
            path: file.to_path_buf(),
            source,
        })?;
        store.mode = mode;
        tracing::debug!(file = %file.display(), objects = store.objects.len(), ?mode, "opened container");
        Ok(store)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let store: Self = serde_json::from_str(text)?;
        if store.objects.is_empty() || !matches!(store.objects[0].body, Body::Group { .. }) {
            return Err(serde::de::Error::custom("container has no root group"));
        }
        let count = store.objects.len() as ObjectId;
        for object in &store.objects {
            if let Body::Group { children } = &object.body {
                for (name, entry) in children {
                    if let Entry::Hard { object } = entry {
                        if *object >= count {
                            return Err(serde::de::Error::custom(format!(
                                "entry `{name}` references missing object {object}"
                            )));
                        }
                    }
                }
            }
        }
        Ok(store)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn save(&self, file: impl AsRef<Path>) -> Result<(), StoreError> {
        let file = file.as_ref();
        let text = self.to_json().map_err(|source| StoreError::Corrupt {
            path: file.to_path_buf(),
            source,
        })?;
        std::fs::write(file, text).map_err(|source| StoreError::Io {
            path: file.to_path_buf(),
            source,
        })
    }

    pub fn set_mode(&mut self, mode: OpenMode) {
        self.mode = mode;
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    fn check_writable(&self, target: &str) -> Result<(), StoreError> {
        if self.mode.is_mutable() {
            Ok(())
        } else {
            Err(StoreError::ReadOnly {
                path: target.to_string(),
            })
        }
    }

    fn children_of(&self, id: ObjectId, at: &str) -> Result<&IndexMap<String, Entry>, StoreError> {
        match &self.objects[id as usize].body {
            Body::Group { children } => Ok(children),
            Body::Dataset { .. } => Err(StoreError::NotAGroup {
                path: at.to_string(),
            }),
        }
    }

    /// Resolve a path to an object, following soft links.
    fn resolve(&self, target: &str, hops: &mut usize) -> Result<ObjectId, StoreError> {
        if !path::is_absolute(target) {
            return Err(StoreError::InvalidPath {
                path: target.to_string(),
                reason: "paths must be absolute".to_string(),
            });
        }
        let mut current: ObjectId = 0;
        let mut walked = String::from("/");
        for comp in path::components(target) {
            let children = self.children_of(current, &walked)?;
            walked = path::join(&walked, comp);
            current = match children.get(comp) {
                None => {
                    return Err(StoreError::NotFound {
                        path: walked.clone(),
                    })
                }
                Some(Entry::Hard { object }) => *object,
                Some(Entry::Soft { target: next }) => {
                    *hops += 1;
                    if *hops > MAX_RESOLVE_HOPS {
                        return Err(StoreError::LinkLoop {
                            path: target.to_string(),
                            hops: MAX_RESOLVE_HOPS,
                        });
                    }
                    self.resolve(next, hops)?
                }
                Some(Entry::External { file, target: ext }) => {
                    return Err(StoreError::ExternalLink {
                        path: walked.clone(),
                        file: file.clone(),
                        target: ext.clone(),
                    })
                }
            };
        }
        Ok(current)
    }

    /// Parent group id and the final component of a path that is about to be created.
    fn prepare_insert(&self, target: &str) -> Result<(ObjectId, String), StoreError> {
        self.check_writable(target)?;
        let name = path::basename(target);
        if name.is_empty() {
            return Err(StoreError::InvalidPath {
                path: target.to_string(),
                reason: "cannot create the root".to_string(),
            });
        }
        let parent_path = path::parent(target);
        let parent = self.object_id(parent_path)?;
        let children = self.children_of(parent, parent_path)?;
        if children.contains_key(name) {
            return Err(StoreError::AlreadyExists {
                path: target.to_string(),
            });
        }
        Ok((parent, name.to_string()))
    }

    fn insert_entry(&mut self, parent: ObjectId, name: String, entry: Entry) {
        if let Body::Group { children } = &mut self.objects[parent as usize].body {
            children.insert(name, entry);
        }
    }

    fn push_object(&mut self, body: Body) -> ObjectId {
        self.objects.push(StoredObject {
            body,
            attrs: IndexMap::new(),
        });
        (self.objects.len() - 1) as ObjectId
    }

    /// The raw entry at `target` without following a link stored there.
    fn entry_at(&self, target: &str) -> Result<Option<&Entry>, StoreError> {
        let parent_path = path::parent(target);
        let parent = self.object_id(parent_path)?;
        let children = self.children_of(parent, parent_path)?;
        Ok(children.get(path::basename(target)))
    }
}

impl HierStore for MemStore {
    fn mode(&self) -> OpenMode {
        self.mode
    }

    fn object_id(&self, target: &str) -> Result<ObjectId, StoreError> {
        let mut hops = 0;
        self.resolve(target, &mut hops)
    }

    fn exists(&self, target: &str) -> bool {
        if target == "/" {
            return true;
        }
        matches!(self.entry_at(target), Ok(Some(_)))
    }

    fn kind_of(&self, target: &str) -> Result<EntryKind, StoreError> {
        let id = self.object_id(target)?;
        Ok(match self.objects[id as usize].body {
            Body::Group { .. } => EntryKind::Group,
            Body::Dataset { .. } => EntryKind::Dataset,
        })
    }

    fn create_group(&mut self, parent: &str, name: &str) -> Result<(), StoreError> {
        let full = path::join(parent, name);
        let (parent_id, name) = self.prepare_insert(&full)?;
        let id = self.push_object(Body::Group {
            children: IndexMap::new(),
        });
        self.insert_entry(parent_id, name, Entry::Hard { object: id });
        Ok(())
    }

    fn create_dataset(
        &mut self,
        parent: &str,
        name: &str,
        value: Value,
        options: &DatasetOptions,
    ) -> Result<(), StoreError> {
        let full = path::join(parent, name);
        let (parent_id, name) = self.prepare_insert(&full)?;
        let id = self.push_object(Body::Dataset {
            value,
            options: options.clone(),
        });
        self.insert_entry(parent_id, name, Entry::Hard { object: id });
        Ok(())
    }

    fn set_attribute(&mut self, target: &str, name: &str, value: Value) -> Result<(), StoreError> {
        self.check_writable(target)?;
        let id = self.object_id(target)?;
        self.objects[id as usize]
            .attrs
            .insert(name.to_string(), value);
        Ok(())
    }

    fn get_value(&self, target: &str) -> Result<Value, StoreError> {
        let id = self.object_id(target)?;
        match &self.objects[id as usize].body {
            Body::Dataset { value, .. } => Ok(value.clone()),
            Body::Group { .. } => Err(StoreError::NotADataset {
                path: target.to_string(),
            }),
        }
    }

    fn get_attribute(&self, target: &str, name: &str) -> Result<Option<Value>, StoreError> {
        let id = self.object_id(target)?;
        Ok(self.objects[id as usize].attrs.get(name).cloned())
    }

    fn attributes(&self, target: &str) -> Result<Vec<(String, Value)>, StoreError> {
        let id = self.object_id(target)?;
        Ok(self.objects[id as usize]
            .attrs
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn list_children(&self, target: &str) -> Result<Vec<ChildEntry>, StoreError> {
        let id = self.object_id(target)?;
        let children = self.children_of(id, target)?;
        Ok(children
            .iter()
            .map(|(name, entry)| match entry {
                Entry::Hard { object } => ChildEntry {
                    name: name.clone(),
                    kind: match self.objects[*object as usize].body {
                        Body::Group { .. } => EntryKind::Group,
                        Body::Dataset { .. } => EntryKind::Dataset,
                    },
                    object_id: Some(*object),
                    link: None,
                },
                Entry::Soft { target } => ChildEntry {
                    name: name.clone(),
                    kind: EntryKind::SoftLink,
                    object_id: None,
                    link: Some(LinkTarget::Soft {
                        path: target.clone(),
                    }),
                },
                Entry::External { file, target } => ChildEntry {
                    name: name.clone(),
                    kind: EntryKind::ExternalLink,
                    object_id: None,
                    link: Some(LinkTarget::External {
                        file: file.clone(),
                        path: target.clone(),
                    }),
                },
            })
            .collect())
    }

    fn create_hard_link(&mut self, source: &str, target: &str) -> Result<(), StoreError> {
        let object = self.object_id(target)?;
        let (parent_id, name) = self.prepare_insert(source)?;
        self.insert_entry(parent_id, name, Entry::Hard { object });
        Ok(())
    }

    fn create_soft_link(&mut self, source: &str, target: &str) -> Result<(), StoreError> {
        if !path::is_absolute(target) {
            return Err(StoreError::InvalidPath {
                path: target.to_string(),
                reason: "soft link targets must be absolute".to_string(),
            });
        }
        let (parent_id, name) = self.prepare_insert(source)?;
        self.insert_entry(
            parent_id,
            name,
            Entry::Soft {
                target: target.to_string(),
            },
        );
        Ok(())
    }

    fn create_external_link(
        &mut self,
        source: &str,
        file: &str,
        target: &str,
    ) -> Result<(), StoreError> {
        let (parent_id, name) = self.prepare_insert(source)?;
        self.insert_entry(
            parent_id,
            name,
            Entry::External {
                file: file.to_string(),
                target: target.to_string(),
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MemStore {
        let mut store = MemStore::new();
        store.create_group("/", "a").unwrap();
        store
            .create_dataset("/a", "d", Value::IntArray(vec![1, 2, 3]), &DatasetOptions::default())
            .unwrap();
        store
    }

    #[test]
    fn hard_links_share_identity() {
        let mut store = sample();
        store.create_hard_link("/b", "/a").unwrap();
        assert_eq!(store.object_id("/a").unwrap(), store.object_id("/b").unwrap());
        assert_eq!(
            store.get_value("/b/d").unwrap(),
            Value::IntArray(vec![1, 2, 3])
        );
    }

    #[test]
    fn soft_links_resolve_lazily() {
        let mut store = sample();
        store.create_soft_link("/later", "/x").unwrap();
        assert!(store.exists("/later"));
        assert!(matches!(
            store.object_id("/later"),
            Err(StoreError::NotFound { .. })
        ));
        store.create_group("/", "x").unwrap();
        assert_eq!(store.object_id("/later").unwrap(), store.object_id("/x").unwrap());
    }

    #[test]
    fn soft_link_loop_is_bounded() {
        let mut store = MemStore::new();
        store.create_soft_link("/p", "/q").unwrap();
        store.create_soft_link("/q", "/p").unwrap();
        assert!(matches!(
            store.object_id("/p"),
            Err(StoreError::LinkLoop { .. })
        ));
    }

    #[test]
    fn external_links_are_not_followed() {
        let mut store = sample();
        store
            .create_external_link("/ext", "other.json", "/data")
            .unwrap();
        let kinds: Vec<EntryKind> = store
            .list_children("/")
            .unwrap()
            .into_iter()
            .map(|c| c.kind)
            .collect();
        assert_eq!(kinds, vec![EntryKind::Group, EntryKind::ExternalLink]);
        assert!(matches!(
            store.get_value("/ext"),
            Err(StoreError::ExternalLink { .. })
        ));
    }

    #[test]
    fn read_only_refuses_writes() {
        let mut store = sample();
        store.set_mode(OpenMode::Read);
        assert!(matches!(
            store.create_group("/", "z"),
            Err(StoreError::ReadOnly { .. })
        ));
        assert!(matches!(
            store.set_attribute("/a", "k", Value::Int(1)),
            Err(StoreError::ReadOnly { .. })
        ));
    }

    #[test]
    fn snapshot_round_trip_preserves_links() {
        let mut store = sample();
        store.create_hard_link("/b", "/a").unwrap();
        store.create_soft_link("/c", "/a").unwrap();
        let text = store.to_json().unwrap();
        let back = MemStore::from_json(&text).unwrap();
        assert_eq!(back.object_id("/b").unwrap(), back.object_id("/a").unwrap());
        assert_eq!(back.object_id("/c").unwrap(), back.object_id("/a").unwrap());
    }
}
