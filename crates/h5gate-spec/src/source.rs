use std::path::Path;

use h5gate_store::{HierStore, Value};

use crate::raw::RawNamespace;
use crate::SpecError;

/// The JSON text of one namespace plus where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecSource {
    /// File path, store path or caller-chosen label; used in error messages.
    pub origin: String,
    pub text: String,
}

impl SpecSource {
    pub fn new(origin: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            text: text.into(),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SpecError> {
        let path = path.as_ref();
        let origin = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| SpecError::Io {
            origin: origin.clone(),
            source,
        })?;
        Ok(Self { origin, text })
    }

    /// Read every namespace embedded under `path` (one text dataset per
    /// namespace, as written by an embedding session).
    pub fn from_store(store: &dyn HierStore, path: &str) -> Result<Vec<Self>, SpecError> {
        let unreadable = |e: h5gate_store::StoreError| SpecError::Malformed {
            origin: path.to_string(),
            message: e.to_string(),
        };
        let mut sources = Vec::new();
        for child in store.list_children(path).map_err(unreadable)? {
            let child_path = h5gate_store::path::join(path, &child.name);
            match store.get_value(&child_path).map_err(unreadable)? {
                Value::Text(text) => sources.push(SpecSource::new(child_path, text)),
                other => {
                    return Err(SpecError::Malformed {
                        origin: child_path,
                        message: format!(
                            "embedded specification must be text, found {}",
                            other.dtype_name()
                        ),
                    })
                }
            }
        }
        Ok(sources)
    }

    pub(crate) fn parse(&self) -> Result<RawNamespace, SpecError> {
        serde_json::from_str(&self.text).map_err(|e| SpecError::Malformed {
            origin: self.origin.clone(),
            message: e.to_string(),
        })
    }

    /// Namespace name declared in `info.name`, if the text parses.
    pub fn namespace_name(&self) -> Result<String, SpecError> {
        Ok(self.parse()?.info.name.trim().to_string())
    }
}
