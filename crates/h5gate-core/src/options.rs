use serde::{Deserialize, Serialize};

use h5gate_store::OpenMode;

/// Default bound on soft-link chain length.
pub const DEFAULT_MAX_LINK_HOPS: usize = 100;

/// Per-session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    pub mode: OpenMode,
    /// Report undeclared members of closed groups as warnings.
    pub tolerant: bool,
    pub max_link_hops: usize,
    /// Store the namespace texts in the container on close (write sessions).
    pub embed_spec: bool,
    pub specifications_path: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            mode: OpenMode::Read,
            tolerant: false,
            max_link_hops: DEFAULT_MAX_LINK_HOPS,
            embed_spec: false,
            specifications_path: "/specifications".to_string(),
        }
    }
}

impl SessionOptions {
    pub fn with_mode(mut self, mode: OpenMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let options = SessionOptions::from_json(r#"{"tolerant": true, "mode": "read_write"}"#).unwrap();
        assert!(options.tolerant);
        assert_eq!(options.mode, OpenMode::ReadWrite);
        assert_eq!(options.max_link_hops, DEFAULT_MAX_LINK_HOPS);
        assert_eq!(options.specifications_path, "/specifications");
    }
}
