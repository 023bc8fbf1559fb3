//! Serde shape of a namespace document, before typing.
//!
//! Reserved keys are captured into named fields; every other key of a node
//! definition is a child member. Attribute definitions and the small nested
//! objects reject unknown keys so typos fail at load time.

use indexmap::IndexMap;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawNamespace {
    pub info: RawInfo,
    #[serde(default)]
    pub schema: IndexMap<String, RawNode>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawInfo {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub contact: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RawNode {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub merge: Vec<String>,
    #[serde(default)]
    pub include: IndexMap<String, RawInclude>,
    #[serde(default)]
    pub attributes: IndexMap<String, RawAttr>,
    #[serde(default, rename = "_properties")]
    pub properties: RawProperties,
    #[serde(default)]
    pub data_type: Option<String>,
    #[serde(default)]
    pub dimensions: Option<Vec<String>>,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    #[serde(default, rename = "const")]
    pub is_const: bool,
    #[serde(default)]
    pub link: Option<RawLink>,
    #[serde(default)]
    pub autogen: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(flatten)]
    pub members: IndexMap<String, RawNode>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawInclude {
    #[serde(default)]
    pub subclasses: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawProperties {
    #[serde(default)]
    pub closed: Option<bool>,
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawLink {
    pub target_type: String,
    #[serde(default)]
    pub allow_subclasses: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawAttr {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub data_type: Option<String>,
    #[serde(default)]
    pub dimensions: Option<Vec<String>>,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    #[serde(default, rename = "const")]
    pub is_const: bool,
    #[serde(default)]
    pub autogen: Option<serde_json::Map<String, serde_json::Value>>,
}
