//! Autogen directive syntax.
//!
//! An `autogen` entry on a dataset or attribute definition says how the
//! field's value is derived from the resolved structure of the file instead of
//! being supplied by the client. Directives are checked here, at load time, so
//! the engine only ever sees well-formed ones.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use h5gate_store::Value;

use crate::ident::{NodeKind, QualifiedId, Quantity};

/// Default rendering template for `link_path` entries.
pub const DEFAULT_LINK_FORMAT: &str = "$s is $t";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutogenKind {
    /// Every path aliasing the single matched target.
    Links,
    /// `source -> target` pairs for matched link sources.
    LinkPath,
    /// Names of matched nodes.
    Names,
    /// Union of the values stored in matched datasets.
    Values,
    /// Element count of the matched dataset.
    Length,
    /// Instantiate the annotated group if it is missing.
    Create,
    /// Required members of the enclosing group that were never created.
    Missing,
    /// Children of the enclosing group that are external links.
    Extern,
}

impl AutogenKind {
    pub const ALL: [AutogenKind; 8] = [
        AutogenKind::Links,
        AutogenKind::LinkPath,
        AutogenKind::Names,
        AutogenKind::Values,
        AutogenKind::Length,
        AutogenKind::Create,
        AutogenKind::Missing,
        AutogenKind::Extern,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AutogenKind::Links => "links",
            AutogenKind::LinkPath => "link_path",
            AutogenKind::Names => "names",
            AutogenKind::Values => "values",
            AutogenKind::Length => "length",
            AutogenKind::Create => "create",
            AutogenKind::Missing => "missing",
            AutogenKind::Extern => "extern",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == text)
    }

    /// Kinds that resolve a target template (the others look at the
    /// enclosing group only).
    pub fn needs_target(self) -> bool {
        matches!(
            self,
            AutogenKind::Links
                | AutogenKind::LinkPath
                | AutogenKind::Names
                | AutogenKind::Values
                | AutogenKind::Length
        )
    }

    /// Kinds whose field holds the computed value (all but `create`).
    pub fn writes_value(self) -> bool {
        !matches!(self, AutogenKind::Create)
    }

    /// `missing` must observe the side effects of every other directive.
    pub fn computed_last(self) -> bool {
        matches!(self, AutogenKind::Missing)
    }
}

impl std::fmt::Display for AutogenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Filter applied to nodes matched by a target template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetSignature {
    pub kind: Option<NodeKind>,
    pub type_ref: Option<QualifiedId>,
    pub attrs: IndexMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutogenSpec {
    pub kind: AutogenKind,
    pub target: Option<String>,
    pub tsig: Option<TargetSignature>,
    pub trim: bool,
    pub sort: bool,
    /// `!` (exactly one target required) or `*` (zero or more).
    pub qty: Quantity,
    pub include_empty: bool,
    pub format: String,
}

impl AutogenSpec {
    pub fn new(kind: AutogenKind) -> Self {
        Self {
            kind,
            target: None,
            tsig: None,
            trim: false,
            sort: true,
            qty: Quantity::ExactlyOne,
            include_empty: false,
            format: DEFAULT_LINK_FORMAT.to_string(),
        }
    }
}

fn flag(map: &Map<String, Json>, key: &str, default: bool) -> Result<bool, String> {
    match map.get(key) {
        None => Ok(default),
        Some(Json::Bool(b)) => Ok(*b),
        Some(other) => Err(format!("`{key}` must be a boolean, found {other}")),
    }
}

fn string(map: &Map<String, Json>, key: &str) -> Result<Option<String>, String> {
    match map.get(key) {
        None => Ok(None),
        Some(Json::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(format!("`{key}` must be a string, found {other}")),
    }
}

fn parse_tsig(json: &Json, namespace: &str) -> Result<TargetSignature, String> {
    let Json::Object(map) = json else {
        return Err("`tsig` must be an object".to_string());
    };
    let mut tsig = TargetSignature::default();
    for (key, value) in map {
        match key.as_str() {
            "type" => {
                let Json::String(text) = value else {
                    return Err("`tsig.type` must be a string".to_string());
                };
                match text.as_str() {
                    "group" => tsig.kind = Some(NodeKind::Group),
                    "dataset" => tsig.kind = Some(NodeKind::Dataset),
                    other => {
                        let id = QualifiedId::parse(other, namespace)
                            .map_err(|e| format!("`tsig.type`: {e}"))?;
                        tsig.kind = Some(id.kind());
                        tsig.type_ref = Some(id);
                    }
                }
            }
            "attrs" => {
                let Json::Object(attrs) = value else {
                    return Err("`tsig.attrs` must be an object".to_string());
                };
                for (name, literal) in attrs {
                    let value = Value::from_json(literal)
                        .ok_or_else(|| format!("`tsig.attrs.{name}` is not a scalar or list"))?;
                    tsig.attrs.insert(name.clone(), value);
                }
            }
            other => return Err(format!("unknown `tsig` key `{other}`")),
        }
    }
    Ok(tsig)
}

/// Check and type one directive. `namespace` qualifies type references.
pub fn parse_autogen(map: &Map<String, Json>, namespace: &str) -> Result<AutogenSpec, String> {
    const KEYS: [&str; 9] = [
        "type",
        "target",
        "tsig",
        "trim",
        "sort",
        "qty",
        "include_empty",
        "format",
        "description",
    ];
    if let Some(unknown) = map.keys().find(|k| !KEYS.contains(&k.as_str())) {
        return Err(format!("unknown key `{unknown}`"));
    }

    let kind_text = string(map, "type")?.ok_or_else(|| "missing `type`".to_string())?;
    let kind = AutogenKind::parse(&kind_text)
        .ok_or_else(|| format!("unknown autogen type `{kind_text}`"))?;

    let mut spec = AutogenSpec::new(kind);
    spec.target = string(map, "target")?;
    if kind.needs_target() && spec.target.as_deref().map_or(true, str::is_empty) {
        return Err(format!("autogen type `{kind}` requires a `target`"));
    }
    if let Some(tsig) = map.get("tsig") {
        spec.tsig = Some(parse_tsig(tsig, namespace)?);
    }
    spec.trim = flag(map, "trim", false)?;
    spec.sort = flag(map, "sort", true)?;
    spec.include_empty = flag(map, "include_empty", false)?;
    if let Some(qty) = string(map, "qty")? {
        spec.qty = match qty.as_str() {
            "!" => Quantity::ExactlyOne,
            "*" => Quantity::ZeroOrMore,
            other => return Err(format!("invalid quantity `{other}` (expected `!` or `*`)")),
        };
    }
    if let Some(format) = string(map, "format")? {
        spec.format = format;
    }
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(json: Json) -> Result<AutogenSpec, String> {
        parse_autogen(json.as_object().unwrap(), "core")
    }

    #[test]
    fn defaults() {
        let spec = parse(json!({"type": "missing"})).unwrap();
        assert_eq!(spec.kind, AutogenKind::Missing);
        assert!(spec.sort);
        assert!(!spec.trim);
        assert_eq!(spec.qty, Quantity::ExactlyOne);
        assert_eq!(spec.format, DEFAULT_LINK_FORMAT);
    }

    #[test]
    fn full_directive() {
        let spec = parse(json!({
            "type": "link_path",
            "target": "<epoch_ts>/*/timeseries",
            "trim": true,
            "qty": "*",
            "format": "'$s' is '$t'",
            "tsig": {"type": "<TimeSeries>/", "attrs": {"unit": "volt"}}
        }))
        .unwrap();
        assert_eq!(spec.kind, AutogenKind::LinkPath);
        assert_eq!(spec.qty, Quantity::ZeroOrMore);
        let tsig = spec.tsig.unwrap();
        assert_eq!(tsig.type_ref, Some(QualifiedId::new("core", "<TimeSeries>/")));
        assert_eq!(tsig.kind, Some(NodeKind::Group));
        assert_eq!(tsig.attrs.get("unit"), Some(&Value::text("volt")));
    }

    #[test]
    fn rejects_unknown_kind() {
        let err = parse(json!({"type": "frobnicate"})).unwrap_err();
        assert!(err.contains("unknown autogen type"));
    }

    #[test]
    fn rejects_missing_target() {
        let err = parse(json!({"type": "links"})).unwrap_err();
        assert!(err.contains("requires a `target`"));
    }

    #[test]
    fn rejects_non_boolean_flag() {
        let err = parse(json!({"type": "names", "target": "x", "trim": "yes"})).unwrap_err();
        assert!(err.contains("must be a boolean"));
    }

    #[test]
    fn rejects_bad_quantity() {
        let err = parse(json!({"type": "names", "target": "x", "qty": "+"})).unwrap_err();
        assert!(err.contains("invalid quantity"));
    }
}
