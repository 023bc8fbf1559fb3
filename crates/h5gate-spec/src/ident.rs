//! Member ids, qualified type ids and quantity markers.
//!
//! Surface grammar (keys of a node definition):
//!
//! ```text
//! member_id    := [namespace ":"] ( "<" Type ">" | name ) ["/"] [qty]
//! qualified_id := [namespace ":"] "<" Type ">" ["/"]
//! qty          := "!" | "?" | "*" | "+"
//! ```
//!
//! A trailing `/` marks a group. `<Type>` marks a variable-named member: each
//! instance is named by the client and carries the definition of `Type`.

use nom::{
    branch::alt,
    bytes::complete::take_while1,
    character::complete::{char as pchar, one_of},
    combinator::{all_consuming, map, opt},
    sequence::{delimited, terminated, tuple},
    IResult,
};
use serde::{Deserialize, Serialize};

/// Group or dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Group,
    Dataset,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::Group => write!(f, "group"),
            NodeKind::Dataset => write!(f, "dataset"),
        }
    }
}

/// Multiplicity marker of a declared member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quantity {
    /// `!`
    ExactlyOne,
    /// `?`
    ZeroOrOne,
    /// `*`
    ZeroOrMore,
    /// `+`
    OneOrMore,
}

impl Quantity {
    pub fn from_marker(marker: char) -> Option<Self> {
        match marker {
            '!' => Some(Quantity::ExactlyOne),
            '?' => Some(Quantity::ZeroOrOne),
            '*' => Some(Quantity::ZeroOrMore),
            '+' => Some(Quantity::OneOrMore),
            _ => None,
        }
    }

    pub fn marker(self) -> char {
        match self {
            Quantity::ExactlyOne => '!',
            Quantity::ZeroOrOne => '?',
            Quantity::ZeroOrMore => '*',
            Quantity::OneOrMore => '+',
        }
    }

    /// At least one instance must exist by the end of a session.
    pub fn is_required(self) -> bool {
        matches!(self, Quantity::ExactlyOne | Quantity::OneOrMore)
    }

    /// Maximum number of instances (`None` = unbounded).
    pub fn max(self) -> Option<usize> {
        match self {
            Quantity::ExactlyOne | Quantity::ZeroOrOne => Some(1),
            Quantity::ZeroOrMore | Quantity::OneOrMore => None,
        }
    }
}

/// A type id qualified by its namespace, e.g. `core:<TimeSeries>/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QualifiedId {
    pub namespace: String,
    /// Local id including brackets and group slash: `<TimeSeries>/`.
    pub local: String,
}

impl QualifiedId {
    pub fn new(namespace: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            local: local.into(),
        }
    }

    /// Bare type name without brackets or slash.
    pub fn type_name(&self) -> &str {
        self.local
            .trim_end_matches('/')
            .trim_start_matches('<')
            .trim_end_matches('>')
    }

    pub fn kind(&self) -> NodeKind {
        if self.local.ends_with('/') {
            NodeKind::Group
        } else {
            NodeKind::Dataset
        }
    }

    /// Parse `ns:<Type>/` (or `<Type>/`, qualified with `default_ns`).
    pub fn parse(text: &str, default_ns: &str) -> Result<Self, String> {
        let id = parse_member_id(text)?;
        if id.explicit_quantity {
            return Err("a type reference cannot carry a quantity marker".to_string());
        }
        id.qualify(default_ns)
            .ok_or_else(|| "type references must use the `<Type>` form".to_string())
    }
}

impl std::fmt::Display for QualifiedId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.namespace, self.local)
    }
}

impl std::str::FromStr for QualifiedId {
    type Err = String;

    /// Parse a fully qualified id (`ns:<Type>/`); the namespace is mandatory.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = parse_member_id(s)?;
        match (&id.namespace, &id.name, id.explicit_quantity) {
            (Some(ns), MemberName::Typed(_), false) => Ok(QualifiedId::new(ns.clone(), id.key_local())),
            _ => Err(format!("`{s}` is not a qualified type id")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberName {
    /// A fixed name, e.g. `timestamps`. The root group has the empty name.
    Fixed(String),
    /// A variable-named instance of a type, e.g. `<TimeSeries>`.
    Typed(String),
}

/// A parsed member id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberId {
    pub namespace: Option<String>,
    pub name: MemberName,
    pub kind: NodeKind,
    pub quantity: Quantity,
    /// Whether the quantity was written out (as opposed to defaulted).
    pub explicit_quantity: bool,
}

impl MemberId {
    pub fn root() -> Self {
        Self {
            namespace: None,
            name: MemberName::Fixed(String::new()),
            kind: NodeKind::Group,
            quantity: Quantity::ExactlyOne,
            explicit_quantity: false,
        }
    }

    /// Id without quantity and namespace: `<TimeSeries>/`, `data`, `acquisition/`.
    pub fn key_local(&self) -> String {
        let slash = if self.kind == NodeKind::Group { "/" } else { "" };
        match &self.name {
            MemberName::Fixed(n) => format!("{n}{slash}"),
            MemberName::Typed(t) => format!("<{t}>{slash}"),
        }
    }

    /// Key used in member maps (namespace prefix kept, quantity dropped).
    pub fn key(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}:{}", self.key_local()),
            None => self.key_local(),
        }
    }

    /// Name shown in reports: `data`, `acquisition`, `<TimeSeries>`.
    pub fn display_name(&self) -> String {
        match &self.name {
            MemberName::Fixed(n) => n.clone(),
            MemberName::Typed(t) => format!("<{t}>"),
        }
    }

    pub fn fixed_name(&self) -> Option<&str> {
        match &self.name {
            MemberName::Fixed(n) => Some(n),
            MemberName::Typed(_) => None,
        }
    }

    pub fn is_variable(&self) -> bool {
        matches!(self.name, MemberName::Typed(_))
    }

    /// The type a `<Type>` member instantiates.
    pub fn qualify(&self, default_ns: &str) -> Option<QualifiedId> {
        match &self.name {
            MemberName::Typed(_) => Some(QualifiedId::new(
                self.namespace.as_deref().unwrap_or(default_ns),
                self.key_local(),
            )),
            MemberName::Fixed(_) => None,
        }
    }
}

impl std::fmt::Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())?;
        if self.explicit_quantity {
            write!(f, "{}", self.quantity.marker())?;
        }
        Ok(())
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.'
}

fn name(input: &str) -> IResult<&str, &str> {
    take_while1(is_name_char)(input)
}

fn namespace_prefix(input: &str) -> IResult<&str, &str> {
    terminated(name, pchar(':'))(input)
}

fn member_name(input: &str) -> IResult<&str, MemberName> {
    alt((
        map(delimited(pchar('<'), name, pchar('>')), |n: &str| {
            MemberName::Typed(n.to_string())
        }),
        map(name, |n: &str| MemberName::Fixed(n.to_string())),
    ))(input)
}

fn member_id(input: &str) -> IResult<&str, MemberId> {
    let (rest, (namespace, name, slash, qty)) = tuple((
        opt(namespace_prefix),
        member_name,
        opt(pchar('/')),
        opt(one_of("!?*+")),
    ))(input)?;
    let quantity = qty.and_then(Quantity::from_marker);
    Ok((
        rest,
        MemberId {
            namespace: namespace.map(str::to_string),
            name,
            kind: if slash.is_some() {
                NodeKind::Group
            } else {
                NodeKind::Dataset
            },
            quantity: quantity.unwrap_or(Quantity::ExactlyOne),
            explicit_quantity: quantity.is_some(),
        },
    ))
}

/// Parse a member id. The quantity defaults to `!`.
pub fn parse_member_id(text: &str) -> Result<MemberId, String> {
    let trimmed = text.trim();
    if trimmed == "/" {
        return Ok(MemberId::root());
    }
    let (_, id) = all_consuming(member_id)(trimmed)
        .map_err(|e| format!("cannot parse member id `{trimmed}`: {e}"))?;
    if id.namespace.is_some() && !id.is_variable() {
        return Err(format!(
            "`{trimmed}`: only `<Type>` members may carry a namespace prefix"
        ));
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_typed_group_with_quantity() {
        let id = parse_member_id("core:<TimeSeries>/*").unwrap();
        assert_eq!(id.namespace.as_deref(), Some("core"));
        assert_eq!(id.name, MemberName::Typed("TimeSeries".to_string()));
        assert_eq!(id.kind, NodeKind::Group);
        assert_eq!(id.quantity, Quantity::ZeroOrMore);
        assert_eq!(id.key(), "core:<TimeSeries>/");
        assert_eq!(id.display_name(), "<TimeSeries>");
    }

    #[test]
    fn dataset_defaults_to_exactly_one() {
        let id = parse_member_id("timestamps").unwrap();
        assert_eq!(id.kind, NodeKind::Dataset);
        assert_eq!(id.quantity, Quantity::ExactlyOne);
        assert!(!id.explicit_quantity);
        assert_eq!(id.to_string(), "timestamps");
    }

    #[test]
    fn root_is_special() {
        let id = parse_member_id("/").unwrap();
        assert_eq!(id, MemberId::root());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_member_id("a b").is_err());
        assert!(parse_member_id("data!!").is_err());
        assert!(parse_member_id("core:data").is_err());
        assert!(parse_member_id("<Open").is_err());
    }

    #[test]
    fn qualified_ids() {
        let q = QualifiedId::parse("<TimeSeries>/", "core").unwrap();
        assert_eq!(q.to_string(), "core:<TimeSeries>/");
        assert_eq!(q.type_name(), "TimeSeries");
        assert_eq!(q.kind(), NodeKind::Group);
        assert!(QualifiedId::parse("<TimeSeries>/?", "core").is_err());
        assert!(QualifiedId::parse("timestamps", "core").is_err());
        let parsed: QualifiedId = "ext:<Probe>".parse().unwrap();
        assert_eq!(parsed, QualifiedId::new("ext", "<Probe>"));
        assert!("<Probe>".parse::<QualifiedId>().is_err());
    }
}
