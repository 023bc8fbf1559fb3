//! The autogen engine.
//!
//! Each directive goes `Discovered -> Computed -> Validated` and then either
//! `Updated` (mutable sessions write the computed value back) or `Reported`
//! (the disagreement was recorded in the session report).
//!
//! Directives are drained from a FIFO queue. `create` directives may add new
//! nodes, whose own directives are appended to the queue while it is being
//! drained; `missing` directives wait until everything else has run.

pub mod natural;
pub mod template;

use std::collections::{BTreeSet, VecDeque};

use serde::Serialize;

use h5gate_spec::{AutogenKind, AutogenSpec, NodeKind, Quantity};
use h5gate_store::{path, DatasetOptions, HierStore, StoreError, Value};

use crate::error::{GateError, Result};
use crate::report::DiagnosticKind;
use crate::session::Session;
use crate::tree::{LinkState, NodeId};

pub use natural::{natural_sort, natural_sorted, trim_common_suffix};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectiveState {
    Discovered,
    Computed,
    Validated,
    Updated,
    Reported,
}

/// One computed field.
#[derive(Debug, Clone)]
pub struct Directive {
    /// Group that relative target templates start from.
    pub group: NodeId,
    /// Path of the dataset or group holding the field.
    pub path: String,
    /// Member of `group` the field's node instantiates (value directives).
    pub member_key: Option<String>,
    /// Attribute name, for attribute directives.
    pub attr: Option<String>,
    pub spec: AutogenSpec,
    /// Destination declares dimensions: keep list-shaped output.
    pub has_dims: bool,
    pub options: DatasetOptions,
    pub state: DirectiveState,
    pub value: Option<Value>,
}

impl Directive {
    pub fn kind(&self) -> AutogenKind {
        self.spec.kind
    }

    /// `path` or `path@attr`, for messages.
    pub fn field(&self) -> String {
        match &self.attr {
            Some(attr) => format!("{}@{attr}", self.path),
            None => self.path.clone(),
        }
    }
}

/// How a computed value compares with what is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Match,
    Unsorted,
    Mismatch,
    Absent,
}

fn compare(computed: &Value, stored: Option<&Value>) -> Outcome {
    let Some(stored) = stored else {
        return Outcome::Absent;
    };
    if stored.same_as(computed) {
        Outcome::Match
    } else if natural::sorted_value(stored).same_as(&natural::sorted_value(computed)) {
        Outcome::Unsorted
    } else {
        Outcome::Mismatch
    }
}

#[derive(Debug, Default)]
pub struct AutogenEngine {
    directives: Vec<Directive>,
    queue: VecDeque<usize>,
    deferred: Vec<usize>,
}

impl AutogenEngine {
    /// Collect the directives of every bound node.
    pub fn discover<S: HierStore>(session: &Session<S>) -> Result<Self> {
        let mut engine = AutogenEngine::default();
        let ids: Vec<NodeId> = session.tree.ids().collect();
        for id in ids {
            engine.discover_node(session, id)?;
        }
        tracing::debug!(directives = engine.directives.len(), "discovered autogen directives");
        Ok(engine)
    }

    fn push(&mut self, directive: Directive) {
        let index = self.directives.len();
        if directive.kind().computed_last() {
            self.deferred.push(index);
        } else {
            self.queue.push_back(index);
        }
        self.directives.push(directive);
    }

    fn discover_node<S: HierStore>(&mut self, session: &Session<S>, id: NodeId) -> Result<()> {
        let node = session.tree.node(id);
        if node.unconstrained || node.is_link_source() {
            return Ok(());
        }
        let enclosing = if node.is_group() {
            id
        } else {
            node.parent.unwrap_or(id)
        };
        for (name, attr) in &node.spec.spec.attributes {
            if let Some(spec) = &attr.autogen {
                self.push(Directive {
                    group: enclosing,
                    path: node.path.clone(),
                    member_key: None,
                    attr: Some(name.clone()),
                    spec: spec.clone(),
                    has_dims: attr.dimensions.is_some(),
                    options: DatasetOptions::default(),
                    state: DirectiveState::Discovered,
                    value: None,
                });
            }
        }
        if !node.is_group() {
            return Ok(());
        }
        for (key, declared) in node.spec.members() {
            let effective = session.registry.effective_member(declared)?;
            let Some(spec) = &effective.spec.autogen else {
                continue;
            };
            let paths: Vec<String> = match declared.id.fixed_name() {
                Some(name) => vec![path::join(&node.path, name)],
                None => node
                    .instances(key)
                    .iter()
                    .map(|n| session.tree.node(*n).path.clone())
                    .collect(),
            };
            for field_path in paths {
                self.push(Directive {
                    group: id,
                    path: field_path,
                    member_key: Some(key.clone()),
                    attr: None,
                    spec: spec.clone(),
                    has_dims: effective.spec.dimensions.is_some(),
                    options: DatasetOptions {
                        dtype: effective.spec.data_type.clone(),
                        dims: effective.spec.dimensions.clone(),
                        compress: false,
                    },
                    state: DirectiveState::Discovered,
                    value: None,
                });
            }
        }
        Ok(())
    }

    /// Compute every directive: the queue first, `missing` last.
    pub fn compute_all<S: HierStore>(&mut self, session: &mut Session<S>) -> Result<()> {
        while let Some(index) = self.queue.pop_front() {
            self.compute(session, index)?;
        }
        let deferred = std::mem::take(&mut self.deferred);
        for index in deferred {
            self.compute(session, index)?;
        }
        Ok(())
    }

    fn compute<S: HierStore>(&mut self, session: &mut Session<S>, index: usize) -> Result<()> {
        let directive = self.directives[index].clone();
        let value = match directive.kind() {
            AutogenKind::Create => {
                self.compute_create(session, &directive)?;
                None
            }
            AutogenKind::Missing => compute_missing(session, &directive),
            AutogenKind::Extern => compute_extern(session, &directive),
            AutogenKind::Links => compute_links(session, &directive)?,
            AutogenKind::LinkPath => compute_link_path(session, &directive)?,
            AutogenKind::Names => compute_names(session, &directive)?,
            AutogenKind::Values => compute_values(session, &directive)?,
            AutogenKind::Length => compute_length(session, &directive)?,
        };
        tracing::trace!(field = %directive.field(), kind = %directive.kind(), value = ?value, "computed autogen value");
        let slot = &mut self.directives[index];
        slot.value = value;
        slot.state = DirectiveState::Computed;
        Ok(())
    }

    fn compute_create<S: HierStore>(
        &mut self,
        session: &mut Session<S>,
        directive: &Directive,
    ) -> Result<()> {
        if session.tree.lookup(&directive.path).is_some() || !session.is_mutable() {
            return Ok(());
        }
        let Some(key) = &directive.member_key else {
            return Ok(());
        };
        let group = session.tree.node(directive.group);
        let Some(declared) = group.spec.member(key) else {
            return Ok(());
        };
        if declared.kind() != NodeKind::Group || !declared.id.quantity.is_required() {
            return Ok(());
        }
        let created = session.create_group(directive.group, key, None)?;
        tracing::debug!(path = %directive.path, "autogen created group");
        let before = self.directives.len();
        self.discover_node(session, created)?;
        tracing::trace!(added = self.directives.len() - before, "directives discovered in created group");
        Ok(())
    }

    /// Compare computed values with stored ones and, in mutable sessions,
    /// write back the ones that differ.
    pub fn settle<S: HierStore>(&mut self, session: &mut Session<S>) -> Result<()> {
        for index in 0..self.directives.len() {
            let directive = self.directives[index].clone();
            let Some(computed) = &directive.value else {
                continue;
            };
            let stored = read_stored(session, &directive)?;
            let outcome = compare(computed, stored.as_ref());
            let state = if session.is_mutable() {
                update(session, &directive, computed, outcome)?
            } else {
                report(session, &directive, outcome)
            };
            self.directives[index].state = state;
        }
        Ok(())
    }

    pub fn directives(&self) -> &[Directive] {
        &self.directives
    }

    pub fn into_directives(self) -> Vec<Directive> {
        self.directives
    }
}

fn read_stored<S: HierStore>(session: &Session<S>, directive: &Directive) -> Result<Option<Value>> {
    let result = match &directive.attr {
        Some(attr) => session.store.get_attribute(&directive.path, attr),
        None if session.store.exists(&directive.path) => {
            session.store.get_value(&directive.path).map(Some)
        }
        None => Ok(None),
    };
    match result {
        Ok(value) => Ok(value),
        Err(StoreError::ExternalLink { .. }) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn report<S: HierStore>(session: &mut Session<S>, directive: &Directive, outcome: Outcome) -> DirectiveState {
    let field = directive.field();
    let advisory = directive.kind() == AutogenKind::Length;
    match outcome {
        Outcome::Match => return DirectiveState::Validated,
        Outcome::Unsorted => session.report.record(
            !directive.spec.sort,
            DiagnosticKind::AutogenUnsorted,
            field,
            "stored value has the computed content but is not sorted",
        ),
        Outcome::Mismatch => session.report.record(
            advisory,
            DiagnosticKind::AutogenMismatch,
            field,
            format!(
                "stored value differs from computed {}",
                render(directive.value.as_ref())
            ),
        ),
        Outcome::Absent => session.report.record(
            advisory,
            DiagnosticKind::AutogenMismatch,
            field,
            format!("missing; expected {}", render(directive.value.as_ref())),
        ),
    }
    DirectiveState::Reported
}

fn render(value: Option<&Value>) -> String {
    value.map_or_else(|| "nothing".to_string(), |v| format!("`{v}`"))
}

fn update<S: HierStore>(
    session: &mut Session<S>,
    directive: &Directive,
    computed: &Value,
    outcome: Outcome,
) -> Result<DirectiveState> {
    match (outcome, &directive.attr) {
        (Outcome::Match, _) => Ok(DirectiveState::Validated),
        (Outcome::Unsorted, _) if !directive.spec.sort => {
            session.report.warn(
                DiagnosticKind::AutogenUnsorted,
                directive.field(),
                "stored value has the computed content but is not sorted",
            );
            Ok(DirectiveState::Reported)
        }
        (_, Some(attr)) => {
            session
                .store
                .set_attribute(&directive.path, attr, computed.clone())?;
            tracing::debug!(field = %directive.field(), "updated autogen attribute");
            Ok(DirectiveState::Updated)
        }
        (Outcome::Absent, None) => {
            let parent = path::parent(&directive.path).to_string();
            let name = path::basename(&directive.path).to_string();
            match (&directive.member_key, session.tree.lookup(&directive.path)) {
                (Some(key), None) => {
                    session.tree.create_member(&session.registry, directive.group, key, Some(&name))?;
                }
                (None, None) => {
                    return Err(GateError::Autogen {
                        path: directive.path.clone(),
                        message: "no member to create the computed dataset from".to_string(),
                    })
                }
                (_, Some(_)) => {}
            }
            session
                .store
                .create_dataset(&parent, &name, computed.clone(), &directive.options)?;
            tracing::debug!(field = %directive.field(), "wrote autogen dataset");
            Ok(DirectiveState::Updated)
        }
        (_, None) => {
            session.report.error(
                DiagnosticKind::AutogenUpdate,
                directive.field(),
                format!(
                    "stored dataset differs from computed {} and is not overwritten",
                    render(Some(computed))
                ),
            );
            Ok(DirectiveState::Reported)
        }
    }
}

/// Resolve the target template and apply the signature filter.
fn targets<S: HierStore>(session: &Session<S>, directive: &Directive) -> Result<Vec<NodeId>> {
    let Some(template) = &directive.spec.target else {
        return Ok(Vec::new());
    };
    let found = template::resolve(&session.tree, &session.registry, directive.group, template)
        .map_err(|message| GateError::Autogen {
            path: directive.field(),
            message,
        })?;
    Ok(match &directive.spec.tsig {
        Some(tsig) => found
            .into_iter()
            .filter(|id| {
                template::matches_signature(&session.tree, &session.store, &session.registry, *id, tsig)
            })
            .collect(),
        None => found,
    })
}

/// Value for a directive whose target matched nothing.
fn absent<S: HierStore>(session: &mut Session<S>, directive: &Directive) -> Option<Value> {
    if directive.spec.qty == Quantity::ExactlyOne {
        session.report.error(
            DiagnosticKind::AutogenTarget,
            directive.field(),
            format!(
                "no node matches target `{}`",
                directive.spec.target.as_deref().unwrap_or_default()
            ),
        );
        None
    } else {
        empty(directive)
    }
}

/// Empty result: an explicit empty text list only when asked for.
fn empty(directive: &Directive) -> Option<Value> {
    directive
        .spec
        .include_empty
        .then(|| Value::TextArray(Vec::new()))
}

fn finish_list(directive: &Directive, mut items: Vec<String>, trim: bool) -> Option<Value> {
    if items.is_empty() {
        return empty(directive);
    }
    if trim && directive.spec.trim {
        items = trim_common_suffix(&items);
    }
    if directive.spec.sort {
        natural_sort(&mut items);
    }
    Some(Value::TextArray(items))
}

fn paths_of<S: HierStore>(session: &Session<S>, ids: &[NodeId]) -> Vec<String> {
    ids.iter().map(|id| session.tree.node(*id).path.clone()).collect()
}

fn compute_links<S: HierStore>(session: &mut Session<S>, directive: &Directive) -> Result<Option<Value>> {
    let found = targets(session, directive)?;
    if found.len() > 1 {
        return Err(GateError::Autogen {
            path: directive.field(),
            message: format!(
                "`links` target `{}` matches {} nodes, expected one: {}",
                directive.spec.target.as_deref().unwrap_or_default(),
                found.len(),
                paths_of(session, &found).join(", ")
            ),
        });
    }
    let Some(target) = found.first() else {
        return Ok(absent(session, directive));
    };
    let target_path = session.tree.node(*target).path.clone();
    let tree = &session.tree;
    let aliases = session
        .tracker
        .common_links(&target_path, |p| tree.lookup(p).is_some())
        .unwrap_or_default();
    Ok(finish_list(directive, aliases, true))
}

fn compute_link_path<S: HierStore>(session: &mut Session<S>, directive: &Directive) -> Result<Option<Value>> {
    let found = targets(session, directive)?;
    if found.is_empty() {
        return Ok(absent(session, directive));
    }
    let mut pairs: Vec<(String, String)> = Vec::new();
    for id in found {
        let node = session.tree.node(id);
        let target = match &node.link {
            LinkState::Resolved { target } => session.tree.node(*target).path.clone(),
            LinkState::Pending { key } => key.to_string(),
            LinkState::External { file, path } => format!("{file}:{path}"),
            LinkState::None => {
                let message = format!("`{}` is not a link", node.path);
                session
                    .report
                    .error(DiagnosticKind::AutogenTarget, directive.field(), message);
                continue;
            }
        };
        pairs.push((node.path.clone(), target));
    }
    if pairs.is_empty() {
        return Ok(empty(directive));
    }
    let sources: Vec<String> = pairs.iter().map(|(s, _)| s.clone()).collect();
    let sources = if directive.spec.trim {
        trim_common_suffix(&sources)
    } else {
        sources
    };
    let mut rendered: Vec<(String, String)> = sources
        .into_iter()
        .zip(pairs.into_iter().map(|(_, t)| t))
        .collect();
    if directive.spec.sort {
        let order = natural_sorted(rendered.iter().map(|(s, _)| s.clone()).collect());
        rendered.sort_by_key(|(s, _)| order.iter().position(|o| o == s));
    }
    let lines: Vec<String> = rendered
        .iter()
        .map(|(s, t)| directive.spec.format.replace("$s", s).replace("$t", t))
        .collect();
    Ok(Some(if directive.has_dims {
        Value::TextArray(lines)
    } else {
        Value::Text(lines.join("\n"))
    }))
}

fn compute_names<S: HierStore>(session: &mut Session<S>, directive: &Directive) -> Result<Option<Value>> {
    let found = targets(session, directive)?;
    if found.is_empty() {
        return Ok(absent(session, directive));
    }
    let names = found
        .iter()
        .map(|id| session.tree.node(*id).name.clone())
        .collect();
    Ok(finish_list(directive, names, false))
}

fn compute_values<S: HierStore>(session: &mut Session<S>, directive: &Directive) -> Result<Option<Value>> {
    let found = targets(session, directive)?;
    if found.is_empty() {
        return Ok(absent(session, directive));
    }
    let mut ints: BTreeSet<i64> = BTreeSet::new();
    let mut floats: Vec<f64> = Vec::new();
    let mut texts: BTreeSet<String> = BTreeSet::new();
    let (mut all_int, mut all_float) = (true, true);
    for id in found {
        let node = session.tree.node(session.tree.deref(id));
        let at = session.tree.node(id).path.clone();
        if node.kind != NodeKind::Dataset {
            return Err(GateError::Autogen {
                path: directive.field(),
                message: format!("`values` target `{at}` is not a dataset"),
            });
        }
        let value = match session.store.get_value(&at) {
            Ok(value) => value,
            Err(StoreError::ExternalLink { .. }) => {
                session.report.warn(
                    DiagnosticKind::AutogenTarget,
                    directive.field(),
                    format!("`{at}` is an unresolved external link; its values are skipped"),
                );
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        if !value.is_list() {
            return Err(GateError::Autogen {
                path: directive.field(),
                message: format!("`values` target `{at}` holds a scalar, expected a list"),
            });
        }
        all_int &= matches!(value, Value::IntArray(_));
        all_float &= matches!(value, Value::FloatArray(_));
        match &value {
            Value::IntArray(items) => ints.extend(items.iter().copied()),
            Value::FloatArray(items) => floats.extend(items.iter().copied()),
            _ => {}
        }
        texts.extend(value.to_text_list());
    }
    if texts.is_empty() {
        return Ok(empty(directive));
    }
    Ok(Some(if all_int {
        Value::IntArray(ints.into_iter().collect())
    } else if all_float {
        floats.sort_by(f64::total_cmp);
        floats.dedup_by(|a, b| a.total_cmp(b).is_eq());
        Value::FloatArray(floats)
    } else {
        Value::TextArray(natural_sorted(texts.into_iter().collect()))
    }))
}

fn compute_length<S: HierStore>(session: &mut Session<S>, directive: &Directive) -> Result<Option<Value>> {
    let found = targets(session, directive)?;
    let target = match found.as_slice() {
        [] => return Ok(absent(session, directive)),
        [one] => *one,
        many => {
            let message = format!(
                "`length` needs a single target, found {}",
                paths_of(session, many).join(", ")
            );
            session
                .report
                .error(DiagnosticKind::AutogenTarget, directive.field(), message);
            return Ok(None);
        }
    };
    let node = session.tree.node(session.tree.deref(target));
    let at = session.tree.node(target).path.clone();
    let indeterminate = |session: &mut Session<S>| -> Result<Option<Value>> {
        session.report.warn(
            DiagnosticKind::AutogenTarget,
            directive.field(),
            format!("length of `{at}` is indeterminate: unresolved external link"),
        );
        Ok(None)
    };
    if matches!(node.link, LinkState::External { .. }) {
        return indeterminate(session);
    }
    match session.store.get_value(&at) {
        Ok(value) => Ok(Some(Value::Int(value.len() as i64))),
        Err(StoreError::ExternalLink { .. }) => indeterminate(session),
        Err(e) => Err(e.into()),
    }
}

fn compute_missing<S: HierStore>(session: &Session<S>, directive: &Directive) -> Option<Value> {
    let group = session.tree.node(directive.group);
    let names: Vec<String> = group
        .spec
        .members()
        .iter()
        .filter(|(key, declared)| {
            declared.id.quantity.is_required()
                && !declared.autogen.as_ref().is_some_and(|a| a.kind.writes_value())
                && group.instances(key).is_empty()
        })
        .map(|(_, declared)| declared.id.display_name())
        .collect();
    finish_list(directive, names, false)
}

fn compute_extern<S: HierStore>(session: &Session<S>, directive: &Directive) -> Option<Value> {
    let group = session.tree.node(directive.group);
    let names: Vec<String> = group
        .children
        .values()
        .map(|id| session.tree.node(*id))
        .filter(|child| matches!(child.link, LinkState::External { .. }))
        .map(|child| child.name.clone())
        .collect();
    finish_list(directive, names, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparison_outcomes() {
        let computed = Value::texts(["a", "b"]);
        assert_eq!(compare(&computed, None), Outcome::Absent);
        assert_eq!(compare(&computed, Some(&Value::texts(["a", "b"]))), Outcome::Match);
        assert_eq!(compare(&computed, Some(&Value::texts(["b", "a"]))), Outcome::Unsorted);
        assert_eq!(compare(&computed, Some(&Value::texts(["a"]))), Outcome::Mismatch);
        assert_eq!(compare(&Value::Int(3), Some(&Value::text("3"))), Outcome::Mismatch);
        assert_eq!(
            compare(&Value::FloatArray(vec![f64::NAN]), Some(&Value::FloatArray(vec![f64::NAN]))),
            Outcome::Match
        );
    }
}
