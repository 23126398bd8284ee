//! Tree Path Engine: wildcard-path selection, editing and lossless restore
//! over the entity forest.
//!
//! Path grammar: `segment ("." segment)*` where a segment is `name`,
//! `name[N]` (one concrete array element) or `name[*]` (every element). A
//! bare `name` over an array value operates on the whole array.
//!
//! Selection does not leave shadow keys on the data. `select` returns a
//! [`Filtered`] wrapper: the surviving subset plus an ordered list of
//! set-aside array elements, each recorded at its original index. `restore`
//! replays that list, so `restore(select(g, p, always_true))` reproduces `g`
//! byte for byte, and edits applied to the surviving subset in between are
//! preserved.

use serde_json::Value;
use tracing::{error, warn};

use crate::error::{EngineError, Result};
use crate::rule::{EditRule, RuleLog, SelectRule};

/// One parsed path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// `name` — the property; applied array-wide when the value is an array.
    Name(String),
    /// `name[N]`
    Indexed(String, usize),
    /// `name[*]`
    Wildcard(String),
}

impl Segment {
    fn name(&self) -> &str {
        match self {
            Segment::Name(n) | Segment::Indexed(n, _) | Segment::Wildcard(n) => n,
        }
    }
}

/// Parse a dot-separated path. Any bad `[N]` index or empty segment fails
/// with `MalformedPath` before anything touches the data.
pub fn parse_path(text: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    for raw in text.split('.') {
        if raw.is_empty() {
            return Err(EngineError::MalformedPath(format!(
                "empty segment in '{text}'"
            )));
        }
        if let Some(open) = raw.find('[') {
            let name = &raw[..open];
            let rest = &raw[open + 1..];
            let close = rest.find(']').ok_or_else(|| {
                EngineError::MalformedPath(format!("missing ']' in segment '{raw}'"))
            })?;
            if name.is_empty() || close + 1 != rest.len() {
                return Err(EngineError::MalformedPath(format!(
                    "bad segment '{raw}' in '{text}'"
                )));
            }
            let selector = &rest[..close];
            if selector == "*" {
                segments.push(Segment::Wildcard(name.to_string()));
            } else {
                let index: usize = selector.parse().map_err(|_| {
                    EngineError::MalformedPath(format!(
                        "index '{selector}' in segment '{raw}' is not an integer"
                    ))
                })?;
                segments.push(Segment::Indexed(name.to_string(), index));
            }
        } else {
            segments.push(Segment::Name(raw.to_string()));
        }
    }
    Ok(segments)
}

/// One concrete step of a node location inside the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Key(String),
    Index(usize),
}

/// An array element that `select` set aside, recorded at the array's
/// location and the element's original index.
#[derive(Debug, Clone)]
pub struct SetAside {
    pub at: Vec<Step>,
    pub index: usize,
    pub value: Value,
}

/// The outcome of `select`: the surviving subset plus everything needed to
/// reverse the filtering.
#[derive(Debug, Clone)]
pub struct Filtered {
    pub kept: Value,
    set_aside: Vec<SetAside>,
}

impl Filtered {
    /// Number of set-aside elements; mainly for reporting.
    pub fn set_aside_count(&self) -> usize {
        self.set_aside.len()
    }
}

/// Evaluate `path` against the graph, keeping only branches whose leaf
/// passes `rule`. Returns `None` when nothing along the path survives.
///
/// A rule failure is logged with the failing value and path, then
/// propagated; no partial result is committed.
pub fn select(
    graph: &Value,
    path: &[Segment],
    rule: &SelectRule,
    log: &mut RuleLog,
) -> Result<Option<Filtered>> {
    if path.is_empty() {
        return Err(EngineError::MalformedPath("empty path".into()));
    }
    let walked = select_walk(graph, path, &mut Vec::new(), "", rule, log)?;
    Ok(walked.map(|(kept, set_aside)| Filtered { kept, set_aside }))
}

fn select_walk(
    node: &Value,
    segs: &[Segment],
    loc: &mut Vec<Step>,
    path_str: &str,
    rule: &SelectRule,
    log: &mut RuleLog,
) -> Result<Option<(Value, Vec<SetAside>)>> {
    let seg = &segs[0];
    let name = seg.name();
    let Some(field) = node.get(name) else {
        return Ok(None);
    };
    let is_leaf = segs.len() == 1;
    let child_path = if path_str.is_empty() {
        name.to_string()
    } else {
        format!("{path_str}.{name}")
    };

    let replacement: Option<(Value, Vec<SetAside>)> = match field {
        Value::Array(items) => {
            loc.push(Step::Key(name.to_string()));
            let only_index = match seg {
                Segment::Indexed(_, n) => Some(*n),
                _ => None,
            };
            let mut kept_items: Vec<Value> = Vec::new();
            let mut rejects: Vec<SetAside> = Vec::new();
            let mut child_records: Vec<SetAside> = Vec::new();
            for (i, item) in items.iter().enumerate() {
                let in_scope = only_index.map(|n| n == i).unwrap_or(true);
                let elem_path = format!("{child_path}[{i}]");
                let survived = if !in_scope {
                    None
                } else if is_leaf {
                    if eval_rule(rule, item, &elem_path, log)? {
                        Some((item.clone(), Vec::new()))
                    } else {
                        None
                    }
                } else {
                    loc.push(Step::Index(i));
                    let result = select_walk(item, &segs[1..], loc, &elem_path, rule, log)?;
                    loc.pop();
                    result
                };
                match survived {
                    Some((kept, records)) => {
                        kept_items.push(kept);
                        child_records.extend(records);
                    }
                    None => rejects.push(SetAside {
                        at: loc.clone(),
                        index: i,
                        value: item.clone(),
                    }),
                }
            }
            loc.pop();
            if kept_items.is_empty() {
                None
            } else {
                // The array's own rejects replay before any deeper record so
                // original indices resolve during restore.
                let mut records = rejects;
                records.extend(child_records);
                Some((Value::Array(kept_items), records))
            }
        }
        other => match seg {
            Segment::Indexed(_, _) | Segment::Wildcard(_) => {
                // Array selector against a non-array value: branch dies.
                None
            }
            Segment::Name(_) => {
                if is_leaf {
                    if eval_rule(rule, other, &child_path, log)? {
                        Some((other.clone(), Vec::new()))
                    } else {
                        None
                    }
                } else {
                    loc.push(Step::Key(name.to_string()));
                    let result = select_walk(other, &segs[1..], loc, &child_path, rule, log)?;
                    loc.pop();
                    result
                }
            }
        },
    };

    Ok(replacement.map(|(new_field, records)| {
        let mut kept = node.clone();
        if let Some(map) = kept.as_object_mut() {
            map.insert(name.to_string(), new_field);
        }
        (kept, records)
    }))
}

fn eval_rule(rule: &SelectRule, value: &Value, path: &str, log: &mut RuleLog) -> Result<bool> {
    rule.eval(value, path, log).map_err(|e| {
        error!(path, value = %value, error = %e, "Select rule failed");
        e
    })
}

/// Re-walk the surviving subset along `path` and apply `rule` at every leaf.
/// No filtering happens here; the input is already the post-`select` subset.
pub fn apply_edit(
    filtered: &mut Filtered,
    path: &[Segment],
    rule: &EditRule,
    log: &mut RuleLog,
) -> Result<()> {
    if path.is_empty() {
        return Err(EngineError::MalformedPath("empty path".into()));
    }
    edit_walk(&mut filtered.kept, path, "", rule, log)
}

fn edit_walk(
    node: &mut Value,
    segs: &[Segment],
    path_str: &str,
    rule: &EditRule,
    log: &mut RuleLog,
) -> Result<()> {
    let seg = &segs[0];
    let name = seg.name();
    let Some(field) = node.get_mut(name) else {
        return Ok(());
    };
    let is_leaf = segs.len() == 1;
    let child_path = if path_str.is_empty() {
        name.to_string()
    } else {
        format!("{path_str}.{name}")
    };

    match field {
        Value::Array(items) => {
            let only_index = match seg {
                Segment::Indexed(_, n) => Some(*n),
                _ => None,
            };
            for (i, item) in items.iter_mut().enumerate() {
                if only_index.map(|n| n != i).unwrap_or(false) {
                    continue;
                }
                let elem_path = format!("{child_path}[{i}]");
                if is_leaf {
                    apply_rule(rule, item, &elem_path, log)?;
                } else {
                    edit_walk(item, &segs[1..], &elem_path, rule, log)?;
                }
            }
        }
        other => {
            if matches!(seg, Segment::Name(_)) {
                if is_leaf {
                    apply_rule(rule, other, &child_path, log)?;
                } else {
                    edit_walk(other, &segs[1..], &child_path, rule, log)?;
                }
            }
        }
    }
    Ok(())
}

fn apply_rule(rule: &EditRule, value: &mut Value, path: &str, log: &mut RuleLog) -> Result<()> {
    rule.apply(value, path, log).map_err(|e| {
        error!(path, value = %value, error = %e, "Edit rule failed");
        e
    })
}

/// Reverse the filtering: replay every set-aside element at its original
/// index. Called exactly once, after any edit; edits to surviving nodes are
/// preserved.
pub fn restore(filtered: Filtered) -> Value {
    let mut graph = filtered.kept;
    for record in filtered.set_aside {
        match resolve_array(&mut graph, &record.at) {
            Some(items) => {
                let at = record.index.min(items.len());
                items.insert(at, record.value);
            }
            None => {
                // Should be unreachable: set-aside locations always point at
                // arrays that survived selection.
                warn!(at = ?record.at, index = record.index, "Restore target is not an array");
            }
        }
    }
    graph
}

fn resolve_array<'a>(graph: &'a mut Value, at: &[Step]) -> Option<&'a mut Vec<Value>> {
    let mut current = graph;
    for step in at {
        current = match step {
            Step::Key(key) => current.get_mut(key)?,
            Step::Index(i) => current.get_mut(i)?,
        };
    }
    current.as_array_mut()
}
