//! Predicate-driven waits against client snapshots.
//!
//! A predicate is compiled once per wait: a conjunction (`all`) plus an
//! optional disjunction (`any`) of path-keyed conditions. Paths are
//! dot-separated; `#` maps the remainder of the path over an array
//! (`windows.#.windowKey` collects every windowKey) and a bare trailing `#`
//! resolves to the array length. The wait loop matches the current snapshot
//! first, then subscribes and re-matches on every update until the deadline.

use std::time::Duration;

use regex::Regex;
use serde_json::value::RawValue;
use serde_json::Value;
use thiserror::Error;

use uideck_protocol::{UiCondition, UiPredicate, UiWaitInput, UiWaitOutput};

use crate::service::BridgeService;

const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum PredicateError {
    #[error("predicate condition requires path")]
    MissingPath,
    #[error("invalid predicate regex: {0}")]
    Regex(#[from] regex::Error),
}

#[derive(Debug)]
pub(crate) struct CompiledPredicate {
    all: Vec<CompiledCondition>,
    any: Vec<CompiledCondition>,
}

#[derive(Debug)]
struct CompiledCondition {
    path: String,
    exists: Option<bool>,
    equals: Option<Value>,
    contains: String,
    regex: Option<Regex>,
}

pub(crate) fn compile_predicate(
    predicate: Option<&UiPredicate>,
) -> Result<Option<CompiledPredicate>, PredicateError> {
    let Some(predicate) = predicate else {
        return Ok(None);
    };
    let mut compiled = CompiledPredicate {
        all: Vec::with_capacity(predicate.all.len()),
        any: Vec::with_capacity(predicate.any.len()),
    };
    for condition in &predicate.all {
        compiled.all.push(compile_condition(condition)?);
    }
    for condition in &predicate.any {
        compiled.any.push(compile_condition(condition)?);
    }
    Ok(Some(compiled))
}

fn compile_condition(condition: &UiCondition) -> Result<CompiledCondition, PredicateError> {
    if condition.path.trim().is_empty() {
        return Err(PredicateError::MissingPath);
    }
    let regex = if condition.regex.trim().is_empty() {
        None
    } else {
        Some(Regex::new(&condition.regex)?)
    };
    Ok(CompiledCondition {
        path: condition.path.clone(),
        exists: condition.exists,
        equals: condition.equals.clone(),
        contains: condition.contains.clone(),
        regex,
    })
}

impl CompiledPredicate {
    /// Evaluate against a raw snapshot. Returns the verdict and a short
    /// reason naming the first failing condition.
    pub(crate) fn matches(&self, snapshot: Option<&RawValue>) -> (bool, String) {
        let Some(snapshot) = snapshot else {
            return (false, "no snapshot".to_string());
        };
        let root: Value = match serde_json::from_str(snapshot.get()) {
            Ok(value) => value,
            Err(_) => return (false, "no snapshot".to_string()),
        };

        for condition in &self.all {
            if let Err(reason) = condition.matches(&root) {
                return (false, format!("all: {reason}"));
            }
        }
        if !self.any.is_empty() {
            for condition in &self.any {
                if condition.matches(&root).is_ok() {
                    return (true, "any: matched".to_string());
                }
            }
            return (false, "any: no match".to_string());
        }
        (true, "all: matched".to_string())
    }
}

impl CompiledCondition {
    fn matches(&self, root: &Value) -> Result<(), String> {
        let value = resolve_path(root, &self.path);
        if let Some(expected) = self.exists {
            if expected && value.is_none() {
                return Err(format!("missing {}", self.path));
            }
            if !expected && value.is_some() {
                return Err(format!("unexpected {}", self.path));
            }
        }
        if let Some(expected) = &self.equals {
            if !typed_equals(value.as_ref(), expected) {
                return Err(format!("not equals {}", self.path));
            }
        }
        if !self.contains.is_empty() && !value_string(value.as_ref()).contains(&self.contains) {
            return Err(format!("not contains {}", self.path));
        }
        if let Some(regex) = &self.regex {
            if !regex.is_match(&value_string(value.as_ref())) {
                return Err(format!("regex mismatch {}", self.path));
            }
        }
        Ok(())
    }
}

/// Walk a dot-separated path. Returns `None` when any segment is absent.
fn resolve_path(root: &Value, path: &str) -> Option<Value> {
    let segments: Vec<&str> = path.split('.').collect();
    resolve_segments(root, &segments)
}

fn resolve_segments(value: &Value, segments: &[&str]) -> Option<Value> {
    let Some((segment, rest)) = segments.split_first() else {
        return Some(value.clone());
    };
    match value {
        Value::Object(map) => map.get(*segment).and_then(|v| resolve_segments(v, rest)),
        Value::Array(items) => {
            if *segment == "#" {
                if rest.is_empty() {
                    return Some(Value::from(items.len() as u64));
                }
                let collected: Vec<Value> = items
                    .iter()
                    .filter_map(|item| resolve_segments(item, rest))
                    .collect();
                Some(Value::Array(collected))
            } else {
                let index: usize = segment.parse().ok()?;
                items.get(index).and_then(|v| resolve_segments(v, rest))
            }
        }
        _ => None,
    }
}

/// Comparison used by `equals`: numbers by value, booleans by kind, null
/// against null-or-absent, strings against the value's string form, and
/// everything else by normalized JSON text.
fn typed_equals(actual: Option<&Value>, expected: &Value) -> bool {
    match expected {
        Value::Number(expected_num) => match actual {
            Some(Value::Number(actual_num)) => actual_num.as_f64() == expected_num.as_f64(),
            _ => false,
        },
        Value::Bool(expected_bool) => matches!(actual, Some(Value::Bool(b)) if b == expected_bool),
        Value::Null => matches!(actual, None | Some(Value::Null)),
        Value::String(expected_str) => value_string(actual) == *expected_str,
        _ => match actual {
            Some(actual) => {
                serde_json::to_string(actual).ok() == serde_json::to_string(expected).ok()
            }
            None => false,
        },
    }
}

/// String form used by `contains`, `regex`, and string `equals`: strings
/// verbatim, null/absent empty, everything else compact JSON.
fn value_string(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => serde_json::to_string(other).unwrap_or_default(),
    }
}

impl BridgeService {
    /// Block until a client's snapshot satisfies the predicate, changes, or
    /// the timeout elapses.
    pub async fn ui_wait(
        &self,
        ns: &str,
        input: &UiWaitInput,
    ) -> Result<UiWaitOutput, PredicateError> {
        let timeout = if input.timeout_ms > 0 {
            Duration::from_millis(input.timeout_ms)
        } else {
            DEFAULT_WAIT_TIMEOUT
        };

        let client_id = if input.client_id.is_empty() {
            match self.hub().default_client(ns) {
                Some(id) => id,
                None => {
                    return Ok(unmatched(String::new(), "no UI clients connected"));
                }
            }
        } else {
            input.client_id.clone()
        };

        let predicate = compile_predicate(input.predicate.as_ref())?;

        let initial = self.hub().snapshot(ns, &client_id);
        if let Some(predicate) = &predicate {
            let (matched, reason) = predicate.matches(initial.as_deref());
            if matched {
                let mut out = matched_output(client_id, false, reason);
                if input.include_snapshot {
                    out.snapshot = initial.as_deref().map(to_boxed_raw);
                }
                return Ok(out);
            }
        }

        if !input.wait_for_change && predicate.is_none() {
            return Ok(unmatched(client_id, "no predicate and waitForChange=false"));
        }

        let (mut updates, _watcher) = self.hub().subscribe_snapshots(ns, &client_id);
        let mut baseline = initial
            .as_deref()
            .map(|raw| raw.get().to_string())
            .unwrap_or_default();

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => {
                    return Ok(unmatched(client_id, "timeout"));
                }
                update = updates.recv() => {
                    let Some(snapshot) = update else {
                        return Ok(unmatched(client_id, "subscription closed"));
                    };
                    let changed = baseline != snapshot.get();
                    if input.wait_for_change && changed && predicate.is_none() {
                        let mut out = matched_output(client_id, true, "snapshot changed");
                        if input.include_snapshot {
                            out.snapshot = Some(to_boxed_raw(&snapshot));
                        }
                        return Ok(out);
                    }
                    if let Some(predicate) = &predicate {
                        let (matched, reason) = predicate.matches(Some(&snapshot));
                        if matched {
                            let mut out = matched_output(client_id, changed, reason);
                            if input.include_snapshot {
                                out.snapshot = Some(to_boxed_raw(&snapshot));
                            }
                            return Ok(out);
                        }
                    }
                    if changed {
                        baseline = snapshot.get().to_string();
                    }
                }
            }
        }
    }
}

fn unmatched(client_id: String, reason: impl Into<String>) -> UiWaitOutput {
    UiWaitOutput {
        client_id,
        matched: false,
        changed: false,
        reason: reason.into(),
        snapshot: None,
    }
}

fn matched_output(client_id: String, changed: bool, reason: impl Into<String>) -> UiWaitOutput {
    UiWaitOutput {
        client_id,
        matched: true,
        changed,
        reason: reason.into(),
        snapshot: None,
    }
}

fn to_boxed_raw(raw: &RawValue) -> Box<RawValue> {
    raw.to_owned()
}
