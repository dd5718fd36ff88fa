//! Structural diff over JSON-compatible trees.
//!
//! Every divergence is recorded in an explicit `DiffErrors` accumulator
//! rather than raised, so one comparison run surfaces all differences
//! between two manifests. The accumulator is owned by the caller: reset it
//! between independent comparisons, and never share one instance across
//! concurrent comparisons.

use serde_json::Value;

use crate::error::ConfigError;

pub const MAX_RECURSION_LEVEL: usize = 20;

/// One detected divergence: the two subtrees, where they live, and why they
/// differ. The path uses bracket-indexed notation (`root['key'][3]`).
#[derive(Debug, Clone, PartialEq)]
pub struct DiffEntry {
    pub old: Value,
    pub new: Value,
    pub path: String,
    pub message: String,
}

/// Caller-owned accumulator of diff entries. Empty means "equivalent".
#[derive(Debug, Default)]
pub struct DiffErrors {
    data: Vec<DiffEntry>,
}

impl DiffErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset_state(&mut self) {
        self.data.clear();
    }

    pub fn push(&mut self, entry: DiffEntry) {
        self.data.push(entry);
    }

    pub fn total(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn entries(&self) -> &[DiffEntry] {
        &self.data
    }

    pub fn messages(&self) -> Vec<&str> {
        self.data.iter().map(|e| e.message.as_str()).collect()
    }

    /// All messages as one debug-printable string.
    pub fn messages_str(&self) -> String {
        format!("{:?}", self.messages())
    }
}

/// JSON-level type name; integers and floats are distinct types.
fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "int",
        Value::Number(_) => "float",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

/// Compare two JSON trees depth-first under the given root path label,
/// recording every divergence in `errors`. Exceeding `MAX_RECURSION_LEVEL`
/// is a fatal configuration error, not a reported diff.
pub fn deepdiff(
    old_object: &Value,
    new_object: &Value,
    path: &str,
    ignore_keys_order: bool,
    errors: &mut DiffErrors,
) -> Result<(), ConfigError> {
    deepdiff_from_level(old_object, new_object, path, ignore_keys_order, 1, errors)
}

pub fn deepdiff_from_level(
    old_object: &Value,
    new_object: &Value,
    path: &str,
    ignore_keys_order: bool,
    recursion_level: usize,
    errors: &mut DiffErrors,
) -> Result<(), ConfigError> {
    let old_type = type_name(old_object);
    let new_type = type_name(new_object);
    if old_type != new_type {
        errors.push(DiffEntry {
            old: old_object.clone(),
            new: new_object.clone(),
            path: path.to_string(),
            message: format!(
                "[{path}] Type difference:\n\tOld: {old_type}\n\tNew: {new_type}"
            ),
        });
        return Ok(());
    }

    if recursion_level > MAX_RECURSION_LEVEL {
        return Err(ConfigError::MaxRecursionLevel {
            max: MAX_RECURSION_LEVEL,
        });
    }

    match (old_object, new_object) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            let mut old_keys: Vec<&String> = old_map.keys().collect();
            let mut new_keys: Vec<&String> = new_map.keys().collect();
            if ignore_keys_order {
                old_keys.sort();
                new_keys.sort();
            }
            if old_keys != new_keys {
                errors.push(DiffEntry {
                    old: old_object.clone(),
                    new: new_object.clone(),
                    path: path.to_string(),
                    message: format!(
                        "[{path}] Dictionaries have different keys:\n\tOld: {old_keys:?}\n\tNew: {new_keys:?}"
                    ),
                });
                return Ok(());
            }
            for (key, old_value) in old_map {
                deepdiff_from_level(
                    old_value,
                    &new_map[key],
                    &format!("{path}['{key}']"),
                    ignore_keys_order,
                    recursion_level + 1,
                    errors,
                )?;
            }
        }
        (Value::Array(old_items), Value::Array(new_items)) => {
            if old_items.len() != new_items.len() {
                errors.push(DiffEntry {
                    old: old_object.clone(),
                    new: new_object.clone(),
                    path: path.to_string(),
                    message: format!(
                        "[{path}] Lists have different lengths:\n\tOld: {}\n\tNew: {}",
                        old_items.len(),
                        new_items.len()
                    ),
                });
                return Ok(());
            }
            for (ind, old_item) in old_items.iter().enumerate() {
                deepdiff_from_level(
                    old_item,
                    &new_items[ind],
                    &format!("{path}[{ind}]"),
                    ignore_keys_order,
                    recursion_level + 1,
                    errors,
                )?;
            }
        }
        _ => {
            if old_object != new_object {
                errors.push(DiffEntry {
                    old: old_object.clone(),
                    new: new_object.clone(),
                    path: path.to_string(),
                    message: format!(
                        "[{path}] Values are different:\n\tOld: '{old_object}'\n\tNew: '{new_object}'"
                    ),
                });
            }
        }
    }
    Ok(())
}
