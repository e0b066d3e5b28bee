// SPDX-License-Identifier: PMPL-1.0-or-later
//! Update operator application.
//!
//! Supported operators: `$set`, `$unset`, `$inc`, `$push` (with `$each`)
//! and `$setOnInsert`. Plain documents handed to `set` are treated as a
//! `$set` of their fields.

use crate::error::StoreError;
use crate::value::{Document, Value};

/// True when every key of `update` is an operator.
pub fn is_operator_document(update: &Document) -> bool {
    !update.is_empty() && update.keys().all(|k| k.starts_with('$'))
}

/// Wrap a plain field document in `$set`; operator documents pass through.
pub fn normalize_update(data: Document) -> Document {
    if is_operator_document(&data) {
        data
    } else {
        let mut wrapped = Document::new();
        wrapped.insert("$set".to_string(), Value::Document(data));
        wrapped
    }
}

/// Apply `update` to `doc` in place. Returns whether anything changed.
///
/// `inserting` enables `$setOnInsert`. Changing `_id` of an existing
/// document is rejected.
pub fn apply_update(doc: &mut Document, update: &Document, inserting: bool) -> Result<bool, StoreError> {
    if !is_operator_document(update) {
        return Err(StoreError::invalid("update document requires atomic operators"));
    }
    let before = doc.clone();

    for (op, fields) in update {
        let fields = fields
            .as_document()
            .ok_or_else(|| StoreError::invalid(format!("{op} expects a document of fields")))?;
        match op.as_str() {
            "$set" => {
                for (path, value) in fields {
                    set_path(doc, path, value.clone())?;
                }
            }
            "$setOnInsert" => {
                if inserting {
                    for (path, value) in fields {
                        set_path(doc, path, value.clone())?;
                    }
                }
            }
            "$unset" => {
                for path in fields.keys() {
                    remove_path(doc, path);
                }
            }
            "$inc" => {
                for (path, delta) in fields {
                    let current = Value::Document(doc.clone()).lookup_path(path).cloned();
                    let next = increment(current.as_ref(), delta, path)?;
                    set_path(doc, path, next)?;
                }
            }
            "$push" => {
                for (path, value) in fields {
                    let additions = match value.as_document().and_then(|d| d.get("$each")) {
                        Some(Value::Array(items)) => items.clone(),
                        Some(_) => return Err(StoreError::invalid("$each expects an array")),
                        None => vec![value.clone()],
                    };
                    let mut items = match Value::Document(doc.clone()).lookup_path(path) {
                        None | Some(Value::Null) => Vec::new(),
                        Some(Value::Array(existing)) => existing.clone(),
                        Some(_) => {
                            return Err(StoreError::invalid(format!(
                                "The field '{path}' must be an array"
                            )))
                        }
                    };
                    items.extend(additions);
                    set_path(doc, path, Value::Array(items))?;
                }
            }
            other => return Err(StoreError::UnsupportedOperator(other.to_string())),
        }
    }

    if !inserting && before.get("_id") != doc.get("_id") {
        *doc = before;
        return Err(StoreError::invalid(
            "Performing an update on the path '_id' would modify the immutable field '_id'",
        ));
    }
    Ok(before != *doc)
}

fn increment(current: Option<&Value>, delta: &Value, path: &str) -> Result<Value, StoreError> {
    let bad = || StoreError::invalid(format!("Cannot apply $inc to a non-numeric value at '{path}'"));
    match (current, delta) {
        (None | Some(Value::Null), d @ (Value::Int(_) | Value::Double(_))) => Ok(d.clone()),
        (Some(Value::Int(a)), Value::Int(b)) => Ok(Value::Int(a.saturating_add(*b))),
        (Some(a), b) => {
            let a = a.as_f64().ok_or_else(bad)?;
            let b = b.as_f64().ok_or_else(bad)?;
            Ok(Value::Double(a + b))
        }
        _ => Err(bad()),
    }
}

/// Set `value` at a dotted path, creating intermediate documents.
pub fn set_path(doc: &mut Document, path: &str, value: Value) -> Result<(), StoreError> {
    let mut segments = path.split('.').peekable();
    let mut current = doc;
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            current.insert(segment.to_string(), value);
            return Ok(());
        }
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Document(Document::new()));
        if slot.is_null() {
            *slot = Value::Document(Document::new());
        }
        current = match slot {
            Value::Document(inner) => inner,
            _ => {
                return Err(StoreError::invalid(format!(
                    "Cannot create field '{path}': '{segment}' is not a document"
                )))
            }
        };
    }
    Ok(())
}

/// Remove the value at a dotted path if present.
pub fn remove_path(doc: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            doc.shift_remove(path);
        }
        Some((head, rest)) => {
            if let Some(Value::Document(inner)) = doc.get_mut(head) {
                remove_path(inner, rest);
            }
        }
    }
}

/// Build the base document of an upsert from the equality parts of a filter.
pub fn upsert_seed(filter: &Document) -> Result<Document, StoreError> {
    let mut seed = Document::new();
    for (key, condition) in filter {
        if key.starts_with('$') {
            continue;
        }
        match condition.as_document() {
            Some(ops) if ops.keys().any(|k| k.starts_with('$')) => {
                if let Some(eq) = ops.get("$eq") {
                    set_path(&mut seed, key, eq.clone())?;
                }
            }
            _ => set_path(&mut seed, key, condition.clone())?,
        }
    }
    Ok(seed)
}
