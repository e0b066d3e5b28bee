// SPDX-License-Identifier: PMPL-1.0-or-later
//! Query filter evaluation.
//!
//! Supports field equality on dotted paths (with implicit array membership)
//! and the operators `$eq $ne $gt $gte $lt $lte $in $nin $exists $regex
//! $size $not` on fields plus `$and $or $nor` at document level.

use std::cmp::Ordering;

use regex::RegexBuilder;

use crate::error::StoreError;
use crate::value::{compare_values, values_equal, Document, Value};

/// Test whether `doc` satisfies `filter`.
pub fn matches(doc: &Document, filter: &Document) -> Result<bool, StoreError> {
    for (key, condition) in filter {
        let satisfied = match key.as_str() {
            "$and" => logical_operands(key, condition)?
                .iter()
                .try_fold(true, |acc, sub| Ok::<_, StoreError>(acc && matches(doc, sub)?))?,
            "$or" => {
                let mut any = false;
                for sub in logical_operands(key, condition)? {
                    if matches(doc, sub)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$nor" => {
                let mut none = true;
                for sub in logical_operands(key, condition)? {
                    if matches(doc, sub)? {
                        none = false;
                        break;
                    }
                }
                none
            }
            op if op.starts_with('$') => {
                return Err(StoreError::UnsupportedOperator(op.to_string()));
            }
            path => {
                let candidates = resolve_field(doc, path);
                field_matches(&candidates, condition)?
            }
        };
        if !satisfied {
            return Ok(false);
        }
    }
    Ok(true)
}

fn logical_operands<'a>(op: &str, condition: &'a Value) -> Result<Vec<&'a Document>, StoreError> {
    let items = condition
        .as_array()
        .filter(|items| !items.is_empty())
        .ok_or_else(|| StoreError::invalid(format!("{op} must be a nonempty array")))?;
    items
        .iter()
        .map(|item| {
            item.as_document()
                .ok_or_else(|| StoreError::invalid(format!("{op} entries must be documents")))
        })
        .collect()
}

/// Collect every value reachable at `path`, fanning out through arrays of
/// sub-documents the way a document store does.
pub fn resolve_field<'a>(doc: &'a Document, path: &str) -> Vec<&'a Value> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    if let Some(first) = doc.get(segments[0]) {
        resolve_segments(first, &segments[1..], &mut out);
    }
    out
}

fn resolve_segments<'a>(value: &'a Value, segments: &[&str], out: &mut Vec<&'a Value>) {
    let Some((head, rest)) = segments.split_first() else {
        out.push(value);
        return;
    };
    match value {
        Value::Document(doc) => {
            if let Some(next) = doc.get(*head) {
                resolve_segments(next, rest, out);
            }
        }
        Value::Array(items) => {
            if let Ok(index) = head.parse::<usize>() {
                if let Some(item) = items.get(index) {
                    resolve_segments(item, rest, out);
                }
            }
            for item in items {
                if matches!(item, Value::Document(_)) {
                    resolve_segments(item, segments, out);
                }
            }
        }
        _ => {}
    }
}

fn is_operator_document(value: &Value) -> Option<&Document> {
    value
        .as_document()
        .filter(|doc| !doc.is_empty() && doc.keys().all(|k| k.starts_with('$')))
}

fn field_matches(candidates: &[&Value], condition: &Value) -> Result<bool, StoreError> {
    match is_operator_document(condition) {
        Some(ops) => operators_match(candidates, ops),
        None => Ok(equals_any(candidates, condition)),
    }
}

fn operators_match(candidates: &[&Value], ops: &Document) -> Result<bool, StoreError> {
    for (op, operand) in ops {
        let satisfied = match op.as_str() {
            "$eq" => equals_any(candidates, operand),
            "$ne" => !equals_any(candidates, operand),
            "$gt" => compares_any(candidates, operand, |o| o == Ordering::Greater),
            "$gte" => compares_any(candidates, operand, |o| o != Ordering::Less),
            "$lt" => compares_any(candidates, operand, |o| o == Ordering::Less),
            "$lte" => compares_any(candidates, operand, |o| o != Ordering::Greater),
            "$in" => in_any(candidates, operand)?,
            "$nin" => !in_any(candidates, operand)?,
            "$exists" => operand.is_truthy() != candidates.is_empty(),
            "$regex" => {
                let options = ops.get("$options").and_then(Value::as_str).unwrap_or("");
                regex_any(candidates, operand, options)?
            }
            "$options" => true,
            "$size" => {
                let expected = operand
                    .as_i64()
                    .ok_or_else(|| StoreError::invalid("$size needs a number"))?;
                candidates.iter().any(|c| {
                    c.as_array()
                        .is_some_and(|items| items.len() as i64 == expected)
                })
            }
            "$not" => {
                let inner = is_operator_document(operand)
                    .ok_or_else(|| StoreError::invalid("$not needs an operator document"))?;
                !operators_match(candidates, inner)?
            }
            other => return Err(StoreError::UnsupportedOperator(other.to_string())),
        };
        if !satisfied {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Candidates plus the elements of any array candidates.
fn expanded<'a>(candidates: &[&'a Value]) -> Vec<&'a Value> {
    let mut out = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        out.push(*candidate);
        if let Value::Array(items) = candidate {
            out.extend(items.iter());
        }
    }
    out
}

fn equals_any(candidates: &[&Value], target: &Value) -> bool {
    if target.is_null() && candidates.is_empty() {
        return true;
    }
    expanded(candidates)
        .into_iter()
        .any(|candidate| values_equal(candidate, target))
}

fn compares_any(candidates: &[&Value], target: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    expanded(candidates)
        .into_iter()
        .filter(|candidate| candidate.same_type_class(target))
        .any(|candidate| accept(compare_values(candidate, target)))
}

fn in_any(candidates: &[&Value], operand: &Value) -> Result<bool, StoreError> {
    let options = operand
        .as_array()
        .ok_or_else(|| StoreError::invalid("$in/$nin needs an array"))?;
    Ok(options.iter().any(|option| equals_any(candidates, option)))
}

fn regex_any(candidates: &[&Value], pattern: &Value, options: &str) -> Result<bool, StoreError> {
    let pattern = pattern
        .as_str()
        .ok_or_else(|| StoreError::invalid("$regex needs a string pattern"))?;
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .build()?;
    Ok(expanded(candidates)
        .into_iter()
        .filter_map(Value::as_str)
        .any(|s| regex.is_match(s)))
}
