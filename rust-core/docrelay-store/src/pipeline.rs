// SPDX-License-Identifier: PMPL-1.0-or-later
//! Aggregation pipeline evaluation.
//!
//! Stages run in order over an owned batch of documents. Supported stages:
//! `$match`, `$sort`, `$skip`, `$limit`, `$project`, `$addFields`/`$set`,
//! `$unwind`, `$group`, `$count` and `$facet`.

use std::cmp::Ordering;

use crate::error::StoreError;
use crate::filter;
use crate::update::{remove_path, set_path};
use crate::value::{compare_values, values_equal, Document, Value};

/// Run `stages` over `docs`.
pub fn run_pipeline(mut docs: Vec<Document>, stages: &[Value]) -> Result<Vec<Document>, StoreError> {
    for stage in stages {
        let stage = stage
            .as_document()
            .filter(|s| s.len() == 1)
            .ok_or_else(|| StoreError::invalid("a pipeline stage must be a document with exactly one field"))?;
        let Some((name, spec)) = stage.iter().next() else {
            continue;
        };
        docs = apply_stage(docs, name, spec)?;
    }
    Ok(docs)
}

fn apply_stage(docs: Vec<Document>, name: &str, spec: &Value) -> Result<Vec<Document>, StoreError> {
    match name {
        "$match" => {
            let criteria = stage_document(name, spec)?;
            let mut out = Vec::with_capacity(docs.len());
            for doc in docs {
                if filter::matches(&doc, criteria)? {
                    out.push(doc);
                }
            }
            Ok(out)
        }
        "$sort" => {
            let mut docs = docs;
            sort_documents(&mut docs, stage_document(name, spec)?)?;
            Ok(docs)
        }
        "$skip" => {
            let n = non_negative(name, spec)?;
            Ok(docs.into_iter().skip(n).collect())
        }
        "$limit" => {
            let n = non_negative(name, spec)?;
            if n == 0 {
                return Err(StoreError::invalid("the limit must be positive"));
            }
            Ok(docs.into_iter().take(n).collect())
        }
        "$project" => {
            let projection = stage_document(name, spec)?;
            docs.iter().map(|doc| apply_projection(doc, projection)).collect()
        }
        "$addFields" | "$set" => {
            let fields = stage_document(name, spec)?;
            docs.into_iter()
                .map(|mut doc| {
                    for (path, expr) in fields {
                        if let Some(value) = evaluate(&doc, expr)? {
                            set_path(&mut doc, path, value)?;
                        }
                    }
                    Ok(doc)
                })
                .collect()
        }
        "$unwind" => unwind(docs, spec),
        "$group" => group(docs, stage_document(name, spec)?),
        "$count" => {
            let field = spec
                .as_str()
                .filter(|f| !f.is_empty() && !f.starts_with('$') && !f.contains('.'))
                .ok_or_else(|| StoreError::invalid("$count requires a plain field name"))?;
            if docs.is_empty() {
                return Ok(Vec::new());
            }
            let mut out = Document::new();
            out.insert(field.to_string(), Value::from(docs.len() as u64));
            Ok(vec![out])
        }
        "$facet" => {
            let facets = stage_document(name, spec)?;
            let mut out = Document::new();
            for (facet, sub) in facets {
                let sub = sub
                    .as_array()
                    .ok_or_else(|| StoreError::invalid(format!("$facet '{facet}' must be an array of stages")))?;
                let results = run_pipeline(docs.clone(), sub)?;
                out.insert(
                    facet.clone(),
                    Value::Array(results.into_iter().map(Value::Document).collect()),
                );
            }
            Ok(vec![out])
        }
        other => Err(StoreError::UnsupportedStage(other.to_string())),
    }
}

fn stage_document<'a>(name: &str, spec: &'a Value) -> Result<&'a Document, StoreError> {
    spec.as_document()
        .ok_or_else(|| StoreError::invalid(format!("{name} specification must be a document")))
}

fn non_negative(name: &str, spec: &Value) -> Result<usize, StoreError> {
    spec.as_i64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| StoreError::invalid(format!("{name} requires a non-negative integer")))
}

/// Sort in place by a `{field: 1 | -1}` specification. Missing fields sort as null.
pub fn sort_documents(docs: &mut [Document], sort: &Document) -> Result<(), StoreError> {
    let mut keys = Vec::with_capacity(sort.len());
    for (field, direction) in sort {
        let descending = match direction.as_i64() {
            Some(1) => false,
            Some(-1) => true,
            _ => return Err(StoreError::invalid(format!("sort direction for '{field}' must be 1 or -1"))),
        };
        keys.push((field.as_str(), descending));
    }
    docs.sort_by(|a, b| {
        for (field, descending) in &keys {
            let left = field_value(a, field);
            let right = field_value(b, field);
            let ord = compare_values(&left, &right);
            let ord = if *descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
    Ok(())
}

fn field_value(doc: &Document, path: &str) -> Value {
    lookup(doc, path).cloned().unwrap_or(Value::Null)
}

fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let first = doc.get(head)?;
    match rest {
        Some(rest) => first.lookup_path(rest),
        None => Some(first),
    }
}

/// Apply an inclusion or exclusion projection to one document.
///
/// Inclusion mode keeps `_id` unless it is explicitly excluded. Non-boolean
/// values in inclusion mode are evaluated as expressions.
pub fn apply_projection(doc: &Document, projection: &Document) -> Result<Document, StoreError> {
    let is_flag = |v: &Value| matches!(v, Value::Bool(_) | Value::Int(_) | Value::Double(_));
    let inclusive = projection
        .iter()
        .any(|(k, v)| k != "_id" && (!is_flag(v) || v.is_truthy()));
    let exclusive = projection
        .iter()
        .any(|(k, v)| k != "_id" && is_flag(v) && !v.is_truthy());
    if inclusive && exclusive {
        return Err(StoreError::invalid("cannot mix inclusion and exclusion in a projection"));
    }

    if !inclusive {
        let mut out = doc.clone();
        for (path, flag) in projection {
            if !flag.is_truthy() {
                remove_path(&mut out, path);
            }
        }
        return Ok(out);
    }

    let mut out = Document::new();
    let keep_id = projection.get("_id").map_or(true, |v| !is_flag(v) || v.is_truthy());
    if keep_id {
        if let Some(id) = doc.get("_id") {
            out.insert("_id".to_string(), id.clone());
        }
    }
    for (path, spec) in projection {
        if path == "_id" && is_flag(spec) {
            continue;
        }
        if is_flag(spec) {
            if let Some(value) = lookup(doc, path) {
                set_path(&mut out, path, value.clone())?;
            }
        } else if let Some(value) = evaluate(doc, spec)? {
            set_path(&mut out, path, value)?;
        }
    }
    Ok(out)
}

/// Evaluate an aggregation expression against `doc`.
///
/// `"$path"` strings read fields, documents and arrays are evaluated
/// element-wise, and `$literal`, `$concat`, `$add` and `$ifNull` are
/// understood. `None` means the referenced field is missing.
pub fn evaluate(doc: &Document, expr: &Value) -> Result<Option<Value>, StoreError> {
    match expr {
        Value::String(s) if s.starts_with('$') && s.len() > 1 => Ok(lookup(doc, &s[1..]).cloned()),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(evaluate(doc, item)?.unwrap_or(Value::Null));
            }
            Ok(Some(Value::Array(out)))
        }
        Value::Document(spec) => {
            if spec.len() == 1 {
                if let Some((op, arg)) = spec.iter().next().filter(|(k, _)| k.starts_with('$')) {
                    return evaluate_operator(doc, op, arg).map(Some);
                }
            }
            let mut out = Document::new();
            for (key, value) in spec {
                if let Some(value) = evaluate(doc, value)? {
                    out.insert(key.clone(), value);
                }
            }
            Ok(Some(Value::Document(out)))
        }
        literal => Ok(Some(literal.clone())),
    }
}

fn evaluate_operator(doc: &Document, op: &str, arg: &Value) -> Result<Value, StoreError> {
    let operands = |arg: &Value| -> Result<Vec<Value>, StoreError> {
        let items = arg
            .as_array()
            .ok_or_else(|| StoreError::invalid(format!("{op} expects an array of operands")))?;
        items
            .iter()
            .map(|item| Ok(evaluate(doc, item)?.unwrap_or(Value::Null)))
            .collect()
    };
    match op {
        "$literal" => Ok(arg.clone()),
        "$concat" => {
            let mut out = String::new();
            for part in operands(arg)? {
                match part {
                    Value::String(s) => out.push_str(&s),
                    Value::Null => return Ok(Value::Null),
                    _ => return Err(StoreError::invalid("$concat only supports strings")),
                }
            }
            Ok(Value::String(out))
        }
        "$add" => {
            let mut total = Accumulated::default();
            for part in operands(arg)? {
                if part.is_null() {
                    return Ok(Value::Null);
                }
                if !total.add(&part) {
                    return Err(StoreError::invalid("$add only supports numbers"));
                }
            }
            Ok(total.into_value())
        }
        "$ifNull" => {
            for part in operands(arg)? {
                if !part.is_null() {
                    return Ok(part);
                }
            }
            Ok(Value::Null)
        }
        other => Err(StoreError::UnsupportedOperator(other.to_string())),
    }
}

fn unwind(docs: Vec<Document>, spec: &Value) -> Result<Vec<Document>, StoreError> {
    let (path, preserve) = match spec {
        Value::String(path) => (path.as_str(), false),
        Value::Document(options) => (
            options
                .get("path")
                .and_then(Value::as_str)
                .ok_or_else(|| StoreError::invalid("$unwind requires a path"))?,
            options
                .get("preserveNullAndEmptyArrays")
                .is_some_and(Value::is_truthy),
        ),
        _ => return Err(StoreError::invalid("$unwind requires a path string or document")),
    };
    let field = path
        .strip_prefix('$')
        .ok_or_else(|| StoreError::invalid("$unwind path must start with '$'"))?;

    let mut out = Vec::new();
    for doc in docs {
        match lookup(&doc, field).cloned() {
            Some(Value::Array(items)) if !items.is_empty() => {
                for item in items {
                    let mut copy = doc.clone();
                    set_path(&mut copy, field, item)?;
                    out.push(copy);
                }
            }
            Some(Value::Array(_)) | Some(Value::Null) | None => {
                if preserve {
                    out.push(doc);
                }
            }
            Some(_) => out.push(doc),
        }
    }
    Ok(out)
}

/// Running numeric total that stays integral until a double is seen.
#[derive(Default)]
struct Accumulated {
    int: i64,
    double: Option<f64>,
}

impl Accumulated {
    fn add(&mut self, value: &Value) -> bool {
        match value {
            Value::Int(i) => match self.double.as_mut() {
                Some(d) => *d += *i as f64,
                None => self.int = self.int.saturating_add(*i),
            },
            Value::Double(d) => {
                let base = self.double.unwrap_or(self.int as f64);
                self.double = Some(base + d);
            }
            _ => return false,
        }
        true
    }

    fn into_value(self) -> Value {
        match self.double {
            Some(d) => Value::Double(d),
            None => Value::Int(self.int),
        }
    }
}

enum Accumulator {
    Sum(Accumulated),
    Avg { total: f64, count: u64 },
    Min(Option<Value>),
    Max(Option<Value>),
    First(Option<Value>),
    Last(Option<Value>),
    Push(Vec<Value>),
}

impl Accumulator {
    fn new(op: &str) -> Result<Self, StoreError> {
        Ok(match op {
            "$sum" => Accumulator::Sum(Accumulated::default()),
            "$avg" => Accumulator::Avg { total: 0.0, count: 0 },
            "$min" => Accumulator::Min(None),
            "$max" => Accumulator::Max(None),
            "$first" => Accumulator::First(None),
            "$last" => Accumulator::Last(None),
            "$push" => Accumulator::Push(Vec::new()),
            other => return Err(StoreError::UnsupportedOperator(other.to_string())),
        })
    }

    fn feed(&mut self, value: Option<Value>) {
        match self {
            Accumulator::Sum(total) => {
                if let Some(v) = value {
                    total.add(&v);
                }
            }
            Accumulator::Avg { total, count } => {
                if let Some(n) = value.as_ref().and_then(Value::as_f64) {
                    *total += n;
                    *count += 1;
                }
            }
            Accumulator::Min(current) => keep_extreme(current, value, Ordering::Less),
            Accumulator::Max(current) => keep_extreme(current, value, Ordering::Greater),
            Accumulator::First(current) => {
                if current.is_none() {
                    *current = Some(value.unwrap_or(Value::Null));
                }
            }
            Accumulator::Last(current) => *current = Some(value.unwrap_or(Value::Null)),
            Accumulator::Push(items) => {
                if let Some(v) = value {
                    items.push(v);
                }
            }
        }
    }

    fn finish(self) -> Value {
        match self {
            Accumulator::Sum(total) => total.into_value(),
            Accumulator::Avg { total, count } => {
                if count == 0 {
                    Value::Null
                } else {
                    Value::Double(total / count as f64)
                }
            }
            Accumulator::Min(v) | Accumulator::Max(v) | Accumulator::First(v) | Accumulator::Last(v) => {
                v.unwrap_or(Value::Null)
            }
            Accumulator::Push(items) => Value::Array(items),
        }
    }
}

fn keep_extreme(current: &mut Option<Value>, candidate: Option<Value>, want: Ordering) {
    if let Some(v) = candidate.filter(|v| !v.is_null()) {
        if current.as_ref().map_or(true, |c| compare_values(&v, c) == want) {
            *current = Some(v);
        }
    }
}

fn group(docs: Vec<Document>, spec: &Document) -> Result<Vec<Document>, StoreError> {
    let key_expr = spec
        .get("_id")
        .ok_or_else(|| StoreError::invalid("a group specification must include an _id"))?;

    let mut fields = Vec::new();
    for (name, acc) in spec.iter().filter(|(k, _)| k.as_str() != "_id") {
        let (op, expr) = acc
            .as_document()
            .filter(|d| d.len() == 1)
            .and_then(|d| d.iter().next())
            .ok_or_else(|| StoreError::invalid(format!("the field '{name}' must be an accumulator object")))?;
        Accumulator::new(op)?;
        fields.push((name.clone(), op.as_str(), expr));
    }

    let mut groups: Vec<(Value, Vec<Accumulator>)> = Vec::new();
    for doc in &docs {
        let key = evaluate(doc, key_expr)?.unwrap_or(Value::Null);
        let position = match groups.iter().position(|(k, _)| values_equal(k, &key)) {
            Some(position) => position,
            None => {
                let accumulators = fields
                    .iter()
                    .map(|(_, op, _)| Accumulator::new(op))
                    .collect::<Result<Vec<_>, _>>()?;
                groups.push((key, accumulators));
                groups.len() - 1
            }
        };
        for ((_, _, expr), acc) in fields.iter().zip(groups[position].1.iter_mut()) {
            acc.feed(evaluate(doc, expr)?);
        }
    }

    Ok(groups
        .into_iter()
        .map(|(key, accumulators)| {
            let mut out = Document::new();
            out.insert("_id".to_string(), key);
            for ((name, _, _), acc) in fields.iter().zip(accumulators) {
                out.insert(name.clone(), acc.finish());
            }
            out
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::document_from_json;
    use serde_json::json;

    fn docs(json: serde_json::Value) -> Vec<Document> {
        match Value::from(json) {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|v| v.as_document().cloned())
                .collect(),
            _ => Vec::new(),
        }
    }

    fn stages(json: serde_json::Value) -> Vec<Value> {
        match Value::from(json) {
            Value::Array(items) => items,
            _ => Vec::new(),
        }
    }

    fn to_json(docs: Vec<Document>) -> serde_json::Value {
        Value::Array(docs.into_iter().map(Value::Document).collect()).to_json()
    }

    #[test]
    fn test_match_sort_skip_limit() {
        let input = docs(json!([{"n": 3}, {"n": 1}, {"n": 2}, {"n": 4}, {"x": true}]));
        let out = run_pipeline(
            input,
            &stages(json!([
                {"$match": {"n": {"$exists": true}}},
                {"$sort": {"n": -1}},
                {"$skip": 1},
                {"$limit": 2},
            ])),
        )
        .unwrap();
        assert_eq!(to_json(out), json!([{"n": 3}, {"n": 2}]));
    }

    #[test]
    fn test_group_with_accumulators() {
        let input = docs(json!([
            {"k": "a", "v": 1},
            {"k": "b", "v": 5},
            {"k": "a", "v": 3},
        ]));
        let out = run_pipeline(
            input,
            &stages(json!([
                {"$group": {
                    "_id": "$k",
                    "total": {"$sum": "$v"},
                    "count": {"$sum": 1},
                    "avg": {"$avg": "$v"},
                    "low": {"$min": "$v"},
                    "high": {"$max": "$v"},
                    "all": {"$push": "$v"},
                }},
                {"$sort": {"_id": 1}},
            ])),
        )
        .unwrap();
        assert_eq!(
            to_json(out),
            json!([
                {"_id": "a", "total": 4, "count": 2, "avg": 2.0, "low": 1, "high": 3, "all": [1, 3]},
                {"_id": "b", "total": 5, "count": 1, "avg": 5.0, "low": 5, "high": 5, "all": [5]},
            ])
        );
    }

    #[test]
    fn test_facet_and_count() {
        let input = docs(json!([{"n": 1}, {"n": 2}, {"n": 3}]));
        let out = run_pipeline(
            input,
            &stages(json!([{"$facet": {
                "items": [{"$skip": 2}],
                "total": [{"$count": "count"}],
            }}])),
        )
        .unwrap();
        assert_eq!(to_json(out), json!([{"items": [{"n": 3}], "total": [{"count": 3}]}]));
    }

    #[test]
    fn test_count_of_nothing_is_empty() {
        let out = run_pipeline(Vec::new(), &stages(json!([{"$count": "c"}]))).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_unwind_and_add_fields() {
        let input = docs(json!([{"tags": ["a", "b"]}, {"tags": []}]));
        let out = run_pipeline(
            input,
            &stages(json!([
                {"$unwind": "$tags"},
                {"$addFields": {"label": {"$concat": ["tag:", "$tags"]}}},
            ])),
        )
        .unwrap();
        assert_eq!(
            to_json(out),
            json!([{"tags": "a", "label": "tag:a"}, {"tags": "b", "label": "tag:b"}])
        );
    }

    #[test]
    fn test_projection_modes() {
        let doc = document_from_json(json!({"_id": 1, "a": 1, "b": {"c": 2, "d": 3}})).unwrap();

        let include = document_from_json(json!({"a": 1, "b.c": 1})).unwrap();
        let out = apply_projection(&doc, &include).unwrap();
        assert_eq!(Value::Document(out).to_json(), json!({"_id": 1, "a": 1, "b": {"c": 2}}));

        let exclude = document_from_json(json!({"_id": 0, "b": 0})).unwrap();
        let out = apply_projection(&doc, &exclude).unwrap();
        assert_eq!(Value::Document(out).to_json(), json!({"a": 1}));

        let mixed = document_from_json(json!({"a": 1, "b": 0})).unwrap();
        assert!(apply_projection(&doc, &mixed).is_err());
    }

    #[test]
    fn test_unknown_stage_is_rejected() {
        let err = run_pipeline(Vec::new(), &stages(json!([{"$lookup": {}}]))).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedStage(name) if name == "$lookup"));
    }
}
