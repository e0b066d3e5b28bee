// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Multi-step transaction engine.
//
// Steps run strictly in order inside one exclusive driver session. Before
// step i (i > 0) every `$$prev.<path>` string in the raw step is replaced
// by the value at that path in the result of step i - 1. Any failure
// aborts the session so no write from earlier steps survives, and the
// original error is returned.

use std::fmt;
use std::str::FromStr;

use tracing::{debug, error, info, warn};

use crate::adapter::{self, DocumentStore};
use crate::coerce::coerce_identifiers;
use crate::driver::{Namespace, StoreOps};
use crate::error::StoreError;
use crate::value::{Document, Value};

/// Prefix that marks a placeholder string.
pub const PLACEHOLDER_PREFIX: &str = "$$prev.";

/// The method a transaction step invokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMethod {
    Get,
    GetAll,
    GetById,
    Set,
    SetNew,
    SetById,
    Del,
    DelById,
    Bulk,
    Aggregate,
}

impl StepMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepMethod::Get => "get",
            StepMethod::GetAll => "getAll",
            StepMethod::GetById => "getById",
            StepMethod::Set => "set",
            StepMethod::SetNew => "setNew",
            StepMethod::SetById => "setById",
            StepMethod::Del => "del",
            StepMethod::DelById => "delById",
            StepMethod::Bulk => "bulk",
            StepMethod::Aggregate => "aggregate",
        }
    }
}

impl fmt::Display for StepMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepMethod {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "get" => StepMethod::Get,
            "getAll" => StepMethod::GetAll,
            "getById" => StepMethod::GetById,
            "set" => StepMethod::Set,
            "setNew" => StepMethod::SetNew,
            "setById" => StepMethod::SetById,
            "del" => StepMethod::Del,
            "delById" => StepMethod::DelById,
            "bulk" => StepMethod::Bulk,
            "aggregate" => StepMethod::Aggregate,
            other => return Err(StoreError::UnsupportedMethod(other.to_string())),
        })
    }
}

/// A parsed transaction step.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionStep {
    pub method: StepMethod,
    pub collection: String,
    pub query: Document,
    pub data: Document,
    pub stages: Vec<Value>,
    pub id: Option<Value>,
    pub bulk_ops: Vec<Value>,
    pub options: Document,
}

impl TransactionStep {
    /// Parse a (placeholder-resolved) step.
    pub fn from_value(index: usize, raw: &Value) -> Result<Self, StoreError> {
        let invalid = |reason: String| StoreError::InvalidStep { index, reason };
        let step = raw
            .as_document()
            .ok_or_else(|| invalid("a step must be a document".to_string()))?;

        let method = match step.get("method") {
            Some(Value::String(name)) => name.parse::<StepMethod>()?,
            Some(other) => return Err(StoreError::UnsupportedMethod(other.to_json().to_string())),
            None => return Err(invalid("missing 'method'".to_string())),
        };
        let collection = step
            .get("collection")
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| invalid("missing 'collection'".to_string()))?
            .to_string();

        let document = |key: &str| -> Result<Document, StoreError> {
            match step.get(key) {
                None | Some(Value::Null) => Ok(Document::new()),
                Some(Value::Document(d)) => Ok(d.clone()),
                Some(_) => Err(invalid(format!("'{key}' must be a document"))),
            }
        };
        let list = |key: &str| -> Result<Vec<Value>, StoreError> {
            match step.get(key) {
                None | Some(Value::Null) => Ok(Vec::new()),
                Some(Value::Array(items)) => Ok(items.clone()),
                Some(_) => Err(invalid(format!("'{key}' must be an array"))),
            }
        };

        let id = step.get("id").filter(|v| !v.is_null()).cloned();
        if matches!(method, StepMethod::GetById | StepMethod::SetById | StepMethod::DelById) && id.is_none() {
            return Err(invalid(format!("'id' is required for {method}")));
        }

        Ok(Self {
            method,
            collection,
            query: document("query")?,
            data: document("data")?,
            stages: list("stages")?,
            id,
            bulk_ops: list("bulkOps")?,
            options: document("options")?,
        })
    }
}

/// Replace every placeholder inside `current` with the value it names in
/// `previous`. The walk never mutates `previous`.
///
/// A `null` previous result resolves nothing, so any placeholder fails.
pub fn resolve_placeholders(current: &Value, previous: &Value) -> Result<Value, StoreError> {
    match current {
        Value::String(s) => match s.strip_prefix(PLACEHOLDER_PREFIX) {
            Some(path) => {
                let resolved = if previous.is_null() { None } else { previous.lookup_path(path) };
                match resolved {
                    Some(value) => {
                        debug!(placeholder = %s, "resolved placeholder");
                        Ok(value.clone())
                    }
                    None => Err(StoreError::PlaceholderUnresolved(s.clone())),
                }
            }
            None => Ok(current.clone()),
        },
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_placeholders(item, previous))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Document(doc) => doc
            .iter()
            .map(|(key, value)| Ok((key.clone(), resolve_placeholders(value, previous)?)))
            .collect::<Result<Document, StoreError>>()
            .map(Value::Document),
        other => Ok(other.clone()),
    }
}

pub(crate) async fn run_transaction(
    store: &DocumentStore,
    db: &str,
    operations: &[Value],
) -> Result<Vec<Value>, StoreError> {
    if operations.is_empty() {
        return Err(StoreError::invalid("a transaction needs at least one operation"));
    }

    let session = store.driver().start_session(db).await?;
    info!(db, steps = operations.len(), "starting transaction");

    let outcome = execute_steps(store, session.as_ops(), db, operations).await;
    match outcome {
        Ok(results) => {
            session.commit().await?;
            info!(db, "transaction committed");
            Ok(results)
        }
        Err(err) => {
            error!(db, error = %err, "transaction aborted");
            if let Err(abort_err) = session.abort().await {
                warn!(db, error = %abort_err, "failed to abort session cleanly");
            }
            Err(err)
        }
    }
}

async fn execute_steps(
    store: &DocumentStore,
    ops: &dyn StoreOps,
    db: &str,
    operations: &[Value],
) -> Result<Vec<Value>, StoreError> {
    let mut results: Vec<Value> = Vec::with_capacity(operations.len());
    for (index, raw) in operations.iter().enumerate() {
        let resolved = match results.last() {
            Some(previous) => resolve_placeholders(raw, previous)?,
            None => raw.clone(),
        };
        let step = TransactionStep::from_value(index, &resolved)?;
        debug!(index, method = %step.method, collection = %step.collection, "executing transaction step");
        results.push(execute_step(store, ops, db, step).await?);
    }
    Ok(results)
}

fn with_upserted_id(result: Value) -> Value {
    match result {
        Value::Document(mut doc) => {
            if let Some(id) = doc.get("upsertedId").filter(|id| !id.is_null()).cloned() {
                doc.insert("_id".to_string(), id);
            }
            Value::Document(doc)
        }
        other => other,
    }
}

fn id_filter(id: Value) -> Document {
    let mut filter = Document::new();
    filter.insert("_id".to_string(), coerce_identifiers(id));
    filter
}

async fn execute_step(
    store: &DocumentStore,
    ops: &dyn StoreOps,
    db: &str,
    step: TransactionStep,
) -> Result<Value, StoreError> {
    let ns = Namespace::new(db, step.collection.as_str());
    let id = step.id.unwrap_or_default();
    Ok(match step.method {
        StepMethod::Get => adapter::get(ops, &ns, step.query, &step.options).await?.into(),
        StepMethod::GetAll => adapter::get_all(ops, store.config(), &ns, step.query, &step.options)
            .await?
            .into_value(),
        StepMethod::GetById => adapter::get(ops, &ns, id_filter(id), &step.options).await?.into(),
        StepMethod::Set => with_upserted_id(
            adapter::set(ops, &ns, step.query, step.data, &step.options)
                .await?
                .into_value(),
        ),
        StepMethod::SetNew => Value::Document(adapter::set_new(ops, &ns, step.data).await?),
        StepMethod::SetById => with_upserted_id(
            adapter::set(ops, &ns, id_filter(id), step.data, &step.options)
                .await?
                .into_value(),
        ),
        StepMethod::Del => adapter::del(ops, &ns, step.query).await?.to_value(),
        StepMethod::DelById => adapter::del(ops, &ns, id_filter(id)).await?.to_value(),
        StepMethod::Bulk => adapter::bulk(ops, &ns, step.bulk_ops).await?.to_value(),
        StepMethod::Aggregate => adapter::documents_value(adapter::aggregate(ops, &ns, step.stages).await?),
    })
}
