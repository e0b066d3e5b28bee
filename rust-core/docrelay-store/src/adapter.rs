// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Document store adapter.
//
// `DocumentStore` is the single entry point the broker and the migration
// subsystem use to reach the store. It owns an injected driver handle,
// coerces identifier strings on every input, normalises plain update data
// into `$set`, and builds the one-shot pagination aggregation for `getAll`.
//
// The per-operation helpers are free functions over `&dyn StoreOps` so the
// transaction engine can run them against a session instead of the driver.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::coerce::{coerce_document, coerce_identifiers};
use crate::driver::{
    BulkWriteResult, CollectionInfo, DeleteResult, DocumentDriver, FindOptions, IndexInfo, Namespace,
    ReturnDocument, StoreOps, UpdateOptions, UpdateResult, WriteModel,
};
use crate::error::StoreError;
use crate::transaction;
use crate::update::normalize_update;
use crate::value::{Document, Value};

/// Adapter-level settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Page size used by paginated `getAll` when the caller gives none.
    pub default_page_limit: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { default_page_limit: 10 }
    }
}

/// One page of a paginated `getAll`.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub items: Vec<Document>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
}

/// Result of `getAll`: a plain list, or a page when `paginate` was requested.
#[derive(Debug, Clone, PartialEq)]
pub enum GetAllResult {
    Documents(Vec<Document>),
    Page(Page),
}

impl GetAllResult {
    pub fn into_value(self) -> Value {
        match self {
            GetAllResult::Documents(docs) => documents_value(docs),
            GetAllResult::Page(page) => {
                let mut doc = Document::new();
                doc.insert("items".into(), documents_value(page.items));
                doc.insert("total".into(), page.total.into());
                doc.insert("page".into(), page.page.into());
                doc.insert("limit".into(), page.limit.into());
                Value::Document(doc)
            }
        }
    }
}

/// Result of `set`: the written document when `returnDocument` was given,
/// otherwise the update counts.
#[derive(Debug, Clone, PartialEq)]
pub enum SetOutcome {
    Document(Option<Document>),
    Update(UpdateResult),
}

impl SetOutcome {
    pub fn into_value(self) -> Value {
        match self {
            SetOutcome::Document(doc) => doc.map(Value::Document).unwrap_or(Value::Null),
            SetOutcome::Update(result) => result.to_value(),
        }
    }
}

pub(crate) fn documents_value(docs: Vec<Document>) -> Value {
    Value::Array(docs.into_iter().map(Value::Document).collect())
}

/// Handle to the document store shared by every component.
#[derive(Clone)]
pub struct DocumentStore {
    driver: Arc<dyn DocumentDriver>,
    config: StoreConfig,
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("driver", &self.driver.name())
            .field("config", &self.config)
            .finish()
    }
}

impl DocumentStore {
    pub fn new(driver: Arc<dyn DocumentDriver>, config: StoreConfig) -> Self {
        Self { driver, config }
    }

    pub fn driver(&self) -> &dyn DocumentDriver {
        self.driver.as_ref()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Check the driver is reachable.
    pub async fn ping(&self) -> Result<(), StoreError> {
        self.driver.ping().await
    }

    pub async fn get(&self, db: &str, collection: &str, query: Document, options: Document) -> Result<Option<Document>, StoreError> {
        get(self.driver.as_ops(), &Namespace::new(db, collection), query, &options).await
    }

    pub async fn get_all(&self, db: &str, collection: &str, query: Document, options: Document) -> Result<GetAllResult, StoreError> {
        get_all(self.driver.as_ops(), &self.config, &Namespace::new(db, collection), query, &options).await
    }

    pub async fn set(
        &self,
        db: &str,
        collection: &str,
        query: Document,
        data: Document,
        options: Document,
    ) -> Result<SetOutcome, StoreError> {
        set(self.driver.as_ops(), &Namespace::new(db, collection), query, data, &options).await
    }

    pub async fn set_new(&self, db: &str, collection: &str, data: Document) -> Result<Document, StoreError> {
        set_new(self.driver.as_ops(), &Namespace::new(db, collection), data).await
    }

    pub async fn del(&self, db: &str, collection: &str, query: Document) -> Result<DeleteResult, StoreError> {
        del(self.driver.as_ops(), &Namespace::new(db, collection), query).await
    }

    pub async fn bulk(&self, db: &str, collection: &str, operations: Vec<Value>) -> Result<BulkWriteResult, StoreError> {
        bulk(self.driver.as_ops(), &Namespace::new(db, collection), operations).await
    }

    pub async fn aggregate(&self, db: &str, collection: &str, stages: Vec<Value>) -> Result<Vec<Document>, StoreError> {
        aggregate(self.driver.as_ops(), &Namespace::new(db, collection), stages).await
    }

    /// Create an index and return its name.
    pub async fn create_index(&self, db: &str, collection: &str, keys: Document, options: Document) -> Result<String, StoreError> {
        let ns = Namespace::new(db, collection);
        debug!(ns = %ns, "executing createIndex");
        self.driver.create_index(&ns, keys, options).await
    }

    /// Run `operations` as one atomic transaction and return each step's result.
    pub async fn transaction(&self, db: &str, operations: &[Value]) -> Result<Vec<Value>, StoreError> {
        transaction::run_transaction(self, db, operations).await
    }

    pub async fn create_collection(&self, db: &str, collection: &str, options: Document) -> Result<(), StoreError> {
        self.driver.create_collection(db, collection, options).await
    }

    pub async fn drop_collection(&self, db: &str, collection: &str) -> Result<bool, StoreError> {
        self.driver.drop_collection(db, collection).await
    }

    pub async fn list_collections(&self, db: &str) -> Result<Vec<CollectionInfo>, StoreError> {
        self.driver.list_collections(db).await
    }

    pub async fn list_indexes(&self, db: &str, collection: &str) -> Result<Vec<IndexInfo>, StoreError> {
        self.driver.list_indexes(&Namespace::new(db, collection)).await
    }

    pub async fn drop_index(&self, db: &str, collection: &str, name: &str) -> Result<bool, StoreError> {
        self.driver.drop_index(&Namespace::new(db, collection), name).await
    }
}

pub(crate) async fn get(
    ops: &dyn StoreOps,
    ns: &Namespace,
    query: Document,
    options: &Document,
) -> Result<Option<Document>, StoreError> {
    let query = coerce_document(query);
    debug!(ns = %ns, "executing get");
    ops.find_one(ns, query, FindOptions::from_document(options)?).await
}

pub(crate) async fn get_all(
    ops: &dyn StoreOps,
    config: &StoreConfig,
    ns: &Namespace,
    query: Document,
    options: &Document,
) -> Result<GetAllResult, StoreError> {
    let query = coerce_document(query);
    if options.get("paginate").is_some_and(Value::is_truthy) {
        debug!(ns = %ns, "executing paginated getAll");
        return paginate(ops, config, ns, query, options).await.map(GetAllResult::Page);
    }
    debug!(ns = %ns, "executing getAll");
    let find = FindOptions::from_document(options)?;
    Ok(GetAllResult::Documents(ops.find(ns, query, find).await?))
}

fn positive(options: &Document, key: &str) -> Result<Option<u64>, StoreError> {
    match options.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .filter(|n| *n >= 1)
            .map(|n| Some(n as u64))
            .ok_or_else(|| StoreError::invalid(format!("'{key}' must be a positive integer"))),
    }
}

async fn paginate(
    ops: &dyn StoreOps,
    config: &StoreConfig,
    ns: &Namespace,
    query: Document,
    options: &Document,
) -> Result<Page, StoreError> {
    let page = positive(options, "page")?.unwrap_or(1);
    let limit = positive(options, "limit")?.unwrap_or(config.default_page_limit.max(1));
    let skip = match options.get("skip") {
        None | Some(Value::Null) => (page - 1).saturating_mul(limit),
        Some(v) => v
            .as_i64()
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| StoreError::invalid("'skip' must be a non-negative integer"))?,
    };
    let find = FindOptions::from_document(options)?;

    let stage = |name: &str, spec: Value| {
        let mut doc = Document::new();
        doc.insert(name.to_string(), spec);
        Value::Document(doc)
    };

    let mut items = Vec::new();
    if let Some(sort) = find.sort {
        items.push(stage("$sort", Value::Document(coerce_document(sort))));
    }
    items.push(stage("$skip", skip.into()));
    items.push(stage("$limit", limit.into()));
    if let Some(projection) = find.projection {
        items.push(stage("$project", Value::Document(projection)));
    }
    let mut facet = Document::new();
    facet.insert("items".into(), Value::Array(items));
    facet.insert("total".into(), Value::Array(vec![stage("$count", "count".into())]));

    let mut pipeline = vec![stage("$match", Value::Document(query))];
    match options.get("stages") {
        None | Some(Value::Null) => {}
        Some(Value::Array(stages)) => pipeline.extend(stages.iter().cloned().map(coerce_identifiers)),
        Some(_) => return Err(StoreError::invalid("'stages' must be an array")),
    }
    pipeline.push(stage("$facet", Value::Document(facet)));

    let result = ops.aggregate(ns, pipeline).await?;
    let facet = result.into_iter().next().unwrap_or_default();
    let items = facet
        .get("items")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|v| v.as_document().cloned()).collect())
        .unwrap_or_default();
    let total = facet
        .get("total")
        .and_then(|t| t.lookup_path("0.count"))
        .and_then(Value::as_i64)
        .map_or(0, |n| n.max(0) as u64);

    Ok(Page {
        items,
        total,
        page,
        limit,
    })
}

pub(crate) async fn set(
    ops: &dyn StoreOps,
    ns: &Namespace,
    query: Document,
    data: Document,
    options: &Document,
) -> Result<SetOutcome, StoreError> {
    let query = coerce_document(query);
    let update = normalize_update(coerce_document(data));
    let upsert = options.get("upsert").is_some_and(Value::is_truthy);
    let return_document = match options.get("returnDocument") {
        None | Some(Value::Null) => None,
        Some(Value::String(raw)) => Some(ReturnDocument::parse(raw).ok_or_else(|| {
            StoreError::invalid(format!("returnDocument must be 'before' or 'after', got '{raw}'"))
        })?),
        Some(_) => return Err(StoreError::invalid("returnDocument must be a string")),
    };
    debug!(ns = %ns, upsert, "executing set");

    match return_document {
        Some(which) => Ok(SetOutcome::Document(
            ops.find_one_and_update(ns, query, update, upsert, which).await?,
        )),
        None => {
            let options = UpdateOptions { upsert, multi: false };
            Ok(SetOutcome::Update(ops.update(ns, query, update, options).await?))
        }
    }
}

pub(crate) async fn set_new(ops: &dyn StoreOps, ns: &Namespace, data: Document) -> Result<Document, StoreError> {
    debug!(ns = %ns, "executing setNew");
    ops.insert_one(ns, coerce_document(data)).await
}

pub(crate) async fn del(ops: &dyn StoreOps, ns: &Namespace, query: Document) -> Result<DeleteResult, StoreError> {
    let query = coerce_document(query);
    debug!(ns = %ns, "executing del");
    ops.delete(ns, query, true).await
}

pub(crate) async fn bulk(ops: &dyn StoreOps, ns: &Namespace, operations: Vec<Value>) -> Result<BulkWriteResult, StoreError> {
    let models = operations
        .into_iter()
        .map(|op| WriteModel::from_value(&coerce_identifiers(op)))
        .collect::<Result<Vec<_>, _>>()?;
    debug!(ns = %ns, operation_count = models.len(), "executing bulk");
    ops.bulk_write(ns, models).await
}

pub(crate) async fn aggregate(ops: &dyn StoreOps, ns: &Namespace, stages: Vec<Value>) -> Result<Vec<Document>, StoreError> {
    let stages: Vec<Value> = stages.into_iter().map(coerce_identifiers).collect();
    debug!(ns = %ns, stage_count = stages.len(), "executing aggregate");
    ops.aggregate(ns, stages).await
}
