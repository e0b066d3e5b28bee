// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Document driver interface.
//
// The adapter never talks to a concrete store. It consumes `DocumentDriver`
// for auto-commit work and metadata, and `DriverSession` for atomic units of
// work; both expose the shared `StoreOps` surface so read/write helpers can
// be written once against `&dyn StoreOps`.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::StoreError;
use crate::value::{Document, Value};

/// A `database.collection` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace {
    pub db: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(db: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.collection)
    }
}

/// Options accepted by `find` style reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub sort: Option<Document>,
    pub skip: Option<u64>,
    /// `None` or `Some(0)` means unbounded.
    pub limit: Option<u64>,
    pub projection: Option<Document>,
}

impl FindOptions {
    /// Read `sort`, `skip`, `limit` and `projection` from a caller-supplied
    /// options document. Unknown keys are ignored.
    pub fn from_document(options: &Document) -> Result<Self, StoreError> {
        let count = |key: &str| -> Result<Option<u64>, StoreError> {
            match options.get(key) {
                None | Some(Value::Null) => Ok(None),
                Some(v) => v
                    .as_i64()
                    .and_then(|n| u64::try_from(n).ok())
                    .map(Some)
                    .ok_or_else(|| StoreError::invalid(format!("'{key}' must be a non-negative integer"))),
            }
        };
        let doc = |key: &str| -> Result<Option<Document>, StoreError> {
            match options.get(key) {
                None | Some(Value::Null) => Ok(None),
                Some(Value::Document(d)) => Ok(Some(d.clone())),
                Some(_) => Err(StoreError::invalid(format!("'{key}' must be a document"))),
            }
        };
        Ok(Self {
            sort: doc("sort")?,
            skip: count("skip")?,
            limit: count("limit")?,
            projection: doc("projection")?,
        })
    }
}

/// Options for `update`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    pub upsert: bool,
    pub multi: bool,
}

/// Which version of a document `find_one_and_update` hands back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnDocument {
    Before,
    After,
}

impl ReturnDocument {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "before" => Some(ReturnDocument::Before),
            "after" => Some(ReturnDocument::After),
            _ => None,
        }
    }
}

/// Outcome of an update.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    pub acknowledged: bool,
    pub matched_count: u64,
    pub modified_count: u64,
    pub upserted_count: u64,
    pub upserted_id: Option<Value>,
}

impl UpdateResult {
    /// Document form, keeping `upsertedId` as a typed value.
    pub fn to_value(&self) -> Value {
        let mut doc = Document::new();
        doc.insert("acknowledged".into(), self.acknowledged.into());
        doc.insert("matchedCount".into(), self.matched_count.into());
        doc.insert("modifiedCount".into(), self.modified_count.into());
        doc.insert("upsertedCount".into(), self.upserted_count.into());
        doc.insert("upsertedId".into(), self.upserted_id.clone().into());
        Value::Document(doc)
    }
}

/// Outcome of a delete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    pub acknowledged: bool,
    pub deleted_count: u64,
}

impl DeleteResult {
    pub fn to_value(&self) -> Value {
        let mut doc = Document::new();
        doc.insert("acknowledged".into(), self.acknowledged.into());
        doc.insert("deletedCount".into(), self.deleted_count.into());
        Value::Document(doc)
    }
}

/// Aggregate counts of an ordered bulk write.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkWriteResult {
    pub inserted_count: u64,
    pub matched_count: u64,
    pub modified_count: u64,
    pub deleted_count: u64,
    pub upserted_count: u64,
    /// Operation index to inserted `_id`.
    pub inserted_ids: BTreeMap<usize, Value>,
    /// Operation index to upserted `_id`.
    pub upserted_ids: BTreeMap<usize, Value>,
}

impl BulkWriteResult {
    pub fn to_value(&self) -> Value {
        let ids = |map: &BTreeMap<usize, Value>| {
            Value::Document(map.iter().map(|(i, id)| (i.to_string(), id.clone())).collect())
        };
        let mut doc = Document::new();
        doc.insert("insertedCount".into(), self.inserted_count.into());
        doc.insert("matchedCount".into(), self.matched_count.into());
        doc.insert("modifiedCount".into(), self.modified_count.into());
        doc.insert("deletedCount".into(), self.deleted_count.into());
        doc.insert("upsertedCount".into(), self.upserted_count.into());
        doc.insert("insertedIds".into(), ids(&self.inserted_ids));
        doc.insert("upsertedIds".into(), ids(&self.upserted_ids));
        Value::Document(doc)
    }
}

/// One entry of a bulk write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteModel {
    InsertOne { document: Document },
    UpdateOne { filter: Document, update: Document, upsert: bool },
    UpdateMany { filter: Document, update: Document, upsert: bool },
    ReplaceOne { filter: Document, replacement: Document, upsert: bool },
    DeleteOne { filter: Document },
    DeleteMany { filter: Document },
}

impl WriteModel {
    /// Parse the `{insertOne: {document}}` style wire form.
    pub fn from_value(value: &Value) -> Result<Self, StoreError> {
        let (kind, body) = value
            .as_document()
            .filter(|d| d.len() == 1)
            .and_then(|d| d.iter().next())
            .ok_or_else(|| StoreError::invalid("each bulk operation must be a single-key document"))?;
        let body = body
            .as_document()
            .ok_or_else(|| StoreError::invalid(format!("{kind} requires a document body")))?;
        let field = |name: &str| -> Result<Document, StoreError> {
            body.get(name)
                .and_then(Value::as_document)
                .cloned()
                .ok_or_else(|| StoreError::invalid(format!("{kind} requires '{name}'")))
        };
        let upsert = body.get("upsert").is_some_and(Value::is_truthy);

        Ok(match kind.as_str() {
            "insertOne" => WriteModel::InsertOne { document: field("document")? },
            "updateOne" => WriteModel::UpdateOne {
                filter: field("filter")?,
                update: field("update")?,
                upsert,
            },
            "updateMany" => WriteModel::UpdateMany {
                filter: field("filter")?,
                update: field("update")?,
                upsert,
            },
            "replaceOne" => WriteModel::ReplaceOne {
                filter: field("filter")?,
                replacement: field("replacement")?,
                upsert,
            },
            "deleteOne" => WriteModel::DeleteOne { filter: field("filter")? },
            "deleteMany" => WriteModel::DeleteMany { filter: field("filter")? },
            other => return Err(StoreError::invalid(format!("unknown bulk operation '{other}'"))),
        })
    }
}

/// A collection as reported by `list_collections`.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionInfo {
    pub name: String,
    pub options: Document,
}

/// An index as reported by `list_indexes`.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexInfo {
    pub name: String,
    pub keys: Document,
    pub unique: bool,
    /// Remaining creation options, stored verbatim.
    pub options: Document,
}

/// Name of the implicit identifier index.
pub const ID_INDEX_NAME: &str = "_id_";

/// Default index name: `<field>_<direction>` pairs joined with `_`.
pub fn default_index_name(keys: &Document) -> String {
    keys.iter()
        .map(|(field, dir)| {
            let dir = match dir {
                Value::String(s) => s.clone(),
                other => other.as_i64().map(|n| n.to_string()).unwrap_or_else(|| "1".into()),
            };
            format!("{field}_{dir}")
        })
        .collect::<Vec<_>>()
        .join("_")
}

/// Read and write operations shared by auto-commit drivers and sessions.
#[async_trait]
pub trait StoreOps: Send + Sync {
    async fn find(&self, ns: &Namespace, filter: Document, options: FindOptions) -> Result<Vec<Document>, StoreError>;

    async fn find_one(
        &self,
        ns: &Namespace,
        filter: Document,
        options: FindOptions,
    ) -> Result<Option<Document>, StoreError> {
        let options = FindOptions {
            limit: Some(1),
            ..options
        };
        Ok(self.find(ns, filter, options).await?.into_iter().next())
    }

    /// Apply operator-form `update` to the first (or every, with `multi`)
    /// matching document.
    async fn update(
        &self,
        ns: &Namespace,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> Result<UpdateResult, StoreError>;

    async fn find_one_and_update(
        &self,
        ns: &Namespace,
        filter: Document,
        update: Document,
        upsert: bool,
        return_document: ReturnDocument,
    ) -> Result<Option<Document>, StoreError>;

    /// Insert one document, assigning `_id` when absent. Returns the stored document.
    async fn insert_one(&self, ns: &Namespace, document: Document) -> Result<Document, StoreError>;

    async fn delete(&self, ns: &Namespace, filter: Document, many: bool) -> Result<DeleteResult, StoreError>;

    /// Apply `operations` in order, stopping at the first failure.
    async fn bulk_write(&self, ns: &Namespace, operations: Vec<WriteModel>) -> Result<BulkWriteResult, StoreError>;

    async fn aggregate(&self, ns: &Namespace, pipeline: Vec<Value>) -> Result<Vec<Document>, StoreError>;
}

/// A connection to a document store.
#[async_trait]
pub trait DocumentDriver: StoreOps {
    /// Short driver name for logs.
    fn name(&self) -> &str;

    async fn ping(&self) -> Result<(), StoreError>;

    async fn create_collection(&self, db: &str, collection: &str, options: Document) -> Result<(), StoreError>;

    /// Returns `false` when the collection did not exist.
    async fn drop_collection(&self, db: &str, collection: &str) -> Result<bool, StoreError>;

    async fn list_collections(&self, db: &str) -> Result<Vec<CollectionInfo>, StoreError>;

    /// Create an index and return its name. `options` may carry `name` and
    /// `unique`; anything else is stored verbatim.
    async fn create_index(&self, ns: &Namespace, keys: Document, options: Document) -> Result<String, StoreError>;

    /// Returns `false` when no index had that name.
    async fn drop_index(&self, ns: &Namespace, name: &str) -> Result<bool, StoreError>;

    async fn list_indexes(&self, ns: &Namespace) -> Result<Vec<IndexInfo>, StoreError>;

    /// Open an exclusive atomic session on `db`.
    async fn start_session(&self, db: &str) -> Result<Box<dyn DriverSession>, StoreError>;

    fn as_ops(&self) -> &dyn StoreOps;
}

/// An atomic unit of work on one database.
///
/// Dropping a session without committing discards its writes.
#[async_trait]
pub trait DriverSession: StoreOps {
    fn database(&self) -> &str;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn abort(self: Box<Self>) -> Result<(), StoreError>;

    fn as_ops(&self) -> &dyn StoreOps;
}
