// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory document driver for DocRelay.
//
// Each database is a `DatabaseState` behind its own tokio `Mutex`; the
// database registry is a `BTreeMap` behind a tokio `RwLock`. Auto-commit
// operations lock the database for the duration of one call. A session
// takes the database lock for its whole lifetime and works on a cloned
// copy, which `commit` publishes and `abort`/drop discards.
// Intended for testing, development and single-process deployments.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard};

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

use crate::driver::{
    default_index_name, BulkWriteResult, CollectionInfo, DeleteResult, DocumentDriver, DriverSession, FindOptions,
    IndexInfo, Namespace, ReturnDocument, StoreOps, UpdateOptions, UpdateResult, WriteModel, ID_INDEX_NAME,
};
use crate::error::StoreError;
use crate::filter::{matches, resolve_field};
use crate::oid::ObjectId;
use crate::pipeline::{apply_projection, run_pipeline, sort_documents};
use crate::update::{apply_update, is_operator_document, upsert_seed};
use crate::value::{values_equal, Document, Value};

#[derive(Debug, Clone)]
struct CollectionState {
    options: Document,
    /// Documents in insertion order.
    documents: Vec<Document>,
    indexes: Vec<IndexInfo>,
}

/// What an update touched: counts plus the first matched document before
/// and after the write.
struct UpdateOutcome {
    result: UpdateResult,
    before: Option<Document>,
    after: Option<Document>,
}

impl CollectionState {
    fn new(options: Document) -> Self {
        let mut keys = Document::new();
        keys.insert("_id".to_string(), Value::Int(1));
        Self {
            options,
            documents: Vec::new(),
            indexes: vec![IndexInfo {
                name: ID_INDEX_NAME.to_string(),
                keys,
                unique: true,
                options: Document::new(),
            }],
        }
    }

    fn index_key(index: &IndexInfo, doc: &Document) -> Vec<Value> {
        index
            .keys
            .keys()
            .map(|field| {
                resolve_field(doc, field)
                    .first()
                    .map(|v| (*v).clone())
                    .unwrap_or(Value::Null)
            })
            .collect()
    }

    /// Reject `candidate` if it collides with another document on a unique index.
    fn check_unique(&self, ns: &Namespace, candidate: &Document, ignore: Option<usize>) -> Result<(), StoreError> {
        for index in self.indexes.iter().filter(|i| i.unique) {
            let key = Self::index_key(index, candidate);
            let collides = self.documents.iter().enumerate().any(|(i, other)| {
                Some(i) != ignore
                    && Self::index_key(index, other)
                        .iter()
                        .zip(key.iter())
                        .all(|(a, b)| values_equal(a, b))
            });
            if collides {
                let rendered = index
                    .keys
                    .keys()
                    .zip(key.iter())
                    .map(|(field, value)| format!("{field}: {}", value.to_json()))
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(StoreError::DuplicateKey {
                    namespace: ns.to_string(),
                    index: index.name.clone(),
                    key: format!("{{ {rendered} }}"),
                });
            }
        }
        Ok(())
    }

    fn matching(&self, filter: &Document, first_only: bool) -> Result<Vec<usize>, StoreError> {
        let mut positions = Vec::new();
        for (i, doc) in self.documents.iter().enumerate() {
            if matches(doc, filter)? {
                positions.push(i);
                if first_only {
                    break;
                }
            }
        }
        Ok(positions)
    }

    fn find(&self, filter: &Document, options: &FindOptions) -> Result<Vec<Document>, StoreError> {
        let mut docs = Vec::new();
        for doc in &self.documents {
            if matches(doc, filter)? {
                docs.push(doc.clone());
            }
        }
        if let Some(sort) = &options.sort {
            sort_documents(&mut docs, sort)?;
        }
        let skip = options.skip.unwrap_or(0) as usize;
        let limit = match options.limit {
            Some(n) if n > 0 => n as usize,
            _ => usize::MAX,
        };
        let docs = docs.into_iter().skip(skip).take(limit);
        match &options.projection {
            Some(projection) => docs.map(|doc| apply_projection(&doc, projection)).collect(),
            None => Ok(docs.collect()),
        }
    }

    fn insert(&mut self, ns: &Namespace, mut doc: Document) -> Result<Document, StoreError> {
        if !doc.contains_key("_id") {
            doc.insert("_id".to_string(), Value::ObjectId(ObjectId::new()));
        }
        self.check_unique(ns, &doc, None)?;
        self.documents.push(doc.clone());
        Ok(doc)
    }

    fn update(
        &mut self,
        ns: &Namespace,
        filter: &Document,
        update: &Document,
        options: UpdateOptions,
    ) -> Result<UpdateOutcome, StoreError> {
        let positions = self.matching(filter, !options.multi)?;
        let mut outcome = UpdateOutcome {
            result: UpdateResult {
                acknowledged: true,
                ..Default::default()
            },
            before: None,
            after: None,
        };

        if positions.is_empty() {
            if options.upsert {
                let mut doc = upsert_seed(filter)?;
                apply_update(&mut doc, update, true)?;
                let doc = self.insert(ns, doc)?;
                outcome.result.upserted_count = 1;
                outcome.result.upserted_id = doc.get("_id").cloned();
                outcome.after = Some(doc);
            }
            return Ok(outcome);
        }

        for pos in positions {
            let mut doc = self.documents[pos].clone();
            let changed = apply_update(&mut doc, update, false)?;
            outcome.result.matched_count += 1;
            if outcome.before.is_none() {
                outcome.before = Some(self.documents[pos].clone());
                outcome.after = Some(doc.clone());
            }
            if changed {
                self.check_unique(ns, &doc, Some(pos))?;
                self.documents[pos] = doc;
                outcome.result.modified_count += 1;
            }
        }
        Ok(outcome)
    }

    fn replace_one(
        &mut self,
        ns: &Namespace,
        filter: &Document,
        replacement: &Document,
        upsert: bool,
    ) -> Result<UpdateResult, StoreError> {
        if is_operator_document(replacement) {
            return Err(StoreError::invalid("replacement document must not contain update operators"));
        }
        let mut result = UpdateResult {
            acknowledged: true,
            ..Default::default()
        };
        let mut doc = replacement.clone();

        match self.matching(filter, true)?.first().copied() {
            Some(pos) => {
                let existing_id = self.documents[pos].get("_id").cloned().unwrap_or_default();
                if doc.get("_id").is_some_and(|id| !values_equal(id, &existing_id)) {
                    return Err(StoreError::invalid(
                        "the _id field cannot be changed by a replacement",
                    ));
                }
                doc.insert("_id".to_string(), existing_id);
                result.matched_count = 1;
                if doc != self.documents[pos] {
                    self.check_unique(ns, &doc, Some(pos))?;
                    self.documents[pos] = doc;
                    result.modified_count = 1;
                }
            }
            None if upsert => {
                if !doc.contains_key("_id") {
                    if let Some(id) = upsert_seed(filter)?.shift_remove("_id") {
                        doc.insert("_id".to_string(), id);
                    }
                }
                let doc = self.insert(ns, doc)?;
                result.upserted_count = 1;
                result.upserted_id = doc.get("_id").cloned();
            }
            None => {}
        }
        Ok(result)
    }

    fn delete(&mut self, filter: &Document, many: bool) -> Result<u64, StoreError> {
        let positions = self.matching(filter, !many)?;
        for pos in positions.iter().rev() {
            self.documents.remove(*pos);
        }
        Ok(positions.len() as u64)
    }

    fn create_index(&mut self, ns: &Namespace, keys: Document, mut options: Document) -> Result<String, StoreError> {
        if keys.is_empty() {
            return Err(StoreError::invalid("index keys must not be empty"));
        }
        let name = match options.shift_remove("name") {
            Some(Value::String(name)) => name,
            Some(_) => return Err(StoreError::invalid("index name must be a string")),
            None => default_index_name(&keys),
        };
        let unique = options.shift_remove("unique").is_some_and(|v| v.is_truthy());

        if let Some(existing) = self.indexes.iter().find(|i| i.name == name) {
            if existing.keys == keys && existing.unique == unique {
                return Ok(name);
            }
            return Err(StoreError::IndexConflict(format!(
                "an existing index has the same name as the requested index: {name}"
            )));
        }

        self.indexes.push(IndexInfo {
            name: name.clone(),
            keys,
            unique,
            options,
        });
        if unique {
            for (i, doc) in self.documents.iter().enumerate() {
                if let Err(err) = self.check_unique(ns, doc, Some(i)) {
                    self.indexes.pop();
                    return Err(err);
                }
            }
        }
        Ok(name)
    }
}

/// Contents of one database.
#[derive(Debug, Clone, Default)]
pub struct DatabaseState {
    collections: BTreeMap<String, CollectionState>,
}

impl DatabaseState {
    /// Run `f` against a copy of the collection (created on demand) and
    /// keep the copy only if `f` succeeds.
    fn write<T>(
        &mut self,
        collection: &str,
        f: impl FnOnce(&mut CollectionState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut working = self
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_else(|| CollectionState::new(Document::new()));
        let out = f(&mut working)?;
        self.collections.insert(collection.to_string(), working);
        Ok(out)
    }

    fn find(&self, ns: &Namespace, filter: &Document, options: &FindOptions) -> Result<Vec<Document>, StoreError> {
        match self.collections.get(&ns.collection) {
            Some(state) => state.find(filter, options),
            None => Ok(Vec::new()),
        }
    }

    fn update(
        &mut self,
        ns: &Namespace,
        filter: &Document,
        update: &Document,
        options: UpdateOptions,
    ) -> Result<UpdateOutcome, StoreError> {
        self.write(&ns.collection, |c| c.update(ns, filter, update, options))
    }

    fn insert(&mut self, ns: &Namespace, doc: Document) -> Result<Document, StoreError> {
        self.write(&ns.collection, |c| c.insert(ns, doc))
    }

    fn delete(&mut self, ns: &Namespace, filter: &Document, many: bool) -> Result<DeleteResult, StoreError> {
        if !self.collections.contains_key(&ns.collection) {
            // Still validate the filter.
            matches(&Document::new(), filter)?;
            return Ok(DeleteResult {
                acknowledged: true,
                deleted_count: 0,
            });
        }
        let deleted_count = self.write(&ns.collection, |c| c.delete(filter, many))?;
        Ok(DeleteResult {
            acknowledged: true,
            deleted_count,
        })
    }

    fn bulk_write(&mut self, ns: &Namespace, operations: Vec<WriteModel>) -> Result<BulkWriteResult, StoreError> {
        let mut result = BulkWriteResult::default();
        for (index, operation) in operations.into_iter().enumerate() {
            if let Err(err) = self.apply_write(ns, index, operation, &mut result) {
                return Err(StoreError::BulkWrite {
                    index,
                    message: err.to_string(),
                    partial: Box::new(result),
                });
            }
        }
        Ok(result)
    }

    fn apply_write(
        &mut self,
        ns: &Namespace,
        index: usize,
        operation: WriteModel,
        result: &mut BulkWriteResult,
    ) -> Result<(), StoreError> {
        let record = |result: &mut BulkWriteResult, update: UpdateResult| {
            result.matched_count += update.matched_count;
            result.modified_count += update.modified_count;
            result.upserted_count += update.upserted_count;
            if let Some(id) = update.upserted_id {
                result.upserted_ids.insert(index, id);
            }
        };
        match operation {
            WriteModel::InsertOne { document } => {
                let doc = self.insert(ns, document)?;
                result.inserted_count += 1;
                if let Some(id) = doc.get("_id") {
                    result.inserted_ids.insert(index, id.clone());
                }
            }
            WriteModel::UpdateOne { filter, update, upsert } => {
                let options = UpdateOptions { upsert, multi: false };
                record(result, self.update(ns, &filter, &update, options)?.result);
            }
            WriteModel::UpdateMany { filter, update, upsert } => {
                let options = UpdateOptions { upsert, multi: true };
                record(result, self.update(ns, &filter, &update, options)?.result);
            }
            WriteModel::ReplaceOne {
                filter,
                replacement,
                upsert,
            } => {
                let outcome = self.write(&ns.collection, |c| c.replace_one(ns, &filter, &replacement, upsert))?;
                record(result, outcome);
            }
            WriteModel::DeleteOne { filter } => {
                result.deleted_count += self.delete(ns, &filter, false)?.deleted_count;
            }
            WriteModel::DeleteMany { filter } => {
                result.deleted_count += self.delete(ns, &filter, true)?.deleted_count;
            }
        }
        Ok(())
    }

    fn aggregate(&self, ns: &Namespace, pipeline: &[Value]) -> Result<Vec<Document>, StoreError> {
        let docs = self
            .collections
            .get(&ns.collection)
            .map(|c| c.documents.clone())
            .unwrap_or_default();
        run_pipeline(docs, pipeline)
    }

    fn find_one_and_update(
        &mut self,
        ns: &Namespace,
        filter: &Document,
        update: &Document,
        upsert: bool,
        return_document: ReturnDocument,
    ) -> Result<Option<Document>, StoreError> {
        let outcome = self.update(ns, filter, update, UpdateOptions { upsert, multi: false })?;
        Ok(match return_document {
            ReturnDocument::Before => outcome.before,
            ReturnDocument::After => outcome.after,
        })
    }
}

/// In-process implementation of [`DocumentDriver`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryDriver {
    databases: Arc<RwLock<BTreeMap<String, Arc<Mutex<DatabaseState>>>>>,
}

impl InMemoryDriver {
    /// Create a driver with no databases.
    pub fn new() -> Self {
        Self::default()
    }

    async fn database(&self, db: &str) -> Arc<Mutex<DatabaseState>> {
        if let Some(state) = self.databases.read().await.get(db) {
            return Arc::clone(state);
        }
        let mut databases = self.databases.write().await;
        Arc::clone(databases.entry(db.to_string()).or_default())
    }
}

#[async_trait]
impl StoreOps for InMemoryDriver {
    async fn find(&self, ns: &Namespace, filter: Document, options: FindOptions) -> Result<Vec<Document>, StoreError> {
        let db = self.database(&ns.db).await;
        let state = db.lock().await;
        state.find(ns, &filter, &options)
    }

    async fn update(
        &self,
        ns: &Namespace,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> Result<UpdateResult, StoreError> {
        let db = self.database(&ns.db).await;
        let mut state = db.lock().await;
        Ok(state.update(ns, &filter, &update, options)?.result)
    }

    async fn find_one_and_update(
        &self,
        ns: &Namespace,
        filter: Document,
        update: Document,
        upsert: bool,
        return_document: ReturnDocument,
    ) -> Result<Option<Document>, StoreError> {
        let db = self.database(&ns.db).await;
        let mut state = db.lock().await;
        state.find_one_and_update(ns, &filter, &update, upsert, return_document)
    }

    async fn insert_one(&self, ns: &Namespace, document: Document) -> Result<Document, StoreError> {
        let db = self.database(&ns.db).await;
        let mut state = db.lock().await;
        state.insert(ns, document)
    }

    async fn delete(&self, ns: &Namespace, filter: Document, many: bool) -> Result<DeleteResult, StoreError> {
        let db = self.database(&ns.db).await;
        let mut state = db.lock().await;
        state.delete(ns, &filter, many)
    }

    async fn bulk_write(&self, ns: &Namespace, operations: Vec<WriteModel>) -> Result<BulkWriteResult, StoreError> {
        let db = self.database(&ns.db).await;
        let mut state = db.lock().await;
        state.bulk_write(ns, operations)
    }

    async fn aggregate(&self, ns: &Namespace, pipeline: Vec<Value>) -> Result<Vec<Document>, StoreError> {
        let db = self.database(&ns.db).await;
        let state = db.lock().await;
        state.aggregate(ns, &pipeline)
    }
}

#[async_trait]
impl DocumentDriver for InMemoryDriver {
    fn name(&self) -> &str {
        "memory"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn create_collection(&self, db: &str, collection: &str, options: Document) -> Result<(), StoreError> {
        let database = self.database(db).await;
        let mut state = database.lock().await;
        if state.collections.contains_key(collection) {
            return Err(StoreError::CollectionExists(Namespace::new(db, collection).to_string()));
        }
        state
            .collections
            .insert(collection.to_string(), CollectionState::new(options));
        Ok(())
    }

    async fn drop_collection(&self, db: &str, collection: &str) -> Result<bool, StoreError> {
        let database = self.database(db).await;
        let mut state = database.lock().await;
        Ok(state.collections.remove(collection).is_some())
    }

    async fn list_collections(&self, db: &str) -> Result<Vec<CollectionInfo>, StoreError> {
        let database = self.database(db).await;
        let state = database.lock().await;
        Ok(state
            .collections
            .iter()
            .map(|(name, c)| CollectionInfo {
                name: name.clone(),
                options: c.options.clone(),
            })
            .collect())
    }

    async fn create_index(&self, ns: &Namespace, keys: Document, options: Document) -> Result<String, StoreError> {
        let database = self.database(&ns.db).await;
        let mut state = database.lock().await;
        state.write(&ns.collection, |c| c.create_index(ns, keys, options))
    }

    async fn drop_index(&self, ns: &Namespace, name: &str) -> Result<bool, StoreError> {
        if name == ID_INDEX_NAME {
            return Err(StoreError::invalid("cannot drop _id index"));
        }
        let database = self.database(&ns.db).await;
        let mut state = database.lock().await;
        let Some(collection) = state.collections.get_mut(&ns.collection) else {
            return Ok(false);
        };
        let before = collection.indexes.len();
        collection.indexes.retain(|i| i.name != name);
        Ok(collection.indexes.len() != before)
    }

    async fn list_indexes(&self, ns: &Namespace) -> Result<Vec<IndexInfo>, StoreError> {
        let database = self.database(&ns.db).await;
        let state = database.lock().await;
        Ok(state
            .collections
            .get(&ns.collection)
            .map(|c| c.indexes.clone())
            .unwrap_or_default())
    }

    async fn start_session(&self, db: &str) -> Result<Box<dyn DriverSession>, StoreError> {
        let database = self.database(db).await;
        let guard = database.lock_owned().await;
        let working = guard.clone();
        debug!(db, "session started");
        Ok(Box::new(InMemorySession {
            db: db.to_string(),
            guard,
            working: StdMutex::new(working),
        }))
    }

    fn as_ops(&self) -> &dyn StoreOps {
        self
    }
}

/// Exclusive session over one in-memory database.
pub struct InMemorySession {
    db: String,
    guard: OwnedMutexGuard<DatabaseState>,
    working: StdMutex<DatabaseState>,
}

impl InMemorySession {
    fn state(&self, ns: &Namespace) -> Result<StdMutexGuard<'_, DatabaseState>, StoreError> {
        if ns.db != self.db {
            return Err(StoreError::Session(format!(
                "session is bound to database '{}' but the operation targets '{}'",
                self.db, ns.db
            )));
        }
        self.working
            .lock()
            .map_err(|_| StoreError::Session("session state is poisoned".to_string()))
    }
}

#[async_trait]
impl StoreOps for InMemorySession {
    async fn find(&self, ns: &Namespace, filter: Document, options: FindOptions) -> Result<Vec<Document>, StoreError> {
        self.state(ns)?.find(ns, &filter, &options)
    }

    async fn update(
        &self,
        ns: &Namespace,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> Result<UpdateResult, StoreError> {
        Ok(self.state(ns)?.update(ns, &filter, &update, options)?.result)
    }

    async fn find_one_and_update(
        &self,
        ns: &Namespace,
        filter: Document,
        update: Document,
        upsert: bool,
        return_document: ReturnDocument,
    ) -> Result<Option<Document>, StoreError> {
        self.state(ns)?
            .find_one_and_update(ns, &filter, &update, upsert, return_document)
    }

    async fn insert_one(&self, ns: &Namespace, document: Document) -> Result<Document, StoreError> {
        self.state(ns)?.insert(ns, document)
    }

    async fn delete(&self, ns: &Namespace, filter: Document, many: bool) -> Result<DeleteResult, StoreError> {
        self.state(ns)?.delete(ns, &filter, many)
    }

    async fn bulk_write(&self, ns: &Namespace, operations: Vec<WriteModel>) -> Result<BulkWriteResult, StoreError> {
        self.state(ns)?.bulk_write(ns, operations)
    }

    async fn aggregate(&self, ns: &Namespace, pipeline: Vec<Value>) -> Result<Vec<Document>, StoreError> {
        self.state(ns)?.aggregate(ns, &pipeline)
    }
}

#[async_trait]
impl DriverSession for InMemorySession {
    fn database(&self) -> &str {
        &self.db
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let InMemorySession { db, mut guard, working } = *self;
        *guard = working
            .into_inner()
            .map_err(|_| StoreError::Session("session state is poisoned".to_string()))?;
        debug!(db = %db, "session committed");
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<(), StoreError> {
        debug!(db = %self.db, "session aborted");
        Ok(())
    }

    fn as_ops(&self) -> &dyn StoreOps {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::document_from_json;
    use serde_json::json;

    fn doc(json: serde_json::Value) -> Document {
        document_from_json(json).unwrap()
    }

    fn ns() -> Namespace {
        Namespace::new("app", "users")
    }

    #[tokio::test]
    async fn test_insert_assigns_id_and_find_sorts() {
        let driver = InMemoryDriver::new();
        for n in [3, 1, 2] {
            let stored = driver.insert_one(&ns(), doc(json!({"n": n}))).await.unwrap();
            assert!(matches!(stored.get("_id"), Some(Value::ObjectId(_))));
        }
        let options = FindOptions {
            sort: Some(doc(json!({"n": 1}))),
            skip: Some(1),
            limit: Some(1),
            projection: Some(doc(json!({"_id": 0}))),
        };
        let found = driver.find(&ns(), Document::new(), options).await.unwrap();
        assert_eq!(found, vec![doc(json!({"n": 2}))]);
    }

    #[tokio::test]
    async fn test_unique_index_is_enforced() {
        let driver = InMemoryDriver::new();
        let name = driver
            .create_index(&ns(), doc(json!({"email": 1})), doc(json!({"unique": true})))
            .await
            .unwrap();
        assert_eq!(name, "email_1");

        driver.insert_one(&ns(), doc(json!({"email": "a@b.c"}))).await.unwrap();
        let err = driver
            .insert_one(&ns(), doc(json!({"email": "a@b.c"})))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { ref index, .. } if index == "email_1"));
    }

    #[tokio::test]
    async fn test_upsert_inserts_from_filter_seed() {
        let driver = InMemoryDriver::new();
        let result = driver
            .update(
                &ns(),
                doc(json!({"key": "k"})),
                doc(json!({"$set": {"v": 1}})),
                UpdateOptions { upsert: true, multi: false },
            )
            .await
            .unwrap();
        assert_eq!(result.upserted_count, 1);
        let stored = driver
            .find_one(&ns(), doc(json!({"key": "k"})), FindOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.get("v"), Some(&Value::Int(1)));
        assert_eq!(stored.get("_id"), result.upserted_id.as_ref());
    }

    #[tokio::test]
    async fn test_bulk_write_stops_at_first_failure() {
        let driver = InMemoryDriver::new();
        driver
            .create_index(&ns(), doc(json!({"email": 1})), doc(json!({"unique": true})))
            .await
            .unwrap();
        let operations = vec![
            WriteModel::InsertOne { document: doc(json!({"email": "a"})) },
            WriteModel::InsertOne { document: doc(json!({"email": "a"})) },
            WriteModel::InsertOne { document: doc(json!({"email": "b"})) },
        ];
        let err = driver.bulk_write(&ns(), operations).await.unwrap_err();
        match err {
            StoreError::BulkWrite { index, partial, .. } => {
                assert_eq!(index, 1);
                assert_eq!(partial.inserted_count, 1);
            }
            other => panic!("unexpected error {other}"),
        }
        let all = driver.find(&ns(), Document::new(), FindOptions::default()).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_session_commit_publishes_and_abort_discards() {
        let driver = InMemoryDriver::new();

        let session = driver.start_session("app").await.unwrap();
        session.insert_one(&ns(), doc(json!({"n": 1}))).await.unwrap();
        session.abort().await.unwrap();
        assert!(driver.find(&ns(), Document::new(), FindOptions::default()).await.unwrap().is_empty());

        let session = driver.start_session("app").await.unwrap();
        session.insert_one(&ns(), doc(json!({"n": 2}))).await.unwrap();
        session.commit().await.unwrap();
        assert_eq!(driver.find(&ns(), Document::new(), FindOptions::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_session_discards_writes() {
        let driver = InMemoryDriver::new();
        {
            let session = driver.start_session("app").await.unwrap();
            session.insert_one(&ns(), doc(json!({"n": 1}))).await.unwrap();
        }
        assert!(driver.find(&ns(), Document::new(), FindOptions::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_session_rejects_other_database() {
        let driver = InMemoryDriver::new();
        let session = driver.start_session("app").await.unwrap();
        let err = session
            .insert_one(&Namespace::new("other", "c"), Document::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Session(_)));
    }

    #[tokio::test]
    async fn test_collection_and_index_metadata() {
        let driver = InMemoryDriver::new();
        driver
            .create_collection("app", "logs", doc(json!({"capped": true})))
            .await
            .unwrap();
        assert!(matches!(
            driver.create_collection("app", "logs", Document::new()).await,
            Err(StoreError::CollectionExists(_))
        ));
        let logs = Namespace::new("app", "logs");
        driver.create_index(&logs, doc(json!({"at": -1})), Document::new()).await.unwrap();

        let indexes = driver.list_indexes(&logs).await.unwrap();
        let names: Vec<_> = indexes.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["_id_", "at_-1"]);

        assert!(driver.drop_index(&logs, "at_-1").await.unwrap());
        assert!(!driver.drop_index(&logs, "at_-1").await.unwrap());
        assert!(driver.drop_index(&logs, "_id_").await.is_err());

        let collections = driver.list_collections("app").await.unwrap();
        assert_eq!(collections.len(), 1);
        assert_eq!(
            Value::Document(collections[0].options.clone()).to_json(),
            json!({"capped": true})
        );
        assert!(driver.drop_collection("app", "logs").await.unwrap());
    }
}
