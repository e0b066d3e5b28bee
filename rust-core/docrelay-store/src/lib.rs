// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// DocRelay Document Store
//
// The data-access core of DocRelay: a recursive document value model, the
// driver interface a concrete document store implements, an in-memory
// driver, and the `DocumentStore` adapter with its transaction engine.
//
// # Modules
//
// - [`oid`] -- Native 12-byte identifiers and their hex form.
// - [`value`] -- The `Value`/`Document` model and its JSON mapping.
// - [`coerce`] -- Hex string to identifier coercion applied to all inputs.
// - [`filter`], [`update`], [`pipeline`] -- Query, update-operator and
//   aggregation evaluation used by the in-memory driver.
// - [`driver`] -- `StoreOps`, `DocumentDriver` and `DriverSession`.
// - [`memory`] -- `InMemoryDriver`, sessions over a locked working copy.
// - [`adapter`] -- `DocumentStore`, the entry point for callers.
// - [`transaction`] -- Ordered multi-step transactions with `$$prev.` placeholders.
// - [`error`] -- The `StoreError` enum.
//
// # Example
//
// ```rust
// use std::sync::Arc;
// use docrelay_store::{document_from_json, DocumentStore, InMemoryDriver, StoreConfig};
//
// # tokio_test::block_on(async {
// let store = DocumentStore::new(Arc::new(InMemoryDriver::new()), StoreConfig::default());
// let data = document_from_json(serde_json::json!({"name": "ada"})).unwrap();
// let stored = store.set_new("app", "users", data).await.unwrap();
// assert!(stored.contains_key("_id"));
// # });
// ```

pub mod adapter;
pub mod coerce;
pub mod driver;
pub mod error;
pub mod filter;
pub mod memory;
pub mod oid;
pub mod pipeline;
pub mod transaction;
pub mod update;
pub mod value;

pub use adapter::{DocumentStore, GetAllResult, Page, SetOutcome, StoreConfig};
pub use coerce::{coerce_document, coerce_identifiers};
pub use driver::{
    BulkWriteResult, CollectionInfo, DeleteResult, DocumentDriver, DriverSession, FindOptions, IndexInfo, Namespace,
    ReturnDocument, StoreOps, UpdateOptions, UpdateResult, WriteModel,
};
pub use error::StoreError;
pub use memory::InMemoryDriver;
pub use oid::{ObjectId, ObjectIdError};
pub use transaction::{resolve_placeholders, StepMethod, TransactionStep};
pub use value::{document_from_json, Document, Value};
