// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Declarative migration scripts.
//
// A script is a JSON array of statements tagged by `op`. Scripts are never
// evaluated as code: the interpreter below maps each statement onto one
// `DocumentStore` call, and the only capabilities it receives are the store
// handle and an identifier factory. The string `$$newId` anywhere inside a
// statement is replaced by a fresh identifier when the statement runs.

use docrelay_store::update::normalize_update;
use docrelay_store::{Document, DocumentStore, ObjectId, StoreError, Value};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::MigrationError;

/// Token replaced with a fresh identifier at execution time.
pub const NEW_ID_TOKEN: &str = "$$newId";

/// Source of fresh identifiers handed to scripts.
pub trait IdFactory: Send + Sync {
    fn new_id(&self) -> ObjectId;
}

/// Default factory backed by [`ObjectId::new`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectIdFactory;

impl IdFactory for ObjectIdFactory {
    fn new_id(&self) -> ObjectId {
        ObjectId::new()
    }
}

/// One step of a migration script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Statement {
    CreateCollection {
        collection: String,
        #[serde(default, skip_serializing_if = "Document::is_empty")]
        options: Document,
        #[serde(default)]
        ignore_if_exists: bool,
    },
    DropCollection {
        collection: String,
        #[serde(default)]
        ignore_if_missing: bool,
    },
    CreateIndex {
        collection: String,
        keys: Document,
        #[serde(default, skip_serializing_if = "Document::is_empty")]
        options: Document,
    },
    DropIndex {
        collection: String,
        name: String,
        #[serde(default)]
        ignore_if_missing: bool,
    },
    Insert {
        collection: String,
        documents: Vec<Document>,
    },
    Update {
        collection: String,
        filter: Document,
        update: Document,
        #[serde(default)]
        upsert: bool,
        #[serde(default)]
        multi: bool,
    },
    Delete {
        collection: String,
        filter: Document,
    },
}

/// A parsed script.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Script {
    pub statements: Vec<Statement>,
}

impl Script {
    /// Parse a stored script: a statement array, or a string holding one.
    ///
    /// `null`, an empty string and an empty array all yield `None`.
    pub fn parse(raw: &Value) -> Result<Option<Self>, MigrationError> {
        let json = match raw {
            Value::Null => return Ok(None),
            Value::String(text) if text.trim().is_empty() => return Ok(None),
            Value::String(text) => serde_json::from_str::<serde_json::Value>(text)
                .map_err(|e| MigrationError::InvalidScript(e.to_string()))?,
            Value::Array(_) => raw.to_json(),
            _ => {
                return Err(MigrationError::InvalidScript(
                    "a script must be an array of statements".to_string(),
                ))
            }
        };
        let statements: Vec<Statement> =
            serde_json::from_value(json).map_err(|e| MigrationError::InvalidScript(e.to_string()))?;
        if statements.is_empty() {
            return Ok(None);
        }
        Ok(Some(Self { statements }))
    }

    /// Stored form of the script.
    pub fn to_value(&self) -> Value {
        match serde_json::to_value(&self.statements) {
            Ok(json) => Value::from(json),
            Err(_) => Value::Array(Vec::new()),
        }
    }
}

/// Executes scripts against a store.
pub struct ScriptRunner<'a> {
    store: &'a DocumentStore,
    ids: &'a dyn IdFactory,
}

impl<'a> ScriptRunner<'a> {
    pub fn new(store: &'a DocumentStore, ids: &'a dyn IdFactory) -> Self {
        Self { store, ids }
    }

    /// Run every statement in order against `db`. Stops at the first failure.
    pub async fn run(&self, db: &str, script: &Script) -> Result<usize, MigrationError> {
        for (index, statement) in script.statements.iter().enumerate() {
            debug!(db, index, statement = ?statement, "running migration statement");
            self.execute(db, statement.clone()).await?;
        }
        Ok(script.statements.len())
    }

    fn with_ids(&self, doc: Document) -> Document {
        doc.into_iter()
            .map(|(key, value)| (key, self.substitute(value)))
            .collect()
    }

    fn substitute(&self, value: Value) -> Value {
        match value {
            Value::String(s) if s == NEW_ID_TOKEN => Value::ObjectId(self.ids.new_id()),
            Value::Array(items) => Value::Array(items.into_iter().map(|v| self.substitute(v)).collect()),
            Value::Document(doc) => Value::Document(self.with_ids(doc)),
            other => other,
        }
    }

    async fn execute(&self, db: &str, statement: Statement) -> Result<(), MigrationError> {
        let store = self.store;
        match statement {
            Statement::CreateCollection {
                collection,
                options,
                ignore_if_exists,
            } => match store.create_collection(db, &collection, options).await {
                Err(StoreError::CollectionExists(_)) if ignore_if_exists => {}
                other => other?,
            },
            Statement::DropCollection {
                collection,
                ignore_if_missing,
            } => {
                if !store.drop_collection(db, &collection).await? && !ignore_if_missing {
                    return Err(StoreError::invalid(format!("collection '{db}.{collection}' does not exist")).into());
                }
            }
            Statement::CreateIndex {
                collection,
                keys,
                options,
            } => {
                store.create_index(db, &collection, keys, options).await?;
            }
            Statement::DropIndex {
                collection,
                name,
                ignore_if_missing,
            } => {
                if !store.drop_index(db, &collection, &name).await? && !ignore_if_missing {
                    return Err(StoreError::invalid(format!("index '{name}' not found on '{db}.{collection}'")).into());
                }
            }
            Statement::Insert { collection, documents } => {
                for document in documents {
                    store.set_new(db, &collection, self.with_ids(document)).await?;
                }
            }
            Statement::Update {
                collection,
                filter,
                update,
                upsert,
                multi,
            } => {
                let kind = if multi { "updateMany" } else { "updateOne" };
                let mut body = Document::new();
                body.insert("filter".into(), Value::Document(self.with_ids(filter)));
                body.insert(
                    "update".into(),
                    Value::Document(normalize_update(self.with_ids(update))),
                );
                body.insert("upsert".into(), upsert.into());
                let mut operation = Document::new();
                operation.insert(kind.to_string(), Value::Document(body));
                store.bulk(db, &collection, vec![Value::Document(operation)]).await?;
            }
            Statement::Delete { collection, filter } => {
                store.del(db, &collection, self.with_ids(filter)).await?;
            }
        }
        Ok(())
    }
}
