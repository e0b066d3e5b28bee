// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Action dispatcher.
//
// Maps an action name plus a payload document onto one store or migration
// call. Payload validation happens before any I/O. Every outcome, including
// validation failures and unknown actions, comes back as an `Envelope`.

use std::fmt;
use std::str::FromStr;

use docrelay_migrate::{Direction, MigrationManager};
use docrelay_store::{Document, DocumentStore, Value};
use serde::Serialize;
use tracing::{debug, error, info, instrument};

use crate::error::{DispatchError, ErrorKind, MISSING_DB_AND_COLLECTION};

/// Every action the broker understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Get,
    GetAll,
    GetById,
    Set,
    SetNew,
    Upsert,
    Del,
    DelById,
    Aggregate,
    Bulk,
    Transaction,
    CreateIndex,
    AddMigration,
    GetMigrations,
    RunMigration,
    CreateSnapshot,
}

impl Action {
    pub const ALL: [Action; 16] = [
        Action::Get,
        Action::GetAll,
        Action::GetById,
        Action::Set,
        Action::SetNew,
        Action::Upsert,
        Action::Del,
        Action::DelById,
        Action::Aggregate,
        Action::Bulk,
        Action::Transaction,
        Action::CreateIndex,
        Action::AddMigration,
        Action::GetMigrations,
        Action::RunMigration,
        Action::CreateSnapshot,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Get => "get",
            Action::GetAll => "getAll",
            Action::GetById => "getById",
            Action::Set => "set",
            Action::SetNew => "setNew",
            Action::Upsert => "upsert",
            Action::Del => "del",
            Action::DelById => "delById",
            Action::Aggregate => "aggregate",
            Action::Bulk => "bulk",
            Action::Transaction => "transaction",
            Action::CreateIndex => "createIndex",
            Action::AddMigration => "addMigration",
            Action::GetMigrations => "getMigrations",
            Action::RunMigration => "runMigration",
            Action::CreateSnapshot => "createSnapshot",
        }
    }

    /// Whether the payload must name a collection.
    pub fn requires_collection(&self) -> bool {
        !matches!(
            self,
            Action::Transaction
                | Action::AddMigration
                | Action::GetMigrations
                | Action::RunMigration
                | Action::CreateSnapshot
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| DispatchError::UnsupportedAction(s.to_string()))
    }
}

/// Uniform outcome of a dispatch: `{success: true, data}` or
/// `{success: false, error}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub kind: Option<ErrorKind>,
}

impl Envelope {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            kind: None,
        }
    }

    pub fn failure(err: &DispatchError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(err.to_string()),
            kind: Some(err.kind()),
        }
    }
}

impl From<Result<serde_json::Value, DispatchError>> for Envelope {
    fn from(outcome: Result<serde_json::Value, DispatchError>) -> Self {
        match outcome {
            Ok(data) => Envelope::ok(data),
            Err(err) => Envelope::failure(&err),
        }
    }
}

/// Typed accessors over a request payload.
struct Payload<'a> {
    action: Action,
    fields: &'a Document,
}

impl<'a> Payload<'a> {
    /// A non-empty string field.
    fn text(&self, key: &str) -> Option<&'a str> {
        self.fields.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
    }

    fn db(&self) -> Result<&'a str, DispatchError> {
        self.text("dbName").ok_or_else(|| {
            let message = match self.action {
                Action::Transaction => "Request payload must include 'dbName' property for transactions.",
                _ if self.action.requires_collection() => MISSING_DB_AND_COLLECTION,
                _ => "Request payload must include 'dbName' property.",
            };
            DispatchError::validation(message)
        })
    }

    fn namespace(&self) -> Result<(&'a str, &'a str), DispatchError> {
        match (self.db(), self.text("collection")) {
            (Ok(db), Some(collection)) => Ok((db, collection)),
            _ => Err(DispatchError::validation(MISSING_DB_AND_COLLECTION)),
        }
    }

    /// An object field; absent or null reads as empty.
    fn document(&self, key: &str) -> Result<Document, DispatchError> {
        match self.fields.get(key) {
            None | Some(Value::Null) => Ok(Document::new()),
            Some(Value::Document(doc)) => Ok(doc.clone()),
            Some(_) => Err(DispatchError::validation(format!("'{key}' must be an object."))),
        }
    }

    /// An array field; absent or null reads as empty.
    fn list(&self, key: &str) -> Result<Vec<Value>, DispatchError> {
        match self.fields.get(key) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(items.clone()),
            Some(_) => Err(DispatchError::validation(format!("'{key}' must be an array."))),
        }
    }

    /// The `id` field as an `_id` filter.
    fn id_filter(&self) -> Result<Document, DispatchError> {
        let id = match self.fields.get("id") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.is_empty() => None,
            Some(id) => Some(id.clone()),
        }
        .ok_or_else(|| {
            DispatchError::validation(format!("'id' property is missing in the payload for {}.", self.action))
        })?;
        let mut filter = Document::new();
        filter.insert("_id".into(), id);
        Ok(filter)
    }
}

fn optional_document(doc: Option<Document>) -> serde_json::Value {
    doc.map(|d| Value::Document(d).to_json()).unwrap_or(serde_json::Value::Null)
}

/// Routes actions to the store adapter and the migration manager.
#[derive(Debug)]
pub struct Dispatcher {
    store: DocumentStore,
    migrations: MigrationManager,
}

impl Dispatcher {
    pub fn new(store: DocumentStore) -> Self {
        let migrations = MigrationManager::new(store.clone());
        Self { store, migrations }
    }

    /// Use a preconfigured migration manager (custom id factory).
    pub fn with_migrations(store: DocumentStore, migrations: MigrationManager) -> Self {
        Self { store, migrations }
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    /// Run `action` against `payload`, capturing every failure in the envelope.
    #[instrument(skip(self, payload))]
    pub async fn dispatch(&self, action: &str, payload: Document) -> Envelope {
        let outcome = match action.parse::<Action>() {
            Ok(action) => self.execute(action, &payload).await,
            Err(err) => Err(err),
        };
        match &outcome {
            Ok(_) => info!(action, "action completed"),
            Err(err) => error!(action, kind = ?err.kind(), error = %err, "action failed"),
        }
        Envelope::from(outcome)
    }

    /// Run a resolved action, returning its wire-form data.
    pub async fn execute(&self, action: Action, fields: &Document) -> Result<serde_json::Value, DispatchError> {
        let payload = Payload { action, fields };
        debug!(%action, "executing action");
        let store = &self.store;

        let data = match action {
            Action::Get => {
                let (db, collection) = payload.namespace()?;
                let found = store
                    .get(db, collection, payload.document("query")?, payload.document("options")?)
                    .await?;
                optional_document(found)
            }
            Action::GetAll => {
                let (db, collection) = payload.namespace()?;
                store
                    .get_all(db, collection, payload.document("query")?, payload.document("options")?)
                    .await?
                    .into_value()
                    .to_json()
            }
            Action::GetById => {
                let (db, collection) = payload.namespace()?;
                let filter = payload.id_filter()?;
                optional_document(store.get(db, collection, filter, payload.document("options")?).await?)
            }
            Action::Set => {
                let (db, collection) = payload.namespace()?;
                store
                    .set(
                        db,
                        collection,
                        payload.document("query")?,
                        payload.document("data")?,
                        payload.document("options")?,
                    )
                    .await?
                    .into_value()
                    .to_json()
            }
            Action::Upsert => {
                let (db, collection) = payload.namespace()?;
                let mut options = payload.document("options")?;
                options.insert("upsert".into(), Value::Bool(true));
                options.insert("returnDocument".into(), "after".into());
                store
                    .set(db, collection, payload.document("query")?, payload.document("data")?, options)
                    .await?
                    .into_value()
                    .to_json()
            }
            Action::SetNew => {
                let (db, collection) = payload.namespace()?;
                let inserted = store.set_new(db, collection, payload.document("data")?).await?;
                Value::Document(inserted).to_json()
            }
            Action::Del => {
                let (db, collection) = payload.namespace()?;
                store.del(db, collection, payload.document("query")?).await?.to_value().to_json()
            }
            Action::DelById => {
                let (db, collection) = payload.namespace()?;
                let filter = payload.id_filter()?;
                store.del(db, collection, filter).await?.to_value().to_json()
            }
            Action::Aggregate => {
                let (db, collection) = payload.namespace()?;
                let docs = store.aggregate(db, collection, payload.list("stages")?).await?;
                serde_json::Value::Array(docs.into_iter().map(|d| Value::Document(d).to_json()).collect())
            }
            Action::Bulk => {
                let (db, collection) = payload.namespace()?;
                store.bulk(db, collection, payload.list("operations")?).await?.to_value().to_json()
            }
            Action::Transaction => {
                let db = payload.db()?;
                let operations = match fields.get("operations") {
                    Some(Value::Array(items)) if !items.is_empty() => items,
                    _ => {
                        return Err(DispatchError::validation(
                            "The \"operations\" parameter must be a non-empty array.",
                        ))
                    }
                };
                let results = store.transaction(db, operations).await?;
                Value::Array(results).to_json()
            }
            Action::CreateIndex => {
                let (db, collection) = payload.namespace()?;
                let keys = payload.document("indexSpec")?;
                if keys.is_empty() {
                    return Err(DispatchError::validation(
                        "'indexSpec' property is missing in the payload for createIndex.",
                    ));
                }
                let name = store
                    .create_index(db, collection, keys, payload.document("options")?)
                    .await?;
                serde_json::Value::String(name)
            }
            Action::AddMigration => {
                let db = payload.db()?;
                let (Some(name), Some(up), Some(down)) = (
                    payload.text("name"),
                    fields.get("upScript"),
                    fields.get("downScript"),
                ) else {
                    return Err(DispatchError::validation(
                        "Request payload must include 'name', 'upScript' and 'downScript' properties.",
                    ));
                };
                let record = self.migrations.add_migration(db, name, up.clone(), down.clone()).await?;
                record.to_value().to_json()
            }
            Action::GetMigrations => {
                let db = payload.db()?;
                let records = self.migrations.get_migrations(db).await?;
                serde_json::Value::Array(records.iter().map(|r| r.to_value().to_json()).collect())
            }
            Action::RunMigration => {
                let db = payload.db()?;
                let name = payload.text("name").ok_or_else(|| {
                    DispatchError::validation("Request payload must include 'name' and 'direction' properties.")
                })?;
                let direction = payload
                    .text("direction")
                    .ok_or_else(|| {
                        DispatchError::validation("Request payload must include 'name' and 'direction' properties.")
                    })?
                    .parse::<Direction>()
                    .map_err(DispatchError::Validation)?;
                let record = self.migrations.run_migration(db, name, direction).await?;
                record.to_value().to_json()
            }
            Action::CreateSnapshot => {
                let db = payload.db()?;
                let name = payload.text("snapshotName").map(str::to_string);
                let record = self.migrations.create_snapshot(db, name).await?;
                record.to_value().to_json()
            }
        };
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_names_round_trip() {
        for action in Action::ALL {
            assert_eq!(action.as_str().parse::<Action>().unwrap(), action);
        }
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let err = "dropDatabase".parse::<Action>().unwrap_err();
        assert_eq!(err.to_string(), "Action 'dropDatabase' not found or is not valid.");
        assert!("GET".parse::<Action>().is_err());
    }

    #[test]
    fn test_collection_requirement() {
        assert!(Action::Get.requires_collection());
        assert!(Action::CreateIndex.requires_collection());
        assert!(!Action::Transaction.requires_collection());
        assert!(!Action::CreateSnapshot.requires_collection());
    }

    #[test]
    fn test_envelope_wire_shape() {
        let ok = serde_json::to_value(Envelope::ok(serde_json::json!({"x": 1}))).unwrap();
        assert_eq!(ok, serde_json::json!({"success": true, "data": {"x": 1}}));

        let err = DispatchError::validation("nope");
        let failed = serde_json::to_value(Envelope::failure(&err)).unwrap();
        assert_eq!(failed, serde_json::json!({"success": false, "error": "nope"}));
    }
}
