// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Migration manager.
//
// Records live in the `_migrations` collection of the target database, one
// document per name (enforced by a unique index). Running a migration
// executes its script first and only then records the new status, so a
// failed script leaves the record exactly as it was. The status write is
// conditional on the status the run started from; a run that loses that race
// reports a state conflict instead of overwriting the winner.

use std::sync::Arc;

use chrono::Utc;
use docrelay_store::driver::ID_INDEX_NAME;
use docrelay_store::{Document, DocumentStore, GetAllResult, SetOutcome, StoreError, Value};
use tracing::{info, instrument, warn};

use crate::error::MigrationError;
use crate::record::{Direction, MigrationRecord};
use crate::script::{IdFactory, ObjectIdFactory, Script, ScriptRunner, Statement};

/// Collection holding migration records.
pub const MIGRATIONS_COLLECTION: &str = "_migrations";

const NAME_INDEX: &str = "name_unique";

/// Adds, lists, runs and snapshots migrations.
pub struct MigrationManager {
    store: DocumentStore,
    ids: Arc<dyn IdFactory>,
}

impl std::fmt::Debug for MigrationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationManager").field("store", &self.store).finish()
    }
}

fn name_filter(name: &str) -> Document {
    let mut filter = Document::new();
    filter.insert("name".into(), name.into());
    filter
}

impl MigrationManager {
    pub fn new(store: DocumentStore) -> Self {
        Self::with_id_factory(store, Arc::new(ObjectIdFactory))
    }

    /// Use a custom identifier source for `$$newId`.
    pub fn with_id_factory(store: DocumentStore, ids: Arc<dyn IdFactory>) -> Self {
        Self { store, ids }
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    async fn ensure_name_index(&self, db: &str) -> Result<(), MigrationError> {
        let mut keys = Document::new();
        keys.insert("name".into(), Value::Int(1));
        let mut options = Document::new();
        options.insert("name".into(), NAME_INDEX.into());
        options.insert("unique".into(), Value::Bool(true));
        self.store.create_index(db, MIGRATIONS_COLLECTION, keys, options).await?;
        Ok(())
    }

    async fn find(&self, db: &str, name: &str) -> Result<Option<MigrationRecord>, MigrationError> {
        self.store
            .get(db, MIGRATIONS_COLLECTION, name_filter(name), Document::new())
            .await?
            .map(|doc| MigrationRecord::from_document(&doc))
            .transpose()
    }

    /// Register a new `pending` migration.
    ///
    /// Both scripts are parsed up front so a malformed one is rejected
    /// before anything is stored. Either may be empty.
    #[instrument(skip(self, up, down))]
    pub async fn add_migration(&self, db: &str, name: &str, up: Value, down: Value) -> Result<MigrationRecord, MigrationError> {
        if name.trim().is_empty() {
            return Err(StoreError::invalid("migration name must not be empty").into());
        }
        Script::parse(&up)?;
        Script::parse(&down)?;

        self.ensure_name_index(db).await?;
        if self.find(db, name).await?.is_some() {
            return Err(MigrationError::DuplicateName(name.to_string()));
        }

        let record = MigrationRecord::new(name, up, down, Utc::now());
        match self.store.set_new(db, MIGRATIONS_COLLECTION, record.to_document()).await {
            Ok(_) => {}
            Err(StoreError::DuplicateKey { .. }) => return Err(MigrationError::DuplicateName(name.to_string())),
            Err(err) => return Err(err.into()),
        }
        info!(db, name, "migration added");
        Ok(record)
    }

    /// All migrations of `db`, oldest first.
    pub async fn get_migrations(&self, db: &str) -> Result<Vec<MigrationRecord>, MigrationError> {
        let mut sort = Document::new();
        sort.insert("createdAt".into(), Value::Int(1));
        sort.insert("name".into(), Value::Int(1));
        let mut options = Document::new();
        options.insert("sort".into(), Value::Document(sort));

        let docs = match self
            .store
            .get_all(db, MIGRATIONS_COLLECTION, Document::new(), options)
            .await?
        {
            GetAllResult::Documents(docs) => docs,
            GetAllResult::Page(page) => page.items,
        };
        let mut records = docs
            .iter()
            .map(MigrationRecord::from_document)
            .collect::<Result<Vec<_>, _>>()?;
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        Ok(records)
    }

    /// Run the `direction` script of `name` and record the new status.
    #[instrument(skip(self))]
    pub async fn run_migration(&self, db: &str, name: &str, direction: Direction) -> Result<MigrationRecord, MigrationError> {
        let record = self
            .find(db, name)
            .await?
            .ok_or_else(|| MigrationError::NotFound(name.to_string()))?;

        let next = record
            .status
            .transition(direction)
            .ok_or_else(|| MigrationError::StateConflict {
                name: name.to_string(),
                direction,
                status: record.status,
            })?;

        let script = Script::parse(record.script(direction))?.ok_or_else(|| MigrationError::MissingScript {
            name: name.to_string(),
            direction,
        })?;

        let runner = ScriptRunner::new(&self.store, self.ids.as_ref());
        if let Err(err) = runner.run(db, &script).await {
            warn!(db, name, %direction, error = %err, "migration script failed");
            return Err(err);
        }

        // Only move the record on if nobody else did while the script ran.
        let mut filter = name_filter(name);
        filter.insert("status".into(), record.status.as_str().into());
        let now = Utc::now();
        let mut changes = Document::new();
        changes.insert("status".into(), next.as_str().into());
        changes.insert("modifiedAt".into(), now.into());
        let outcome = self
            .store
            .set(db, MIGRATIONS_COLLECTION, filter, changes, Document::new())
            .await?;
        if matches!(outcome, SetOutcome::Update(ref result) if result.matched_count == 0) {
            let status = self.find(db, name).await?.map_or(record.status, |current| current.status);
            warn!(db, name, %direction, %status, "migration status changed while its script ran");
            return Err(MigrationError::StateConflict {
                name: name.to_string(),
                direction,
                status,
            });
        }

        info!(db, name, %direction, status = %next, "migration ran");
        Ok(MigrationRecord {
            status: next,
            modified_at: now,
            ..record
        })
    }

    /// Capture the collections and secondary indexes of `db` as a new
    /// pending migration. The snapshot is stored, never executed.
    #[instrument(skip(self))]
    pub async fn create_snapshot(&self, db: &str, name: Option<String>) -> Result<MigrationRecord, MigrationError> {
        let mut up = Vec::new();
        let mut down = Vec::new();

        for info in self.store.list_collections(db).await? {
            if info.name == MIGRATIONS_COLLECTION || info.name.starts_with("system.") {
                continue;
            }
            up.push(Statement::CreateCollection {
                collection: info.name.clone(),
                options: info.options.clone(),
                ignore_if_exists: true,
            });
            for index in self.store.list_indexes(db, &info.name).await? {
                if index.name == ID_INDEX_NAME {
                    continue;
                }
                let mut options = index.options.clone();
                options.insert("name".into(), index.name.clone().into());
                if index.unique {
                    options.insert("unique".into(), Value::Bool(true));
                }
                up.push(Statement::CreateIndex {
                    collection: info.name.clone(),
                    keys: index.keys.clone(),
                    options,
                });
            }
            down.push(Statement::DropCollection {
                collection: info.name,
                ignore_if_missing: true,
            });
        }

        let name = name.unwrap_or_else(|| format!("snapshot_{}", Utc::now().format("%Y%m%d%H%M%S")));
        let up = Script { statements: up }.to_value();
        let down = Script { statements: down }.to_value();
        self.add_migration(db, &name, up, down).await
    }
}
