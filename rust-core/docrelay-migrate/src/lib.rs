// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// DocRelay Migrations
//
// Named, reversible schema migrations stored alongside the data they change,
// plus snapshots that capture the current collections and indexes of a
// database as a replayable migration.
//
// # Modules
//
// - [`record`] -- `MigrationRecord`, its status lifecycle and `Direction`.
// - [`script`] -- The declarative statement DSL and its interpreter.
// - [`manager`] -- `MigrationManager`: add, list, run and snapshot.
// - [`error`] -- The `MigrationError` enum.
//
// # Example
//
// ```rust
// use std::sync::Arc;
// use docrelay_migrate::{Direction, MigrationManager};
// use docrelay_store::{DocumentStore, InMemoryDriver, StoreConfig, Value};
//
// # tokio_test::block_on(async {
// let store = DocumentStore::new(Arc::new(InMemoryDriver::new()), StoreConfig::default());
// let manager = MigrationManager::new(store);
// let up = Value::from(r#"[{"op": "createCollection", "collection": "users"}]"#);
// let down = Value::from(r#"[{"op": "dropCollection", "collection": "users"}]"#);
// manager.add_migration("app", "create_users", up, down).await.unwrap();
// manager.run_migration("app", "create_users", Direction::Up).await.unwrap();
// # });
// ```

pub mod error;
pub mod manager;
pub mod record;
pub mod script;

pub use error::MigrationError;
pub use manager::{MigrationManager, MIGRATIONS_COLLECTION};
pub use record::{Direction, MigrationRecord, MigrationStatus};
pub use script::{IdFactory, ObjectIdFactory, Script, ScriptRunner, Statement, NEW_ID_TOKEN};
