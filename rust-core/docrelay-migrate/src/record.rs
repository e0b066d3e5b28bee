// SPDX-License-Identifier: PMPL-1.0-or-later
//! Migration records and their lifecycle.
//!
//! ```text
//! pending --up--> applied --down--> rolled_back --up--> applied
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use docrelay_store::{Document, Value};
use serde::{Deserialize, Serialize};

use crate::error::MigrationError;

/// Lifecycle state of a migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    Pending,
    Applied,
    RolledBack,
}

impl MigrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStatus::Pending => "pending",
            MigrationStatus::Applied => "applied",
            MigrationStatus::RolledBack => "rolled_back",
        }
    }

    /// Status after successfully running `direction`, or `None` if the
    /// transition is illegal.
    pub fn transition(self, direction: Direction) -> Option<MigrationStatus> {
        match (self, direction) {
            (MigrationStatus::Pending | MigrationStatus::RolledBack, Direction::Up) => Some(MigrationStatus::Applied),
            (MigrationStatus::Applied, Direction::Down) => Some(MigrationStatus::RolledBack),
            _ => None,
        }
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MigrationStatus {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MigrationStatus::Pending),
            "applied" => Ok(MigrationStatus::Applied),
            "rolled_back" => Ok(MigrationStatus::RolledBack),
            other => Err(MigrationError::InvalidRecord(format!("unknown status '{other}'"))),
        }
    }
}

/// Which script of a migration to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Up => "up",
            Direction::Down => "down",
        })
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            other => Err(format!("direction must be 'up' or 'down', got '{other}'")),
        }
    }
}

/// A named migration as persisted in `_migrations`.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationRecord {
    pub name: String,
    /// Script applied by `up`: a statement array or a string holding one.
    pub up: Value,
    pub down: Value,
    pub status: MigrationStatus,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl MigrationRecord {
    /// A fresh `pending` record stamped with `now`.
    pub fn new(name: impl Into<String>, up: Value, down: Value, now: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            up,
            down,
            status: MigrationStatus::Pending,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn script(&self, direction: Direction) -> &Value {
        match direction {
            Direction::Up => &self.up,
            Direction::Down => &self.down,
        }
    }

    /// Stored form. Timestamps stay typed so they sort chronologically.
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert("name".into(), self.name.clone().into());
        doc.insert("up".into(), self.up.clone());
        doc.insert("down".into(), self.down.clone());
        doc.insert("status".into(), self.status.as_str().into());
        doc.insert("createdAt".into(), self.created_at.into());
        doc.insert("modifiedAt".into(), self.modified_at.into());
        doc
    }

    pub fn from_document(doc: &Document) -> Result<Self, MigrationError> {
        let text = |key: &str| {
            doc.get(key)
                .and_then(Value::as_str)
                .ok_or_else(|| MigrationError::InvalidRecord(format!("missing '{key}'")))
        };
        let timestamp = |key: &str| match doc.get(key) {
            Some(Value::DateTime(at)) => Ok(*at),
            Some(Value::String(raw)) => DateTime::parse_from_rfc3339(raw)
                .map(|at| at.with_timezone(&Utc))
                .map_err(|e| MigrationError::InvalidRecord(format!("'{key}': {e}"))),
            _ => Err(MigrationError::InvalidRecord(format!("missing '{key}'"))),
        };
        Ok(Self {
            name: text("name")?.to_string(),
            up: doc.get("up").cloned().unwrap_or_default(),
            down: doc.get("down").cloned().unwrap_or_default(),
            status: text("status")?.parse()?,
            created_at: timestamp("createdAt")?,
            modified_at: timestamp("modifiedAt")?,
        })
    }

    /// Wire form returned to callers.
    pub fn to_value(&self) -> Value {
        Value::Document(self.to_document())
    }
}
