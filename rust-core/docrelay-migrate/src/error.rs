// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Migration error types.

use docrelay_store::StoreError;
use thiserror::Error;

use crate::record::{Direction, MigrationStatus};

/// Errors raised by the migration subsystem.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Migration with name '{0}' already exists.")]
    DuplicateName(String),

    #[error("Migration '{0}' not found.")]
    NotFound(String),

    /// The requested direction is not legal from the current status.
    #[error("Migration '{name}' cannot be run '{direction}' while its status is '{status}'.")]
    StateConflict {
        name: String,
        direction: Direction,
        status: MigrationStatus,
    },

    #[error("Migration '{name}' has no '{direction}' script.")]
    MissingScript { name: String, direction: Direction },

    #[error("invalid migration script: {0}")]
    InvalidScript(String),

    /// A stored record could not be read back.
    #[error("invalid migration record: {0}")]
    InvalidRecord(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_conflict_display() {
        let err = MigrationError::StateConflict {
            name: "add_users".to_string(),
            direction: Direction::Up,
            status: MigrationStatus::Applied,
        };
        assert_eq!(
            err.to_string(),
            "Migration 'add_users' cannot be run 'up' while its status is 'applied'."
        );
    }

    #[test]
    fn test_store_errors_pass_through() {
        let err: MigrationError = StoreError::invalid("bad").into();
        assert_eq!(err.to_string(), "invalid argument: bad");
    }
}
