// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Broker error types.

use docrelay_cache::CacheError;
use docrelay_migrate::MigrationError;
use docrelay_store::StoreError;
use thiserror::Error;

/// Message for actions that need both a database and a collection.
pub const MISSING_DB_AND_COLLECTION: &str =
    "Request payload must include both 'dbName' and 'collection' properties.";

/// Failure while executing an action.
///
/// The dispatcher turns every variant into a failure envelope; none of them
/// escape a dispatch call as an error.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A required payload field is missing or has the wrong shape.
    #[error("{0}")]
    Validation(String),

    #[error("Action '{0}' not found or is not valid.")]
    UnsupportedAction(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Migration(#[from] MigrationError),
}

impl DispatchError {
    pub fn validation(message: impl Into<String>) -> Self {
        DispatchError::Validation(message.into())
    }

    /// Stable classification used for HTTP status mapping and logs.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::Validation(_) => ErrorKind::Validation,
            DispatchError::UnsupportedAction(_) => ErrorKind::UnsupportedAction,
            DispatchError::Store(_) => ErrorKind::Store,
            DispatchError::Migration(MigrationError::Store(_)) => ErrorKind::Store,
            DispatchError::Migration(_) => ErrorKind::Migration,
        }
    }
}

/// Coarse category of a dispatch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    UnsupportedAction,
    Store,
    Migration,
}

impl ErrorKind {
    /// Whether the caller, not the service, is at fault.
    pub fn is_client_error(self) -> bool {
        matches!(self, ErrorKind::Validation | ErrorKind::UnsupportedAction)
    }
}

/// Errors raised by a message transport.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue '{queue}' failed: {message}")]
    Transport { queue: String, message: String },

    /// The receipt is unknown or its visibility window already lapsed.
    #[error("unknown or expired receipt handle '{0}'")]
    UnknownReceipt(String),
}

/// Errors that leave an inbound message unacknowledged.
#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("Failed to write result for correlationId '{correlation_id}': {source}")]
    CacheWrite {
        correlation_id: String,
        #[source]
        source: CacheError,
    },

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Errors raised by completion hooks. Logged, never propagated.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("webhook returned status {0}")]
    Status(u16),

    #[error("webhook timed out after {0:?}")]
    Timeout(std::time::Duration),
}
