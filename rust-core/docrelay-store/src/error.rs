// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Store error types for the DocRelay document adapter.
//
// Covers every failure the adapter, the driver and the transaction engine
// can surface: invalid arguments, constraint violations, unsupported query
// or pipeline features, bulk partial failures and transaction aborts.

use thiserror::Error;

use crate::driver::BulkWriteResult;

/// Errors that can occur when operating on the document store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An argument had the wrong shape (e.g. a query that is not a document).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A write would violate a unique index.
    #[error("E11000 duplicate key error collection: {namespace} index: {index} dup key: {key}")]
    DuplicateKey {
        /// `db.collection` the write targeted.
        namespace: String,
        /// Name of the violated index.
        index: String,
        /// Rendered key values.
        key: String,
    },

    /// A filter or update used an operator the store does not implement.
    #[error("unknown operator: {0}")]
    UnsupportedOperator(String),

    /// A pipeline contained an unknown stage.
    #[error("Unrecognized pipeline stage name: '{0}'")]
    UnsupportedStage(String),

    /// `createCollection` on an existing collection.
    #[error("collection already exists: {0}")]
    CollectionExists(String),

    /// An index with the same name but different keys already exists.
    #[error("index conflict: {0}")]
    IndexConflict(String),

    /// A bulk write stopped at the operation at `index`.
    #[error("bulk write failed at operation {index}: {message}")]
    BulkWrite {
        /// Position of the failing operation.
        index: usize,
        /// Driver message for the failure.
        message: String,
        /// Counts for the operations that were applied before the failure.
        partial: Box<BulkWriteResult>,
    },

    /// A `$$prev.` placeholder did not resolve against the previous result.
    #[error("Placeholder '{0}' could not be resolved from previous operation's result.")]
    PlaceholderUnresolved(String),

    /// A transaction step named a method outside the supported set.
    #[error("Unsupported method '{0}' in transaction.")]
    UnsupportedMethod(String),

    /// A transaction step was structurally invalid.
    #[error("transaction step {index} is invalid: {reason}")]
    InvalidStep {
        /// Position of the step in the operations list.
        index: usize,
        /// What was wrong with it.
        reason: String,
    },

    /// Session lifecycle failure (commit/abort on a closed session).
    #[error("session error: {0}")]
    Session(String),

    /// Any other failure reported by the driver.
    #[error("driver error: {0}")]
    Driver(String),

    /// A `$regex` operand did not compile.
    #[error("invalid regular expression: {0}")]
    Regex(#[from] regex::Error),
}

impl StoreError {
    /// Shorthand for [`StoreError::InvalidArgument`].
    pub fn invalid(message: impl Into<String>) -> Self {
        StoreError::InvalidArgument(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_key_display() {
        let err = StoreError::DuplicateKey {
            namespace: "app.users".to_string(),
            index: "email_1".to_string(),
            key: "{ email: \"a@b.c\" }".to_string(),
        };
        let text = err.to_string();
        assert!(text.starts_with("E11000 duplicate key error"));
        assert!(text.contains("app.users"));
        assert!(text.contains("email_1"));
    }

    #[test]
    fn test_placeholder_display_names_placeholder() {
        let err = StoreError::PlaceholderUnresolved("$$prev.missing".to_string());
        assert_eq!(
            err.to_string(),
            "Placeholder '$$prev.missing' could not be resolved from previous operation's result."
        );
    }

    #[test]
    fn test_unsupported_method_display() {
        let err = StoreError::UnsupportedMethod("explode".to_string());
        assert_eq!(err.to_string(), "Unsupported method 'explode' in transaction.");
    }
}
