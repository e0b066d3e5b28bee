// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Cache error types.

use thiserror::Error;

/// Errors raised by cache backends and the result cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backend rejected or could not complete the call.
    #[error("cache backend '{backend}' failed: {message}")]
    Backend { backend: String, message: String },

    /// A stored value could not be encoded or decoded.
    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    pub fn backend(backend: impl Into<String>, message: impl Into<String>) -> Self {
        CacheError::Backend {
            backend: backend.into(),
            message: message.into(),
        }
    }
}
