// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Operation results keyed by correlation identifier.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::backend::CacheBackend;
use crate::error::CacheError;

/// Key namespace for stored results.
pub const RESPONSE_PREFIX: &str = "response:";

/// Default lifetime of a stored result.
pub const DEFAULT_RESULT_TTL: Duration = Duration::from_secs(300);

/// Longer lifetimes are cut down to this.
pub const MAX_RESULT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Success,
    Error,
}

/// The outcome of one request as stored for later retrieval.
///
/// Exactly one of `data` and `error` is set; the constructors are the only
/// way to build one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub status: OperationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A present `data` field is `Some`, even when it holds `null`.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<serde_json::Value>, D::Error> {
    serde_json::Value::deserialize(deserializer).map(Some)
}

impl OperationResult {
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            status: OperationStatus::Success,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            status: OperationStatus::Error,
            data: None,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OperationStatus::Success
    }
}

/// Typed, namespaced view over a [`CacheBackend`].
#[derive(Clone)]
pub struct ResultCache {
    backend: Arc<dyn CacheBackend>,
    default_ttl: Duration,
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("backend", &self.backend.name())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl ResultCache {
    pub fn new(backend: Arc<dyn CacheBackend>, default_ttl: Duration) -> Self {
        Self { backend, default_ttl }
    }

    pub fn backend(&self) -> &dyn CacheBackend {
        self.backend.as_ref()
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Backend key for `correlation_id`.
    pub fn key(correlation_id: &str) -> String {
        format!("{RESPONSE_PREFIX}{correlation_id}")
    }

    /// Store `result`, overwriting any earlier result for the same id.
    ///
    /// `ttl` is capped at [`MAX_RESULT_TTL`].
    pub async fn put(
        &self,
        correlation_id: &str,
        result: &OperationResult,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let ttl = ttl.unwrap_or(self.default_ttl).min(MAX_RESULT_TTL);
        let bytes = serde_json::to_vec(result)?;
        self.backend.set(&Self::key(correlation_id), bytes, ttl).await?;
        debug!(correlation_id, ttl_secs = ttl.as_secs(), status = ?result.status, "stored operation result");
        Ok(())
    }

    /// The stored result, or `None` when absent or expired.
    pub async fn get(&self, correlation_id: &str) -> Result<Option<OperationResult>, CacheError> {
        match self.backend.get(&Self::key(correlation_id)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}
