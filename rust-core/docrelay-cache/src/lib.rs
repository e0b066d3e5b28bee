// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// DocRelay Result Cache
//
// Stores the outcome of each asynchronously submitted request under its
// correlation identifier so an independent reader can fetch it later.
//
// # Modules
//
// - [`backend`] -- `CacheBackend` and the expiring `InMemoryCache`.
// - [`result`] -- `OperationResult` and the namespaced `ResultCache`.
// - [`error`] -- The `CacheError` enum.

pub mod backend;
pub mod error;
pub mod result;

pub use backend::{CacheBackend, CacheStats, InMemoryCache};
pub use error::CacheError;
pub use result::{OperationResult, OperationStatus, ResultCache, DEFAULT_RESULT_TTL, MAX_RESULT_TTL, RESPONSE_PREFIX};
