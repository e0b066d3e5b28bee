// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
//! Request authentication.
//!
//! Every request except `/health` and `/ready` passes through an
//! [`Authenticator`] before reaching a handler. A denial answers 401 and
//! the request never reaches the dispatcher or the store.
//!
//! Bundled implementations:
//! - [`OpenAuthenticator`]: allows everything (authentication disabled).
//! - [`ApiKeyAuthenticator`]: keys passed via the `X-API-Key` header, held
//!   only as SHA-256 hashes.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::AppState;

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Verdict of an [`Authenticator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    Allow,
    /// Reject, optionally explaining why.
    Deny(Option<String>),
}

/// Decides whether a request may proceed.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, headers: &HeaderMap) -> AuthDecision;
}

/// Allows every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAuthenticator;

#[async_trait]
impl Authenticator for OpenAuthenticator {
    async fn authenticate(&self, _headers: &HeaderMap) -> AuthDecision {
        AuthDecision::Allow
    }
}

/// Registered API key. The plaintext is never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyEntry {
    pub key_hash: String,
    pub label: String,
    pub active: bool,
}

/// API key registry used as an authenticator.
#[derive(Debug, Clone, Default)]
pub struct ApiKeyAuthenticator {
    keys: Arc<RwLock<HashMap<String, ApiKeyEntry>>>,
}

impl ApiKeyAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `(label, key)` pairs.
    pub fn with_keys<'a>(keys: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let registry = Self::new();
        for (label, key) in keys {
            registry.register(key, label);
        }
        registry
    }

    pub fn register(&self, plaintext_key: &str, label: &str) {
        let hash = hash_key(plaintext_key);
        let entry = ApiKeyEntry {
            key_hash: hash.clone(),
            label: label.to_string(),
            active: true,
        };
        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(hash, entry);
    }

    /// The entry for `plaintext_key` if it is registered and active.
    pub fn validate(&self, plaintext_key: &str) -> Option<ApiKeyEntry> {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&hash_key(plaintext_key))
            .filter(|entry| entry.active)
            .cloned()
    }

    /// Deactivate a key by its hash.
    pub fn revoke(&self, key_hash: &str) -> bool {
        match self
            .keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(key_hash)
        {
            Some(entry) => {
                entry.active = false;
                true
            }
            None => false,
        }
    }

    pub fn list(&self) -> Vec<ApiKeyEntry> {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Authenticator for ApiKeyAuthenticator {
    async fn authenticate(&self, headers: &HeaderMap) -> AuthDecision {
        let Some(key) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) else {
            return AuthDecision::Deny(Some("Authentication required. Provide an X-API-Key header.".into()));
        };
        match self.validate(key) {
            Some(entry) => {
                debug!(label = %entry.label, "API key authenticated");
                AuthDecision::Allow
            }
            None => AuthDecision::Deny(Some("Invalid API key".into())),
        }
    }
}

#[derive(Debug, Serialize)]
struct AuthError {
    error: String,
    code: u16,
}

/// Axum middleware consulting the configured [`Authenticator`].
pub async fn auth_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request.uri().path();
    if path == "/health" || path == "/ready" {
        return next.run(request).await;
    }

    match state.auth.authenticate(request.headers()).await {
        AuthDecision::Allow => next.run(request).await,
        AuthDecision::Deny(message) => {
            warn!(path = %request.uri().path(), "request denied");
            (
                StatusCode::UNAUTHORIZED,
                Json(AuthError {
                    error: message.unwrap_or_else(|| "Unauthorized".to_string()),
                    code: StatusCode::UNAUTHORIZED.as_u16(),
                }),
            )
                .into_response()
        }
    }
}

/// SHA-256 of an API key, hex encoded.
fn hash_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}
