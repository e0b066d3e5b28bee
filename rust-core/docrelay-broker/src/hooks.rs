// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Completion hooks, fired after a result has been cached.

use std::time::Duration;

use async_trait::async_trait;
use docrelay_cache::OperationResult;
use serde_json::json;
use tracing::debug;

use crate::error::HookError;

/// Notified once per completed request, after its result is stored.
#[async_trait]
pub trait CompletionHook: Send + Sync {
    fn name(&self) -> &str;

    async fn on_complete(&self, correlation_id: &str, result: &OperationResult) -> Result<(), HookError>;
}

/// Install the ring crypto provider for outbound TLS.
///
/// Safe to call more than once; later calls are no-ops.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// POSTs `{correlationId, result}` to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebhookHook {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl WebhookHook {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(url: impl Into<String>) -> Self {
        install_crypto_provider();
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl CompletionHook for WebhookHook {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn on_complete(&self, correlation_id: &str, result: &OperationResult) -> Result<(), HookError> {
        let body = json!({ "correlationId": correlation_id, "result": result });
        let request = self.client.post(&self.url).json(&body).send();
        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| HookError::Timeout(self.timeout))??;

        if !response.status().is_success() {
            return Err(HookError::Status(response.status().as_u16()));
        }
        debug!(correlation_id, url = %self.url, "webhook delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_webhook_reports_request_error() {
        let hook = WebhookHook::new("http://127.0.0.1:9/hook").with_timeout(Duration::from_secs(5));
        let err = hook
            .on_complete("abc", &OperationResult::success(json!(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, HookError::Request(_) | HookError::Timeout(_)));
    }
}
