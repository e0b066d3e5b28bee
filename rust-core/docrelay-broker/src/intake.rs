// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Queue intake loop.
//
// Receive a batch, process every message of it concurrently, wait for all of
// them, then receive again. A message is acknowledged once its result is in
// the cache or once it has been dropped as unprocessable. If the cache write
// fails the message is left alone so the transport redelivers it.

use std::sync::Arc;
use std::time::Duration;

use docrelay_cache::{OperationResult, ResultCache};
use docrelay_store::{Document, Value};
use futures::future::join_all;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::{IntakeError, QueueError};
use crate::hooks::CompletionHook;
use crate::queue::{MessageQueue, ReceivedMessage};

/// Loop tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntakeConfig {
    /// Upper bound on one batch.
    pub max_messages: usize,
    /// Long-poll wait per receive.
    pub wait_time: Duration,
    /// Pause after a failed receive.
    pub error_backoff: Duration,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            max_messages: 10,
            wait_time: Duration::from_secs(20),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// Body of an inbound message, read leniently.
///
/// Only a body that is not a JSON object is refused outright. A non-string
/// `action` is kept as its JSON text so it fails dispatch like any unknown
/// name, and a `ttl` that is not a positive number of seconds falls back
/// to the default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationRequest {
    pub action: String,
    pub payload: serde_json::Value,
    pub correlation_id: Option<String>,
    /// Result lifetime; `None` means the cache default.
    pub ttl: Option<Duration>,
}

impl OperationRequest {
    /// Parse a raw message body.
    pub fn parse(body: &str) -> Result<Self, DropReason> {
        let json: serde_json::Value =
            serde_json::from_str(body).map_err(|err| DropReason::Unparseable(err.to_string()))?;
        Self::from_json(json)
    }

    pub fn from_json(json: serde_json::Value) -> Result<Self, DropReason> {
        let serde_json::Value::Object(mut fields) = json else {
            return Err(DropReason::Unparseable("message body is not a JSON object".to_string()));
        };
        let action = match fields.remove("action") {
            None | Some(serde_json::Value::Null) => String::new(),
            Some(serde_json::Value::String(name)) => name,
            Some(other) => other.to_string(),
        };
        Ok(Self {
            action,
            payload: fields.remove("payload").unwrap_or_default(),
            correlation_id: Self::correlation_id_of(fields.get("correlationId")),
            ttl: fields.get("ttl").and_then(ttl_of),
        })
    }

    /// A usable correlation id: a non-empty string, or a number in its
    /// decimal form.
    pub fn correlation_id_of(value: Option<&serde_json::Value>) -> Option<String> {
        match value? {
            serde_json::Value::String(id) if !id.is_empty() => Some(id.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Payload as a document; anything but an object reads as empty.
    pub fn payload_document(&self) -> Document {
        match Value::from(self.payload.clone()) {
            Value::Document(doc) => doc,
            _ => Document::new(),
        }
    }
}

/// A positive ttl in seconds, given as a number or a numeric string.
fn ttl_of(value: &serde_json::Value) -> Option<Duration> {
    let secs = match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match secs {
        Some(secs) if secs.is_finite() && secs > 0.0 => Some(Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)),
        _ => {
            if !value.is_null() {
                warn!(ttl = %value, "ignoring invalid ttl, using the default");
            }
            None
        }
    }
}

/// Why a message was discarded without a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    Unparseable(String),
    MissingCorrelationId,
}

/// What became of one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// A result was stored under `correlation_id`.
    Completed { correlation_id: String, success: bool },
    Dropped(DropReason),
}

/// Tally of one processed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub received: usize,
    pub completed: usize,
    pub dropped: usize,
    /// Left unacknowledged for redelivery.
    pub failed: usize,
}

/// Drives requests from a queue through the dispatcher into the result cache.
pub struct IntakeLoop {
    queue: Arc<dyn MessageQueue>,
    dispatcher: Arc<Dispatcher>,
    results: ResultCache,
    hook: Option<Arc<dyn CompletionHook>>,
    config: IntakeConfig,
}

impl IntakeLoop {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        dispatcher: Arc<Dispatcher>,
        results: ResultCache,
        config: IntakeConfig,
    ) -> Self {
        Self {
            queue,
            dispatcher,
            results,
            hook: None,
            config,
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn CompletionHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Process one message body: dispatch it and store its result.
    pub async fn process_message(&self, body: &str) -> Result<MessageOutcome, IntakeError> {
        let request = match OperationRequest::parse(body) {
            Ok(request) => request,
            Err(reason) => {
                warn!(?reason, "discarding unparseable message");
                return Ok(MessageOutcome::Dropped(reason));
            }
        };

        let Some(correlation_id) = request.correlation_id.clone() else {
            warn!(action = %request.action, "message is missing 'correlationId', discarding");
            return Ok(MessageOutcome::Dropped(DropReason::MissingCorrelationId));
        };

        info!(%correlation_id, action = %request.action, "processing request");
        let envelope = self.dispatcher.dispatch(&request.action, request.payload_document()).await;

        let result = match envelope.error {
            Some(error) => OperationResult::failure(error),
            None => OperationResult::success(envelope.data.unwrap_or(serde_json::Value::Null)),
        };
        if let Err(source) = self.results.put(&correlation_id, &result, request.ttl).await {
            error!(%correlation_id, error = %source, "failed to cache result");
            return Err(IntakeError::CacheWrite { correlation_id, source });
        }

        if let Some(hook) = &self.hook {
            let hook = Arc::clone(hook);
            let correlation_id = correlation_id.clone();
            let result = result.clone();
            tokio::spawn(async move {
                if let Err(err) = hook.on_complete(&correlation_id, &result).await {
                    warn!(%correlation_id, hook = hook.name(), error = %err, "completion hook failed");
                }
            });
        }

        Ok(MessageOutcome::Completed {
            correlation_id,
            success: result.is_success(),
        })
    }

    async fn handle(&self, message: &ReceivedMessage) -> Result<MessageOutcome, IntakeError> {
        let outcome = self.process_message(&message.body).await?;
        self.queue.delete(&message.receipt).await?;
        debug!(message_id = %message.message_id, "message acknowledged");
        Ok(outcome)
    }

    /// Process a received batch to completion.
    pub async fn process_batch(&self, messages: &[ReceivedMessage]) -> BatchReport {
        let outcomes = join_all(messages.iter().map(|message| self.handle(message))).await;

        let mut report = BatchReport {
            received: messages.len(),
            ..BatchReport::default()
        };
        for (message, outcome) in messages.iter().zip(outcomes) {
            match outcome {
                Ok(MessageOutcome::Completed { .. }) => report.completed += 1,
                Ok(MessageOutcome::Dropped(_)) => report.dropped += 1,
                Err(err) => {
                    report.failed += 1;
                    error!(message_id = %message.message_id, error = %err, "message left for redelivery");
                }
            }
        }
        report
    }

    /// Receive and process one batch.
    pub async fn poll_once(&self) -> Result<BatchReport, QueueError> {
        let messages = self
            .queue
            .receive(self.config.max_messages, self.config.wait_time)
            .await?;
        if !messages.is_empty() {
            debug!(count = messages.len(), "received batch");
        }
        Ok(self.process_batch(&messages).await)
    }

    /// Run until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// Shutdown interrupts a pending receive but never a batch in progress.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(queue = self.queue.name(), "intake loop started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let received = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                received = self.queue.receive(self.config.max_messages, self.config.wait_time) => received,
            };
            match received {
                Ok(messages) => {
                    if !messages.is_empty() {
                        self.process_batch(&messages).await;
                    }
                }
                Err(err) => {
                    error!(error = %err, "receive failed");
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        _ = tokio::time::sleep(self.config.error_backoff) => {}
                    }
                }
            }
        }
        info!("intake loop stopped");
    }
}
