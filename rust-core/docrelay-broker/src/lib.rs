// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// DocRelay Broker
//
// Turns named actions into store and migration calls, and drives queued
// requests through them into the result cache.
//
// # Modules
//
// - [`dispatcher`] -- The closed `Action` set, payload validation, `Envelope`.
// - [`queue`] -- `MessageQueue` and the visibility-timeout `InMemoryQueue`.
// - [`intake`] -- The receive/process/acknowledge loop.
// - [`hooks`] -- `CompletionHook` and the reqwest-backed `WebhookHook`.
// - [`error`] -- Dispatch, queue, intake and hook errors.

pub mod dispatcher;
pub mod error;
pub mod hooks;
pub mod intake;
pub mod queue;

pub use dispatcher::{Action, Dispatcher, Envelope};
pub use error::{DispatchError, ErrorKind, HookError, IntakeError, QueueError};
pub use hooks::{install_crypto_provider, CompletionHook, WebhookHook};
pub use intake::{BatchReport, DropReason, IntakeConfig, IntakeLoop, MessageOutcome, OperationRequest};
pub use queue::{InMemoryQueue, MessageQueue, ReceivedMessage};
