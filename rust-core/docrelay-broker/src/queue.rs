// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Inbound message transport.
//
// A received message stays invisible to other receivers for the visibility
// timeout. Deleting it by receipt acknowledges it; otherwise it becomes
// visible again and is redelivered with a fresh receipt.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::error::QueueError;

/// One delivery of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub message_id: String,
    /// Handle used to acknowledge this delivery.
    pub receipt: String,
    pub body: String,
    /// Deliveries so far, including this one.
    pub receive_count: u32,
}

/// A pull-based message queue with explicit acknowledgement.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    fn name(&self) -> &str;

    /// Receive up to `max` messages, waiting at most `wait` for the first.
    async fn receive(&self, max: usize, wait: Duration) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Acknowledge a delivery.
    async fn delete(&self, receipt: &str) -> Result<(), QueueError>;

    /// Enqueue `body`, returning its message id.
    async fn send(&self, body: String) -> Result<String, QueueError>;
}

#[derive(Debug, Clone)]
struct Stored {
    id: String,
    body: String,
    receive_count: u32,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Stored>,
    in_flight: HashMap<String, (Stored, Instant)>,
}

impl QueueState {
    /// Move lapsed deliveries back to the front of the queue.
    fn requeue_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();
        for receipt in expired {
            if let Some((message, _)) = self.in_flight.remove(&receipt) {
                debug!(message_id = %message.id, "visibility timeout lapsed, requeueing");
                self.ready.push_front(message);
            }
        }
    }

    fn next_visibility_deadline(&self) -> Option<Instant> {
        self.in_flight.values().map(|(_, deadline)| *deadline).min()
    }
}

/// Process-local queue.
#[derive(Debug)]
pub struct InMemoryQueue {
    state: Mutex<QueueState>,
    arrivals: Notify,
    visibility_timeout: Duration,
}

impl InMemoryQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            arrivals: Notify::new(),
            visibility_timeout,
        }
    }

    /// Messages waiting to be received.
    pub async fn ready_len(&self) -> usize {
        self.state.lock().await.ready.len()
    }

    /// Messages received but not yet acknowledged.
    pub async fn in_flight_len(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    fn name(&self) -> &str {
        "memory"
    }

    async fn receive(&self, max: usize, wait: Duration) -> Result<Vec<ReceivedMessage>, QueueError> {
        let give_up = Instant::now() + wait;
        loop {
            let arrival = self.arrivals.notified();
            let wake_at = {
                let now = Instant::now();
                let mut state = self.state.lock().await;
                state.requeue_expired(now);

                let mut batch = Vec::new();
                while batch.len() < max {
                    let Some(mut message) = state.ready.pop_front() else {
                        break;
                    };
                    message.receive_count += 1;
                    let receipt = Uuid::new_v4().to_string();
                    batch.push(ReceivedMessage {
                        message_id: message.id.clone(),
                        receipt: receipt.clone(),
                        body: message.body.clone(),
                        receive_count: message.receive_count,
                    });
                    state.in_flight.insert(receipt, (message, now + self.visibility_timeout));
                }
                if !batch.is_empty() || now >= give_up {
                    return Ok(batch);
                }
                state
                    .next_visibility_deadline()
                    .map_or(give_up, |deadline| deadline.min(give_up))
            };
            let _ = tokio::time::timeout_at(wake_at, arrival).await;
        }
    }

    async fn delete(&self, receipt: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        match state.in_flight.get(receipt) {
            Some((_, deadline)) if *deadline > Instant::now() => {
                state.in_flight.remove(receipt);
                Ok(())
            }
            _ => Err(QueueError::UnknownReceipt(receipt.to_string())),
        }
    }

    async fn send(&self, body: String) -> Result<String, QueueError> {
        let id = Uuid::new_v4().to_string();
        self.state.lock().await.ready.push_back(Stored {
            id: id.clone(),
            body,
            receive_count: 0,
        });
        self.arrivals.notify_waiters();
        Ok(id)
    }
}
