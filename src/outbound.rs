//! Outbound submission queue and the send handle.
//!
//! `send()` resolves the target address, rejects unknown endpoints with a
//! `None` correlation id, and enqueues the message on a bounded FIFO queue.
//! The queue is drained one message per publish tick by the AMQP link,
//! preserving enqueue order for sends from the same process. The handle is
//! cheap to clone and safe to use from worker-dispatch tasks.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::address::{Address, AddressError};
use crate::message::OutboundMessage;
use crate::redirect::RedirectTable;

/// Errors surfaced synchronously from `send()`.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error(transparent)]
    Address(#[from] AddressError),

    #[error("Outbound queue is full")]
    QueueFull,
}

/// Optional fields of an outbound send.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub reply_to: Option<String>,
    pub error_to: Option<String>,
    pub session_id: Option<String>,
}

/// Bounded FIFO of messages awaiting publication.
pub struct SendQueue {
    capacity: usize,
    inner: Mutex<VecDeque<OutboundMessage>>,
}

impl SendQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, message: OutboundMessage) -> Result<(), SendError> {
        let mut queue = self.inner.lock().expect("send queue lock");
        if queue.len() >= self.capacity {
            return Err(SendError::QueueFull);
        }
        queue.push_back(message);
        Ok(())
    }

    /// Take the oldest message, if any. Called once per publish tick.
    pub fn pop(&self) -> Option<OutboundMessage> {
        self.inner.lock().expect("send queue lock").pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("send queue lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Clonable handle for submitting outbound messages.
#[derive(Clone)]
pub struct SendHandle {
    queue: Arc<SendQueue>,
    redirects: Arc<RedirectTable>,
}

impl SendHandle {
    pub fn new(queue: Arc<SendQueue>, redirects: Arc<RedirectTable>) -> Self {
        Self { queue, redirects }
    }

    /// Send a message to a `pin://` address with a fresh correlation id.
    ///
    /// Returns `Ok(Some(correlation_id))` when the target endpoint is a
    /// known outbound destination, `Ok(None)` otherwise.
    pub fn send(
        &self,
        address: &str,
        payload: Value,
        opts: SendOptions,
    ) -> Result<Option<String>, SendError> {
        self.submit(address, payload, Uuid::new_v4().to_string(), opts)
    }

    /// Send a reply or forwarded message, preserving an existing correlation
    /// id.
    pub fn send_correlated(
        &self,
        address: &str,
        payload: Value,
        correlation_id: String,
        session_id: Option<String>,
    ) -> Result<Option<String>, SendError> {
        self.submit(
            address,
            payload,
            correlation_id,
            SendOptions {
                session_id,
                ..SendOptions::default()
            },
        )
    }

    fn submit(
        &self,
        address: &str,
        payload: Value,
        correlation_id: String,
        opts: SendOptions,
    ) -> Result<Option<String>, SendError> {
        let target = Address::parse(address)?;
        if !self.redirects.knows_endpoint(&target.endpoint_id) {
            debug!(address = %address, "Dropping send to unknown outbound endpoint");
            return Ok(None);
        }

        self.queue.push(OutboundMessage {
            endpoint_id: target.endpoint_id,
            cluster_id: target.cluster_id,
            app_id: target.app_id,
            correlation_id: correlation_id.clone(),
            session_id: opts.session_id,
            payload,
            reply_to: opts.reply_to,
            error_to: opts.error_to,
        })?;
        Ok(Some(correlation_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn handle_with_capacity(capacity: usize) -> SendHandle {
        let redirects = Arc::new(RedirectTable::new("self"));
        redirects.register_outbound("peer");
        SendHandle::new(Arc::new(SendQueue::new(capacity)), redirects)
    }

    #[test]
    fn test_send_to_known_endpoint_returns_correlation_id() {
        let handle = handle_with_capacity(8);
        let correlation_id = handle
            .send("pin://peer/demo/echo", json!({"x": 1}), SendOptions::default())
            .unwrap();
        assert!(correlation_id.is_some());
    }

    #[test]
    fn test_send_to_unknown_endpoint_returns_none() {
        let handle = handle_with_capacity(8);
        let correlation_id = handle
            .send(
                "pin://stranger/demo/echo",
                json!({"x": 1}),
                SendOptions::default(),
            )
            .unwrap();
        assert!(correlation_id.is_none());
    }

    #[test]
    fn test_send_malformed_address_errors() {
        let handle = handle_with_capacity(8);
        let err = handle
            .send("peer/demo/echo", json!({}), SendOptions::default())
            .unwrap_err();
        assert!(matches!(err, SendError::Address(_)));
    }

    #[test]
    fn test_queue_preserves_fifo_order() {
        let redirects = Arc::new(RedirectTable::new("self"));
        redirects.register_outbound("peer");
        let queue = Arc::new(SendQueue::new(8));
        let handle = SendHandle::new(queue.clone(), redirects);

        for n in 1..=3 {
            handle
                .send(
                    "pin://peer/demo/echo",
                    json!({ "n": n }),
                    SendOptions::default(),
                )
                .unwrap();
        }

        for n in 1..=3 {
            assert_eq!(queue.pop().unwrap().payload, json!({ "n": n }));
        }
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_full_queue_rejects_send() {
        let handle = handle_with_capacity(1);
        handle
            .send("pin://peer/demo/echo", json!({}), SendOptions::default())
            .unwrap();
        let err = handle
            .send("pin://peer/demo/echo", json!({}), SendOptions::default())
            .unwrap_err();
        assert!(matches!(err, SendError::QueueFull));
    }
}
