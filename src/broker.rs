//! The broker object: caller-facing surface and worker lifecycle.
//!
//! A [`Broker`] is explicitly constructed and explicitly owned; there is no
//! ambient singleton. [`Broker::start`] spawns the single worker task that
//! owns the physical connection; [`Broker::stop`] sends it a Stop request
//! and joins it. Caller operations acquire (or reuse) a slot, queue a
//! request record, and wait on the slot's mailbox — blocking only on their
//! own transaction, never on another caller's.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::error;

use crate::codec::{ResponseCode, TagBase};
use crate::config::ServerConfig;
use crate::request::{CallRequest, WorkerRequest};
use crate::session::{wait_response, CallSession};
use crate::slot::{Correlation, SlotPool};
use crate::worker;

/// Handle to a running broker.
///
/// Must be created inside a tokio runtime. All methods are safe to call from
/// any number of tasks concurrently.
pub struct Broker {
    pool: Arc<SlotPool>,
    queue: mpsc::Sender<WorkerRequest>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Broker {
    /// Start the broker: create the slot pool and request queue, and spawn
    /// the worker task with the given configuration.
    pub fn start(config: ServerConfig) -> Broker {
        let pool = Arc::new(SlotPool::new());
        let (queue, rx) = mpsc::channel(worker::QUEUE_CAPACITY);
        let handle = tokio::spawn(worker::run(Arc::clone(&pool), rx, config, TagBase::new()));
        Broker {
            pool,
            queue,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Stop the worker and wait for it to finish. Idempotent; concurrent
    /// callers after the first return immediately.
    pub async fn stop(&self) {
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if self.queue.send(WorkerRequest::Stop).await.is_err() {
                // Worker already gone; nothing to join cleanly.
                handle.abort();
            }
            let _ = handle.await;
        }
    }

    /// Replace the connection configuration at runtime.
    ///
    /// The new value travels through the request queue, so it is serialized
    /// with traffic and never applied mid-transaction.
    pub async fn reconfigure(&self, config: ServerConfig) {
        if self
            .queue
            .send(WorkerRequest::Configure(config))
            .await
            .is_err()
        {
            error!("unable to deliver new configuration; broker is stopped");
        }
    }

    /// Ensure the call has a slot attached and return its correlation tag.
    ///
    /// The handle itself lives in the call's attachment and is released by
    /// its drop when the call ends. Returns `None` when the pool is
    /// exhausted — callers surface that as "system not available".
    pub fn get_or_create_slot<S: CallSession>(&self, session: &mut S) -> Option<Correlation> {
        let attachment = session.attachment();
        if attachment.is_none() {
            *attachment = SlotPool::acquire(&self.pool);
        }
        attachment.as_ref().map(|slot| slot.correlation())
    }

    /// Verify that a recipient exists and is enabled.
    pub async fn verify_recipient<S: CallSession>(
        &self,
        session: &mut S,
        recipient: &str,
    ) -> ResponseCode {
        let Some(correlation) = self.get_or_create_slot(session) else {
            return ResponseCode::FailSystemUnavailable;
        };
        let call = CallRequest::verify(correlation, recipient);
        self.submit_and_wait(session, correlation, call).await
    }

    /// Send a message to a recipient.
    ///
    /// An empty recipient fails immediately with `FailInternal`; an empty
    /// message or caller id is replaced by a placeholder.
    pub async fn send_message<S: CallSession>(
        &self,
        session: &mut S,
        recipient: &str,
        message: &str,
        caller_id: &str,
    ) -> ResponseCode {
        let Some(correlation) = self.get_or_create_slot(session) else {
            return ResponseCode::FailSystemUnavailable;
        };
        if recipient.is_empty() {
            return ResponseCode::FailInternal;
        }
        let message = if message.is_empty() { "no message" } else { message };
        let caller_id = if caller_id.is_empty() {
            "unknown caller"
        } else {
            caller_id
        };
        let call = CallRequest::send(correlation, recipient, message, caller_id);
        self.submit_and_wait(session, correlation, call).await
    }

    /// Arm the slot's mailbox, queue the request, and wait.
    ///
    /// Arming happens before the queue write so the worker can never race a
    /// response past an unarmed slot.
    async fn submit_and_wait<S: CallSession>(
        &self,
        session: &mut S,
        correlation: Correlation,
        call: CallRequest,
    ) -> ResponseCode {
        let Some(mailbox) = self.pool.arm(correlation) else {
            return ResponseCode::FailInternal;
        };
        if self.queue.send(WorkerRequest::Call(call)).await.is_err() {
            return ResponseCode::FailInternal;
        }
        wait_response(session, mailbox).await
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker").finish_non_exhaustive()
    }
}
