//! The worker loop: a single task that owns the server connection.
//!
//! Each iteration garbage-collects released slots, drives reconnection and
//! keepalive, then waits (bounded) for new requests and drains the queue in
//! arrival order. Every dequeued call either transacts against the server or
//! has a synthesized failure byte written to its slot's mailbox; no error
//! here is ever fatal, the loop exits only on an explicit Stop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::info;

use crate::codec::{self, ResponseCode, TagBase};
use crate::config::ServerConfig;
use crate::link::ServerLink;
use crate::request::{CallKind, CallRequest, WorkerRequest};
use crate::slot::SlotPool;

/// Bound on one iteration's wait for queue entries. Sets the cadence of
/// reconnection and keepalive checks, nothing else.
pub(crate) const QUEUE_WAIT: Duration = Duration::from_secs(2);

/// Request queue capacity. Sized so producer sends never block meaningfully.
pub(crate) const QUEUE_CAPACITY: usize = 32;

pub(crate) async fn run(
    pool: Arc<SlotPool>,
    mut queue: mpsc::Receiver<WorkerRequest>,
    config: ServerConfig,
    tag_base: TagBase,
) {
    info!("broker worker started");
    let mut link = ServerLink::new(config);

    'worker: loop {
        pool.collect_garbage();
        link.maybe_connect().await;
        link.maybe_ping().await;

        let first = match timeout(QUEUE_WAIT, queue.recv()).await {
            Err(_) => continue,
            Ok(None) => break, // every producer is gone
            Ok(Some(request)) => request,
        };

        // Drain whatever arrived, preserving queue order.
        let mut next = Some(first);
        while let Some(request) = next.take() {
            match request {
                WorkerRequest::Stop => break 'worker,
                WorkerRequest::Configure(config) => {
                    link.apply_config(config);
                    // Run a connect pass before any request queued behind
                    // the new configuration.
                    continue 'worker;
                }
                WorkerRequest::Call(call) => dispatch(&pool, &mut link, &tag_base, call).await,
            }
            next = queue.try_recv().ok();
        }
    }

    info!("broker worker stopped");
}

/// Transact one caller request, or synthesize its failure.
async fn dispatch(pool: &SlotPool, link: &mut ServerLink, tag_base: &TagBase, call: CallRequest) {
    // Stale correlation: the slot was reclaimed since the request was
    // queued. Nobody is owed a response.
    if !pool.is_current(call.correlation) {
        return;
    }

    if !link.is_connected() {
        pool.deliver(
            call.correlation,
            ResponseCode::FailSystemUnavailable.byte(),
        );
        return;
    }

    let wire = match call.kind {
        CallKind::VerifyRecipient => codec::encode_verify(link.client_id(), &call.recipient),
        CallKind::SendMessage => codec::encode_send(
            link.client_id(),
            tag_base,
            call.correlation.wire_tag(),
            &call.recipient,
            &call.message,
            &call.caller_id,
        ),
        _ => {
            pool.deliver(call.correlation, ResponseCode::FailUnknownRequest.byte());
            return;
        }
    };

    let byte = link.transact(&wire).await;
    pool.deliver(call.correlation, byte);
}
