//! Call sessions and the caller-side wait primitive.
//!
//! The broker never assumes anything about the calling environment beyond
//! the [`CallSession`] trait: a readable event source that is terminal on
//! hangup, plus a place to attach the per-call slot. [`wait_response`] races
//! the slot's mailbox against that event source and a deadline, suspending
//! the caller until one of the three wakes it; it never busy-polls.

use std::future::Future;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::warn;

use crate::codec::ResponseCode;
use crate::slot::SlotHandle;

/// Bound on the caller-side wait: slightly longer than the worker's server
/// transaction timeout, so the worker always gets the chance to post a
/// response (or a synthesized failure) first.
pub const CALLER_WAIT: Duration = Duration::from_millis(5_500);

/// An event observed on a call while waiting for a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallEvent {
    /// The call ended. Terminal: the wait returns `FailHangup` immediately.
    Hangup,
    /// Benign progress signal; the wait continues.
    Ringing,
    /// Benign progress signal; the wait continues.
    Answer,
    /// Any other control event. Logged and ignored.
    Control(u32),
}

/// The host call-session interface consumed by the wait primitive.
///
/// Implementations wrap whatever event stream the calling environment
/// exposes. The broker only requires that it can be polled alongside the
/// mailbox and that a hangup is terminal.
pub trait CallSession: Send {
    /// The next event on the call, or `None` when the event source itself is
    /// gone (treated as an internal failure by the wait).
    fn next_event(&mut self) -> impl Future<Output = Option<CallEvent>> + Send;

    /// Whether the call has already hung up. Checked once before waiting.
    fn hung_up(&self) -> bool {
        false
    }

    /// Per-call attached state: the slot this call is bound to, if any.
    ///
    /// Repeated operations on the same call reuse the attached slot; the
    /// handle's drop releases it when the call's state is torn down.
    fn attachment(&mut self) -> &mut Option<SlotHandle>;
}

/// A call session with no event source, for callers that have no hangup
/// semantics (tools, tests, batch jobs).
#[derive(Debug, Default)]
pub struct IdleSession {
    slot: Option<SlotHandle>,
}

impl IdleSession {
    /// A fresh session with no attached slot.
    pub fn new() -> IdleSession {
        IdleSession { slot: None }
    }
}

impl CallSession for IdleSession {
    fn next_event(&mut self) -> impl Future<Output = Option<CallEvent>> + Send {
        std::future::pending()
    }

    fn attachment(&mut self) -> &mut Option<SlotHandle> {
        &mut self.slot
    }
}

/// Block the caller until the mailbox delivers, the call hangs up, or the
/// deadline passes — whichever happens first.
///
/// Mailbox delivery returns the decoded response byte. A closed mailbox
/// (slot reclaimed underneath us) and deadline expiry both surface as
/// `FailInternal`; a vanished event source does too.
pub async fn wait_response<S: CallSession>(
    session: &mut S,
    mut mailbox: oneshot::Receiver<u8>,
) -> ResponseCode {
    if session.hung_up() {
        return ResponseCode::FailHangup;
    }

    let deadline = tokio::time::sleep(CALLER_WAIT);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            delivered = &mut mailbox => {
                return match delivered {
                    Ok(byte) => ResponseCode::from_byte(byte),
                    Err(_) => ResponseCode::FailInternal,
                };
            }
            event = session.next_event() => {
                match event {
                    None => return ResponseCode::FailInternal,
                    Some(CallEvent::Hangup) => return ResponseCode::FailHangup,
                    Some(CallEvent::Ringing) | Some(CallEvent::Answer) => {}
                    Some(CallEvent::Control(code)) => {
                        warn!(code, "unexpected control event while waiting");
                    }
                }
            }
            () = &mut deadline => return ResponseCode::FailInternal,
        }
    }
}
