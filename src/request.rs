//! Request records carried on the broker's inbound queue.
//!
//! Caller tasks build these and send them to the worker over a
//! multi-producer, single-consumer channel. A record is constructed once,
//! moved onto the queue, and read-only thereafter.

use crate::config::ServerConfig;
use crate::slot::Correlation;

/// A message the worker should act on.
#[derive(Debug)]
pub enum WorkerRequest {
    /// Terminate the worker loop.
    Stop,
    /// Replace the held connection configuration. The new addresses apply on
    /// the next connect attempt.
    Configure(ServerConfig),
    /// Transact a caller request against the server.
    Call(CallRequest),
}

/// Request codes that transact against the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// `[v:...]` — verify that a recipient exists and is enabled.
    VerifyRecipient,
    /// `[s:...]` — send a message to a recipient.
    SendMessage,
    /// `[q:...]` — reserved on the wire alphabet; not implemented by the
    /// broker, dispatching it yields `FailUnknownRequest`.
    QueryMessage,
}

/// One caller transaction, tagged with the originating slot.
///
/// Parameters are clamped to the wire field limits before the record is
/// queued.
#[derive(Debug)]
pub struct CallRequest {
    /// What to ask the server.
    pub kind: CallKind,
    /// Slot correlation tag; validated against the live slot before the
    /// transaction and again at delivery.
    pub correlation: Correlation,
    /// Recipient identifier.
    pub recipient: String,
    /// Message text (send only).
    pub message: String,
    /// Caller identifier (send only).
    pub caller_id: String,
}

impl CallRequest {
    /// A verify-recipient record.
    pub fn verify(correlation: Correlation, recipient: &str) -> CallRequest {
        CallRequest {
            kind: CallKind::VerifyRecipient,
            correlation,
            recipient: crate::codec::clamp_param(recipient).to_owned(),
            message: String::new(),
            caller_id: String::new(),
        }
    }

    /// A send-message record.
    pub fn send(
        correlation: Correlation,
        recipient: &str,
        message: &str,
        caller_id: &str,
    ) -> CallRequest {
        CallRequest {
            kind: CallKind::SendMessage,
            correlation,
            recipient: crate::codec::clamp_param(recipient).to_owned(),
            message: crate::codec::clamp_param(message).to_owned(),
            caller_id: crate::codec::clamp_param(caller_id).to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PARAM_MAX;

    fn correlation() -> Correlation {
        Correlation {
            index: 0,
            generation: 0,
        }
    }

    #[test]
    fn records_clamp_parameters() {
        let long = "y".repeat(PARAM_MAX * 2);
        let call = CallRequest::send(correlation(), &long, &long, &long);
        assert_eq!(call.recipient.len(), PARAM_MAX);
        assert_eq!(call.message.len(), PARAM_MAX);
        assert_eq!(call.caller_id.len(), PARAM_MAX);
    }

    #[test]
    fn verify_record_has_empty_send_fields() {
        let call = CallRequest::verify(correlation(), "alice");
        assert_eq!(call.kind, CallKind::VerifyRecipient);
        assert_eq!(call.recipient, "alice");
        assert!(call.message.is_empty());
        assert!(call.caller_id.is_empty());
    }
}
