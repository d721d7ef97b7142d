//! Wire codec for the Sparkgap server protocol.
//!
//! Requests are bracket-delimited text, one message per write:
//!
//! - Verify: `[v:<client_id>,<recipient>]`
//! - Send:   `[s:<client_id>,<tag><correlation_hex8>,<recipient>,<message>,<caller_id>]`
//! - Ping:   `[p:<client_id>]`
//!
//! The server answers every request with exactly one byte, enumerated in
//! [`ResponseCode`]. The broker passes server-originated bytes through
//! verbatim; the synthesized failure codes share the same alphabet.
//!
//! Everything here is a pure function over small value types; the socket is
//! owned elsewhere.

/// Maximum length in bytes of a request text parameter (recipient, message,
/// caller id).
pub const PARAM_MAX: usize = 29;

/// Maximum length in bytes of the client identifier.
pub const CLIENT_ID_MAX: usize = 19;

/// Response byte alphabet exchanged with the server, plus the locally
/// synthesized failure codes.
///
/// Server-originated codes are passed through unmodified; the broker never
/// interprets success vs. failure itself. `FailSystemUnavailable`,
/// `FailUnknownRequest`, `FailInternal` and `FailHangup` are also synthesized
/// locally (connection loss, unrecognized request code, timeout, caller
/// hangup).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    /// Request succeeded.
    Success,
    /// Message accepted and queued for delivery.
    SuccessQueued,
    /// Message delivered to the recipient.
    SuccessDelivered,
    /// Message read by the recipient.
    SuccessRead,
    /// Recipient does not exist.
    FailRecipientNotFound,
    /// Recipient exists but is disabled.
    FailRecipientDisabled,
    /// No server connection, or the transaction failed in transit.
    FailSystemUnavailable,
    /// The server rejected our client identifier.
    FailInvalidClient,
    /// The request code was not recognized.
    FailUnknownRequest,
    /// Local failure: timeout, broken mailbox, or dead event source.
    FailInternal,
    /// The call hung up while waiting for the response.
    FailHangup,
}

impl ResponseCode {
    /// The wire byte for this code.
    pub const fn byte(self) -> u8 {
        match self {
            ResponseCode::Success => b'0',
            ResponseCode::SuccessQueued => b'a',
            ResponseCode::SuccessDelivered => b'b',
            ResponseCode::SuccessRead => b'c',
            ResponseCode::FailRecipientNotFound => b'1',
            ResponseCode::FailRecipientDisabled => b'2',
            ResponseCode::FailSystemUnavailable => b'3',
            ResponseCode::FailInvalidClient => b'4',
            ResponseCode::FailUnknownRequest => b'5',
            ResponseCode::FailInternal => b'8',
            ResponseCode::FailHangup => b'9',
        }
    }

    /// Decode a wire byte. Bytes outside the alphabet decode to
    /// [`ResponseCode::FailInternal`].
    pub const fn from_byte(byte: u8) -> ResponseCode {
        match byte {
            b'0' => ResponseCode::Success,
            b'a' => ResponseCode::SuccessQueued,
            b'b' => ResponseCode::SuccessDelivered,
            b'c' => ResponseCode::SuccessRead,
            b'1' => ResponseCode::FailRecipientNotFound,
            b'2' => ResponseCode::FailRecipientDisabled,
            b'3' => ResponseCode::FailSystemUnavailable,
            b'4' => ResponseCode::FailInvalidClient,
            b'5' => ResponseCode::FailUnknownRequest,
            b'9' => ResponseCode::FailHangup,
            _ => ResponseCode::FailInternal,
        }
    }

    /// Whether this is one of the success codes.
    pub const fn is_success(self) -> bool {
        matches!(
            self,
            ResponseCode::Success
                | ResponseCode::SuccessQueued
                | ResponseCode::SuccessDelivered
                | ResponseCode::SuccessRead
        )
    }

    /// Short status label for surfacing to the calling environment.
    pub const fn label(self) -> &'static str {
        match self {
            ResponseCode::Success => "OK",
            ResponseCode::SuccessQueued => "OK_QUEUED",
            ResponseCode::SuccessDelivered => "OK_DELIVERED",
            ResponseCode::SuccessRead => "OK_READ",
            ResponseCode::FailRecipientNotFound => "RECIPIENT_INVALID",
            ResponseCode::FailRecipientDisabled => "RECIPIENT_DISABLED",
            ResponseCode::FailSystemUnavailable => "SYSTEM_UNAVAIL",
            ResponseCode::FailInvalidClient => "CLIENT_INVALID",
            ResponseCode::FailUnknownRequest => "UNKNOWN_REQ",
            ResponseCode::FailInternal => "ERROR_INTERNAL",
            ResponseCode::FailHangup => "HANGUP",
        }
    }
}

/// Per-process tag base embedded in outbound message tags.
///
/// Formatted as `m<pid mod 256, hex2>-<start time, hex8>-`. Together with the
/// correlation tag appended by [`encode_send`], this makes message tags unique
/// across process restarts.
#[derive(Debug, Clone)]
pub struct TagBase(String);

impl TagBase {
    /// Build the tag base for this process.
    pub fn new() -> TagBase {
        let started = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        TagBase::from_parts(std::process::id(), started)
    }

    /// Build a tag base from explicit parts.
    pub fn from_parts(pid: u32, started: u32) -> TagBase {
        TagBase(format!("m{:02x}-{:08x}-", pid % 256, started))
    }

    /// The tag base text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TagBase {
    fn default() -> Self {
        TagBase::new()
    }
}

impl std::fmt::Display for TagBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Truncate a request parameter to the wire field limit, on a UTF-8 boundary.
pub fn clamp_param(s: &str) -> &str {
    truncate_on_boundary(s, PARAM_MAX)
}

/// Truncate a client identifier to the wire field limit, on a UTF-8 boundary.
pub fn clamp_client_id(s: &str) -> &str {
    truncate_on_boundary(s, CLIENT_ID_MAX)
}

fn truncate_on_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Encode a verify-recipient request.
pub fn encode_verify(client_id: &str, recipient: &str) -> String {
    format!("[v:{client_id},{recipient}]")
}

/// Encode a send-message request.
///
/// `wire_tag` is the correlation tag (slot index in the low byte, generation
/// above it), rendered as eight hex digits after the process tag base.
pub fn encode_send(
    client_id: &str,
    tag_base: &TagBase,
    wire_tag: u32,
    recipient: &str,
    message: &str,
    caller_id: &str,
) -> String {
    format!("[s:{client_id},{tag_base}{wire_tag:08x},{recipient},{message},{caller_id}]")
}

/// Encode a keepalive ping.
pub fn encode_ping(client_id: &str) -> String {
    format!("[p:{client_id}]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_bytes_round_trip() {
        let codes = [
            ResponseCode::Success,
            ResponseCode::SuccessQueued,
            ResponseCode::SuccessDelivered,
            ResponseCode::SuccessRead,
            ResponseCode::FailRecipientNotFound,
            ResponseCode::FailRecipientDisabled,
            ResponseCode::FailSystemUnavailable,
            ResponseCode::FailInvalidClient,
            ResponseCode::FailUnknownRequest,
            ResponseCode::FailInternal,
            ResponseCode::FailHangup,
        ];
        for code in codes {
            assert_eq!(ResponseCode::from_byte(code.byte()), code);
        }
    }

    #[test]
    fn unknown_response_byte_decodes_to_internal() {
        assert_eq!(ResponseCode::from_byte(b'z'), ResponseCode::FailInternal);
        assert_eq!(ResponseCode::from_byte(0xff), ResponseCode::FailInternal);
    }

    #[test]
    fn success_classification() {
        assert!(ResponseCode::SuccessQueued.is_success());
        assert!(!ResponseCode::FailHangup.is_success());
    }

    #[test]
    fn verify_format() {
        assert_eq!(encode_verify("acme", "alice"), "[v:acme,alice]");
    }

    #[test]
    fn send_format() {
        let tag = TagBase::from_parts(0x1_2a, 0x5f00_0001);
        assert_eq!(tag.as_str(), "m2a-5f000001-");
        let wire = encode_send("acme", &tag, 0x0000_0102, "alice", "hi", "bob");
        assert_eq!(wire, "[s:acme,m2a-5f000001-00000102,alice,hi,bob]");
    }

    #[test]
    fn ping_format() {
        assert_eq!(encode_ping("acme"), "[p:acme]");
    }

    #[test]
    fn clamp_respects_limits() {
        let long = "x".repeat(PARAM_MAX + 10);
        assert_eq!(clamp_param(&long).len(), PARAM_MAX);
        assert_eq!(clamp_param("short"), "short");

        let id = "c".repeat(CLIENT_ID_MAX + 1);
        assert_eq!(clamp_client_id(&id).len(), CLIENT_ID_MAX);
    }

    #[test]
    fn clamp_never_splits_a_char() {
        // 'é' is two bytes; place one across the boundary.
        let s = format!("{}é", "x".repeat(PARAM_MAX - 1));
        let clamped = clamp_param(&s);
        assert_eq!(clamped.len(), PARAM_MAX - 1);
        assert!(clamped.chars().all(|c| c == 'x'));
    }
}
