// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Message envelopes
//!
//! An [`Envelope`] is the immutable, reference-counted unit of
//! communication: optional sender, receiver, a [`MessageId`] correlating
//! requests with responses, and the content. Besides user payloads, the
//! same envelope type carries the runtime's system notifications (exit
//! signals, down notifications, behavior timeouts and synthesized request
//! errors), so local and remote paths feed one mailbox machinery.

use crate::address::Address;
use crate::error::{ErrorKind, ExitReason};
use crate::payload::Payload;

use std::sync::Arc;

/// Correlates a request with its response.
///
/// Zero means asynchronous (no response expected). A request id is a
/// positive value below the response bit; the paired response id is the
/// same value with the high bit set.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct MessageId(pub u64);

const RESPONSE_BIT: u64 = 1 << 63;

impl MessageId {
    /// The id of an asynchronous message.
    pub const ASYNC: MessageId = MessageId(0);

    /// Builds a request id. `id` must be non-zero.
    pub fn request(id: u64) -> MessageId {
        debug_assert!(id != 0);
        MessageId(id & !RESPONSE_BIT)
    }

    /// True for asynchronous messages.
    pub fn is_async(&self) -> bool {
        self.0 == 0
    }

    /// True for request ids awaiting a response.
    pub fn is_request(&self) -> bool {
        self.0 != 0 && self.0 & RESPONSE_BIT == 0
    }

    /// True for response ids.
    pub fn is_response(&self) -> bool {
        self.0 & RESPONSE_BIT != 0
    }

    /// The response id paired with this request id.
    pub fn response_id(&self) -> MessageId {
        MessageId(self.0 | RESPONSE_BIT)
    }

    /// The request part shared by a request/response pair.
    pub fn request_part(&self) -> u64 {
        self.0 & !RESPONSE_BIT
    }
}

/// Content of an envelope.
#[derive(Clone, Debug)]
pub enum Content {
    /// Ordinary user message.
    User(Payload),
    /// Exit signal propagated over a link.
    Exit {
        /// The exiting actor.
        from: Address,
        /// Its exit reason.
        reason: ExitReason,
    },
    /// Down notification delivered to a monitor.
    Down {
        /// The exited actor.
        from: Address,
        /// Its exit reason.
        reason: ExitReason,
    },
    /// Behavior timeout; `id` must equal the currently armed timeout id.
    Timeout {
        /// Arming sequence number.
        id: u64,
    },
    /// Synthesized error response for a request that cannot complete.
    Error {
        /// What went wrong.
        kind: ErrorKind,
    },
}

impl Content {
    /// True for ordinary user messages.
    pub fn is_user(&self) -> bool {
        matches!(self, Content::User(_))
    }
}

/// Immutable message envelope.
#[derive(Clone, Debug)]
pub struct Envelope {
    /// Sending actor; `None` for anonymous sends.
    pub sender: Option<Address>,
    /// Receiving actor.
    pub receiver: Address,
    /// Request/response correlation id.
    pub mid: MessageId,
    /// The carried content.
    pub content: Content,
}

impl Envelope {
    /// Builds a user-message envelope.
    pub fn user(
        sender: Option<Address>,
        receiver: Address,
        mid: MessageId,
        payload: Payload,
    ) -> Arc<Envelope> {
        Arc::new(Envelope { sender, receiver, mid, content: Content::User(payload) })
    }

    /// Builds a system envelope (exit, down, timeout, error).
    pub fn system(receiver: Address, content: Content) -> Arc<Envelope> {
        Arc::new(Envelope { sender: None, receiver, mid: MessageId::ASYNC, content })
    }

    /// Builds the synthesized error response for a failed request.
    pub fn error_response(
        original: &Envelope,
        kind: ErrorKind,
    ) -> Option<Arc<Envelope>> {
        let requester = original.sender?;
        original.mid.is_request().then(|| {
            Arc::new(Envelope {
                sender: Some(original.receiver),
                receiver: requester,
                mid: original.mid.response_id(),
                content: Content::Error { kind },
            })
        })
    }

    /// The user payload, if this is a user message.
    pub fn payload(&self) -> Option<&Payload> {
        match &self.content {
            Content::User(payload) => Some(payload),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::address::{ActorId, NodeId};
    use crate::payload::IntoPayload;

    fn addr(id: u64) -> Address {
        Address::new(NodeId::from_bytes([3u8; crate::address::NODE_ID_LEN]), ActorId(id))
    }

    #[test]
    fn test_message_id_pairing() {
        let req = MessageId::request(42);
        assert!(req.is_request());
        assert!(!req.is_response());
        let rsp = req.response_id();
        assert!(rsp.is_response());
        assert_eq!(rsp.request_part(), req.request_part());
        assert!(MessageId::ASYNC.is_async());
    }

    #[test]
    fn test_error_response_only_for_requests() {
        let req = Envelope::user(
            Some(addr(1)),
            addr(2),
            MessageId::request(9),
            (1i32,).into_payload(),
        );
        let bounce = Envelope::error_response(&req, ErrorKind::ReceiverDown).unwrap();
        assert_eq!(bounce.receiver, addr(1));
        assert_eq!(bounce.mid, MessageId::request(9).response_id());

        let plain = Envelope::user(Some(addr(1)), addr(2), MessageId::ASYNC, Payload::empty());
        assert!(Envelope::error_response(&plain, ErrorKind::ReceiverDown).is_none());

        let anon = Envelope::user(None, addr(2), MessageId::request(9), Payload::empty());
        assert!(Envelope::error_response(&anon, ErrorKind::ReceiverDown).is_none());
    }
}
