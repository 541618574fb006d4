// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Facade for the troupe actor runtime.
//! Re-exports the core actor model (mailboxes, behaviors, scheduling,
//! groups) together with the BASP distribution layer, so applications
//! depend on a single crate.

pub use troupe_core::{
    ActorContext, ActorId, ActorRef, ActorStatus, ActorSystem, Address, Behavior,
    BlockingContext, Codec, CodecRegistry, Content, Envelope, Error as ActorError, ErrorKind,
    ExitReason, Group, GroupOp, HandlerOutcome, IntoPayload, JsonCodec, MessageId, NodeId,
    Pattern, Payload, ResponseHandle, SystemConfig, Typed,
};

pub use troupe_remote::{
    Error as RemoteError, MemTransport, Middleman, TcpTransport, Transport,
};
