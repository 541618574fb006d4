// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Troupe core
//!
//! This crate provides the core of the troupe actor runtime: lightweight
//! concurrent entities that communicate exclusively by asynchronous
//! message passing. In response to a message an actor can update its
//! private state, spawn more actors, send more messages and decide how to
//! handle the next message (by changing its behavior).
//!
//! The pieces fit together as follows: a sender enqueues an envelope into
//! the receiver's mailbox; if the receiver was parked it becomes runnable
//! and the scheduler's worker pool picks it up; the worker invokes the top
//! behavior on one message and yields. Links, monitors and exit reasons
//! flow through the same envelopes, and the distribution layer (the
//! `troupe-remote` crate) feeds incoming frames into the very same
//! mailboxes.

mod address;
mod behavior;
mod blocking;
mod cell;
mod context;
mod envelope;
mod error;
mod group;
mod mailbox;
mod payload;
mod registry;
mod runner;
mod scheduler;
mod system;
mod timer;

pub use address::{ActorId, Address, NodeId, NODE_ID_LEN};
pub use behavior::{Behavior, HandlerOutcome, Pattern};
pub use blocking::BlockingContext;
pub use cell::{
    exit_fan_out, AbstractActor, ActorCell, ActorKind, ActorStatus, ExitHook, ResponseHandle,
};
pub use context::{ActorContext, ActorRef};
pub use envelope::{Content, Envelope, MessageId};
pub use error::{Error, ErrorKind, ExitReason};
pub use group::{Group, GroupOp};
pub use mailbox::{EnqueueStatus, Mailbox};
pub use payload::{
    Codec, CodecRegistry, ElementTypes, IntoPayload, JsonCodec, Payload, TypeToken, Typed, Value,
};
pub use registry::Registry;
pub use scheduler::Scheduler;
pub use system::{ActorSystem, RemoteNode, SystemConfig};
pub use timer::Timer;
