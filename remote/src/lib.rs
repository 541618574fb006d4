// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Troupe remote
//!
//! Distribution layer of the troupe actor runtime: the Binary Actor
//! System Protocol (BASP) carries messages between nodes over a framed
//! byte-stream transport and maintains transparent remote-actor proxies
//! with monitoring semantics.
//!
//! Install a [`Middleman`] next to an actor system to make it reachable:
//! published actors accept connections, `remote_actor` yields proxies
//! that behave like local actors, and exits propagate across the wire as
//! `kill_proxy` notifications.

mod codec;
mod connection;
mod error;
mod group;
mod header;
mod middleman;
mod proxy;
mod routing;
mod transport;

pub use codec::{BaspCodec, Frame, MAX_PAYLOAD_SIZE};
pub use connection::{ConnState, ConnectionHandle};
pub use error::Error;
pub use header::{flags, Header, Operation, HEADER_SIZE};
pub use middleman::Middleman;
pub use proxy::{Namespace, ProxyActor};
pub use routing::{ConnId, RoutingTable};
pub use transport::{BoxedStream, IoStream, Listener, MemTransport, TcpTransport, Transport};
