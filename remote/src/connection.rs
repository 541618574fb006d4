// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Peer connections
//!
//! One driver task per transport connection. The connection walks the
//! handshake state machine (`await-server-handshake →
//! await-client-handshake → ready → closing`); any protocol error or
//! transport failure moves it to closing, which force-exits the proxies
//! owned by the connection with reason `remote-link-unreachable` and
//! blacklists the failed route.
//!
//! All events of one connection are handled sequentially by its driver,
//! so per-connection state needs no further synchronization beyond the
//! announce set shared with exit hooks.

use crate::codec::{BaspCodec, Frame};
use crate::error::Error;
use crate::header::{flags, Header, Operation};
use crate::middleman::MiddlemanShared;
use crate::routing::ConnId;
use crate::transport::BoxedStream;

use troupe_core::{
    ActorId, Address, CodecRegistry, Content, Envelope, ErrorKind, ExitReason, MessageId,
};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use std::collections::HashSet;
use std::sync::Arc;

/// Connection lifecycle; see the module docs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnState {
    /// Connector side, waiting for the acceptor's first frame.
    AwaitServerHandshake,
    /// Acceptor side, waiting for the connector's first frame.
    AwaitClientHandshake,
    /// Handshake complete; frames flow.
    Ready,
    /// Tearing down.
    Closing,
}

/// Cloneable sending side of a connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnId,
    peer: troupe_core::NodeId,
    tx: mpsc::UnboundedSender<Frame>,
}

impl ConnectionHandle {
    /// The connection id within this middleman.
    pub fn id(&self) -> ConnId {
        self.id
    }

    /// The node on the other end.
    pub fn peer(&self) -> troupe_core::NodeId {
        self.peer
    }

    /// Queues a frame for the writer. Fails once the connection closed.
    pub fn send(&self, frame: Frame) -> Result<(), Error> {
        self.tx.send(frame).map_err(|_| Error::ConnectionClosed)
    }
}

/// Serializes an envelope into a dispatch frame.
///
/// Returns `Ok(None)` for content that never travels (behavior timeouts).
pub(crate) fn encode_envelope(
    codecs: &CodecRegistry,
    envelope: &Envelope,
) -> Result<Option<Frame>, Error> {
    let (content_flags, payload, token, source_override) = match &envelope.content {
        Content::User(payload) => {
            let bytes = codecs.encode_payload(payload)?;
            (flags::USER, Bytes::from(bytes), payload.token().0, None)
        }
        Content::Exit { from, reason } => {
            (flags::EXIT, reason_bytes(reason.code()), 0, Some(*from))
        }
        Content::Down { from, reason } => {
            (flags::DOWN, reason_bytes(reason.code()), 0, Some(*from))
        }
        Content::Error { kind } => (flags::ERROR, reason_bytes(kind.code()), 0, None),
        Content::Timeout { .. } => return Ok(None),
    };
    let source = source_override
        .or(envelope.sender)
        .unwrap_or_else(Address::zero);
    let header = Header {
        op: Operation::DispatchMessage,
        flags: content_flags,
        source,
        dest: envelope.receiver,
        request_id: envelope.mid.0,
        payload_token: token,
    };
    Ok(Some(Frame::new(header, payload)))
}

/// Rebuilds an envelope from an incoming dispatch frame.
pub(crate) fn decode_envelope(codecs: &CodecRegistry, frame: &Frame) -> Result<Envelope, Error> {
    let sender = if frame.header.source.is_zero() {
        None
    } else {
        Some(frame.header.source)
    };
    let content = match frame.header.flags {
        flags::USER => Content::User(codecs.decode_payload(&frame.payload)?),
        flags::EXIT => Content::Exit {
            from: frame.header.source,
            reason: ExitReason::from_code(read_reason(&frame.payload)?),
        },
        flags::DOWN => Content::Down {
            from: frame.header.source,
            reason: ExitReason::from_code(read_reason(&frame.payload)?),
        },
        flags::ERROR => Content::Error {
            kind: ErrorKind::from_code(read_reason(&frame.payload)?),
        },
        other => {
            return Err(Error::Protocol(format!("unknown content flags {}", other)));
        }
    };
    Ok(Envelope {
        sender,
        receiver: frame.header.dest,
        mid: MessageId(frame.header.request_id),
        content,
    })
}

fn reason_bytes(code: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u32(code);
    buf.freeze()
}

fn read_reason(payload: &Bytes) -> Result<u32, Error> {
    if payload.len() < 4 {
        return Err(Error::Protocol("truncated reason payload".to_owned()));
    }
    let mut slice = payload.clone();
    Ok(slice.get_u32())
}

type FramedStream = Framed<BoxedStream, BaspCodec>;

/// Drives an accepted (server-side) connection.
pub(crate) async fn drive_server(
    shared: Arc<MiddlemanShared>,
    stream: BoxedStream,
    published: ActorId,
) {
    let id = shared.next_conn_id();
    let mut framed = Framed::new(stream, BaspCodec::new());
    let mut state = ConnState::AwaitClientHandshake;

    let result = server_handshake(&shared, &mut framed, id, published, &mut state).await;
    finish(shared, framed, id, state, result).await;
}

/// Drives an initiated (client-side) connection. The handshake outcome,
/// peer node id and published actor id, is reported through `ready`.
pub(crate) async fn drive_client(
    shared: Arc<MiddlemanShared>,
    stream: BoxedStream,
    ready: oneshot::Sender<Result<(troupe_core::NodeId, ActorId), Error>>,
) {
    let id = shared.next_conn_id();
    let mut framed = Framed::new(stream, BaspCodec::new());
    let mut state = ConnState::AwaitServerHandshake;

    let result = client_handshake(&shared, &mut framed, id, ready, &mut state).await;
    finish(shared, framed, id, state, result).await;
}

async fn server_handshake(
    shared: &Arc<MiddlemanShared>,
    framed: &mut FramedStream,
    id: ConnId,
    published: ActorId,
    state: &mut ConnState,
) -> Result<(), Error> {
    let local = shared.system.node_id();
    let hello = Header::control(
        Operation::ServerHandshake,
        Address::new(local, published),
        Address::zero(),
    );
    // The payload carries the published interface signature; untyped
    // actors advertise an empty one.
    framed.send(Frame::control(hello)).await?;

    let first = next_frame(framed).await?;
    if first.header.op != Operation::ClientHandshake {
        return Err(Error::Protocol(format!(
            "expected client_handshake as first frame, got {:?}",
            first.header.op
        )));
    }
    let peer = first.header.source.node;
    check_peer(local, peer)?;
    debug!("{}: client handshake from node {}.", id, peer);

    let (tx, rx) = mpsc::unbounded_channel();
    let handle = ConnectionHandle { id, peer, tx };
    shared.register_connection(handle.clone());
    *state = ConnState::Ready;
    run_ready(shared, framed, handle, rx, state).await
}

async fn client_handshake(
    shared: &Arc<MiddlemanShared>,
    framed: &mut FramedStream,
    id: ConnId,
    ready: oneshot::Sender<Result<(troupe_core::NodeId, ActorId), Error>>,
    state: &mut ConnState,
) -> Result<(), Error> {
    let local = shared.system.node_id();
    let first = match next_frame(framed).await {
        Ok(frame) => frame,
        Err(error) => {
            let _ = ready.send(Err(Error::Handshake(error.to_string())));
            return Err(error);
        }
    };
    if first.header.op != Operation::ServerHandshake {
        let error = Error::Protocol(format!(
            "expected server_handshake as first frame, got {:?}",
            first.header.op
        ));
        let _ = ready.send(Err(Error::Handshake(error.to_string())));
        return Err(error);
    }
    let peer = first.header.source.node;
    let published = first.header.source.actor;
    if let Err(error) = check_peer(local, peer) {
        let _ = ready.send(Err(Error::Handshake(error.to_string())));
        return Err(error);
    }

    let hello = Header::control(
        Operation::ClientHandshake,
        Address::new(local, ActorId::NONE),
        Address::zero(),
    );
    framed.send(Frame::control(hello)).await?;
    debug!("{}: server handshake from node {}.", id, peer);

    // Register before reporting readiness: the caller resolves the route
    // as soon as the oneshot fires.
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = ConnectionHandle { id, peer, tx };
    shared.register_connection(handle.clone());
    *state = ConnState::Ready;
    let _ = ready.send(Ok((peer, published)));
    run_ready(shared, framed, handle, rx, state).await
}

fn check_peer(local: troupe_core::NodeId, peer: troupe_core::NodeId) -> Result<(), Error> {
    if peer.is_zero() {
        return Err(Error::Protocol("peer announced the zero node id".to_owned()));
    }
    if peer == local {
        return Err(Error::Protocol(
            "received own node id in peer handshake (self connection)".to_owned(),
        ));
    }
    Ok(())
}

async fn next_frame(framed: &mut FramedStream) -> Result<Frame, Error> {
    match framed.next().await {
        Some(Ok(frame)) => Ok(frame),
        Some(Err(error)) => Err(error),
        None => Err(Error::ConnectionClosed),
    }
}

async fn run_ready(
    shared: &Arc<MiddlemanShared>,
    framed: &mut FramedStream,
    handle: ConnectionHandle,
    mut rx: mpsc::UnboundedReceiver<Frame>,
    state: &mut ConnState,
) -> Result<(), Error> {
    // Local actors this peer holds proxies for.
    let announced: Arc<Mutex<HashSet<ActorId>>> = Arc::new(Mutex::new(HashSet::new()));
    let stop = shared.token.clone();

    let result = loop {
        tokio::select! {
            outgoing = rx.recv() => match outgoing {
                Some(frame) => {
                    if let Err(error) = framed.send(frame).await {
                        break Err(error);
                    }
                }
                None => break Ok(()),
            },
            incoming = framed.next() => match incoming {
                Some(Ok(frame)) => {
                    if let Err(error) = handle_frame(shared, &handle, &announced, frame) {
                        break Err(error);
                    }
                }
                Some(Err(error)) => break Err(error),
                None => break Err(Error::ConnectionClosed),
            },
            _ = stop.cancelled() => break Ok(()),
        }
    };
    *state = ConnState::Closing;
    result
}

fn handle_frame(
    shared: &Arc<MiddlemanShared>,
    handle: &ConnectionHandle,
    announced: &Arc<Mutex<HashSet<ActorId>>>,
    frame: Frame,
) -> Result<(), Error> {
    let local = shared.system.node_id();
    match frame.header.op {
        Operation::DispatchMessage => {
            let source_node = frame.header.source.node;
            if !source_node.is_zero() && source_node != handle.peer() && source_node != local {
                // Learn an indirect route through this connection.
                shared.routing.add_hop(source_node, handle.id());
            }
            if frame.header.dest.node != local {
                shared.forward_frame(handle.id(), frame);
                return Ok(());
            }
            let envelope = decode_envelope(shared.system.codecs(), &frame)?;
            shared.system.deliver(Arc::new(envelope));
            Ok(())
        }
        Operation::AnnounceProxy => {
            handle_announce(shared, handle, announced, frame.header.dest.actor);
            Ok(())
        }
        Operation::KillProxy => {
            let reason = ExitReason::from_code(read_reason(&frame.payload)?);
            shared
                .namespace(handle.peer())
                .kill(frame.header.source.actor, reason);
            Ok(())
        }
        Operation::AddMonitor => {
            let watcher = frame.header.source;
            let target = frame.header.dest.actor;
            let down_reason = match shared.system.registry().get(target) {
                Some(actor) => match actor.add_monitor(watcher) {
                    Ok(()) => None,
                    Err(reason) => Some(reason),
                },
                None => Some(ExitReason::Normal),
            };
            if let Some(reason) = down_reason {
                // The watched actor is already gone: notify at once.
                let mut payload = BytesMut::with_capacity(4);
                payload.put_u32(reason.code());
                let header = Header {
                    op: Operation::DispatchMessage,
                    flags: flags::DOWN,
                    source: Address::new(local, target),
                    dest: watcher,
                    request_id: 0,
                    payload_token: 0,
                };
                handle.send(Frame::new(header, payload.freeze()))?;
            }
            Ok(())
        }
        Operation::KillMonitorAck => {
            announced.lock().remove(&frame.header.dest.actor);
            Ok(())
        }
        Operation::ServerHandshake | Operation::ClientHandshake => Err(Error::Protocol(
            "handshake frame after the connection became ready".to_owned(),
        )),
    }
}

/// Handles "the peer now holds a proxy for local actor `aid`": arrange a
/// `kill_proxy` notification for the actor's exit.
fn handle_announce(
    shared: &Arc<MiddlemanShared>,
    handle: &ConnectionHandle,
    announced: &Arc<Mutex<HashSet<ActorId>>>,
    aid: ActorId,
) {
    let local = shared.system.node_id();
    let from = Address::new(local, aid);
    let kill_frame = move |reason: ExitReason, peer: troupe_core::NodeId| {
        let header = Header {
            op: Operation::KillProxy,
            flags: 0,
            source: from,
            dest: Address::new(peer, ActorId::NONE),
            request_id: 0,
            payload_token: 0,
        };
        Frame::new(header, reason_bytes(reason.code()))
    };

    match shared.system.registry().get(aid) {
        Some(actor) => {
            announced.lock().insert(aid);
            let handle = handle.clone();
            let announced = announced.clone();
            actor.attach_on_exit(Box::new(move |reason| {
                if announced.lock().remove(&aid) {
                    let _ = handle.send(kill_frame(reason, handle.peer()));
                }
            }));
        }
        None => {
            debug!("Announce for unknown actor {}; replying kill_proxy.", aid);
            let _ = handle.send(kill_frame(ExitReason::Normal, handle.peer()));
        }
    }
}

async fn finish(
    shared: Arc<MiddlemanShared>,
    framed: FramedStream,
    id: ConnId,
    state: ConnState,
    result: Result<(), Error>,
) {
    if let Err(error) = &result {
        warn!("{} closing in state {:?}: {}.", id, state, error);
    } else {
        debug!("{} closed.", id);
    }
    drop(framed);
    shared.connection_closed(id);
}
