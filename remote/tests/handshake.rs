// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Handshake discipline: self-connections are rejected and the first
//! frame of each side must be the proper handshake.

use troupe_core::{ActorSystem, Address, Behavior, HandlerOutcome, SystemConfig};
use troupe_remote::{
    flags, BaspCodec, Frame, Header, MemTransport, Middleman, Operation, Transport,
};

use futures::{SinkExt, StreamExt};
use tokio_util::codec::Framed;
use tracing_test::traced_test;

use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[traced_test]
async fn test_self_connection_is_rejected() {
    let transport = MemTransport::default();
    let system = ActorSystem::new(SystemConfig::default()).unwrap();
    let middleman = Middleman::new(&system, transport.clone());

    let actor = system.spawn(|_ctx| {
        Behavior::new().catch_all(|_ctx, _env| HandlerOutcome::Handled)
    });
    let port = middleman.publish(&actor, 0, None).await.unwrap();

    // Connecting back to the same node must fail: the handshake carries
    // our own node id.
    let result = middleman.remote_actor("self", port).await;
    assert!(result.is_err());

    // The violation is diagnosed, not silently swallowed.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(logs_contain("self connection"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_server_closes_on_bad_first_frame() {
    let transport = MemTransport::default();
    let system = ActorSystem::new(SystemConfig::default()).unwrap();
    let middleman = Middleman::new(&system, transport.clone());

    let actor = system.spawn(|_ctx| {
        Behavior::new().catch_all(|_ctx, _env| HandlerOutcome::Handled)
    });
    let port = middleman.publish(&actor, 0, None).await.unwrap();

    let stream = transport.connect("raw", port).await.unwrap();
    let mut framed = Framed::new(stream, BaspCodec::new());

    // The server speaks first.
    let hello = tokio::time::timeout(Duration::from_secs(2), framed.next())
        .await
        .expect("server handshake arrives")
        .expect("stream open")
        .expect("valid frame");
    assert_eq!(hello.header.op, Operation::ServerHandshake);
    assert_eq!(hello.header.source.node, system.node_id());
    assert_eq!(hello.header.source.actor, actor.address().actor);

    // Answer with something that is not a client handshake.
    let bogus = Header {
        op: Operation::DispatchMessage,
        flags: flags::USER,
        source: Address::zero(),
        dest: Address::zero(),
        request_id: 0,
        payload_token: 0,
    };
    framed.send(Frame::control(bogus)).await.unwrap();

    // The connection must be closed on us.
    let eof = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match framed.next().await {
                None => break true,
                Some(Err(_)) => break true,
                Some(Ok(_)) => {}
            }
        }
    })
    .await
    .expect("server closes the connection");
    assert!(eof);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_handshake_after_ready_closes_the_connection() {
    let transport = MemTransport::default();
    let system = ActorSystem::new(SystemConfig::default()).unwrap();
    let middleman = Middleman::new(&system, transport.clone());

    let actor = system.spawn(|_ctx| {
        Behavior::new().catch_all(|_ctx, _env| HandlerOutcome::Handled)
    });
    let port = middleman.publish(&actor, 0, None).await.unwrap();

    let stream = transport.connect("raw", port).await.unwrap();
    let mut framed = Framed::new(stream, BaspCodec::new());

    let hello = tokio::time::timeout(Duration::from_secs(2), framed.next())
        .await
        .expect("server handshake arrives")
        .expect("stream open")
        .expect("valid frame");
    assert_eq!(hello.header.op, Operation::ServerHandshake);

    // Complete the handshake with a fabricated node id, then misbehave.
    let fake_node = troupe_core::NodeId::from_bytes([0x42; troupe_core::NODE_ID_LEN]);
    let client_hello = Header::control(
        Operation::ClientHandshake,
        Address::new(fake_node, troupe_core::ActorId::NONE),
        Address::zero(),
    );
    framed.send(Frame::control(client_hello)).await.unwrap();
    framed
        .send(Frame::control(Header::control(
            Operation::ClientHandshake,
            Address::new(fake_node, troupe_core::ActorId::NONE),
            Address::zero(),
        )))
        .await
        .unwrap();

    let eof = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match framed.next().await {
                None => break true,
                Some(Err(_)) => break true,
                Some(Ok(_)) => {}
            }
        }
    })
    .await
    .expect("server closes the connection");
    assert!(eof);
}
