// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Two actor systems wired through the in-memory transport: transparent
//! remote sends, cross-node request/response and remote monitoring.

use troupe_core::{
    ActorSystem, Address, Behavior, ExitReason, SystemConfig,
};
use troupe_remote::{MemTransport, Middleman};

use tokio::sync::mpsc;

use std::time::Duration;

fn two_nodes() -> (ActorSystem, Middleman, ActorSystem, Middleman, MemTransport) {
    let transport = MemTransport::default();
    let sys_x = ActorSystem::new(SystemConfig::default()).unwrap();
    let mm_x = Middleman::new(&sys_x, transport.clone());
    let sys_y = ActorSystem::new(SystemConfig::default()).unwrap();
    let mm_y = Middleman::new(&sys_y, transport.clone());
    (sys_x, mm_x, sys_y, mm_y, transport)
}

fn spawn_echo(system: &ActorSystem) -> troupe_core::ActorRef {
    system.spawn(|_ctx| {
        Behavior::new().on::<(String,), _>(|ctx, payload| {
            if payload.get::<String>(0).map(String::as_str) == Some("ping") {
                let _ = ctx.reply(("pong".to_owned(),));
            }
        })
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_remote_request_round_trip() {
    let (sys_x, mm_x, _sys_y, mm_y, _transport) = two_nodes();

    let echo = spawn_echo(&sys_x);
    let port = mm_x.publish(&echo, 0, None).await.unwrap();

    let remote_echo = mm_y.remote_actor("x", port).await.unwrap();
    assert_eq!(remote_echo.address(), echo.address());

    let response = remote_echo
        .request(("ping".to_owned(),), Some(Duration::from_secs(2)))
        .receive()
        .await
        .expect("remote actor answers");
    assert_eq!(response.get::<String>(0).map(String::as_str), Some("pong"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_remote_monitor_sees_the_kill() {
    let (sys_x, mm_x, sys_y, mm_y, _transport) = two_nodes();

    let subject = spawn_echo(&sys_x);
    let port = mm_x.publish(&subject, 0, None).await.unwrap();
    let remote_subject = mm_y.remote_actor("x", port).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel::<(Address, ExitReason)>();
    let watched = remote_subject.clone();
    let _watcher = sys_y.spawn(move |ctx| {
        ctx.monitor(&watched);
        Behavior::new().on_down(move |_ctx, from, reason| {
            let _ = tx.send((from, reason));
        })
    });

    // Let the monitor and the proxy announcement settle.
    tokio::time::sleep(Duration::from_millis(200)).await;
    subject.kill();

    let (from, reason) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("down notification crosses the wire")
        .expect("channel open");
    assert_eq!(from, subject.address());
    assert_eq!(reason, ExitReason::Kill);

    // Exactly one notification.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_proxies_are_unique_while_live() {
    let (sys_x, mm_x, sys_y, mm_y, _transport) = two_nodes();

    let echo = spawn_echo(&sys_x);
    let port = mm_x.publish(&echo, 0, None).await.unwrap();
    let remote_echo = mm_y.remote_actor("x", port).await.unwrap();

    let first = sys_y.resolve(remote_echo.address()).expect("proxy resolves");
    let second = sys_y.resolve(remote_echo.address()).expect("proxy resolves");
    assert!(std::sync::Arc::ptr_eq(&first, &second));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_lost_connection_kills_proxies_with_remote_link_unreachable() {
    let (sys_x, mm_x, sys_y, mm_y, _transport) = two_nodes();

    let subject = spawn_echo(&sys_x);
    let port = mm_x.publish(&subject, 0, None).await.unwrap();
    let remote_subject = mm_y.remote_actor("x", port).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel::<ExitReason>();
    let watched = remote_subject.clone();
    let _watcher = sys_y.spawn(move |ctx| {
        ctx.monitor(&watched);
        Behavior::new().on_down(move |_ctx, _from, reason| {
            let _ = tx.send(reason);
        })
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    // Tearing the server's middleman down closes the connection.
    mm_x.stop();

    let reason = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("proxy exit on connection loss")
        .expect("channel open");
    assert_eq!(reason, ExitReason::RemoteLinkUnreachable);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_publishing_a_taken_port_is_an_error() {
    let (sys_x, mm_x, _sys_y, _mm_y, _transport) = two_nodes();

    let first = spawn_echo(&sys_x);
    let second = spawn_echo(&sys_x);
    let port = mm_x.publish(&first, 0, None).await.unwrap();
    assert!(mm_x.publish(&second, port, None).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unpublish_stops_new_connections() {
    let (sys_x, mm_x, _sys_y, mm_y, _transport) = two_nodes();

    let echo = spawn_echo(&sys_x);
    let port = mm_x.publish(&echo, 0, None).await.unwrap();
    mm_x.unpublish(&echo, port).unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(mm_y.remote_actor("x", port).await.is_err());
}
