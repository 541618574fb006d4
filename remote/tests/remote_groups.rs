// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Remote groups: a server-side group with local and remote reflectors.
//! Mirrors the classic 5+2 reflector scenario: five subscribers join
//! through a proxy group on a second node, two locally; one publish
//! yields seven reflections, and killing every reflector yields seven
//! down notifications at the observer.

use troupe_core::{
    ActorRef, ActorSystem, Address, Behavior, ExitReason, SystemConfig,
};
use troupe_remote::{MemTransport, Middleman};

use tokio::sync::mpsc;

use std::time::Duration;

fn spawn_reflector(system: &ActorSystem) -> ActorRef {
    system.spawn(|_ctx| {
        Behavior::new().on::<(String, f64), _>(|ctx, payload| {
            let text = payload.get::<String>(0).cloned().unwrap_or_default();
            let value = *payload.get::<f64>(1).unwrap_or(&0.0);
            let _ = ctx.reply((text, value));
        })
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reflector_group_of_five_plus_two() {
    let transport = MemTransport::default();

    let server = ActorSystem::new(SystemConfig::default()).unwrap();
    let mm_server = Middleman::new(&server, transport.clone());
    let client = ActorSystem::new(SystemConfig::default()).unwrap();
    let mm_client = Middleman::new(&client, transport.clone());

    // The server's group directory, published for remote lookup.
    let group = server.group("reflectors:demo");
    let port = mm_server.publish_groups(0, None).await.unwrap();

    let mut local_reflectors = Vec::new();
    for _ in 0..2 {
        let reflector = spawn_reflector(&server);
        group.join(&reflector).unwrap();
        local_reflectors.push(reflector);
    }

    let remote_group = mm_client
        .remote_group("reflectors", "demo", "server", port)
        .await
        .unwrap();
    let mut remote_reflectors = Vec::new();
    for _ in 0..5 {
        let reflector = spawn_reflector(&client);
        remote_group.join(&reflector).unwrap();
        remote_reflectors.push(reflector);
    }

    // Allow joins (including the uplink's remote join) to settle.
    tokio::time::sleep(Duration::from_millis(300)).await;

    // The observer publishes once and collects reflections.
    let (tx, mut rx) = mpsc::unbounded_channel::<Address>();
    let group_addr = group.address();
    let _observer = server.spawn(move |ctx| {
        ctx.send_to(group_addr, ("hello reflectors!".to_owned(), 5.0f64))
            .unwrap();
        Behavior::new().on::<(String, f64), _>(move |ctx, payload| {
            assert_eq!(
                payload.get::<String>(0).map(String::as_str),
                Some("hello reflectors!")
            );
            assert_eq!(payload.get::<f64>(1), Some(&5.0));
            if let Some(sender) = ctx.sender() {
                let _ = tx.send(sender);
            }
        })
    });

    let mut repliers = Vec::new();
    for _ in 0..7 {
        let sender = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("reflection arrives")
            .expect("channel open");
        repliers.push(sender);
    }
    repliers.sort();
    repliers.dedup();
    assert_eq!(repliers.len(), 7, "seven distinct reflectors answered");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(rx.try_recv().is_err(), "no extra reflections");

    // Monitor every reflector from the server side, then kill them all.
    let (down_tx, mut down_rx) = mpsc::unbounded_channel::<ExitReason>();
    let watched: Vec<ActorRef> = repliers
        .iter()
        .map(|addr| {
            let actor = server.resolve(*addr).expect("replier resolves");
            ActorRef::from_abstract(actor, server.clone())
        })
        .collect();
    // Keep the proxy references alive for the whole scenario; dropping
    // the last one would release the remote monitor.
    let watched_by_actor = watched.clone();
    let _watcher = server.spawn(move |ctx| {
        for target in &watched_by_actor {
            ctx.monitor(target);
        }
        Behavior::new().on_down(move |_ctx, _from, reason| {
            let _ = down_tx.send(reason);
        })
    });
    tokio::time::sleep(Duration::from_millis(300)).await;

    for reflector in &local_reflectors {
        reflector.kill();
    }
    for reflector in &remote_reflectors {
        reflector.kill();
    }

    for _ in 0..7 {
        let reason = tokio::time::timeout(Duration::from_secs(5), down_rx.recv())
            .await
            .expect("down notification arrives")
            .expect("channel open");
        assert_eq!(reason, ExitReason::Kill);
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(down_rx.try_recv().is_err(), "exactly seven notifications");
}
