// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Request/response correlation: responses bypass ordinary matching, at
//! most one outcome is delivered per request id, and failures surface as
//! synthesized errors.

use troupe_core::{
    ActorId, ActorSystem, Address, Behavior, Error, ExitReason, HandlerOutcome, SystemConfig,
};

use tokio::sync::mpsc;

use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_request_receives_reply() {
    let system = ActorSystem::new(SystemConfig::default()).unwrap();

    let target = system.spawn(|_ctx| {
        Behavior::new().on::<(String,), _>(|ctx, payload| {
            if payload.get::<String>(0).map(String::as_str) == Some("ping") {
                let _ = ctx.reply(("pong".to_owned(),));
            }
        })
    });

    let response = target
        .request(("ping".to_owned(),), Some(Duration::from_millis(500)))
        .receive()
        .await
        .expect("target answers in time");
    assert_eq!(response.get::<String>(0).map(String::as_str), Some("pong"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_silent_target_times_out_exactly_once() {
    let system = ActorSystem::new(SystemConfig::default()).unwrap();

    let target = system.spawn(|_ctx| {
        // Accepts everything, answers nothing.
        Behavior::new().catch_all(|_ctx, _envelope| HandlerOutcome::Handled)
    });

    let result = target
        .request(("ping".to_owned(),), Some(Duration::from_millis(100)))
        .receive()
        .await;
    assert_eq!(result.unwrap_err(), Error::RequestTimeout);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_request_to_missing_actor_is_receiver_down() {
    let system = ActorSystem::new(SystemConfig::default()).unwrap();

    let nowhere = Address::new(system.node_id(), ActorId(0xdead_beef));
    let result = system
        .request(nowhere, ("ping".to_owned(),), Some(Duration::from_secs(1)))
        .receive()
        .await;
    assert_eq!(result.unwrap_err(), Error::ReceiverDown);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_request_to_exited_actor_is_receiver_down() {
    let system = ActorSystem::new(SystemConfig::default()).unwrap();

    let target = system.spawn(|ctx| {
        ctx.quit(ExitReason::Normal);
        Behavior::new()
    });
    tokio::time::timeout(Duration::from_secs(5), system.await_all_actors_done())
        .await
        .expect("target exits");

    let result = target
        .request(("ping".to_owned(),), Some(Duration::from_secs(1)))
        .receive()
        .await;
    assert_eq!(result.unwrap_err(), Error::ReceiverDown);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_duplicate_replies_deliver_at_most_once() {
    let system = ActorSystem::new(SystemConfig::default()).unwrap();

    let target = system.spawn(|_ctx| {
        Behavior::new().on::<(i32,), _>(|ctx, payload| {
            let value = *payload.get::<i32>(0).unwrap_or(&0);
            // The second reply hits an already-consumed request slot and
            // is dropped.
            let _ = ctx.reply((value * 2,));
            let _ = ctx.reply((value * 3,));
        })
    });

    let response = target
        .request((21i32,), Some(Duration::from_millis(500)))
        .receive()
        .await
        .expect("first reply wins");
    assert_eq!(response.get::<i32>(0), Some(&42));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reply_to_anonymous_sender_fails() {
    let system = ActorSystem::new(SystemConfig::default()).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel::<bool>();

    let target = system.spawn(move |_ctx| {
        Behavior::new().on::<(i32,), _>(move |ctx, _payload| {
            let _ = tx.send(ctx.reply((0i32,)).is_err());
        })
    });

    // `ActorRef::send` is anonymous: there is nobody to answer.
    target.send((1i32,)).unwrap();
    let failed = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("handler ran")
        .expect("channel open");
    assert!(failed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_event_actor_request_then_continuation() {
    let system = ActorSystem::new(SystemConfig::default()).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel::<Result<i32, Error>>();

    let doubler = system.spawn(|_ctx| {
        Behavior::new().on::<(i32,), _>(|ctx, payload| {
            let value = *payload.get::<i32>(0).unwrap_or(&0);
            let _ = ctx.reply((value * 2,));
        })
    });

    let doubler_addr = doubler.address();
    let caller_tx = tx.clone();
    let _caller = system.spawn(move |ctx| {
        ctx.request_then(
            doubler_addr,
            (5i32,),
            Some(Duration::from_secs(1)),
            move |ctx, result| {
                let _ = caller_tx.send(result.map(|p| *p.get::<i32>(0).unwrap_or(&0)));
                ctx.quit(ExitReason::Normal);
            },
        );
        Behavior::new().catch_all(|_ctx, _env| HandlerOutcome::Skipped)
    });

    let result = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("continuation runs")
        .expect("channel open");
    assert_eq!(result.unwrap(), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_request_then_timeout_is_synthesized() {
    let system = ActorSystem::new(SystemConfig::default()).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel::<Result<i32, Error>>();

    let silent = system.spawn(|_ctx| {
        Behavior::new().catch_all(|_ctx, _envelope| HandlerOutcome::Handled)
    });

    let silent_addr = silent.address();
    let _caller = system.spawn(move |ctx| {
        ctx.request_then(
            silent_addr,
            (5i32,),
            Some(Duration::from_millis(80)),
            move |ctx, result| {
                let _ = tx.send(result.map(|p| *p.get::<i32>(0).unwrap_or(&0)));
                ctx.quit(ExitReason::Normal);
            },
        );
        Behavior::new().catch_all(|_ctx, _env| HandlerOutcome::Skipped)
    });

    let result = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timeout continuation runs")
        .expect("channel open");
    assert_eq!(result.unwrap_err(), Error::RequestTimeout);
}
