// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Composing actors: a stage that pipes requests through two typed
//! workers, and fails fast once a constituent dies.

use troupe_core::{
    ActorSystem, Behavior, Envelope, Error, ExitReason, IntoPayload, MessageId, SystemConfig,
};

use std::time::Duration;

/// Spawns `f ∘ g` for `g: i32 -> (f64, f64)` and `f: (f64, f64) -> f64`.
fn spawn_composed(system: &ActorSystem) -> (troupe_core::ActorRef, troupe_core::ActorRef, troupe_core::ActorRef) {
    let g = system.spawn(|_ctx| {
        Behavior::new().on::<(i32,), _>(|ctx, payload| {
            let n = *payload.get::<i32>(0).unwrap_or(&0);
            let _ = ctx.reply((f64::from(n) * 2.0, f64::from(n) * 4.0));
        })
    });

    let f = system.spawn(|_ctx| {
        Behavior::new().on::<(f64, f64), _>(|ctx, payload| {
            let a = *payload.get::<f64>(0).unwrap_or(&0.0);
            let b = *payload.get::<f64>(1).unwrap_or(&0.0);
            let _ = ctx.reply((a * b,));
        })
    });

    let g_ref = g.clone();
    let f_ref = f.clone();
    let composed = system.spawn(move |ctx| {
        // The composite lives and dies with its constituents.
        ctx.link(&g_ref);
        ctx.link(&f_ref);
        let g_addr = g_ref.address();
        let f_addr = f_ref.address();
        Behavior::new().on::<(i32,), _>(move |ctx, payload| {
            let input = *payload.get::<i32>(0).unwrap_or(&0);
            let (Some(requester), mid) = (ctx.sender(), current_mid(ctx)) else {
                return;
            };
            let self_addr = ctx.address();
            ctx.request_then(
                g_addr,
                (input,),
                Some(Duration::from_secs(1)),
                move |ctx, stage_one| {
                    let Ok(pair) = stage_one else { return };
                    let a = *pair.get::<f64>(0).unwrap_or(&0.0);
                    let b = *pair.get::<f64>(1).unwrap_or(&0.0);
                    ctx.request_then(
                        f_addr,
                        (a, b),
                        Some(Duration::from_secs(1)),
                        move |ctx, stage_two| {
                            let Ok(product) = stage_two else { return };
                            let value = *product.get::<f64>(0).unwrap_or(&0.0);
                            // Answer the original requester.
                            ctx.system().deliver(Envelope::user(
                                Some(self_addr),
                                requester,
                                mid.response_id(),
                                (value,).into_payload(),
                            ));
                        },
                    );
                },
            );
        })
    });
    (composed, g, f)
}

fn current_mid(ctx: &troupe_core::ActorContext) -> MessageId {
    ctx.current_message_id().unwrap_or(MessageId::ASYNC)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_composed_request_multiplies_stages() {
    let system = ActorSystem::new(SystemConfig::default()).unwrap();
    let (composed, _g, _f) = spawn_composed(&system);

    let response = composed
        .request((42i32,), Some(Duration::from_secs(2)))
        .receive()
        .await
        .expect("composite answers");
    // (42 * 2.0) * (42 * 4.0)
    assert_eq!(response.get::<f64>(0), Some(&14112.0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_killing_a_constituent_breaks_the_composite() {
    let system = ActorSystem::new(SystemConfig::default()).unwrap();
    let (composed, g, _f) = spawn_composed(&system);

    // Warm-up round so the links are installed.
    let _ = composed
        .request((1i32,), Some(Duration::from_secs(2)))
        .receive()
        .await
        .expect("composite answers before the kill");

    g.kill();
    tokio::time::timeout(Duration::from_secs(5), system.await_all_actors_done())
        .await
        .expect("composite follows its constituent");
    assert!(composed.is_exited());

    let result = composed
        .request((2i32,), Some(Duration::from_secs(1)))
        .receive()
        .await;
    assert_eq!(result.unwrap_err(), Error::ReceiverDown);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_killing_the_second_stage_cascades() {
    let system = ActorSystem::new(SystemConfig::default()).unwrap();
    let (composed, g, f) = spawn_composed(&system);

    f.kill();
    tokio::time::timeout(Duration::from_secs(5), system.await_all_actors_done())
        .await
        .expect("all constituents exit");
    assert_eq!(f.exit_reason(), ExitReason::Kill);
    assert!(composed.is_exited());
    assert!(g.is_exited());
}
