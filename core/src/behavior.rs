// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Behaviors
//!
//! A behavior is a finite, ordered list of handlers plus an optional
//! timeout. Each handler pairs a [`Pattern`] with an action; patterns are
//! checked in declaration order and the first match wins. An actor owns a
//! stack of behaviors of which the top element is active; `become` pushes
//! a frame, `unbecome` pops one, and popping the last frame ends the actor
//! with reason `normal`.

use crate::context::ActorContext;
use crate::envelope::{Content, Envelope};
use crate::error::ExitReason;
use crate::address::Address;
use crate::payload::{ElementTypes, Payload, TypeToken};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of offering one message to a behavior.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HandlerOutcome {
    /// A handler consumed the message.
    Handled,
    /// A handler explicitly rejected the message; discard it.
    Dropped,
    /// No handler accepted the message; move it to the cache.
    Skipped,
}

enum MatchClass {
    /// Match user payloads by element-type token.
    Token(TypeToken),
    /// Match any user message, exit signal or down notification.
    CatchAll,
    /// Match trapped exit signals.
    Exit,
    /// Match down notifications.
    Down,
}

type Guard = Arc<dyn Fn(&Envelope) -> bool + Send + Sync>;

/// What a handler accepts: an element-type sequence or a wildcard,
/// optionally narrowed by a value guard.
pub struct Pattern {
    class: MatchClass,
    guard: Option<Guard>,
}

impl Pattern {
    /// Pattern matching user payloads with the element types `T`.
    pub fn of<T: ElementTypes>() -> Pattern {
        Pattern { class: MatchClass::Token(T::token()), guard: None }
    }

    /// Pattern matching a raw type token.
    pub fn of_token(token: TypeToken) -> Pattern {
        Pattern { class: MatchClass::Token(token), guard: None }
    }

    /// Wildcard pattern.
    pub fn catch_all() -> Pattern {
        Pattern { class: MatchClass::CatchAll, guard: None }
    }

    /// Pattern matching trapped exit signals.
    pub fn exit_signal() -> Pattern {
        Pattern { class: MatchClass::Exit, guard: None }
    }

    /// Pattern matching down notifications.
    pub fn down_notification() -> Pattern {
        Pattern { class: MatchClass::Down, guard: None }
    }

    /// Adds a value constraint checked after the type match.
    pub fn with_guard(
        mut self,
        guard: impl Fn(&Envelope) -> bool + Send + Sync + 'static,
    ) -> Pattern {
        self.guard = Some(Arc::new(guard));
        self
    }

    fn matches(&self, envelope: &Envelope) -> bool {
        let class_match = match (&self.class, &envelope.content) {
            (MatchClass::Token(token), Content::User(payload)) => payload.token() == *token,
            (MatchClass::CatchAll, Content::User(_))
            | (MatchClass::CatchAll, Content::Exit { .. })
            | (MatchClass::CatchAll, Content::Down { .. }) => true,
            (MatchClass::Exit, Content::Exit { .. }) => true,
            (MatchClass::Down, Content::Down { .. }) => true,
            _ => false,
        };
        class_match && self.guard.as_ref().map_or(true, |guard| guard(envelope))
    }
}

type Action = Box<dyn FnMut(&mut ActorContext, &Envelope) -> HandlerOutcome + Send>;

struct Handler {
    pattern: Pattern,
    action: Action,
}

type TimeoutAction = Box<dyn FnMut(&mut ActorContext) + Send>;

pub(crate) struct BehaviorTimeout {
    pub after: Duration,
    pub action: TimeoutAction,
}

static NEXT_BACK_ID: AtomicU64 = AtomicU64::new(1);

/// Ordered set of message handlers with an optional timeout.
pub struct Behavior {
    handlers: Vec<Handler>,
    timeout: Option<BehaviorTimeout>,
    back_id: u64,
}

impl Default for Behavior {
    fn default() -> Self {
        Behavior::new()
    }
}

impl Behavior {
    /// An empty behavior; add handlers with the builder methods.
    pub fn new() -> Behavior {
        Behavior {
            handlers: Vec::new(),
            timeout: None,
            back_id: NEXT_BACK_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Adds a handler consuming payloads of element types `T`.
    pub fn on<T, F>(mut self, mut action: F) -> Behavior
    where
        T: ElementTypes,
        F: FnMut(&mut ActorContext, &Payload) + Send + 'static,
    {
        self.handlers.push(Handler {
            pattern: Pattern::of::<T>(),
            action: Box::new(move |ctx, env| {
                if let Content::User(payload) = &env.content {
                    action(ctx, payload);
                }
                HandlerOutcome::Handled
            }),
        });
        self
    }

    /// Adds a handler for an explicit pattern; the action decides the
    /// outcome, so it can skip or drop.
    pub fn on_pattern<F>(mut self, pattern: Pattern, action: F) -> Behavior
    where
        F: FnMut(&mut ActorContext, &Envelope) -> HandlerOutcome + Send + 'static,
    {
        self.handlers.push(Handler { pattern, action: Box::new(action) });
        self
    }

    /// Adds a handler for trapped exit signals.
    pub fn on_exit<F>(mut self, mut action: F) -> Behavior
    where
        F: FnMut(&mut ActorContext, Address, ExitReason) + Send + 'static,
    {
        self.handlers.push(Handler {
            pattern: Pattern::exit_signal(),
            action: Box::new(move |ctx, env| {
                if let Content::Exit { from, reason } = env.content {
                    action(ctx, from, reason);
                }
                HandlerOutcome::Handled
            }),
        });
        self
    }

    /// Adds a handler for down notifications.
    pub fn on_down<F>(mut self, mut action: F) -> Behavior
    where
        F: FnMut(&mut ActorContext, Address, ExitReason) + Send + 'static,
    {
        self.handlers.push(Handler {
            pattern: Pattern::down_notification(),
            action: Box::new(move |ctx, env| {
                if let Content::Down { from, reason } = env.content {
                    action(ctx, from, reason);
                }
                HandlerOutcome::Handled
            }),
        });
        self
    }

    /// Adds a wildcard handler; the action decides the outcome.
    pub fn catch_all<F>(self, action: F) -> Behavior
    where
        F: FnMut(&mut ActorContext, &Envelope) -> HandlerOutcome + Send + 'static,
    {
        self.on_pattern(Pattern::catch_all(), action)
    }

    /// Arms a timeout that fires while this behavior waits for a match.
    pub fn with_timeout<F>(mut self, after: Duration, action: F) -> Behavior
    where
        F: FnMut(&mut ActorContext) + Send + 'static,
    {
        self.timeout = Some(BehaviorTimeout { after, action: Box::new(action) });
        self
    }

    /// Stable identity of this behavior instance.
    pub fn back_id(&self) -> u64 {
        self.back_id
    }

    /// True when no handlers are installed.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub(crate) fn timeout_duration(&self) -> Option<Duration> {
        self.timeout.as_ref().map(|t| t.after)
    }

    pub(crate) fn run_timeout(&mut self, ctx: &mut ActorContext) {
        if let Some(timeout) = self.timeout.as_mut() {
            (timeout.action)(ctx);
        }
    }

    /// Offers one message; handlers are tried in declaration order.
    pub(crate) fn try_handle(
        &mut self,
        ctx: &mut ActorContext,
        envelope: &Envelope,
    ) -> HandlerOutcome {
        for handler in self.handlers.iter_mut() {
            if handler.pattern.matches(envelope) {
                return (handler.action)(ctx, envelope);
            }
        }
        HandlerOutcome::Skipped
    }
}

impl fmt::Debug for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Behavior")
            .field("handlers", &self.handlers.len())
            .field("back_id", &self.back_id)
            .finish()
    }
}

/// Stack of behaviors; the top frame is active.
#[derive(Debug, Default)]
pub(crate) struct BehaviorStack {
    frames: Vec<Behavior>,
}

impl BehaviorStack {
    pub fn push(&mut self, behavior: Behavior) {
        self.frames.push(behavior);
    }

    pub fn pop(&mut self) -> Option<Behavior> {
        self.frames.pop()
    }

    pub fn top_mut(&mut self) -> Option<&mut Behavior> {
        self.frames.last_mut()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::address::{ActorId, NodeId, NODE_ID_LEN};
    use crate::envelope::MessageId;
    use crate::payload::{IntoPayload, Payload};

    fn user_envelope(payload: Payload) -> Envelope {
        Envelope {
            sender: None,
            receiver: Address::new(NodeId::from_bytes([5u8; NODE_ID_LEN]), ActorId(1)),
            mid: MessageId::ASYNC,
            content: Content::User(payload),
        }
    }

    #[test]
    fn test_token_pattern_matches_element_types() {
        let pattern = Pattern::of::<(i32, String)>();
        assert!(pattern.matches(&user_envelope((1i32, "x".to_owned()).into_payload())));
        assert!(!pattern.matches(&user_envelope((1i32,).into_payload())));
        assert!(!pattern.matches(&user_envelope(("x".to_owned(), 1i32).into_payload())));
    }

    #[test]
    fn test_guard_narrows_the_match() {
        let pattern = Pattern::of::<(i32,)>().with_guard(|envelope| {
            envelope
                .payload()
                .and_then(|p| p.get::<i32>(0))
                .map_or(false, |v| *v > 10)
        });
        assert!(pattern.matches(&user_envelope((11i32,).into_payload())));
        assert!(!pattern.matches(&user_envelope((10i32,).into_payload())));
    }

    #[test]
    fn test_system_patterns() {
        let exit = Envelope {
            sender: None,
            receiver: Address::new(NodeId::from_bytes([5u8; NODE_ID_LEN]), ActorId(1)),
            mid: MessageId::ASYNC,
            content: Content::Exit {
                from: Address::zero(),
                reason: ExitReason::Normal,
            },
        };
        assert!(Pattern::exit_signal().matches(&exit));
        assert!(Pattern::catch_all().matches(&exit));
        assert!(!Pattern::down_notification().matches(&exit));
        assert!(!Pattern::of::<(i32,)>().matches(&exit));
    }

    #[test]
    fn test_behaviors_have_distinct_back_ids() {
        assert_ne!(Behavior::new().back_id(), Behavior::new().back_id());
    }
}
