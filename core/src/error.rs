// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Error and exit-reason types
//!
//! This module defines the error taxonomy of the runtime. Two distinct
//! concepts live here:
//!
//! - [`Error`]: the result type of fallible operations (sending, spawning,
//!   encoding payloads, waiting for responses).
//! - [`ExitReason`]: the stable enumeration that accompanies every actor
//!   termination and travels across node boundaries with a fixed wire code.
//!
//! Handler failures never unwind across the scheduler boundary; they are
//! converted into an exit transition with [`ExitReason::UnhandledException`].

use serde::{Deserialize, Serialize};

use thiserror::Error;

/// Errors produced by the actor runtime.
///
/// Most operations report failure through this enum rather than panicking.
/// Message-level failures (a request that cannot be answered) additionally
/// surface as synthesized error responses carrying an [`ErrorKind`], so a
/// requester observes exactly one outcome per request id.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum Error {
    /// A message could not be delivered to its target.
    #[error("failed to send message: {0}")]
    Send(String),

    /// The target of a request exited before answering.
    #[error("request receiver is down")]
    ReceiverDown,

    /// No response arrived within the requested time window.
    #[error("request timed out")]
    RequestTimeout,

    /// A payload element could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// The payload did not carry the expected element types.
    #[error("payload type mismatch: expected {expected}")]
    TypeMismatch {
        /// Render of the expected element type sequence.
        expected: String,
    },

    /// An actor could not be created.
    #[error("failed to spawn actor: {0}")]
    Spawn(String),

    /// The current actor has already transitioned to exited.
    #[error("actor already exited")]
    Exited,

    /// A named group does not exist.
    #[error("no such group: {0}")]
    NoSuchGroup(String),

    /// Actor-system level failure (scheduler, timer, shutdown).
    #[error("system error: {0}")]
    System(String),
}

/// Kind of a synthesized error response.
///
/// When a request cannot complete normally, the runtime manufactures a
/// response envelope carrying one of these kinds instead of a user payload.
/// At most one response (ordinary or synthesized) is delivered per request
/// id.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The receiver exited, or never existed.
    ReceiverDown,
    /// The requester's timeout elapsed first.
    RequestTimeout,
}

impl ErrorKind {
    /// Stable wire code used by the distribution layer.
    pub fn code(self) -> u32 {
        match self {
            ErrorKind::ReceiverDown => 1,
            ErrorKind::RequestTimeout => 2,
        }
    }

    /// Decode a wire code. Unknown codes map to `ReceiverDown`, the most
    /// conservative interpretation for a requester.
    pub fn from_code(code: u32) -> Self {
        match code {
            2 => ErrorKind::RequestTimeout,
            _ => ErrorKind::ReceiverDown,
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::ReceiverDown => Error::ReceiverDown,
            ErrorKind::RequestTimeout => Error::RequestTimeout,
        }
    }
}

/// Reason an actor terminated.
///
/// `NotExited` is the sentinel value of a live actor and never travels in an
/// exit or down notification. `Kill` is special: it terminates even actors
/// that trap exit signals.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ExitReason {
    /// Sentinel: the actor has not exited.
    NotExited,
    /// Regular termination (behavior stack drained or explicit quit).
    Normal,
    /// Unconditional termination; not swallowed by trap-exit.
    Kill,
    /// A handler panicked; the runtime converted the fault into an exit.
    UnhandledException,
    /// Application-defined reason.
    UserDefined(u32),
    /// The connection that owned a remote proxy was lost.
    RemoteLinkUnreachable,
    /// A request-timeout propagated into an exit.
    RequestTimeout,
}

/// First code reserved for user-defined exit reasons.
const USER_DEFINED_BASE: u32 = 0x10000;

impl ExitReason {
    /// True while the sentinel value is in place.
    pub fn is_not_exited(&self) -> bool {
        matches!(self, ExitReason::NotExited)
    }

    /// Stable wire encoding used in `kill_proxy` frames.
    pub fn code(&self) -> u32 {
        match self {
            ExitReason::NotExited => 0,
            ExitReason::Normal => 1,
            ExitReason::Kill => 2,
            ExitReason::UnhandledException => 3,
            ExitReason::RemoteLinkUnreachable => 4,
            ExitReason::RequestTimeout => 5,
            ExitReason::UserDefined(code) => USER_DEFINED_BASE.saturating_add(*code),
        }
    }

    /// Decode a wire code.
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => ExitReason::NotExited,
            1 => ExitReason::Normal,
            2 => ExitReason::Kill,
            3 => ExitReason::UnhandledException,
            4 => ExitReason::RemoteLinkUnreachable,
            5 => ExitReason::RequestTimeout,
            c if c >= USER_DEFINED_BASE => ExitReason::UserDefined(c - USER_DEFINED_BASE),
            c => ExitReason::UserDefined(c),
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::NotExited => write!(f, "not-exited"),
            ExitReason::Normal => write!(f, "normal"),
            ExitReason::Kill => write!(f, "kill"),
            ExitReason::UnhandledException => write!(f, "unhandled-exception"),
            ExitReason::UserDefined(code) => write!(f, "user-defined({})", code),
            ExitReason::RemoteLinkUnreachable => write!(f, "remote-link-unreachable"),
            ExitReason::RequestTimeout => write!(f, "request-timeout"),
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_exit_reason_codes_round_trip() {
        let reasons = [
            ExitReason::NotExited,
            ExitReason::Normal,
            ExitReason::Kill,
            ExitReason::UnhandledException,
            ExitReason::RemoteLinkUnreachable,
            ExitReason::RequestTimeout,
            ExitReason::UserDefined(0),
            ExitReason::UserDefined(42),
        ];
        for reason in reasons {
            assert_eq!(ExitReason::from_code(reason.code()), reason);
        }
    }

    #[test]
    fn test_error_kind_codes() {
        assert_eq!(ErrorKind::from_code(ErrorKind::ReceiverDown.code()), ErrorKind::ReceiverDown);
        assert_eq!(
            ErrorKind::from_code(ErrorKind::RequestTimeout.code()),
            ErrorKind::RequestTimeout
        );
        // Unknown codes degrade to the conservative kind.
        assert_eq!(ErrorKind::from_code(0xdead), ErrorKind::ReceiverDown);
    }
}
