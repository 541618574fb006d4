// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Distribution-layer errors

use troupe_core::NodeId;

use thiserror::Error;

/// Errors of the distribution layer.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport-level I/O failure. Partial reads and writes are not
    /// errors; a closed or reset stream is.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed frame, unknown operation or handshake-order violation.
    /// The offending connection is closed.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The peer handshake could not be completed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// No usable route to the destination node.
    #[error("no route to node {0}")]
    NoRoute(NodeId),

    /// The connection was closed while an operation was in flight.
    #[error("connection closed")]
    ConnectionClosed,

    /// A port is already published or not published at all.
    #[error("publish error: {0}")]
    Publish(String),

    /// Failure bubbled up from the core runtime.
    #[error(transparent)]
    Core(#[from] troupe_core::Error),
}
