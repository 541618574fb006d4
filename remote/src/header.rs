// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # BASP frame header
//!
//! Fixed 72-byte header of the Binary Actor System Protocol. All
//! multi-byte integers travel big-endian. Each frame on the wire is a
//! 4-byte payload length, this header, then the payload.

use crate::error::Error;

use troupe_core::{ActorId, Address, NodeId, NODE_ID_LEN};

use bytes::{Buf, BufMut, BytesMut};

/// Size of the fixed header in bytes: op, flags, reserved, two
/// address blocks (20 + 8 each), request id, payload type token.
pub const HEADER_SIZE: usize = 1 + 1 + 2 + (NODE_ID_LEN + 8) * 2 + 8 + 4;

/// The closed set of BASP operations.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Operation {
    /// First frame from an acceptor: node id, published actor id and
    /// interface signature.
    ServerHandshake = 0x00,
    /// First frame from a connector: node id.
    ClientHandshake = 0x01,
    /// Ordinary message delivery.
    DispatchMessage = 0x02,
    /// "I now hold a proxy for your actor X" (monitor request).
    AnnounceProxy = 0x03,
    /// "Actor X on my node has exited with reason R."
    KillProxy = 0x04,
    /// Cross-node monitor registration.
    AddMonitor = 0x05,
    /// Proxy-holder side bookkeeping release (unmonitor).
    KillMonitorAck = 0x06,
}

impl Operation {
    /// Decodes an operation byte.
    pub fn from_u8(value: u8) -> Result<Operation, Error> {
        match value {
            0x00 => Ok(Operation::ServerHandshake),
            0x01 => Ok(Operation::ClientHandshake),
            0x02 => Ok(Operation::DispatchMessage),
            0x03 => Ok(Operation::AnnounceProxy),
            0x04 => Ok(Operation::KillProxy),
            0x05 => Ok(Operation::AddMonitor),
            0x06 => Ok(Operation::KillMonitorAck),
            other => Err(Error::Protocol(format!("unknown operation 0x{:02x}", other))),
        }
    }
}

/// Content kind carried in the `flags` octet of dispatched messages.
pub mod flags {
    /// Ordinary user payload.
    pub const USER: u8 = 0;
    /// Exit signal (payload: 4-byte reason code).
    pub const EXIT: u8 = 1;
    /// Down notification (payload: 4-byte reason code).
    pub const DOWN: u8 = 2;
    /// Synthesized request error (payload: 4-byte error kind code).
    pub const ERROR: u8 = 3;
}

/// Fixed BASP header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Header {
    /// Operation code.
    pub op: Operation,
    /// Content kind for dispatched messages; zero otherwise.
    pub flags: u8,
    /// Source address; either part may be zero.
    pub source: Address,
    /// Destination address; either part may be zero.
    pub dest: Address,
    /// Request/response correlation id, opaque to the remote side.
    pub request_id: u64,
    /// Type token of the payload element sequence; zero for system
    /// content.
    pub payload_token: u32,
}

impl Header {
    /// Header for a protocol operation without message content.
    pub fn control(op: Operation, source: Address, dest: Address) -> Header {
        Header { op, flags: 0, source, dest, request_id: 0, payload_token: 0 }
    }

    /// Writes the header in wire order.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.op as u8);
        dst.put_u8(self.flags);
        dst.put_u16(0); // reserved
        put_address(dst, self.source);
        put_address(dst, self.dest);
        dst.put_u64(self.request_id);
        dst.put_u32(self.payload_token);
    }

    /// Reads a header from exactly [`HEADER_SIZE`] bytes.
    pub fn decode(src: &mut impl Buf) -> Result<Header, Error> {
        debug_assert!(src.remaining() >= HEADER_SIZE);
        let op = Operation::from_u8(src.get_u8())?;
        let flags = src.get_u8();
        let _reserved = src.get_u16();
        let source = get_address(src);
        let dest = get_address(src);
        let request_id = src.get_u64();
        let payload_token = src.get_u32();
        Ok(Header { op, flags, source, dest, request_id, payload_token })
    }
}

fn put_address(dst: &mut BytesMut, address: Address) {
    dst.put_slice(address.node.as_bytes());
    dst.put_u64(address.actor.0);
}

fn get_address(src: &mut impl Buf) -> Address {
    let mut node = [0u8; NODE_ID_LEN];
    src.copy_to_slice(&mut node);
    let actor = src.get_u64();
    Address::new(NodeId::from_bytes(node), ActorId(actor))
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_header_size() {
        assert_eq!(HEADER_SIZE, 72);
    }

    #[test]
    fn test_header_round_trip() {
        let header = Header {
            op: Operation::DispatchMessage,
            flags: flags::USER,
            source: Address::new(NodeId::from_bytes([0x11; NODE_ID_LEN]), ActorId(11)),
            dest: Address::new(NodeId::from_bytes([7u8; NODE_ID_LEN]), ActorId(42)),
            request_id: 0x0123_4567_89ab_cdef,
            payload_token: 0xdead_beef,
        };
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_SIZE);
        let decoded = Header::decode(&mut buf).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_unknown_operation_is_rejected() {
        let mut buf = BytesMut::new();
        Header::control(
            Operation::ClientHandshake,
            Address::zero(),
            Address::zero(),
        )
        .encode(&mut buf);
        buf[0] = 0x7f;
        assert!(matches!(Header::decode(&mut buf), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_zero_addresses_survive_round_trip() {
        let header = Header::control(Operation::ClientHandshake, Address::zero(), Address::zero());
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        let decoded = Header::decode(&mut buf).unwrap();
        assert!(decoded.source.is_zero());
        assert!(decoded.dest.is_zero());
    }
}
