// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # BASP frame codec
//!
//! Length-delimited framing for BASP: `u32` payload length (big-endian),
//! the fixed header, then the payload. The decoder tolerates partial
//! reads (it simply waits for more bytes) and rejects frames above the
//! size guard before buffering them.

use crate::error::Error;
use crate::header::{Header, HEADER_SIZE};

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Upper bound on the payload of one frame.
pub const MAX_PAYLOAD_SIZE: usize = 4 * 1024 * 1024;

/// One BASP frame.
#[derive(Clone, Debug)]
pub struct Frame {
    /// The fixed header.
    pub header: Header,
    /// Payload bytes; meaning depends on the operation.
    pub payload: Bytes,
}

impl Frame {
    /// Builds a frame.
    pub fn new(header: Header, payload: Bytes) -> Frame {
        Frame { header, payload }
    }

    /// A frame without payload.
    pub fn control(header: Header) -> Frame {
        Frame { header, payload: Bytes::new() }
    }
}

/// Frame codec for [`tokio_util::codec::Framed`] transports.
#[derive(Default)]
pub struct BaspCodec {
    expected_payload: Option<usize>,
}

impl BaspCodec {
    /// Creates a codec in its initial state.
    pub fn new() -> BaspCodec {
        BaspCodec::default()
    }
}

impl Encoder<Frame> for BaspCodec {
    type Error = Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Error> {
        if frame.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(Error::Protocol(format!(
                "outgoing frame payload of {} bytes exceeds the limit",
                frame.payload.len()
            )));
        }
        dst.reserve(4 + HEADER_SIZE + frame.payload.len());
        dst.extend_from_slice(&(frame.payload.len() as u32).to_be_bytes());
        frame.header.encode(dst);
        dst.extend_from_slice(&frame.payload);
        Ok(())
    }
}

impl Decoder for BaspCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Error> {
        let payload_len = match self.expected_payload {
            Some(len) => len,
            None => {
                if src.len() < 4 {
                    return Ok(None);
                }
                let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
                if len > MAX_PAYLOAD_SIZE {
                    return Err(Error::Protocol(format!(
                        "incoming frame payload of {} bytes exceeds the limit",
                        len
                    )));
                }
                src.advance(4);
                self.expected_payload = Some(len);
                len
            }
        };

        if src.len() < HEADER_SIZE + payload_len {
            return Ok(None);
        }
        self.expected_payload = None;
        let header = Header::decode(src)?;
        let payload = src.split_to(payload_len).freeze();
        Ok(Some(Frame { header, payload }))
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::header::{flags, Operation};

    use troupe_core::{ActorId, Address, NodeId};

    fn sample_frame() -> Frame {
        let header = Header {
            op: Operation::DispatchMessage,
            flags: flags::USER,
            source: Address::new(NodeId::from_bytes([1u8; troupe_core::NODE_ID_LEN]), ActorId(1)),
            dest: Address::new(NodeId::from_bytes([2u8; troupe_core::NODE_ID_LEN]), ActorId(2)),
            request_id: 77,
            payload_token: 5,
        };
        Frame::new(header, Bytes::from_static(b"payload bytes"))
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let mut codec = BaspCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(sample_frame(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.header, sample_frame().header);
        assert_eq!(decoded.payload, sample_frame().payload);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_reads_are_not_errors() {
        let mut codec = BaspCodec::new();
        let mut full = BytesMut::new();
        codec.encode(sample_frame(), &mut full).unwrap();

        let mut feed = BytesMut::new();
        let mut decoded = None;
        for chunk in full.chunks(7) {
            assert!(decoded.is_none(), "frame completed before all bytes arrived");
            feed.extend_from_slice(chunk);
            decoded = codec.decode(&mut feed).unwrap();
        }
        let decoded = decoded.expect("frame completes with the last chunk");
        assert_eq!(decoded.payload, sample_frame().payload);
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let mut codec = BaspCodec::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&(MAX_PAYLOAD_SIZE as u32 + 1).to_be_bytes());
        assert!(matches!(codec.decode(&mut buf), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_two_frames_back_to_back() {
        let mut codec = BaspCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(sample_frame(), &mut buf).unwrap();
        codec.encode(sample_frame(), &mut buf).unwrap();

        assert!(codec.decode(&mut buf).unwrap().is_some());
        assert!(codec.decode(&mut buf).unwrap().is_some());
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }
}
