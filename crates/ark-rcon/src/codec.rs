//! Length-prefixed packet codec.
//!
//! First 4 bytes are the payload size; total buffer = 4 + payload. Decoding
//! buffers until the declared payload is fully available, so packets split
//! across TCP reads are reassembled before parsing.

use std::io::Error as IoError;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::protocol::{RconPacket, MAX_PAYLOAD, MIN_PAYLOAD};

#[derive(Debug, Default)]
pub struct RconCodec {}

impl RconCodec {
    pub fn new() -> Self {
        Self {}
    }
}

impl Decoder for RconCodec {
    type Item = RconPacket;
    type Error = IoError;

    fn decode(&mut self, bytes: &mut BytesMut) -> Result<Option<RconPacket>, Self::Error> {
        let len = bytes.len();
        if len < 4 {
            trace!(len, "buffer too short for size prefix, waiting");
            return Ok(None);
        }

        let payload_len = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if !(MIN_PAYLOAD..=MAX_PAYLOAD).contains(&payload_len) {
            return Err(IoError::other(format!(
                "invalid payload size: {payload_len}"
            )));
        }

        if (payload_len + 4) as usize > len {
            trace!(
                len,
                payload_len,
                "payload not fully buffered yet, waiting"
            );
            return Ok(None);
        }

        let mut buf = bytes.split_to((payload_len + 4) as usize);
        buf.advance(4); // size prefix
        let id = buf.get_i32_le();
        let kind = buf.get_i32_le();

        // body is null-terminated, with one more trailing null after it
        let body_bytes = &buf[..];
        let body_end = body_bytes
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(body_bytes.len());
        let body = String::from_utf8_lossy(&body_bytes[..body_end]).into_owned();

        trace!(id, kind, body_len = body.len(), "decoded packet");
        Ok(Some(RconPacket { id, kind, body }))
    }
}

impl Encoder<RconPacket> for RconCodec {
    type Error = IoError;

    fn encode(&mut self, packet: RconPacket, buf: &mut BytesMut) -> Result<(), IoError> {
        let payload = packet.payload_size();
        trace!(id = packet.id, kind = packet.kind, payload, "encoding packet");
        buf.reserve((payload + 4) as usize);
        buf.put_i32_le(payload);
        buf.put_i32_le(packet.id);
        buf.put_i32_le(packet.kind);
        buf.put_slice(packet.body.as_bytes());
        buf.put_u8(0);
        buf.put_u8(0);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use bytes::BytesMut;
    use tokio_util::codec::{Decoder, Encoder};

    use super::RconCodec;
    use crate::protocol::{packet_type, RconPacket};

    fn encode(packet: &RconPacket) -> BytesMut {
        let mut buf = BytesMut::new();
        RconCodec::new()
            .encode(packet.clone(), &mut buf)
            .expect("encode");
        buf
    }

    #[test]
    fn test_encode_layout() {
        let buf = encode(&RconPacket::command(7, "ListPlayers"));
        // size = 4 + 4 + 11 + 2
        assert_eq!(&buf[0..4], &21i32.to_le_bytes());
        assert_eq!(&buf[4..8], &7i32.to_le_bytes());
        assert_eq!(&buf[8..12], &packet_type::EXEC_COMMAND.to_le_bytes());
        assert_eq!(&buf[12..23], b"ListPlayers");
        assert_eq!(&buf[23..], &[0, 0]);
    }

    #[test]
    fn test_decode_waits_for_full_packet() {
        let full = encode(&RconPacket::command(3, "SaveWorld"));
        let mut codec = RconCodec::new();
        let mut buf = BytesMut::new();

        // feed one byte at a time; nothing decodes until the last byte
        for byte in &full[..full.len() - 1] {
            buf.extend_from_slice(&[*byte]);
            assert!(codec.decode(&mut buf).expect("decode").is_none());
        }
        buf.extend_from_slice(&full[full.len() - 1..]);
        let packet = codec.decode(&mut buf).expect("decode").expect("packet");
        assert_eq!(packet.id, 3);
        assert_eq!(packet.body, "SaveWorld");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_two_packets_one_buffer() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode(&RconPacket::sentinel(1)));
        buf.extend_from_slice(&encode(&RconPacket::command(2, "DoExit")));

        let mut codec = RconCodec::new();
        let first = codec.decode(&mut buf).expect("decode").expect("packet");
        assert_eq!(first.id, 1);
        assert_eq!(first.body, "");
        let second = codec.decode(&mut buf).expect("decode").expect("packet");
        assert_eq!(second.body, "DoExit");
        assert!(codec.decode(&mut buf).expect("decode").is_none());
    }

    #[test]
    fn test_decode_rejects_bad_size() {
        let mut codec = RconCodec::new();
        let mut buf = BytesMut::from(&(-5i32).to_le_bytes()[..]);
        assert!(codec.decode(&mut buf).is_err());
    }
}
