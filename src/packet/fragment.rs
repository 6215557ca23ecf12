//! Fragment control and payload packets (protocol tag major byte 254).
//!
//! These are the wire packets the fragment sender/receiver engines
//! (`crate::fragment`) exchange. Grounded on reliudp's `Fragment<T>` /
//! `Packet::Ack` pair in `fragment.rs`/`udp_packet.rs`, generalized from a
//! single-byte seq/frag-id pair into the richer allocation-uuid + packet-id
//! handshake this protocol specifies.

use std::io::{Read, Write};

use uuid::Uuid;

use crate::codec::primitives::*;
use crate::codec::ProtocolTag;
use crate::codec::tag::tags;
use crate::error::{CodecError, CodecResult};

fn write_uuid(sink: &mut dyn Write, uuid: &Uuid) -> CodecResult<()> {
    sink.write_all(uuid.as_bytes())?;
    Ok(())
}

fn read_uuid(source: &mut dyn Read) -> CodecResult<Uuid> {
    let buf = read_exact(source, 16)?;
    let mut arr = [0u8; 16];
    arr.copy_from_slice(&buf);
    Ok(Uuid::from_bytes(arr))
}

/// Requests that the receiver allocate a packet-id for `fragment_count`
/// fragments, keyed pre-handshake by `allocation_uuid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentAllocate {
    pub fragment_count: u32,
    pub allocation_uuid: Uuid,
}

impl FragmentAllocate {
    pub fn new(fragment_count: u32, allocation_uuid: Uuid) -> Self {
        FragmentAllocate { fragment_count, allocation_uuid }
    }

    pub fn tag(&self) -> ProtocolTag {
        tags::FRAGMENT_ALLOCATE
    }

    pub fn is_valid(&self) -> bool {
        self.fragment_count >= 1
    }

    pub fn save_payload(&self) -> CodecResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(20);
        write_u32_plain(&mut buf, self.fragment_count)?;
        write_uuid(&mut buf, &self.allocation_uuid)?;
        Ok(buf)
    }

    pub fn load_payload(bytes: &[u8]) -> CodecResult<Self> {
        if bytes.len() != 20 {
            return Err(CodecError::WrongPayloadLength { expected: 20, got: bytes.len() });
        }
        let mut cursor = bytes;
        let fragment_count = read_u32_plain(&mut cursor)?;
        let allocation_uuid = read_uuid(&mut cursor)?;
        Ok(FragmentAllocate { fragment_count, allocation_uuid })
    }
}

/// The receiver's answer to a `FragmentAllocate`: either a freshly minted
/// `packet_id` (`success = true`) or a rejection when no id is available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentAllocation {
    pub packet_id: u32,
    pub allocation_uuid: Uuid,
    pub success: bool,
}

impl FragmentAllocation {
    pub fn new(packet_id: u32, allocation_uuid: Uuid, success: bool) -> Self {
        FragmentAllocation { packet_id, allocation_uuid, success }
    }

    pub fn tag(&self) -> ProtocolTag {
        tags::FRAGMENT_ALLOCATION
    }

    pub fn is_valid(&self) -> bool {
        true
    }

    pub fn save_payload(&self) -> CodecResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(21);
        write_u32_plain(&mut buf, self.packet_id)?;
        write_bool(&mut buf, self.success)?;
        write_uuid(&mut buf, &self.allocation_uuid)?;
        Ok(buf)
    }

    pub fn load_payload(bytes: &[u8]) -> CodecResult<Self> {
        if bytes.len() != 21 {
            return Err(CodecError::WrongPayloadLength { expected: 21, got: bytes.len() });
        }
        let mut cursor = bytes;
        let packet_id = read_u32_plain(&mut cursor)?;
        let success = read_bool(&mut cursor)?;
        let allocation_uuid = read_uuid(&mut cursor)?;
        Ok(FragmentAllocation { packet_id, allocation_uuid, success })
    }
}

/// One fragment of a message body, non-empty by invariant.
#[derive(Clone, PartialEq, Eq)]
pub struct FragmentMessage {
    pub packet_id: u32,
    pub fragment_id: u32,
    pub body: Vec<u8>,
}

impl std::fmt::Debug for FragmentMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut d = f.debug_struct("FragmentMessage");
        d.field("packet_id", &self.packet_id).field("fragment_id", &self.fragment_id);
        #[cfg(feature = "extended_debug")]
        d.field("body", &hex::encode(&self.body));
        #[cfg(not(feature = "extended_debug"))]
        d.field("body_len", &self.body.len());
        d.finish()
    }
}

impl FragmentMessage {
    pub fn new(packet_id: u32, fragment_id: u32, body: Vec<u8>) -> Self {
        FragmentMessage { packet_id, fragment_id, body }
    }

    pub fn tag(&self) -> ProtocolTag {
        tags::FRAGMENT_MESSAGE
    }

    pub fn is_valid(&self) -> bool {
        !self.body.is_empty()
    }

    pub fn save_payload(&self) -> CodecResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(8 + self.body.len());
        write_u32_plain(&mut buf, self.packet_id)?;
        write_u32_plain(&mut buf, self.fragment_id)?;
        buf.extend_from_slice(&self.body);
        Ok(buf)
    }

    pub fn load_payload(bytes: &[u8]) -> CodecResult<Self> {
        if bytes.len() < 8 {
            return Err(CodecError::WrongPayloadLength { expected: 8, got: bytes.len() });
        }
        let mut cursor = bytes;
        let packet_id = read_u32_plain(&mut cursor)?;
        let fragment_id = read_u32_plain(&mut cursor)?;
        Ok(FragmentMessage { packet_id, fragment_id, body: cursor.to_vec() })
    }
}

/// Acknowledgement of one `FragmentMessage`. Body may be empty unless
/// `verify_responses` is in effect, in which case it echoes the original.
#[derive(Clone, PartialEq, Eq)]
pub struct FragmentMessageResponse {
    pub packet_id: u32,
    pub fragment_id: u32,
    pub body: Vec<u8>,
}

impl std::fmt::Debug for FragmentMessageResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut d = f.debug_struct("FragmentMessageResponse");
        d.field("packet_id", &self.packet_id).field("fragment_id", &self.fragment_id);
        #[cfg(feature = "extended_debug")]
        d.field("body", &hex::encode(&self.body));
        #[cfg(not(feature = "extended_debug"))]
        d.field("body_len", &self.body.len());
        d.finish()
    }
}

impl FragmentMessageResponse {
    pub fn new(packet_id: u32, fragment_id: u32, body: Vec<u8>) -> Self {
        FragmentMessageResponse { packet_id, fragment_id, body }
    }

    pub fn tag(&self) -> ProtocolTag {
        tags::FRAGMENT_MESSAGE_RESPONSE
    }

    pub fn is_valid(&self) -> bool {
        true
    }

    pub fn save_payload(&self) -> CodecResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(8 + self.body.len());
        write_u32_plain(&mut buf, self.packet_id)?;
        write_u32_plain(&mut buf, self.fragment_id)?;
        buf.extend_from_slice(&self.body);
        Ok(buf)
    }

    pub fn load_payload(bytes: &[u8]) -> CodecResult<Self> {
        if bytes.len() < 8 {
            return Err(CodecError::WrongPayloadLength { expected: 8, got: bytes.len() });
        }
        let mut cursor = bytes;
        let packet_id = read_u32_plain(&mut cursor)?;
        let fragment_id = read_u32_plain(&mut cursor)?;
        Ok(FragmentMessageResponse { packet_id, fragment_id, body: cursor.to_vec() })
    }
}

macro_rules! packet_id_ack_packet {
    ($name:ident, $tag:expr) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name {
            pub packet_id: u32,
            pub ack: bool,
        }

        impl $name {
            pub fn new(packet_id: u32, ack: bool) -> Self {
                $name { packet_id, ack }
            }

            pub fn tag(&self) -> ProtocolTag {
                $tag
            }

            pub fn is_valid(&self) -> bool {
                true
            }

            pub fn save_payload(&self) -> CodecResult<Vec<u8>> {
                let mut buf = Vec::with_capacity(5);
                write_u32_plain(&mut buf, self.packet_id)?;
                write_bool(&mut buf, self.ack)?;
                Ok(buf)
            }

            pub fn load_payload(bytes: &[u8]) -> CodecResult<Self> {
                if bytes.len() != 5 {
                    return Err(CodecError::WrongPayloadLength { expected: 5, got: bytes.len() });
                }
                let mut cursor = bytes;
                let packet_id = read_u32_plain(&mut cursor)?;
                let ack = read_bool(&mut cursor)?;
                Ok($name { packet_id, ack })
            }
        }
    };
}

packet_id_ack_packet!(FragmentSendComplete, tags::FRAGMENT_SEND_COMPLETE);
packet_id_ack_packet!(FragmentRetrySend, tags::FRAGMENT_RETRY_SEND);

/// Tells the peer to drop its registry entry for `packet_id` unconditionally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentSendStop {
    pub packet_id: u32,
}

impl FragmentSendStop {
    pub fn new(packet_id: u32) -> Self {
        FragmentSendStop { packet_id }
    }

    pub fn tag(&self) -> ProtocolTag {
        tags::FRAGMENT_SEND_STOP
    }

    pub fn is_valid(&self) -> bool {
        true
    }

    pub fn save_payload(&self) -> CodecResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(4);
        write_u32_plain(&mut buf, self.packet_id)?;
        Ok(buf)
    }

    pub fn load_payload(bytes: &[u8]) -> CodecResult<Self> {
        if bytes.len() != 4 {
            return Err(CodecError::WrongPayloadLength { expected: 4, got: bytes.len() });
        }
        let mut cursor = bytes;
        let packet_id = read_u32_plain(&mut cursor)?;
        Ok(FragmentSendStop { packet_id })
    }
}

/// Terminates the sender's verification-equality loop for `packet_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentSendVerifyComplete {
    pub packet_id: u32,
}

impl FragmentSendVerifyComplete {
    pub fn new(packet_id: u32) -> Self {
        FragmentSendVerifyComplete { packet_id }
    }

    pub fn tag(&self) -> ProtocolTag {
        tags::FRAGMENT_SEND_VERIFY_COMPLETE
    }

    pub fn is_valid(&self) -> bool {
        true
    }

    pub fn save_payload(&self) -> CodecResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(4);
        write_u32_plain(&mut buf, self.packet_id)?;
        Ok(buf)
    }

    pub fn load_payload(bytes: &[u8]) -> CodecResult<Self> {
        if bytes.len() != 4 {
            return Err(CodecError::WrongPayloadLength { expected: 4, got: bytes.len() });
        }
        let mut cursor = bytes;
        let packet_id = read_u32_plain(&mut cursor)?;
        Ok(FragmentSendVerifyComplete { packet_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_roundtrip() {
        let uuid = Uuid::new_v4();
        let p = FragmentAllocate::new(5, uuid);
        let bytes = p.save_payload().unwrap();
        let got = FragmentAllocate::load_payload(&bytes).unwrap();
        assert_eq!(p, got);
    }

    #[test]
    fn allocate_rejects_zero_count_validity() {
        let p = FragmentAllocate::new(0, Uuid::new_v4());
        assert!(!p.is_valid());
    }

    #[test]
    fn allocation_roundtrip() {
        let uuid = Uuid::new_v4();
        let p = FragmentAllocation::new(7, uuid, true);
        let bytes = p.save_payload().unwrap();
        let got = FragmentAllocation::load_payload(&bytes).unwrap();
        assert_eq!(p, got);
    }

    #[test]
    fn message_roundtrip_and_non_empty_invariant() {
        let p = FragmentMessage::new(1, 2, vec![9, 8, 7]);
        assert!(p.is_valid());
        let bytes = p.save_payload().unwrap();
        let got = FragmentMessage::load_payload(&bytes).unwrap();
        assert_eq!(p, got);

        let empty = FragmentMessage::new(1, 2, vec![]);
        assert!(!empty.is_valid());
    }

    #[test]
    fn message_response_allows_empty_body() {
        let p = FragmentMessageResponse::new(1, 2, vec![]);
        assert!(p.is_valid());
        let bytes = p.save_payload().unwrap();
        let got = FragmentMessageResponse::load_payload(&bytes).unwrap();
        assert_eq!(p, got);
    }

    #[test]
    fn send_complete_and_retry_send_roundtrip() {
        let sc = FragmentSendComplete::new(3, true);
        let bytes = sc.save_payload().unwrap();
        assert_eq!(FragmentSendComplete::load_payload(&bytes).unwrap(), sc);

        let rs = FragmentRetrySend::new(3, false);
        let bytes = rs.save_payload().unwrap();
        assert_eq!(FragmentRetrySend::load_payload(&bytes).unwrap(), rs);
    }

    #[test]
    fn send_stop_and_verify_complete_roundtrip() {
        let stop = FragmentSendStop::new(42);
        let bytes = stop.save_payload().unwrap();
        assert_eq!(FragmentSendStop::load_payload(&bytes).unwrap(), stop);

        let vc = FragmentSendVerifyComplete::new(42);
        let bytes = vc.save_payload().unwrap();
        assert_eq!(FragmentSendVerifyComplete::load_payload(&bytes).unwrap(), vc);
    }

    #[test]
    fn wrong_length_is_rejected() {
        let err = FragmentSendStop::load_payload(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, CodecError::WrongPayloadLength { expected: 4, got: 3 }));
    }
}
