//! The closed packet tagged-sum: one enum, `AnyPacket`, matching the way
//! reliudp distinguishes `Packet` variants by `(frag_id, frag_total)`
//! sentinels in `udp_packet.rs` — generalized here to an explicit two-byte
//! tag per variant rather than an overloaded fragment header.

pub mod envelope;
pub mod fragment;
pub mod network;

use std::io::Write;

use crate::codec::primitives::{read_exact, read_i32_flagged, write_i32_flagged};
use crate::codec::ProtocolTag;
use crate::error::{CodecError, CodecResult};
use crate::factory::PacketFactory;

pub use envelope::{Base64Packet, EncryptedPacket};
pub use fragment::{
    FragmentAllocate, FragmentAllocation, FragmentMessage, FragmentMessageResponse,
    FragmentRetrySend, FragmentSendComplete, FragmentSendStop, FragmentSendVerifyComplete,
};
pub use network::{
    NetworkEncryptionCipher, NetworkEncryptionUpgrade, NetworkIdentifier, NetworkSslUpgrade,
};

/// Any packet this crate knows how to frame. Envelope variants
/// (`Base64`, `Encrypted`) own a boxed `AnyPacket` of their inner payload —
/// a fixed-point self-reference made concrete as ordinary recursive
/// ownership rather than a cyclic back-edge.
#[derive(Debug, Clone, PartialEq)]
pub enum AnyPacket {
    Base64(Base64Packet),
    Encrypted(EncryptedPacket),
    NetworkIdentifier(NetworkIdentifier),
    NetworkSslUpgrade(NetworkSslUpgrade),
    NetworkEncryptionUpgrade(NetworkEncryptionUpgrade),
    NetworkEncryptionCipher(NetworkEncryptionCipher),
    FragmentAllocate(FragmentAllocate),
    FragmentAllocation(FragmentAllocation),
    FragmentMessage(FragmentMessage),
    FragmentMessageResponse(FragmentMessageResponse),
    FragmentSendComplete(FragmentSendComplete),
    FragmentRetrySend(FragmentRetrySend),
    FragmentSendStop(FragmentSendStop),
    FragmentSendVerifyComplete(FragmentSendVerifyComplete),
}

impl AnyPacket {
    pub fn tag(&self) -> ProtocolTag {
        match self {
            AnyPacket::Base64(p) => p.tag(),
            AnyPacket::Encrypted(p) => p.tag(),
            AnyPacket::NetworkIdentifier(p) => p.tag(),
            AnyPacket::NetworkSslUpgrade(p) => p.tag(),
            AnyPacket::NetworkEncryptionUpgrade(p) => p.tag(),
            AnyPacket::NetworkEncryptionCipher(p) => p.tag(),
            AnyPacket::FragmentAllocate(p) => p.tag(),
            AnyPacket::FragmentAllocation(p) => p.tag(),
            AnyPacket::FragmentMessage(p) => p.tag(),
            AnyPacket::FragmentMessageResponse(p) => p.tag(),
            AnyPacket::FragmentSendComplete(p) => p.tag(),
            AnyPacket::FragmentRetrySend(p) => p.tag(),
            AnyPacket::FragmentSendStop(p) => p.tag(),
            AnyPacket::FragmentSendVerifyComplete(p) => p.tag(),
        }
    }

    pub fn is_valid(&self) -> bool {
        match self {
            AnyPacket::Base64(p) => p.is_valid(),
            AnyPacket::Encrypted(p) => p.is_valid(),
            AnyPacket::NetworkIdentifier(p) => p.is_valid(),
            AnyPacket::NetworkSslUpgrade(p) => p.is_valid(),
            AnyPacket::NetworkEncryptionUpgrade(p) => p.is_valid(),
            AnyPacket::NetworkEncryptionCipher(p) => p.is_valid(),
            AnyPacket::FragmentAllocate(p) => p.is_valid(),
            AnyPacket::FragmentAllocation(p) => p.is_valid(),
            AnyPacket::FragmentMessage(p) => p.is_valid(),
            AnyPacket::FragmentMessageResponse(p) => p.is_valid(),
            AnyPacket::FragmentSendComplete(p) => p.is_valid(),
            AnyPacket::FragmentRetrySend(p) => p.is_valid(),
            AnyPacket::FragmentSendStop(p) => p.is_valid(),
            AnyPacket::FragmentSendVerifyComplete(p) => p.is_valid(),
        }
    }

    pub fn save_payload(&self) -> CodecResult<Vec<u8>> {
        match self {
            AnyPacket::Base64(p) => p.save_payload(),
            AnyPacket::Encrypted(p) => p.save_payload(),
            AnyPacket::NetworkIdentifier(p) => p.save_payload(),
            AnyPacket::NetworkSslUpgrade(p) => p.save_payload(),
            AnyPacket::NetworkEncryptionUpgrade(p) => p.save_payload(),
            AnyPacket::NetworkEncryptionCipher(p) => p.save_payload(),
            AnyPacket::FragmentAllocate(p) => p.save_payload(),
            AnyPacket::FragmentAllocation(p) => p.save_payload(),
            AnyPacket::FragmentMessage(p) => p.save_payload(),
            AnyPacket::FragmentMessageResponse(p) => p.save_payload(),
            AnyPacket::FragmentSendComplete(p) => p.save_payload(),
            AnyPacket::FragmentRetrySend(p) => p.save_payload(),
            AnyPacket::FragmentSendStop(p) => p.save_payload(),
            AnyPacket::FragmentSendVerifyComplete(p) => p.save_payload(),
        }
    }

    /// Dispatches a (tag, payload) pair to its variant decoder. Returns
    /// `Ok(None)` for a tag this factory does not recognize — the loader
    /// treats that as "skip".
    pub fn decode(tag: ProtocolTag, payload: &[u8], factory: &PacketFactory) -> CodecResult<Option<AnyPacket>> {
        use crate::codec::tag::tags;

        let packet = match tag {
            t if t == tags::BASE64 => AnyPacket::Base64(Base64Packet::load_payload(payload, factory)?),
            t if t == tags::ENCRYPTED => AnyPacket::Encrypted(EncryptedPacket::load_payload(payload, factory)?),
            t if t == tags::NETWORK_IDENTIFIER => AnyPacket::NetworkIdentifier(NetworkIdentifier::load_payload(payload)?),
            t if t == tags::NETWORK_SSL_UPGRADE => AnyPacket::NetworkSslUpgrade(NetworkSslUpgrade::load_payload(payload)?),
            t if t == tags::NETWORK_ENCRYPTION_UPGRADE => {
                AnyPacket::NetworkEncryptionUpgrade(NetworkEncryptionUpgrade::load_payload(payload)?)
            }
            t if t == tags::NETWORK_ENCRYPTION_CIPHER => {
                AnyPacket::NetworkEncryptionCipher(NetworkEncryptionCipher::load_payload(payload)?)
            }
            t if t == tags::FRAGMENT_ALLOCATE => AnyPacket::FragmentAllocate(FragmentAllocate::load_payload(payload)?),
            t if t == tags::FRAGMENT_ALLOCATION => AnyPacket::FragmentAllocation(FragmentAllocation::load_payload(payload)?),
            t if t == tags::FRAGMENT_MESSAGE => AnyPacket::FragmentMessage(FragmentMessage::load_payload(payload)?),
            t if t == tags::FRAGMENT_MESSAGE_RESPONSE => {
                AnyPacket::FragmentMessageResponse(FragmentMessageResponse::load_payload(payload)?)
            }
            t if t == tags::FRAGMENT_SEND_COMPLETE => AnyPacket::FragmentSendComplete(FragmentSendComplete::load_payload(payload)?),
            t if t == tags::FRAGMENT_RETRY_SEND => AnyPacket::FragmentRetrySend(FragmentRetrySend::load_payload(payload)?),
            t if t == tags::FRAGMENT_SEND_STOP => AnyPacket::FragmentSendStop(FragmentSendStop::load_payload(payload)?),
            t if t == tags::FRAGMENT_SEND_VERIFY_COMPLETE => {
                AnyPacket::FragmentSendVerifyComplete(FragmentSendVerifyComplete::load_payload(payload)?)
            }
            _ => return Ok(None),
        };
        Ok(Some(packet))
    }

    /// Frames this packet as `tag[2] ∥ length[4] ∥ payload` with no digest
    /// trailer — the recursive "inner frame" form envelope packets embed.
    /// The full short/long/legacy top-level framing lives in `crate::loader`.
    pub fn encode_frame(&self) -> CodecResult<Vec<u8>> {
        let payload = self.save_payload()?;
        let mut buf = Vec::with_capacity(6 + payload.len());
        self.tag().write(&mut buf)?;
        write_i32_flagged(&mut buf, payload.len() as i32, false)?;
        buf.write_all(&payload)?;
        Ok(buf)
    }

    /// Inverse of [`encode_frame`]. Returns the decoded packet and the
    /// number of bytes consumed from `bytes`.
    pub fn decode_frame(bytes: &[u8], factory: &PacketFactory) -> CodecResult<(AnyPacket, usize)> {
        let mut cursor = bytes;
        let tag = ProtocolTag::read(&mut cursor)?;
        let (len, _flag) = read_i32_flagged(&mut cursor)?;
        if len < 0 {
            return Err(CodecError::NegativeLength(len));
        }
        let payload = read_exact(&mut cursor, len as usize)?;
        let packet = AnyPacket::decode(tag, &payload, factory)?.ok_or(CodecError::InvalidPacket)?;
        Ok((packet, 6 + payload.len()))
    }
}
