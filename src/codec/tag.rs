//! Two-byte (major, minor) protocol tag identity.
//!
//! Plays the role reliudp's `(frag_id, frag_total)` sentinel pairs play
//! in `udp_packet.rs` (`(255, 0) => Ack`, `(255, 1) => Syn`, ...), but made
//! explicit as its own type instead of overloading the fragment header.

use std::io::{Read, Write};

use crate::codec::primitives::read_byte;
use crate::error::CodecResult;

/// Identifies a packet variant on the wire. Written major byte first, then
/// minor byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolTag {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolTag {
    pub const fn new(major: u8, minor: u8) -> Self {
        ProtocolTag { major, minor }
    }

    pub fn write(&self, sink: &mut dyn Write) -> CodecResult<()> {
        sink.write_all(&[self.major, self.minor])?;
        Ok(())
    }

    pub fn read(source: &mut dyn Read) -> CodecResult<ProtocolTag> {
        let major = read_byte(source)?;
        let minor = read_byte(source)?;
        Ok(ProtocolTag { major, minor })
    }
}

impl std::fmt::Display for ProtocolTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.major, self.minor)
    }
}

pub mod tags {
    //! The closed set of protocol tags this crate assigns. Fragment tags
    //! share major byte 254; signalling/envelope tags share major byte 255.
    use super::ProtocolTag;

    pub const BASE64: ProtocolTag = ProtocolTag::new(255, 251);
    pub const ENCRYPTED: ProtocolTag = ProtocolTag::new(255, 252);
    pub const NETWORK_ENCRYPTION_UPGRADE: ProtocolTag = ProtocolTag::new(255, 253);
    pub const NETWORK_SSL_UPGRADE: ProtocolTag = ProtocolTag::new(255, 254);
    pub const NETWORK_IDENTIFIER: ProtocolTag = ProtocolTag::new(255, 255);
    pub const NETWORK_ENCRYPTION_CIPHER: ProtocolTag = ProtocolTag::new(255, 250);

    pub const FRAGMENT_ALLOCATE: ProtocolTag = ProtocolTag::new(254, 1);
    pub const FRAGMENT_ALLOCATION: ProtocolTag = ProtocolTag::new(254, 2);
    pub const FRAGMENT_MESSAGE: ProtocolTag = ProtocolTag::new(254, 3);
    pub const FRAGMENT_MESSAGE_RESPONSE: ProtocolTag = ProtocolTag::new(254, 4);
    pub const FRAGMENT_SEND_COMPLETE: ProtocolTag = ProtocolTag::new(254, 5);
    pub const FRAGMENT_RETRY_SEND: ProtocolTag = ProtocolTag::new(254, 6);
    pub const FRAGMENT_SEND_STOP: ProtocolTag = ProtocolTag::new(254, 7);
    /// Not part of the original tag set; assigned the next free minor
    /// number on fragment major byte 254.
    pub const FRAGMENT_SEND_VERIFY_COMPLETE: ProtocolTag = ProtocolTag::new(254, 8);
}
