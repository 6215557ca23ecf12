//! Protocol factory: maps a tag to a constructed packet.
//!
//! Grounded on reliudp's implicit factory — `Packet::from_header`/
//! `compute_packet_meta` in `udp_packet.rs`, which switches on the
//! `(frag_id, frag_total)` sentinel to build the right variant. This crate
//! makes that mapping an explicit, configurable, cheaply-`Clone`-able handle
//! instead of a free function, since envelope packets need to carry one
//! recursively (a fixed-point self-reference).

use std::sync::Arc;

use crate::codec::ProtocolTag;
use crate::error::CodecResult;
use crate::external::cipher::CipherFactory;
use crate::packet::AnyPacket;

/// Configuration bundle threaded through packet decoding.
///
/// `chained` is the sub-factory envelope packets use to decode their inner
/// packet; when unset, a factory chains to itself (`sub_factory()` returns
/// `self`) as plain reference return rather than a cyclic `Arc<Self>`.
#[derive(Clone, Default)]
pub struct PacketFactory {
    pub stream_preferred: bool,
    chained: Option<Arc<PacketFactory>>,
    pub cipher_factory: Option<Arc<dyn CipherFactory>>,
    pub seed_packet: Option<Arc<AnyPacket>>,
}

impl std::fmt::Debug for PacketFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketFactory")
            .field("stream_preferred", &self.stream_preferred)
            .field("has_chained", &self.chained.is_some())
            .field("has_cipher_factory", &self.cipher_factory.is_some())
            .field("has_seed_packet", &self.seed_packet.is_some())
            .finish()
    }
}

impl PacketFactory {
    pub fn new() -> Self {
        PacketFactory { stream_preferred: false, chained: None, cipher_factory: None, seed_packet: None }
    }

    pub fn with_stream_preferred(mut self, stream_preferred: bool) -> Self {
        self.stream_preferred = stream_preferred;
        self
    }

    pub fn with_chained(mut self, chained: PacketFactory) -> Self {
        self.chained = Some(Arc::new(chained));
        self
    }

    pub fn with_cipher_factory(mut self, cipher_factory: Arc<dyn CipherFactory>) -> Self {
        self.cipher_factory = Some(cipher_factory);
        self
    }

    pub fn with_seed_packet(mut self, seed: AnyPacket) -> Self {
        self.seed_packet = Some(Arc::new(seed));
        self
    }

    /// The factory envelope packets should use to decode their inner
    /// packet: the explicit chained factory if one was configured,
    /// otherwise this factory itself.
    pub fn sub_factory(&self) -> &PacketFactory {
        match &self.chained {
            Some(chained) => chained,
            None => self,
        }
    }

    /// `Encrypted` is only produced (on decode) or accepted (on encode) when
    /// a cipher factory is configured.
    pub fn has_cipher_factory(&self) -> bool {
        self.cipher_factory.is_some()
    }

    pub fn decode(&self, tag: ProtocolTag, payload: &[u8]) -> CodecResult<Option<AnyPacket>> {
        AnyPacket::decode(tag, payload, self)
    }
}
