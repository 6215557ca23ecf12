//! Signalling packets outside the fragment protocol proper (protocol tag
//! major byte 255). Grounded on reliudp's `Packet::Syn`/`SynAck` pattern
//! in `udp_packet.rs` — a small, fixed vocabulary of connection- and
//! negotiation-level messages distinguished purely by tag.

use crate::codec::primitives::*;
use crate::codec::tag::tags;
use crate::codec::ProtocolTag;
use crate::error::{CodecError, CodecResult};

/// A UTF-8 identifier the peer announces itself with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkIdentifier {
    pub id: String,
}

impl NetworkIdentifier {
    pub fn new(id: impl Into<String>) -> Self {
        NetworkIdentifier { id: id.into() }
    }

    pub fn tag(&self) -> ProtocolTag {
        tags::NETWORK_IDENTIFIER
    }

    pub fn is_valid(&self) -> bool {
        true
    }

    pub fn save_payload(&self) -> CodecResult<Vec<u8>> {
        let mut buf = Vec::new();
        buf.extend_from_slice(self.id.as_bytes());
        Ok(buf)
    }

    pub fn load_payload(bytes: &[u8]) -> CodecResult<Self> {
        Ok(NetworkIdentifier { id: std::str::from_utf8(bytes)?.to_owned() })
    }
}

/// Signals whether an SSL/TLS upgrade was accepted. `ack` is `None` until the
/// peer has answered — modeled as `Option<bool>` rather than a boxed
/// tri-state boolean, with an explicit validity predicate below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkSslUpgrade {
    pub ack: Option<bool>,
}

impl NetworkSslUpgrade {
    pub fn new(ack: Option<bool>) -> Self {
        NetworkSslUpgrade { ack }
    }

    pub fn tag(&self) -> ProtocolTag {
        tags::NETWORK_SSL_UPGRADE
    }

    pub fn is_valid(&self) -> bool {
        self.ack.is_some()
    }

    pub fn save_payload(&self) -> CodecResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(1);
        write_bool(&mut buf, self.ack.unwrap_or(false))?;
        Ok(buf)
    }

    pub fn load_payload(bytes: &[u8]) -> CodecResult<Self> {
        if bytes.len() != 1 {
            return Err(CodecError::WrongPayloadLength { expected: 1, got: bytes.len() });
        }
        let mut cursor = bytes;
        let ack = read_bool(&mut cursor)?;
        Ok(NetworkSslUpgrade { ack: Some(ack) })
    }
}

/// Negotiates (or acknowledges) a switch to encrypted/plain traffic, and
/// whether the encrypted body will itself be base64-wrapped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkEncryptionUpgrade {
    pub ack: Option<bool>,
    pub is_upgrade: bool,
    pub uses_base64: bool,
    pub cipher_settings: Option<Vec<u8>>,
}

impl NetworkEncryptionUpgrade {
    pub fn new(ack: Option<bool>, is_upgrade: bool, uses_base64: bool, cipher_settings: Option<Vec<u8>>) -> Self {
        NetworkEncryptionUpgrade { ack, is_upgrade, uses_base64, cipher_settings }
    }

    pub fn tag(&self) -> ProtocolTag {
        tags::NETWORK_ENCRYPTION_UPGRADE
    }

    pub fn is_valid(&self) -> bool {
        self.ack.is_some()
    }

    pub fn save_payload(&self) -> CodecResult<Vec<u8>> {
        let mut buf = Vec::new();
        write_bool(&mut buf, self.ack.unwrap_or(false))?;
        let flags: u8 = (self.is_upgrade as u8) | ((self.uses_base64 as u8) << 1);
        buf.push(flags);
        if let Some(settings) = &self.cipher_settings {
            buf.extend_from_slice(settings);
        }
        Ok(buf)
    }

    pub fn load_payload(bytes: &[u8]) -> CodecResult<Self> {
        if bytes.len() < 2 {
            return Err(CodecError::WrongPayloadLength { expected: 2, got: bytes.len() });
        }
        let mut cursor = bytes;
        let ack = read_bool(&mut cursor)?;
        let flags = read_byte(&mut cursor)?;
        let is_upgrade = flags & 0b01 != 0;
        let uses_base64 = flags & 0b10 != 0;
        let rest = cursor;
        let cipher_settings = if rest.is_empty() { None } else { Some(rest.to_vec()) };
        Ok(NetworkEncryptionUpgrade { ack: Some(ack), is_upgrade, uses_base64, cipher_settings })
    }
}

/// Negotiates the ordered list of cipher names the sender is willing (or has
/// agreed) to use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkEncryptionCipher {
    pub ack: Option<bool>,
    pub cipher_names: Vec<String>,
}

impl NetworkEncryptionCipher {
    pub fn new(ack: Option<bool>, cipher_names: Vec<String>) -> Self {
        NetworkEncryptionCipher { ack, cipher_names }
    }

    pub fn tag(&self) -> ProtocolTag {
        tags::NETWORK_ENCRYPTION_CIPHER
    }

    pub fn is_valid(&self) -> bool {
        self.ack.is_some()
    }

    pub fn save_payload(&self) -> CodecResult<Vec<u8>> {
        let mut buf = Vec::new();
        write_bool(&mut buf, self.ack.unwrap_or(false))?;
        write_u32_plain(&mut buf, self.cipher_names.len() as u32)?;
        for name in &self.cipher_names {
            write_utf8(&mut buf, name)?;
        }
        Ok(buf)
    }

    pub fn load_payload(bytes: &[u8]) -> CodecResult<Self> {
        let mut cursor = bytes;
        let ack = read_bool(&mut cursor)?;
        let count = read_u32_plain(&mut cursor)?;
        let mut cipher_names = Vec::with_capacity(count as usize);
        for _ in 0..count {
            cipher_names.push(read_utf8(&mut cursor)?);
        }
        Ok(NetworkEncryptionCipher { ack: Some(ack), cipher_names })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_roundtrip() {
        let p = NetworkIdentifier::new("abc");
        let bytes = p.save_payload().unwrap();
        assert_eq!(NetworkIdentifier::load_payload(&bytes).unwrap(), p);
    }

    #[test]
    fn ssl_upgrade_unset_is_invalid() {
        let p = NetworkSslUpgrade::new(None);
        assert!(!p.is_valid());
    }

    #[test]
    fn encryption_upgrade_roundtrip_with_settings() {
        let p = NetworkEncryptionUpgrade::new(Some(true), true, false, Some(vec![1, 2, 3]));
        let bytes = p.save_payload().unwrap();
        assert_eq!(NetworkEncryptionUpgrade::load_payload(&bytes).unwrap(), p);
    }

    #[test]
    fn encryption_upgrade_roundtrip_without_settings() {
        let p = NetworkEncryptionUpgrade::new(Some(false), false, true, None);
        let bytes = p.save_payload().unwrap();
        assert_eq!(NetworkEncryptionUpgrade::load_payload(&bytes).unwrap(), p);
    }

    #[test]
    fn encryption_cipher_roundtrip() {
        let p = NetworkEncryptionCipher::new(Some(true), vec!["aes-256-gcm".into(), "chacha20".into()]);
        let bytes = p.save_payload().unwrap();
        assert_eq!(NetworkEncryptionCipher::load_payload(&bytes).unwrap(), p);
    }
}
