//! Envelope packets whose payload is a transformation of another packet's
//! framed form: `Base64` (base64 of the inner frame) and `Encrypted`
//! (ciphertext of the inner frame plus an optional trailing password).
//!
//! reliudp has no notion of an envelope packet at all — `udp_packet.rs`
//! only ever frames one flat `Packet` per datagram. These two variants are
//! grounded on the recursive tagged-sum shape of `crate::packet::AnyPacket`
//! itself: an envelope just re-enters `AnyPacket::decode_frame`/
//! `encode_frame` on a byte range it has unwrapped.

use std::cell::RefCell;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::codec::primitives::*;
use crate::codec::tag::tags;
use crate::codec::ProtocolTag;
use crate::error::{CodecError, CodecResult};
use crate::external::cipher::CipherFactory;
use crate::factory::PacketFactory;
use crate::packet::AnyPacket;

/// Base64 envelope: the payload is the base64 text of the inner packet's
/// framed (tag + length + payload) form.
///
/// `use_cache` gates retention of the encoded text across `save_payload`
/// calls; any setter that replaces the inner packet invalidates it.
#[derive(Debug, Clone)]
pub struct Base64Packet {
    inner: Box<AnyPacket>,
    pub use_cache: bool,
    cache: RefCell<Option<String>>,
}

impl PartialEq for Base64Packet {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl Base64Packet {
    pub fn new(inner: AnyPacket) -> Self {
        Base64Packet { inner: Box::new(inner), use_cache: false, cache: RefCell::new(None) }
    }

    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn inner(&self) -> &AnyPacket {
        &self.inner
    }

    pub fn set_inner(&mut self, inner: AnyPacket) {
        self.inner = Box::new(inner);
        self.cache.replace(None);
    }

    pub fn tag(&self) -> ProtocolTag {
        tags::BASE64
    }

    pub fn is_valid(&self) -> bool {
        self.inner.is_valid()
    }

    /// `ceil(inner_framed_len / 3) * 4`, the base64 size computation,
    /// usable by callers that need to pre-declare the frame length without
    /// actually encoding.
    pub fn encoded_size(&self) -> CodecResult<usize> {
        let inner_len = self.inner.encode_frame()?.len();
        Ok(((inner_len + 2) / 3) * 4)
    }

    pub fn save_payload(&self) -> CodecResult<Vec<u8>> {
        if self.use_cache {
            if let Some(cached) = self.cache.borrow().as_ref() {
                return Ok(cached.as_bytes().to_vec());
            }
        }
        let framed = self.inner.encode_frame()?;
        let encoded = BASE64.encode(framed);
        if self.use_cache {
            self.cache.replace(Some(encoded.clone()));
        }
        Ok(encoded.into_bytes())
    }

    pub fn load_payload(bytes: &[u8], factory: &PacketFactory) -> CodecResult<Self> {
        let text = std::str::from_utf8(bytes)?;
        let framed = BASE64
            .decode(text)
            .map_err(|e| CodecError::InvalidBase64(e.to_string()))?;
        let (inner, _consumed) = AnyPacket::decode_frame(&framed, factory.sub_factory())?;
        Ok(Base64Packet { inner: Box::new(inner), use_cache: false, cache: RefCell::new(None) })
    }
}

/// `Encrypted` envelope: ciphertext of (inner framed form ∥ optional
/// trailing password), plus a settings blob the peer needs to reconstruct a
/// decrypting session. Only constructible with a configured cipher factory:
/// `Encrypted` is only produced when one is available.
#[derive(Clone)]
pub struct EncryptedPacket {
    inner: Box<AnyPacket>,
    trailing_password: Option<String>,
    pub use_cache: bool,
    cipher_factory: Arc<dyn CipherFactory>,
    cache: RefCell<Option<EncryptedCache>>,
}

#[derive(Clone)]
struct EncryptedCache {
    trailer_flag: bool,
    settings: Vec<u8>,
    ciphertext: Vec<u8>,
}

impl std::fmt::Debug for EncryptedPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedPacket")
            .field("inner", &self.inner)
            .field("trailing_password_set", &self.trailing_password.is_some())
            .field("use_cache", &self.use_cache)
            .finish()
    }
}

impl PartialEq for EncryptedPacket {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner && self.trailing_password == other.trailing_password
    }
}

impl EncryptedPacket {
    pub fn new(inner: AnyPacket, cipher_factory: Arc<dyn CipherFactory>) -> Self {
        EncryptedPacket {
            inner: Box::new(inner),
            trailing_password: None,
            use_cache: false,
            cipher_factory,
            cache: RefCell::new(None),
        }
    }

    pub fn with_trailing_password(mut self, password: impl Into<String>) -> Self {
        self.trailing_password = Some(password.into());
        self.cache.replace(None);
        self
    }

    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn inner(&self) -> &AnyPacket {
        &self.inner
    }

    pub fn set_inner(&mut self, inner: AnyPacket) {
        self.inner = Box::new(inner);
        self.cache.replace(None);
    }

    pub fn tag(&self) -> ProtocolTag {
        tags::ENCRYPTED
    }

    pub fn is_valid(&self) -> bool {
        self.inner.is_valid()
    }

    fn cache_is_valid(&self) -> bool {
        self.use_cache && self.cache.borrow().is_some() && !self.cipher_factory.settings_modified()
    }

    pub fn save_payload(&self) -> CodecResult<Vec<u8>> {
        if !self.cache_is_valid() {
            let framed = self.inner.encode_frame()?;
            let mut plaintext = framed;
            if let Some(password) = &self.trailing_password {
                plaintext.extend_from_slice(password.as_bytes());
            }
            let (mut session, settings) = self.cipher_factory.construct_encrypt()?;
            let ciphertext = session.encrypt(&plaintext)?;
            let entry = EncryptedCache { trailer_flag: self.trailing_password.is_some(), settings, ciphertext };
            if self.use_cache {
                self.cache.replace(Some(entry));
            } else {
                return Self::render(&entry, self.trailing_password.as_deref());
            }
        }
        let cache = self.cache.borrow();
        let entry = cache.as_ref().expect("cache populated above");
        Self::render(entry, self.trailing_password.as_deref())
    }

    fn render(entry: &EncryptedCache, trailing_password: Option<&str>) -> CodecResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(9 + entry.settings.len() + entry.ciphertext.len());
        write_bool(&mut buf, entry.trailer_flag)?;
        write_u32_plain(&mut buf, entry.settings.len() as u32)?;
        buf.extend_from_slice(&entry.settings);
        if entry.trailer_flag {
            let trailer_len = trailing_password.map(|p| p.as_bytes().len()).unwrap_or(0);
            write_u32_plain(&mut buf, trailer_len as u32)?;
        }
        buf.extend_from_slice(&entry.ciphertext);
        Ok(buf)
    }

    pub fn load_payload(bytes: &[u8], factory: &PacketFactory) -> CodecResult<Self> {
        let cipher_factory = factory
            .cipher_factory
            .clone()
            .ok_or_else(|| CodecError::CipherFailure("no cipher factory configured to decode Encrypted".into()))?;

        let mut cursor = bytes;
        let trailer_flag = read_bool(&mut cursor)?;
        let settings = read_bytes(&mut cursor)?;
        let trailer_len = if trailer_flag { Some(read_u32_plain(&mut cursor)? as usize) } else { None };
        let ciphertext = cursor.to_vec();

        let mut session = cipher_factory.construct_decrypt(&settings)?;
        let plaintext = session.decrypt(&ciphertext)?;

        let (inner, consumed) = AnyPacket::decode_frame(&plaintext, factory.sub_factory())?;
        let trailing_password = match trailer_len {
            Some(0) | None => None,
            Some(len) => {
                let rest = &plaintext[consumed..];
                if rest.len() < len {
                    return Err(CodecError::WrongPayloadLength { expected: len, got: rest.len() });
                }
                Some(std::str::from_utf8(&rest[..len])?.to_owned())
            }
        };

        Ok(EncryptedPacket {
            inner: Box::new(inner),
            trailing_password,
            use_cache: false,
            cipher_factory,
            cache: RefCell::new(None),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::cipher::AesGcmCipherFactory;
    use crate::packet::network::NetworkIdentifier;

    #[test]
    fn base64_roundtrip() {
        let inner = AnyPacket::NetworkIdentifier(NetworkIdentifier::new("abc"));
        let factory = PacketFactory::new();
        let packet = Base64Packet::new(inner.clone());
        let payload = packet.save_payload().unwrap();
        let decoded = Base64Packet::load_payload(&payload, &factory).unwrap();
        assert_eq!(*decoded.inner(), inner);
    }

    #[test]
    fn base64_cache_reused_across_calls() {
        let inner = AnyPacket::NetworkIdentifier(NetworkIdentifier::new("abc"));
        let packet = Base64Packet::new(inner).with_cache(true);
        let first = packet.save_payload().unwrap();
        let second = packet.save_payload().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn encrypted_roundtrip_without_trailer() {
        let cipher_factory: Arc<dyn CipherFactory> = Arc::new(AesGcmCipherFactory::new([3u8; 32]));
        let inner = AnyPacket::NetworkIdentifier(NetworkIdentifier::new("secret-ish"));
        let factory = PacketFactory::new().with_cipher_factory(cipher_factory.clone());
        let packet = EncryptedPacket::new(inner.clone(), cipher_factory);
        let payload = packet.save_payload().unwrap();
        let decoded = EncryptedPacket::load_payload(&payload, &factory).unwrap();
        assert_eq!(*decoded.inner(), inner);
        assert!(decoded.trailing_password.is_none());
    }

    #[test]
    fn encrypted_roundtrip_with_trailing_password() {
        let cipher_factory: Arc<dyn CipherFactory> = Arc::new(AesGcmCipherFactory::new([9u8; 32]));
        let inner = AnyPacket::NetworkIdentifier(NetworkIdentifier::new("hello"));
        let factory = PacketFactory::new().with_cipher_factory(cipher_factory.clone());
        let packet = EncryptedPacket::new(inner, cipher_factory).with_trailing_password("hunter2");
        let payload = packet.save_payload().unwrap();
        let decoded = EncryptedPacket::load_payload(&payload, &factory).unwrap();
        assert_eq!(decoded.trailing_password.as_deref(), Some("hunter2"));
    }

    #[test]
    fn decode_without_cipher_factory_fails() {
        let factory = PacketFactory::new();
        let err = EncryptedPacket::load_payload(&[0, 0, 0, 0, 0], &factory).unwrap_err();
        assert!(matches!(err, CodecError::CipherFailure(_)));
    }
}
