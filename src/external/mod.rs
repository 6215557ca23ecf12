//! External collaborator contracts named at their boundaries: the cipher
//! factory backing `Encrypted`/`NetworkEncryptionCipher`, and the digest
//! provider backing the packet loader's long-frame trailer.

pub mod cipher;
pub mod digest;

pub use cipher::{AesGcmCipherFactory, CipherFactory, CipherSession};
pub use digest::{Crc32Digest, DigestProvider, Sha256Digest};
