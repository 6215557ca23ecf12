//! Error types for the codec, the fragmentation protocol and its configuration.
//!
//! The original `reliudp` crate this was adapted from mixed bespoke
//! non-`std::error::Error` enums with outright `panic!` for conditions
//! treated here as ordinary, recoverable failures. Every failure a caller
//! can trigger is surfaced as a `Result` instead.

use thiserror::Error;

/// Failures from the primitive codec and the packet loader (framing).
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unexpected end of input: wanted {wanted} bytes, stream ended")]
    UnexpectedEnd { wanted: usize },

    #[error("declared frame body length is negative: {0}")]
    NegativeLength(i32),

    #[error("payload length mismatch for fixed-size packet: expected {expected}, got {got}")]
    WrongPayloadLength { expected: usize, got: usize },

    #[error("invalid boolean byte {0:#x}, expected 0x00 or 0x01")]
    InvalidBool(u8),

    #[error("invalid UTF-8 string payload: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("invalid base64 payload: {0}")]
    InvalidBase64(String),

    #[error("packet failed its validity predicate after decoding")]
    InvalidPacket,

    #[error("cipher operation failed: {0}")]
    CipherFailure(String),

    #[error("I/O error while reading or writing a frame: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures from fragment sender/receiver engines and their public API.
#[derive(Debug, Error)]
pub enum FragmentError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Failures from validating a [`crate::fragment::FragmentationOptions`] bundle.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("maximumFragmentAge must be >= 2 seconds, got {0}")]
    MaximumFragmentAgeTooSmall(u64),

    #[error("fragmentationSplitSize must be >= 1, got {0}")]
    SplitSizeTooSmall(usize),

    #[error("emptySendsTillForced must be >= 1, got {0}")]
    EmptySendsTillForcedTooSmall(u32),

    #[error("equalityVerifyFragments requires verifyFragments to be enabled")]
    EqualityVerifyRequiresVerify,
}

pub type CodecResult<T> = Result<T, CodecError>;
pub type FragmentResult<T> = Result<T, FragmentError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
