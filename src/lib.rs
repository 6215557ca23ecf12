//! relipak: a fragmentation-and-framing protocol and packet codec library.
//!
//! This crate splits oversized messages into fragments, tracks their
//! delivery, and reassembles them on the other end, while also providing a
//! small closed set of wire packets (envelopes, network negotiation,
//! fragment control) and the codec primitives to frame and unframe them.
//! It does not own a socket or a connection handshake itself — see
//! [`marshal::UdpMarshal`] for a minimal demonstration of wiring the engines
//! to a real `UdpSocket`.
//!
//! # Examples
//!
//! ## Server
//!
//! ```rust,no_run
//! use relipak::{FragmentationOptions, UdpMarshal};
//!
//! fn main() -> std::io::Result<()> {
//!     let marshal = UdpMarshal::bind("0.0.0.0:61244", "127.0.0.1:61245", FragmentationOptions::default())?;
//!
//!     loop {
//!         for packet in marshal.tick()? {
//!             println!("Server: received {:?}", packet);
//!         }
//!         std::thread::sleep(std::time::Duration::from_millis(5));
//!     }
//! }
//! ```
//!
//! ## Client
//!
//! ```rust,no_run
//! use relipak::{FragmentationOptions, UdpMarshal};
//!
//! fn main() -> std::io::Result<()> {
//!     let marshal = UdpMarshal::connect("127.0.0.1:61244", FragmentationOptions::default())?;
//!     let really_big_message: Vec<u8> = (0..200_000u32).map(|v| v as u8).collect();
//!     marshal.send(really_big_message)?;
//!
//!     for _ in 0..300 {
//!         for packet in marshal.tick()? {
//!             println!("Client: received {:?}", packet);
//!         }
//!         std::thread::sleep(std::time::Duration::from_millis(5));
//!     }
//!     Ok(())
//! }
//! ```

pub mod codec;
mod consts;
pub mod error;
pub mod external;
pub mod factory;
pub mod fragment;
pub mod loader;
pub mod marshal;
pub mod packet;

pub use error::{CodecError, CodecResult, ConfigError, ConfigResult, FragmentError, FragmentResult};
pub use external::{AesGcmCipherFactory, CipherFactory, CipherSession, Crc32Digest, DigestProvider, Sha256Digest};
pub use factory::PacketFactory;
pub use fragment::{FragmentReceiver, FragmentSender, FragmentationOptions};
pub use loader::PacketLoader;
pub use marshal::UdpMarshal;
pub use packet::AnyPacket;
